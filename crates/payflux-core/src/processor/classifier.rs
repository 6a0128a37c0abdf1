//! Processor failure classification
//!
//! Maps numeric processor response-reason codes and transport failures to a
//! stable internal taxonomy carrying retryability policy.

use serde::{Deserialize, Serialize};

/// Internal failure taxonomy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    IdempotencyConflict,
    CardDeclined,
    InsufficientFunds,
    AvsMismatch,
    CvvMismatch,
    DuplicateTransaction,
    InvalidMerchant,
    InvalidAmount,
    ProcessingError,
    VelocityLimit,
    RiskManagement,
    NetworkError,
    TimeoutError,
    SignatureError,
    RateLimited,
    PaymentFailed,
}

impl ErrorCategory {
    /// Whether a retry can ever succeed for this category
    pub fn retryable(&self) -> bool {
        use ErrorCategory::*;
        match self {
            Validation | NotFound | IdempotencyConflict | DuplicateTransaction
            | InvalidMerchant | InvalidAmount | RiskManagement | SignatureError => false,
            CardDeclined | InsufficientFunds | AvsMismatch | CvvMismatch | ProcessingError
            | VelocityLimit | NetworkError | TimeoutError | RateLimited | PaymentFailed => true,
        }
    }

    fn retry_after_seconds(&self) -> u64 {
        use ErrorCategory::*;
        match self {
            NetworkError | TimeoutError => 30,
            ProcessingError => 60,
            VelocityLimit => 300,
            _ => 10,
        }
    }

    fn max_retries(&self) -> u32 {
        use ErrorCategory::*;
        match self {
            NetworkError | TimeoutError => 3,
            ProcessingError => 2,
            VelocityLimit => 1,
            _ => 1,
        }
    }
}

/// Classification of a single failure
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub suggested_action: &'static str,
    pub retry_after_seconds: u64,
    pub max_retries: u32,
}

impl Classification {
    fn new(category: ErrorCategory, suggested_action: &'static str) -> Self {
        Self {
            category,
            retryable: category.retryable(),
            suggested_action,
            retry_after_seconds: category.retry_after_seconds(),
            max_retries: category.max_retries(),
        }
    }
}

/// Classify a numeric processor response-reason code
pub fn classify_response_code(code: u32) -> Classification {
    use ErrorCategory::*;
    match code {
        2 => Classification::new(CardDeclined, "ask the customer for another card"),
        3 => Classification::new(ProcessingError, "retry the transaction"),
        4 => Classification::new(CardDeclined, "the issuer requested card pickup"),
        5 => Classification::new(InvalidAmount, "correct the amount"),
        6 => Classification::new(Validation, "correct the card number"),
        7 => Classification::new(Validation, "correct the expiration date"),
        8 => Classification::new(CardDeclined, "the card has expired"),
        11 => Classification::new(DuplicateTransaction, "do not resubmit"),
        13 => Classification::new(InvalidMerchant, "check merchant credentials"),
        16 => Classification::new(NotFound, "the transaction was not found"),
        17 => Classification::new(CardDeclined, "card type not accepted"),
        19 | 20 => Classification::new(ProcessingError, "retry shortly"),
        27 => Classification::new(AvsMismatch, "verify the billing address"),
        28 => Classification::new(CardDeclined, "card type not accepted"),
        33 => Classification::new(Validation, "a required field is missing"),
        37 => Classification::new(Validation, "correct the card number"),
        44 => Classification::new(CvvMismatch, "verify the card code"),
        45 => Classification::new(AvsMismatch, "address and card code checks failed"),
        78 => Classification::new(CvvMismatch, "correct the card code"),
        92 => Classification::new(ProcessingError, "the gateway gave no response"),
        141 => Classification::new(RiskManagement, "rejected by the fraud filter"),
        165 => Classification::new(CvvMismatch, "rejected by the card code filter"),
        200 | 201 => Classification::new(ProcessingError, "processor error, retry shortly"),
        250 | 251 => Classification::new(RiskManagement, "blocked by the fraud filter"),
        252 => Classification::new(RiskManagement, "held for manual review"),
        _ => Classification::new(PaymentFailed, "retry or contact support"),
    }
}

/// Classify a transport failure from the HTTP client
pub fn classify_transport(error: &reqwest::Error) -> Classification {
    if error.is_timeout() {
        Classification::new(ErrorCategory::TimeoutError, "retry after the deadline")
    } else if error.is_connect() {
        Classification::new(ErrorCategory::NetworkError, "retry after connectivity recovers")
    } else if error.status().map_or(false, |s| s.as_u16() == 429) {
        Classification::new(ErrorCategory::RateLimited, "back off and retry")
    } else {
        Classification::new(ErrorCategory::NetworkError, "retry after connectivity recovers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decline_codes() {
        for code in [2, 4, 8, 17, 28] {
            let c = classify_response_code(code);
            assert_eq!(c.category, ErrorCategory::CardDeclined, "code {}", code);
            assert!(c.retryable);
        }
    }

    #[test]
    fn test_validation_codes_not_retryable() {
        for code in [6, 7, 33, 37] {
            let c = classify_response_code(code);
            assert_eq!(c.category, ErrorCategory::Validation);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_duplicate_and_merchant() {
        assert_eq!(classify_response_code(11).category, ErrorCategory::DuplicateTransaction);
        assert!(!classify_response_code(11).retryable);
        assert_eq!(classify_response_code(13).category, ErrorCategory::InvalidMerchant);
        assert_eq!(classify_response_code(16).category, ErrorCategory::NotFound);
    }

    #[test]
    fn test_processing_errors_retry_policy() {
        for code in [3, 19, 20, 92, 200, 201] {
            let c = classify_response_code(code);
            assert_eq!(c.category, ErrorCategory::ProcessingError, "code {}", code);
            assert_eq!(c.retry_after_seconds, 60);
            assert_eq!(c.max_retries, 2);
        }
    }

    #[test]
    fn test_risk_codes() {
        for code in [141, 250, 251, 252] {
            let c = classify_response_code(code);
            assert_eq!(c.category, ErrorCategory::RiskManagement);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_avs_cvv_codes() {
        assert_eq!(classify_response_code(27).category, ErrorCategory::AvsMismatch);
        assert_eq!(classify_response_code(45).category, ErrorCategory::AvsMismatch);
        assert_eq!(classify_response_code(44).category, ErrorCategory::CvvMismatch);
        assert_eq!(classify_response_code(78).category, ErrorCategory::CvvMismatch);
        assert_eq!(classify_response_code(165).category, ErrorCategory::CvvMismatch);
    }

    #[test]
    fn test_fallback() {
        let c = classify_response_code(9999);
        assert_eq!(c.category, ErrorCategory::PaymentFailed);
        assert!(c.retryable);
        assert_eq!(c.retry_after_seconds, 10);
        assert_eq!(c.max_retries, 1);
    }

    #[test]
    fn test_velocity_policy() {
        assert_eq!(ErrorCategory::VelocityLimit.retry_after_seconds(), 300);
        assert_eq!(ErrorCategory::VelocityLimit.max_retries(), 1);
        assert!(ErrorCategory::VelocityLimit.retryable());
    }

    #[test]
    fn test_network_policy() {
        assert_eq!(ErrorCategory::NetworkError.retry_after_seconds(), 30);
        assert_eq!(ErrorCategory::TimeoutError.max_retries(), 3);
    }
}
