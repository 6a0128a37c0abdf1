//! Payment method validation

use chrono::{Datelike, Utc};

use crate::error::ValidationErrors;
use crate::models::PaymentMethodType;
use crate::payment::PaymentMethodInput;
use crate::Result;

lazy_static::lazy_static! {
    static ref CARD_NUMBER: regex::Regex = regex::Regex::new(r"^\d{13,19}$").unwrap();
    static ref CVV: regex::Regex = regex::Regex::new(r"^\d{3,4}$").unwrap();
}

/// Validate a payment method ahead of any processor contact.
///
/// Card instruments require a 13-19 digit PAN, a 3-4 digit CVV, an expiry
/// no earlier than the current month, and a cardholder name. Tokenized
/// instruments only require the token itself.
pub fn validate_payment_method(method: &PaymentMethodInput) -> Result<()> {
    let mut errors = ValidationErrors::new();

    match method.method_type {
        PaymentMethodType::Card => {
            match &method.card_number {
                Some(number) => {
                    let stripped: String = number.chars().filter(|c| !c.is_whitespace()).collect();
                    if !CARD_NUMBER.is_match(&stripped) {
                        errors.add("card_number", "must be 13-19 digits");
                    }
                }
                None => errors.add("card_number", "required for card payments"),
            }

            match &method.cvv {
                Some(cvv) if CVV.is_match(cvv) => {}
                Some(_) => errors.add("cvv", "must be 3-4 digits"),
                None => errors.add("cvv", "required for card payments"),
            }

            validate_expiry(method.expiry_month, method.expiry_year, &mut errors);

            match &method.cardholder_name {
                Some(name) if !name.trim().is_empty() => {}
                _ => errors.add("cardholder_name", "required for card payments"),
            }
        }
        PaymentMethodType::Token | PaymentMethodType::BankAccount => {
            match &method.token {
                Some(token) if !token.is_empty() => {}
                _ => errors.add("token", "required for tokenized payments"),
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into_error())
    }
}

fn validate_expiry(month: Option<u32>, year: Option<u32>, errors: &mut ValidationErrors) {
    let month = match month {
        Some(m) if (1..=12).contains(&m) => m,
        Some(_) => {
            errors.add("expiry_month", "must be between 1 and 12");
            return;
        }
        None => {
            errors.add("expiry_month", "required for card payments");
            return;
        }
    };

    let year = match year {
        Some(y) => y,
        None => {
            errors.add("expiry_year", "required for card payments");
            return;
        }
    };

    let now = Utc::now();
    let (current_year, current_month) = (now.year() as u32, now.month());
    if (year, month) < (current_year, current_month) {
        errors.add("expiry_year", "card has expired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethodType;

    fn card() -> PaymentMethodInput {
        PaymentMethodInput {
            method_type: PaymentMethodType::Card,
            card_number: Some("4111111111111111".to_string()),
            expiry_month: Some(12),
            expiry_year: Some(2049),
            cvv: Some("123".to_string()),
            cardholder_name: Some("Jo Bloggs".to_string()),
            token: None,
        }
    }

    #[test]
    fn test_valid_card() {
        assert!(validate_payment_method(&card()).is_ok());
    }

    #[test]
    fn test_card_number_with_spaces_is_accepted() {
        let mut method = card();
        method.card_number = Some("4111 1111 1111 1111".to_string());
        assert!(validate_payment_method(&method).is_ok());
    }

    #[test]
    fn test_short_card_number_rejected() {
        let mut method = card();
        method.card_number = Some("41111111".to_string());
        assert!(validate_payment_method(&method).is_err());
    }

    #[test]
    fn test_non_numeric_card_rejected() {
        let mut method = card();
        method.card_number = Some("4111-1111-1111-1111".to_string());
        assert!(validate_payment_method(&method).is_err());
    }

    #[test]
    fn test_bad_cvv_rejected() {
        let mut method = card();
        method.cvv = Some("12".to_string());
        assert!(validate_payment_method(&method).is_err());

        method.cvv = Some("12a".to_string());
        assert!(validate_payment_method(&method).is_err());

        method.cvv = None;
        assert!(validate_payment_method(&method).is_err());
    }

    #[test]
    fn test_expired_card_rejected() {
        let mut method = card();
        method.expiry_year = Some(2020);
        method.expiry_month = Some(1);
        let err = validate_payment_method(&method).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_current_month_is_valid() {
        let now = Utc::now();
        let mut method = card();
        method.expiry_year = Some(now.year() as u32);
        method.expiry_month = Some(now.month());
        assert!(validate_payment_method(&method).is_ok());
    }

    #[test]
    fn test_invalid_month_rejected() {
        let mut method = card();
        method.expiry_month = Some(13);
        assert!(validate_payment_method(&method).is_err());
    }

    #[test]
    fn test_missing_name_rejected() {
        let mut method = card();
        method.cardholder_name = Some("   ".to_string());
        assert!(validate_payment_method(&method).is_err());
    }

    #[test]
    fn test_token_method() {
        let method = PaymentMethodInput {
            method_type: PaymentMethodType::Token,
            card_number: None,
            expiry_month: None,
            expiry_year: None,
            cvv: None,
            cardholder_name: None,
            token: Some("tok_abc".to_string()),
        };
        assert!(validate_payment_method(&method).is_ok());

        let empty = PaymentMethodInput { token: Some(String::new()), ..method };
        assert!(validate_payment_method(&empty).is_err());
    }
}
