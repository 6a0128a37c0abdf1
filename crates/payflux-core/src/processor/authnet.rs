//! Authorize.Net-style processor adapter
//!
//! Speaks the processor's JSON API over reqwest. The environment selects the
//! endpoint at construction time; nothing process-wide is mutated.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProcessorConfig;
use crate::processor::adapter::*;
use crate::processor::classifier::{classify_response_code, classify_transport};
use crate::{Error, Result};

pub struct AuthorizeNetAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_login_id: String,
    transaction_key: String,
}

impl AuthorizeNetAdapter {
    pub fn new(config: &ProcessorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::network(format!("failed to build processor client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.environment.base_url().to_string(),
            api_login_id: config.api_login_id.clone(),
            transaction_key: config.transaction_key.clone(),
        })
    }

    fn merchant_authentication(&self) -> serde_json::Value {
        json!({
            "name": self.api_login_id,
            "transactionKey": self.transaction_key,
        })
    }

    fn payment_value(instrument: &PaymentInstrument) -> serde_json::Value {
        match instrument {
            PaymentInstrument::Card(card) => {
                // Refund requests reference the card by last four with a
                // masked expiration; cardCode is only sent when present
                let expiration = if card.expiry_year == 0 {
                    "XXXX".to_string()
                } else {
                    format!("{:04}-{:02}", card.expiry_year, card.expiry_month)
                };
                let mut credit_card = json!({
                    "cardNumber": card.number.replace(char::is_whitespace, ""),
                    "expirationDate": expiration,
                });
                if !card.cvv.is_empty() {
                    credit_card["cardCode"] = json!(card.cvv);
                }
                json!({ "creditCard": credit_card })
            }
            PaymentInstrument::Profile { profile_id, payment_profile_id } => json!({
                "profile": {
                    "customerProfileId": profile_id,
                    "paymentProfile": { "paymentProfileId": payment_profile_id },
                }
            }),
            PaymentInstrument::Token(token) => json!({
                "opaqueData": {
                    "dataDescriptor": "COMMON.ACCEPT.INAPP.PAYMENT",
                    "dataValue": token,
                }
            }),
        }
    }

    fn billing_value(billing: &BillingContact) -> serde_json::Value {
        let mut value = json!({
            "firstName": billing.first_name,
            "lastName": billing.last_name,
        });
        if let Some(address) = &billing.address {
            value["address"] = json!(address.line1);
            value["city"] = json!(address.city);
            value["zip"] = json!(address.postal_code);
            value["country"] = json!(address.country);
            if let Some(state) = &address.state {
                value["state"] = json!(state);
            }
        }
        value
    }

    async fn post(&self, body: serde_json::Value) -> std::result::Result<serde_json::Value, reqwest::Error> {
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        response.json::<serde_json::Value>().await
    }

    /// Submit a transaction request and map the response to an [`Outcome`].
    /// Transport failures surface as transient errors so callers can leave
    /// the transaction pending for reconciliation.
    async fn submit_transaction(&self, transaction_request: serde_json::Value, ref_id: &str) -> Result<Outcome> {
        let body = json!({
            "createTransactionRequest": {
                "merchantAuthentication": self.merchant_authentication(),
                "refId": ref_id,
                "transactionRequest": transaction_request,
            }
        });

        let raw = match self.post(body).await {
            Ok(raw) => raw,
            Err(e) => {
                let classification = classify_transport(&e);
                warn!(correlation_id = %ref_id, error = %e, "processor transport failure");
                return Ok(Outcome::Error {
                    code: format!("{:?}", classification.category),
                    message: e.to_string(),
                    transient: classification.retryable,
                    external_id: None,
                });
            }
        };

        let parsed: TransactionApiResponse = serde_json::from_value(raw)?;
        Ok(Self::map_transaction_response(parsed))
    }

    fn map_transaction_response(response: TransactionApiResponse) -> Outcome {
        let Some(tx) = response.transaction_response else {
            // Gateway-level rejection without a transaction response
            let (code, message) = response
                .messages
                .message
                .first()
                .map(|m| (m.code.clone(), m.text.clone()))
                .unwrap_or_else(|| ("E00000".to_string(), "no gateway message".to_string()));
            return Outcome::Error { code, message, transient: false, external_id: None };
        };

        match tx.response_code.as_deref() {
            Some("1") => Outcome::Approved(Approval {
                external_id: tx.trans_id.unwrap_or_default(),
                auth_code: tx.auth_code,
                avs_result: tx.avs_result_code,
                cvv_result: tx.cvv_result_code,
                settle_amount: None,
            }),
            Some("2") => {
                let (code, reason) = tx.first_error("declined");
                Outcome::Declined { code, reason }
            }
            Some("4") => {
                // Held for review: treated as transient until the fraud
                // decision webhook arrives
                let (code, reason) = tx.first_error("held for review");
                Outcome::Error { code, message: reason, transient: true, external_id: tx.trans_id }
            }
            _ => {
                let (code, reason) = tx.first_error("processor error");
                let transient = code
                    .parse::<u32>()
                    .map(|c| classify_response_code(c).retryable)
                    .unwrap_or(false);
                Outcome::Error { code, message: reason, transient, external_id: tx.trans_id }
            }
        }
    }

    fn check_messages(raw: &serde_json::Value, context: &str) -> Result<()> {
        let result_code = raw
            .pointer("/messages/resultCode")
            .and_then(|v| v.as_str())
            .unwrap_or("Error");
        if result_code != "Ok" {
            let text = raw
                .pointer("/messages/message/0/text")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown gateway error");
            return Err(Error::payment(format!("{}: {}", context, text)));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessorAdapter for AuthorizeNetAdapter {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<Outcome> {
        let mut tx = json!({
            "transactionType": "authOnlyTransaction",
            "amount": request.amount.to_string(),
            "payment": Self::payment_value(&request.instrument),
        });
        if let Some(billing) = &request.billing {
            tx["billTo"] = Self::billing_value(billing);
        }
        if let Some(invoice) = &request.invoice_number {
            tx["order"] = json!({ "invoiceNumber": invoice });
        }
        debug!(correlation_id = %request.correlation_id, amount = %request.amount, "authorize");
        self.submit_transaction(tx, &request.correlation_id).await
    }

    async fn purchase(&self, request: &AuthorizationRequest) -> Result<Outcome> {
        let mut tx = json!({
            "transactionType": "authCaptureTransaction",
            "amount": request.amount.to_string(),
            "payment": Self::payment_value(&request.instrument),
        });
        if let Some(billing) = &request.billing {
            tx["billTo"] = Self::billing_value(billing);
        }
        if let Some(invoice) = &request.invoice_number {
            tx["order"] = json!({ "invoiceNumber": invoice });
        }
        debug!(correlation_id = %request.correlation_id, amount = %request.amount, "purchase");
        self.submit_transaction(tx, &request.correlation_id).await
    }

    async fn capture(&self, external_id: &str, amount: Option<Decimal>) -> Result<Outcome> {
        let mut tx = json!({
            "transactionType": "priorAuthCaptureTransaction",
            "refTransId": external_id,
        });
        if let Some(amount) = amount {
            tx["amount"] = json!(amount.to_string());
        }
        self.submit_transaction(tx, external_id).await
    }

    async fn void(&self, external_id: &str) -> Result<Outcome> {
        let tx = json!({
            "transactionType": "voidTransaction",
            "refTransId": external_id,
        });
        self.submit_transaction(tx, external_id).await
    }

    async fn refund(
        &self,
        external_id: &str,
        amount: Option<Decimal>,
        instrument: &PaymentInstrument,
    ) -> Result<Outcome> {
        let mut tx = json!({
            "transactionType": "refundTransaction",
            "refTransId": external_id,
            "payment": Self::payment_value(instrument),
        });
        if let Some(amount) = amount {
            tx["amount"] = json!(amount.to_string());
        }
        self.submit_transaction(tx, external_id).await
    }

    async fn create_customer_profile(&self, contact: &BillingContact) -> Result<String> {
        let body = json!({
            "createCustomerProfileRequest": {
                "merchantAuthentication": self.merchant_authentication(),
                "profile": {
                    "email": contact.email,
                    "description": format!("{} {}", contact.first_name, contact.last_name),
                }
            }
        });

        let raw = self.post(body).await?;
        Self::check_messages(&raw, "create customer profile")?;

        raw.get("customerProfileId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::payment("processor returned no customer profile id"))
    }

    async fn create_payment_profile(&self, profile_id: &str, card: &CardInput) -> Result<String> {
        let body = json!({
            "createCustomerPaymentProfileRequest": {
                "merchantAuthentication": self.merchant_authentication(),
                "customerProfileId": profile_id,
                "paymentProfile": {
                    "payment": Self::payment_value(&PaymentInstrument::Card(card.clone())),
                }
            }
        });

        let raw = self.post(body).await?;
        Self::check_messages(&raw, "create payment profile")?;

        raw.get("customerPaymentProfileId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::payment("processor returned no payment profile id"))
    }

    async fn create_recurring(&self, request: &RecurringRequest) -> Result<String> {
        let body = json!({
            "ARBCreateSubscriptionRequest": {
                "merchantAuthentication": self.merchant_authentication(),
                "subscription": {
                    "paymentSchedule": {
                        "interval": { "length": request.interval_days, "unit": "days" },
                        "startDate": request.start_date.format("%Y-%m-%d").to_string(),
                        "totalOccurrences": "9999",
                    },
                    "amount": request.amount.to_string(),
                    "payment": Self::payment_value(&request.instrument),
                }
            }
        });

        let raw = self.post(body).await?;
        Self::check_messages(&raw, "create recurring schedule")?;

        raw.get("subscriptionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::payment("processor returned no recurring subscription id"))
    }

    async fn cancel_recurring(&self, recurring_id: &str) -> Result<()> {
        let body = json!({
            "ARBCancelSubscriptionRequest": {
                "merchantAuthentication": self.merchant_authentication(),
                "subscriptionId": recurring_id,
            }
        });

        let raw = self.post(body).await?;
        Self::check_messages(&raw, "cancel recurring schedule")
    }

    async fn get_transaction(&self, external_id: &str) -> Result<RemoteTransaction> {
        let body = json!({
            "getTransactionDetailsRequest": {
                "merchantAuthentication": self.merchant_authentication(),
                "transId": external_id,
            }
        });

        let raw = self.post(body).await?;
        Self::check_messages(&raw, "get transaction details")?;

        let details = raw
            .get("transaction")
            .ok_or_else(|| Error::not_found(format!("transaction {} not found at processor", external_id)))?;

        let status = match details.get("transactionStatus").and_then(|v| v.as_str()) {
            Some("authorizedPendingCapture") => RemoteStatus::AuthorizedPendingCapture,
            Some("capturedPendingSettlement") => RemoteStatus::CapturedPendingSettlement,
            Some("settledSuccessfully") => RemoteStatus::SettledSuccessfully,
            Some("voided") => RemoteStatus::Voided,
            Some("declined") => RemoteStatus::Declined,
            Some("FDSPendingReview") | Some("FDSAuthorizedPendingReview") => RemoteStatus::UnderReview,
            _ => RemoteStatus::Failed,
        };

        let settle_amount = details
            .get("settleAmount")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok());

        Ok(RemoteTransaction {
            external_id: external_id.to_string(),
            status,
            settle_amount,
            response_code: details
                .get("responseCode")
                .and_then(|v| v.as_i64())
                .map(|c| c.to_string()),
        })
    }
}

// Wire types for the transaction API
#[derive(Debug, Deserialize)]
struct TransactionApiResponse {
    #[serde(rename = "transactionResponse")]
    transaction_response: Option<WireTransactionResponse>,
    messages: WireMessages,
}

#[derive(Debug, Deserialize)]
struct WireTransactionResponse {
    #[serde(rename = "responseCode")]
    response_code: Option<String>,
    #[serde(rename = "authCode")]
    auth_code: Option<String>,
    #[serde(rename = "avsResultCode")]
    avs_result_code: Option<String>,
    #[serde(rename = "cvvResultCode")]
    cvv_result_code: Option<String>,
    #[serde(rename = "transId")]
    trans_id: Option<String>,
    #[serde(default)]
    errors: Vec<WireError>,
}

impl WireTransactionResponse {
    fn first_error(&self, fallback: &str) -> (String, String) {
        self.errors
            .first()
            .map(|e| (e.error_code.clone(), e.error_text.clone()))
            .unwrap_or_else(|| ("0".to_string(), fallback.to_string()))
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct WireError {
    #[serde(rename = "errorCode")]
    error_code: String,
    #[serde(rename = "errorText")]
    error_text: String,
}

#[derive(Debug, Deserialize)]
struct WireMessages {
    #[serde(rename = "resultCode")]
    #[allow(dead_code)]
    result_code: String,
    #[serde(default)]
    message: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    code: String,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: serde_json::Value) -> Outcome {
        let parsed: TransactionApiResponse = serde_json::from_value(raw).unwrap();
        AuthorizeNetAdapter::map_transaction_response(parsed)
    }

    #[test]
    fn test_map_approved() {
        let outcome = parse(json!({
            "transactionResponse": {
                "responseCode": "1",
                "authCode": "ABC123",
                "avsResultCode": "Y",
                "cvvResultCode": "M",
                "transId": "60123456789",
            },
            "messages": { "resultCode": "Ok", "message": [] }
        }));

        match outcome {
            Outcome::Approved(approval) => {
                assert_eq!(approval.external_id, "60123456789");
                assert_eq!(approval.auth_code.as_deref(), Some("ABC123"));
                assert_eq!(approval.avs_result.as_deref(), Some("Y"));
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[test]
    fn test_map_declined() {
        let outcome = parse(json!({
            "transactionResponse": {
                "responseCode": "2",
                "transId": "0",
                "errors": [{ "errorCode": "2", "errorText": "This transaction has been declined." }],
            },
            "messages": { "resultCode": "Error", "message": [] }
        }));

        match outcome {
            Outcome::Declined { code, reason } => {
                assert_eq!(code, "2");
                assert!(reason.contains("declined"));
            }
            other => panic!("expected decline, got {:?}", other),
        }
    }

    #[test]
    fn test_map_held_for_review_is_transient() {
        let outcome = parse(json!({
            "transactionResponse": {
                "responseCode": "4",
                "transId": "60123456790",
                "errors": [{ "errorCode": "252", "errorText": "Held for review." }],
            },
            "messages": { "resultCode": "Ok", "message": [] }
        }));
        assert!(outcome.is_transient_error());
    }

    #[test]
    fn test_map_error_transience_follows_code_table() {
        let transient = parse(json!({
            "transactionResponse": {
                "responseCode": "3",
                "errors": [{ "errorCode": "19", "errorText": "Try again in 5 minutes." }],
            },
            "messages": { "resultCode": "Error", "message": [] }
        }));
        assert!(transient.is_transient_error());

        let permanent = parse(json!({
            "transactionResponse": {
                "responseCode": "3",
                "errors": [{ "errorCode": "13", "errorText": "Invalid merchant." }],
            },
            "messages": { "resultCode": "Error", "message": [] }
        }));
        assert!(!permanent.is_transient_error());
    }

    #[test]
    fn test_gateway_rejection_without_transaction() {
        let outcome = parse(json!({
            "messages": {
                "resultCode": "Error",
                "message": [{ "code": "E00007", "text": "User authentication failed." }]
            }
        }));
        match outcome {
            Outcome::Error { code, transient, .. } => {
                assert_eq!(code, "E00007");
                assert!(!transient);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }
}
