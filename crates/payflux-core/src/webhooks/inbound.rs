//! Inbound webhook processing
//!
//! Pipeline: verify signature over the raw bytes, drop duplicates inside the
//! configured window, persist the event, then reconcile transaction state.
//! Applying the same event twice leaves the transaction where the first
//! application put it.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::models::{
    PaymentStatus, Transaction, TransactionOutcome, WebhookDirection, WebhookStatus,
};
use crate::repository::{NewWebhook, TransactionRepository, WebhookRepository};
use crate::webhooks::signature::SignatureVerifier;
use crate::{Error, Result};

/// Transient inbound processing is retried this many times
const DISPATCH_ATTEMPTS: u32 = 3;

/// Result of receiving an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Event was dispatched; `detail` says what changed
    Processed { webhook_id: Uuid, detail: String },
    /// Same (event_id, event_type) already seen inside the dedupe window
    Duplicate,
}

/// Processor event envelope
#[derive(Debug, Clone, Deserialize)]
struct ProcessorEvent {
    #[serde(rename = "notificationId")]
    notification_id: String,
    #[serde(rename = "eventType")]
    event_type: String,
    #[serde(rename = "eventDate", default)]
    #[allow(dead_code)]
    event_date: Option<DateTime<Utc>>,
    payload: EventPayload,
}

#[derive(Debug, Clone, Deserialize)]
struct EventPayload {
    /// Processor transaction id the event refers to
    id: String,
    #[serde(rename = "responseCode", default)]
    response_code: Option<i32>,
    #[serde(rename = "authCode", default)]
    #[allow(dead_code)]
    auth_code: Option<String>,
    #[serde(rename = "authAmount", default)]
    auth_amount: Option<Decimal>,
    #[serde(rename = "settleAmount", default)]
    settle_amount: Option<Decimal>,
}

impl EventPayload {
    fn settled_amount(&self) -> Option<Decimal> {
        self.settle_amount.or(self.auth_amount)
    }
}

pub struct InboundProcessor {
    webhooks: Arc<dyn WebhookRepository>,
    transactions: Arc<dyn TransactionRepository>,
    verifier: SignatureVerifier,
    config: WebhookConfig,
}

impl InboundProcessor {
    pub fn new(
        webhooks: Arc<dyn WebhookRepository>,
        transactions: Arc<dyn TransactionRepository>,
        verifier: SignatureVerifier,
        config: WebhookConfig,
    ) -> Self {
        Self { webhooks, transactions, verifier, config }
    }

    /// Receive a raw processor webhook.
    ///
    /// The body must be the exact wire bytes; signature verification happens
    /// before any parsing.
    pub async fn receive(&self, raw_body: &[u8], signature: Option<&str>) -> Result<InboundOutcome> {
        let signature = signature.ok_or_else(|| Error::signature("missing signature header"))?;
        self.verifier.verify(raw_body, signature)?;

        let event: ProcessorEvent = serde_json::from_slice(raw_body)
            .map_err(|e| Error::validation(format!("malformed webhook payload: {}", e)))?;

        let window_start = Utc::now() - Duration::minutes(self.config.duplicate_window_minutes);
        if self
            .webhooks
            .inbound_event_exists(&event.notification_id, &event.event_type, window_start)
            .await?
        {
            info!(
                event_id = %event.notification_id,
                event_type = %event.event_type,
                "duplicate inbound event suppressed"
            );
            return Ok(InboundOutcome::Duplicate);
        }

        let record = match self
            .webhooks
            .insert(NewWebhook {
                direction: WebhookDirection::Inbound,
                event_type: event.event_type.clone(),
                event_id: event.notification_id.clone(),
                endpoint_url: None,
                status: WebhookStatus::Processing,
                max_attempts: DISPATCH_ATTEMPTS as i32,
                next_attempt_at: None,
                request_body: String::from_utf8_lossy(raw_body).into_owned(),
                request_headers: serde_json::json!({ "x-signature": "verified" }),
                correlation_id: event.notification_id.clone(),
            })
            .await
        {
            Ok(record) => record,
            // Lost an insert race on (event_id, event_type): a twin request
            // is already processing this event
            Err(Error::IdempotencyConflict(_)) => return Ok(InboundOutcome::Duplicate),
            Err(e) => return Err(e),
        };

        let detail = self.dispatch_with_retry(&event).await;

        match detail {
            Ok(detail) => {
                self.webhooks.update_status(record.id, WebhookStatus::Delivered).await?;
                Ok(InboundOutcome::Processed { webhook_id: record.id, detail })
            }
            Err(e) => {
                self.webhooks.update_status(record.id, WebhookStatus::Failed).await?;
                Err(e)
            }
        }
    }

    async fn dispatch_with_retry(&self, event: &ProcessorEvent) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.dispatch(event).await {
                Ok(detail) => return Ok(detail),
                Err(e) if e.is_transient() && attempt + 1 < DISPATCH_ATTEMPTS => {
                    let delay = std::time::Duration::from_secs(1 << attempt);
                    warn!(
                        event_id = %event.notification_id,
                        attempt = attempt + 1,
                        error = %e,
                        "transient inbound dispatch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(&self, event: &ProcessorEvent) -> Result<String> {
        let event_type = event.event_type.as_str();
        let approved = event.payload.response_code == Some(1);

        if event_type.ends_with(".payment.authcapture.created") {
            let target = if approved { PaymentStatus::Settled } else { PaymentStatus::Failed };
            self.reconcile(event, target, approved.then(|| event.payload.settled_amount()).flatten())
                .await
        } else if event_type.ends_with(".payment.authorization.created") {
            let target = if approved { PaymentStatus::Authorized } else { PaymentStatus::Failed };
            self.reconcile(event, target, None).await
        } else if event_type.ends_with(".payment.capture.created")
            || event_type.ends_with(".payment.priorAuthCapture.created")
        {
            self.reconcile(event, PaymentStatus::Settled, event.payload.settled_amount()).await
        } else if event_type.ends_with(".payment.refund.created") {
            self.reconcile_refund(event).await
        } else if event_type.ends_with(".payment.void.created") {
            self.reconcile(event, PaymentStatus::Voided, None).await
        } else if event_type.ends_with(".payment.fraud.approved") {
            self.reconcile(event, PaymentStatus::Settled, None).await
        } else if event_type.ends_with(".payment.fraud.declined") {
            self.reconcile(event, PaymentStatus::Failed, None).await
        } else if event_type.ends_with(".payment.fraud.held") {
            self.reconcile(event, PaymentStatus::PendingReview, None).await
        } else {
            Ok(format!("event type {} not processed", event_type))
        }
    }

    async fn reconcile(
        &self,
        event: &ProcessorEvent,
        target: PaymentStatus,
        settle_amount: Option<Decimal>,
    ) -> Result<String> {
        let Some(transaction) = self
            .transactions
            .find_by_processor_id(&event.payload.id)
            .await?
        else {
            warn!(processor_id = %event.payload.id, "webhook for unknown transaction");
            return Ok(format!("no transaction for processor id {}", event.payload.id));
        };

        self.apply_status(&transaction, target, event, settle_amount).await
    }

    /// Refund events may reference the refund's own transaction or the
    /// original charge; either way the parent's status is recomputed from
    /// the settled refund aggregate.
    async fn reconcile_refund(&self, event: &ProcessorEvent) -> Result<String> {
        let Some(transaction) = self
            .transactions
            .find_by_processor_id(&event.payload.id)
            .await?
        else {
            warn!(processor_id = %event.payload.id, "refund webhook for unknown transaction");
            return Ok(format!("no transaction for processor id {}", event.payload.id));
        };

        if transaction.is_refund() {
            // Settle the refund child, then roll the aggregate up to the parent
            let detail = self
                .apply_status(&transaction, PaymentStatus::Settled, event, None)
                .await?;

            if let Some(parent_id) = transaction.parent_id {
                if let Some(parent) = self.transactions.find_by_id(parent_id).await? {
                    let refunded = self.transactions.refunded_amount(parent.id).await?;
                    let target = if refunded >= parent.amount {
                        PaymentStatus::Refunded
                    } else {
                        PaymentStatus::PartiallyRefunded
                    };
                    self.apply_status(&parent, target, event, None).await?;
                }
            }
            Ok(detail)
        } else {
            let amount = event.payload.settled_amount().unwrap_or(transaction.amount);
            let target = if amount >= transaction.amount {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
            self.apply_status(&transaction, target, event, None).await
        }
    }

    /// Idempotent status application: already at the target is success, an
    /// illegal edge is recorded and skipped rather than failed.
    async fn apply_status(
        &self,
        transaction: &Transaction,
        target: PaymentStatus,
        event: &ProcessorEvent,
        settle_amount: Option<Decimal>,
    ) -> Result<String> {
        if transaction.status == target {
            return Ok(format!("transaction {} already {}", transaction.id, target));
        }

        if !transaction.status.can_transition_to(target) {
            warn!(
                transaction_id = %transaction.id,
                from = %transaction.status,
                to = %target,
                event_type = %event.event_type,
                "webhook transition skipped"
            );
            return Ok(format!(
                "transition {} -> {} not applicable for {}",
                transaction.status, target, transaction.id
            ));
        }

        let outcome = TransactionOutcome {
            response_code: event.payload.response_code.map(|c| c.to_string()),
            response_blob: settle_amount.map(|amount| serde_json::json!({ "settle_amount": amount })),
            ..Default::default()
        };

        self.transactions
            .transition_status(transaction.id, transaction.status, target, &outcome)
            .await?;

        info!(
            transaction_id = %transaction.id,
            status = %target,
            event_type = %event.event_type,
            "transaction reconciled from webhook"
        );
        Ok(format!("transaction {} -> {}", transaction.id, target))
    }
}
