//! Payment orchestrator
//!
//! Each public operation performs at most one processor call, guarded by the
//! idempotency store, and records the result in the transaction ledger.
//! Transient processor failures leave the ledger row PENDING for webhook
//! reconciliation or the get-transaction backfill sweep.
//!
//! An idempotency key is released only when the operation fails before the
//! processor is contacted; once the call is made the key stays claimed so a
//! blind retry can never submit a second charge.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::models::{
    Customer, NewTransaction, OutboundPayload, PaymentMethodType, PaymentStatus, Transaction,
    TransactionOutcome, TransactionType, TransactionView,
};
use crate::processor::{
    AuthorizationRequest, BillingContact, CardInput, Outcome, PaymentInstrument, ProcessorAdapter,
    RemoteStatus,
};
use crate::repository::{
    request_fingerprint, ClaimOutcome, CustomerRepository, IdempotencyScope, IdempotencyStore,
    TransactionRepository,
};
use crate::webhooks::OutboundDispatcher;
use crate::{Error, Result};

use super::{validate_payment_method, FollowUpRequest, PaymentRequest, PaymentResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChargeKind {
    Purchase,
    Authorize,
}

/// Follow-up operation against a prior transaction
enum FollowUpOp {
    Capture,
    Void,
    Refund { instrument: PaymentInstrument },
}

pub struct PaymentOrchestrator {
    processor: Arc<dyn ProcessorAdapter>,
    customers: Arc<dyn CustomerRepository>,
    transactions: Arc<dyn TransactionRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    events: Option<Arc<OutboundDispatcher>>,
    config: BillingConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        processor: Arc<dyn ProcessorAdapter>,
        customers: Arc<dyn CustomerRepository>,
        transactions: Arc<dyn TransactionRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        config: BillingConfig,
    ) -> Self {
        Self { processor, customers, transactions, idempotency, events: None, config }
    }

    /// Emit outbound webhooks to merchant endpoints on state changes
    pub fn with_events(mut self, events: Arc<OutboundDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Authorize and capture in one step
    pub async fn purchase(&self, request: PaymentRequest) -> Result<PaymentResponse> {
        self.run_charge(request, ChargeKind::Purchase, IdempotencyScope::Payment).await
    }

    /// Reserve funds without capturing
    pub async fn authorize(&self, request: PaymentRequest) -> Result<PaymentResponse> {
        self.run_charge(request, ChargeKind::Authorize, IdempotencyScope::Payment).await
    }

    /// Purchase driven by the billing scheduler; keys are scoped to the
    /// billing-attempt family so they can never collide with API callers'
    pub(crate) async fn billing_purchase(&self, request: PaymentRequest) -> Result<PaymentResponse> {
        self.run_charge(request, ChargeKind::Purchase, IdempotencyScope::BillingAttempt).await
    }

    /// Capture a prior authorization; amount may be less than authorized
    pub async fn capture(&self, request: FollowUpRequest) -> Result<PaymentResponse> {
        let prior = self.load_prior(request.transaction_id).await?;

        if prior.transaction_type != TransactionType::Authorize
            || prior.status != PaymentStatus::Authorized
        {
            return Err(Error::validation(format!(
                "transaction {} is not an open authorization",
                prior.id
            )));
        }

        let amount = request.amount.unwrap_or(prior.amount);
        if amount <= Decimal::ZERO || amount > prior.amount {
            return Err(Error::invalid_amount(format!(
                "capture amount must be in (0, {}]",
                prior.amount
            )));
        }

        self.run_follow_up(
            request,
            prior,
            amount,
            TransactionType::Capture,
            PaymentStatus::Captured,
            PaymentStatus::Captured,
            IdempotencyScope::Payment,
            FollowUpOp::Capture,
        )
        .await
    }

    /// Void a prior authorization
    pub async fn void(&self, request: FollowUpRequest) -> Result<PaymentResponse> {
        let prior = self.load_prior(request.transaction_id).await?;

        if prior.transaction_type != TransactionType::Authorize
            || prior.status != PaymentStatus::Authorized
        {
            return Err(Error::validation(format!(
                "transaction {} is not an open authorization",
                prior.id
            )));
        }

        let amount = prior.amount;
        self.run_follow_up(
            request,
            prior,
            amount,
            TransactionType::Void,
            PaymentStatus::Voided,
            PaymentStatus::Voided,
            IdempotencyScope::Payment,
            FollowUpOp::Void,
        )
        .await
    }

    /// Refund a captured or settled transaction, fully or partially
    pub async fn refund(&self, request: FollowUpRequest) -> Result<PaymentResponse> {
        let prior = self.load_prior(request.transaction_id).await?;

        if !matches!(
            prior.status,
            PaymentStatus::Captured | PaymentStatus::Settled | PaymentStatus::PartiallyRefunded
        ) {
            return Err(Error::validation(format!(
                "transaction {} is not refundable in status {}",
                prior.id, prior.status
            )));
        }

        let already_refunded = self.transactions.refunded_amount(prior.id).await?;
        let remaining = prior.amount - already_refunded;
        if remaining <= Decimal::ZERO {
            return Err(Error::invalid_amount("transaction is fully refunded"));
        }

        let amount = request.amount.unwrap_or(remaining);
        if amount <= Decimal::ZERO || amount > remaining {
            return Err(Error::invalid_amount(format!(
                "refund amount must be in (0, {}]",
                remaining
            )));
        }

        let refund_type = if amount == prior.amount {
            TransactionType::Refund
        } else {
            TransactionType::PartialRefund
        };

        // Parent reaches REFUNDED only when this refund exhausts the remainder
        let parent_target = if amount == remaining {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        let instrument = Self::refund_instrument(&prior);
        self.run_follow_up(
            request,
            prior,
            amount,
            refund_type,
            PaymentStatus::Settled,
            parent_target,
            IdempotencyScope::Refund,
            FollowUpOp::Refund { instrument },
        )
        .await
    }

    /// Current ledger view of a transaction, with refund aggregates
    pub async fn status(&self, id: Uuid) -> Result<TransactionView> {
        let transaction = self.load_prior(id).await?;
        let refunded_amount = self.transactions.refunded_amount(id).await?;

        Ok(TransactionView {
            id: transaction.id,
            external_processor_id: transaction.external_processor_id.clone(),
            parent_id: transaction.parent_id,
            transaction_type: transaction.transaction_type,
            amount: transaction.amount,
            currency: transaction.currency,
            status: transaction.status,
            auth_code: transaction.auth_code.clone(),
            avs_result: transaction.avs_result.clone(),
            cvv_result: transaction.cvv_result.clone(),
            refunded_amount,
            available_refund_amount: (transaction.amount - refunded_amount).max(Decimal::ZERO),
            correlation_id: transaction.correlation_id.clone(),
            created_at: transaction.created_at,
            processed_at: transaction.processed_at,
        })
    }

    /// Reconcile a stale PENDING transaction against the processor's view
    pub async fn reconcile(&self, transaction: &Transaction) -> Result<()> {
        let Some(external_id) = &transaction.external_processor_id else {
            return Ok(());
        };

        let remote = self.processor.get_transaction(external_id).await?;

        let target = match remote.status {
            RemoteStatus::AuthorizedPendingCapture => PaymentStatus::Authorized,
            RemoteStatus::CapturedPendingSettlement => PaymentStatus::Captured,
            RemoteStatus::SettledSuccessfully => PaymentStatus::Settled,
            RemoteStatus::Voided => PaymentStatus::Voided,
            RemoteStatus::Declined | RemoteStatus::Failed => PaymentStatus::Failed,
            RemoteStatus::UnderReview => PaymentStatus::PendingReview,
        };

        if transaction.status == target {
            return Ok(());
        }
        if !transaction.status.can_transition_to(target) {
            warn!(
                transaction_id = %transaction.id,
                from = %transaction.status,
                to = %target,
                "reconciliation skipped: illegal transition"
            );
            return Ok(());
        }

        let outcome = TransactionOutcome {
            response_code: remote.response_code.clone(),
            ..Default::default()
        };
        self.transactions
            .transition_status(transaction.id, transaction.status, target, &outcome)
            .await?;

        info!(
            transaction_id = %transaction.id,
            status = %target,
            "transaction reconciled from processor"
        );
        Ok(())
    }

    // --- charge path ---

    async fn run_charge(
        &self,
        request: PaymentRequest,
        kind: ChargeKind,
        scope: IdempotencyScope,
    ) -> Result<PaymentResponse> {
        validate_payment_method(&request.payment_method)?;

        if request.amount <= Decimal::ZERO {
            return Err(Error::invalid_amount("charge amount must be positive"));
        }

        let claimed_key = match self.claim_key(scope, request.idempotency_key.as_deref(), &serde_json::to_value(&request)?).await? {
            KeyClaim::Replay(stored) => {
                info!("returning stored payment outcome");
                return Ok(serde_json::from_value(stored)?);
            }
            KeyClaim::Claimed(key) => Some(key),
            KeyClaim::NoKey => None,
        };

        // Everything up to the processor call may release the key on failure
        let prepared = match self.prepare_charge(&request, kind).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.release_key(scope, claimed_key.as_deref()).await;
                return Err(e);
            }
        };

        // From here the processor may have been contacted; the key is kept
        let outcome = match kind {
            ChargeKind::Purchase => self.processor.purchase(&prepared.processor_request).await?,
            ChargeKind::Authorize => self.processor.authorize(&prepared.processor_request).await?,
        };

        let approved_status = match kind {
            ChargeKind::Purchase => PaymentStatus::Settled,
            ChargeKind::Authorize => PaymentStatus::Authorized,
        };

        let final_tx = self.apply_outcome(&prepared.transaction, &outcome, approved_status).await?;
        self.emit_event(&final_tx).await;
        let response = Self::response_for(&final_tx, &outcome);

        if let Some(key) = &claimed_key {
            self.idempotency
                .complete(scope, key, &serde_json::to_value(&response)?)
                .await?;
        }
        Ok(response)
    }

    async fn prepare_charge(&self, request: &PaymentRequest, kind: ChargeKind) -> Result<PreparedCharge> {
        let customer = self.resolve_customer(request).await?;
        self.check_velocity(customer.id).await?;

        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let transaction_type = match kind {
            ChargeKind::Purchase => TransactionType::Purchase,
            ChargeKind::Authorize => TransactionType::Authorize,
        };

        let transaction = self
            .transactions
            .insert(NewTransaction {
                parent_id: None,
                order_id: request.order_id,
                customer_id: Some(customer.id),
                transaction_type,
                amount: request.amount,
                currency: request.currency,
                idempotency_key: request.idempotency_key.clone(),
                correlation_id: correlation_id.clone(),
                request_blob: Self::request_blob(request),
            })
            .await?;

        let processor_request = AuthorizationRequest {
            amount: request.amount,
            currency: request.currency,
            instrument: Self::instrument(&request.payment_method)?,
            billing: Some(Self::billing_contact(request, &customer)),
            invoice_number: None,
            correlation_id,
        };

        Ok(PreparedCharge { transaction, processor_request })
    }

    // --- follow-up path (capture/void/refund) ---

    #[allow(clippy::too_many_arguments)]
    async fn run_follow_up(
        &self,
        request: FollowUpRequest,
        prior: Transaction,
        amount: Decimal,
        child_type: TransactionType,
        child_success_status: PaymentStatus,
        parent_success_status: PaymentStatus,
        scope: IdempotencyScope,
        op: FollowUpOp,
    ) -> Result<PaymentResponse> {
        let claimed_key = match self
            .claim_key(scope, request.idempotency_key.as_deref(), &serde_json::to_value(&request)?)
            .await?
        {
            KeyClaim::Replay(stored) => return Ok(serde_json::from_value(stored)?),
            KeyClaim::Claimed(key) => Some(key),
            KeyClaim::NoKey => None,
        };

        let external_id = match Self::external_id(&prior) {
            Ok(id) => id,
            Err(e) => {
                self.release_key(scope, claimed_key.as_deref()).await;
                return Err(e);
            }
        };

        let child = match self
            .transactions
            .insert(NewTransaction {
                parent_id: Some(prior.id),
                order_id: prior.order_id,
                customer_id: prior.customer_id,
                transaction_type: child_type,
                amount,
                currency: prior.currency,
                idempotency_key: request.idempotency_key.clone(),
                correlation_id: Uuid::new_v4().to_string(),
                request_blob: json!({
                    "parent_transaction_id": prior.id,
                    "external_processor_id": external_id,
                    "amount": amount.to_string(),
                }),
            })
            .await
        {
            Ok(child) => child,
            Err(e) => {
                self.release_key(scope, claimed_key.as_deref()).await;
                return Err(e);
            }
        };

        let outcome = match &op {
            FollowUpOp::Capture => self.processor.capture(&external_id, Some(amount)).await?,
            FollowUpOp::Void => self.processor.void(&external_id).await?,
            FollowUpOp::Refund { instrument } => {
                self.processor.refund(&external_id, Some(amount), instrument).await?
            }
        };

        let child_final = self.apply_outcome(&child, &outcome, child_success_status).await?;
        self.emit_event(&child_final).await;

        // Parent follows only once the child operation is confirmed
        if outcome.is_approved() && prior.status != parent_success_status {
            if prior.status.can_transition_to(parent_success_status) {
                self.transactions
                    .transition_status(
                        prior.id,
                        prior.status,
                        parent_success_status,
                        &TransactionOutcome::default(),
                    )
                    .await?;
            } else {
                warn!(
                    transaction_id = %prior.id,
                    from = %prior.status,
                    to = %parent_success_status,
                    "parent transition skipped"
                );
            }
        }

        let response = Self::response_for(&child_final, &outcome);
        if let Some(key) = &claimed_key {
            self.idempotency
                .complete(scope, key, &serde_json::to_value(&response)?)
                .await?;
        }
        Ok(response)
    }

    // --- shared internals ---

    async fn apply_outcome(
        &self,
        transaction: &Transaction,
        outcome: &Outcome,
        approved_status: PaymentStatus,
    ) -> Result<Transaction> {
        match outcome {
            Outcome::Approved(approval) => {
                let fields = TransactionOutcome {
                    external_processor_id: Some(approval.external_id.clone()),
                    auth_code: approval.auth_code.clone(),
                    avs_result: approval.avs_result.clone(),
                    cvv_result: approval.cvv_result.clone(),
                    response_code: Some("1".to_string()),
                    failure_reason: None,
                    response_blob: Some(serde_json::to_value(approval)?),
                };
                self.transactions
                    .transition_status(transaction.id, PaymentStatus::Pending, approved_status, &fields)
                    .await
            }
            Outcome::Declined { code, reason } => {
                let fields = TransactionOutcome {
                    response_code: Some(code.clone()),
                    failure_reason: Some(reason.clone()),
                    response_blob: Some(json!({ "code": code, "reason": reason })),
                    ..Default::default()
                };
                self.transactions
                    .transition_status(transaction.id, PaymentStatus::Pending, PaymentStatus::Failed, &fields)
                    .await
            }
            Outcome::Error { code, message, transient, external_id } => {
                let fields = TransactionOutcome {
                    external_processor_id: external_id.clone(),
                    response_code: Some(code.clone()),
                    failure_reason: Some(message.clone()),
                    response_blob: Some(json!({ "code": code, "message": message })),
                    ..Default::default()
                };
                if *transient {
                    // Reconciliation resolves the final state
                    warn!(
                        transaction_id = %transaction.id,
                        code = %code,
                        "transient processor error, leaving transaction pending"
                    );
                    self.transactions.record_outcome(transaction.id, &fields).await
                } else {
                    self.transactions
                        .transition_status(transaction.id, PaymentStatus::Pending, PaymentStatus::Failed, &fields)
                        .await
                }
            }
        }
    }

    async fn claim_key(
        &self,
        scope: IdempotencyScope,
        key: Option<&str>,
        request: &serde_json::Value,
    ) -> Result<KeyClaim> {
        let Some(key) = key else {
            return Ok(KeyClaim::NoKey);
        };

        let fingerprint = request_fingerprint(request);
        match self.idempotency.claim(scope, key, &fingerprint).await? {
            ClaimOutcome::Proceed => Ok(KeyClaim::Claimed(key.to_string())),
            ClaimOutcome::Replay(stored) => Ok(KeyClaim::Replay(stored)),
            ClaimOutcome::InFlight => Err(Error::idempotency_conflict(format!(
                "operation for key {} is still in progress",
                key
            ))),
        }
    }

    async fn release_key(&self, scope: IdempotencyScope, key: Option<&str>) {
        if let Some(key) = key {
            if let Err(e) = self.idempotency.release(scope, key).await {
                warn!(idempotency_key = %key, error = %e, "failed to release idempotency key");
            }
        }
    }

    /// Broadcast a state-change event to merchant endpoints. Delivery
    /// problems are the outbound queue's to handle; enqueue failures only log.
    async fn emit_event(&self, transaction: &Transaction) {
        let Some(events) = &self.events else {
            return;
        };
        if transaction.status == PaymentStatus::Pending {
            return;
        }

        let event_type = format!("payment.{}.{}", transaction.transaction_type_slug(), transaction.status);
        let payload = OutboundPayload {
            transaction_id: transaction.id,
            response_code: transaction.response_code.clone(),
            auth_code: transaction.auth_code.clone(),
            avs_response: transaction.avs_result.clone(),
            card_code_response: transaction.cvv_result.clone(),
            settle_amount: matches!(transaction.status, PaymentStatus::Settled)
                .then_some(transaction.amount),
        };

        if let Err(e) = events
            .broadcast(&event_type, payload, &transaction.correlation_id)
            .await
        {
            warn!(transaction_id = %transaction.id, error = %e, "outbound event enqueue failed");
        }
    }

    async fn resolve_customer(&self, request: &PaymentRequest) -> Result<Customer> {
        let customer = match self.customers.find_by_email(&request.customer.email).await? {
            Some(existing) => existing,
            None => {
                let created = self.customers.create(&request.customer).await?;
                info!(customer_id = %created.id, "created customer on first payment");
                created
            }
        };

        // Opportunistic profile backfill: a failure here never fails the payment
        if customer.processor_profile_id.is_none() {
            let contact = Self::billing_contact(request, &customer);
            match self.processor.create_customer_profile(&contact).await {
                Ok(profile_id) => {
                    self.customers.set_processor_profile(customer.id, &profile_id).await?;
                    info!(customer_id = %customer.id, "created processor profile");
                }
                Err(e) => {
                    warn!(customer_id = %customer.id, error = %e, "processor profile creation deferred");
                }
            }
        }

        Ok(customer)
    }

    async fn check_velocity(&self, customer_id: Uuid) -> Result<()> {
        let since = Utc::now() - Duration::hours(1);
        let recent = self.transactions.count_recent_by_customer(customer_id, since).await?;
        if recent >= self.config.velocity_limit_per_hour {
            warn!(customer_id = %customer_id, recent, "velocity limit reached");
            return Err(Error::RateLimited { retry_after_secs: 300 });
        }
        Ok(())
    }

    fn instrument(method: &super::PaymentMethodInput) -> Result<PaymentInstrument> {
        match method.method_type {
            PaymentMethodType::Card => Ok(PaymentInstrument::Card(CardInput {
                number: method.card_number.clone().unwrap_or_default(),
                expiry_month: method.expiry_month.unwrap_or_default(),
                expiry_year: method.expiry_year.unwrap_or_default(),
                cvv: method.cvv.clone().unwrap_or_default(),
                cardholder_name: method.cardholder_name.clone().unwrap_or_default(),
            })),
            PaymentMethodType::Token | PaymentMethodType::BankAccount => Ok(PaymentInstrument::Token(
                method
                    .token
                    .clone()
                    .ok_or_else(|| Error::validation("token is required"))?,
            )),
        }
    }

    fn refund_instrument(prior: &Transaction) -> PaymentInstrument {
        // The processor accepts refunds referencing the card by last four
        let last_four = prior
            .request_blob
            .0
            .pointer("/payment_method/card_last_four")
            .and_then(|v| v.as_str())
            .unwrap_or("0000")
            .to_string();

        PaymentInstrument::Card(CardInput {
            number: last_four,
            expiry_month: 0,
            expiry_year: 0,
            cvv: String::new(),
            cardholder_name: String::new(),
        })
    }

    fn billing_contact(request: &PaymentRequest, customer: &Customer) -> BillingContact {
        BillingContact {
            first_name: request.customer.first_name.clone(),
            last_name: request.customer.last_name.clone(),
            email: customer.email.clone(),
            phone: request.customer.phone.clone(),
            address: request.customer.billing_address.clone(),
        }
    }

    /// Persisted request snapshot; card data is reduced to its last four
    fn request_blob(request: &PaymentRequest) -> serde_json::Value {
        json!({
            "amount": request.amount.to_string(),
            "currency": request.currency.to_string(),
            "order_id": request.order_id,
            "customer_email": request.customer.email,
            "payment_method": {
                "type": request.payment_method.method_type,
                "card_last_four": request.payment_method.card_last_four(),
                "cardholder_name": request.payment_method.cardholder_name,
            },
        })
    }

    fn external_id(prior: &Transaction) -> Result<String> {
        prior
            .external_processor_id
            .clone()
            .ok_or_else(|| Error::validation(format!("transaction {} has no processor id", prior.id)))
    }

    fn response_for(transaction: &Transaction, outcome: &Outcome) -> PaymentResponse {
        let message = match outcome {
            Outcome::Approved(_) => "approved".to_string(),
            Outcome::Declined { reason, .. } => reason.clone(),
            Outcome::Error { message, transient: true, .. } => {
                format!("pending processor confirmation: {}", message)
            }
            Outcome::Error { message, .. } => message.clone(),
        };

        PaymentResponse {
            transaction_id: transaction.id,
            external_processor_id: transaction.external_processor_id.clone(),
            transaction_type: transaction.transaction_type,
            status: transaction.status,
            approved: outcome.is_approved(),
            amount: transaction.amount,
            currency: transaction.currency,
            auth_code: transaction.auth_code.clone(),
            avs_result: transaction.avs_result.clone(),
            cvv_result: transaction.cvv_result.clone(),
            response_code: transaction.response_code.clone(),
            message,
            correlation_id: transaction.correlation_id.clone(),
        }
    }

    async fn load_prior(&self, id: Uuid) -> Result<Transaction> {
        self.transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("transaction {}", id)))
    }
}

struct PreparedCharge {
    transaction: Transaction,
    processor_request: AuthorizationRequest,
}

enum KeyClaim {
    NoKey,
    Claimed(String),
    Replay(serde_json::Value),
}
