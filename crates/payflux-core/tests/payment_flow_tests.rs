//! End-to-end payment orchestration scenarios over in-memory fakes

mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use common::{MemCustomers, MemIdempotency, MemTransactions, ScriptedProcessor};
use payflux_core::config::BillingConfig;
use payflux_core::models::*;
use payflux_core::payment::{FollowUpRequest, PaymentMethodInput, PaymentOrchestrator, PaymentRequest};
use payflux_core::processor::adapter::{RemoteStatus, RemoteTransaction};
use payflux_core::repository::{CustomerRepository, TransactionRepository};
use payflux_core::Error;

struct Harness {
    orchestrator: PaymentOrchestrator,
    processor: Arc<ScriptedProcessor>,
    transactions: Arc<MemTransactions>,
    customers: Arc<MemCustomers>,
}

fn harness() -> Harness {
    harness_with_config(BillingConfig::default())
}

fn harness_with_config(config: BillingConfig) -> Harness {
    let processor = Arc::new(ScriptedProcessor::new());
    let transactions = Arc::new(MemTransactions::new());
    let customers = Arc::new(MemCustomers::new());
    let idempotency = Arc::new(MemIdempotency::new());

    let orchestrator = PaymentOrchestrator::new(
        processor.clone(),
        customers.clone(),
        transactions.clone(),
        idempotency,
        config,
    );

    Harness { orchestrator, processor, transactions, customers }
}

fn card_request(amount: Decimal, key: Option<&str>) -> PaymentRequest {
    PaymentRequest {
        amount,
        currency: Currency::USD,
        payment_method: PaymentMethodInput {
            method_type: PaymentMethodType::Card,
            card_number: Some("4111111111111111".to_string()),
            expiry_month: Some(12),
            expiry_year: Some(2049),
            cvv: Some("123".to_string()),
            cardholder_name: Some("Jo Bloggs".to_string()),
            token: None,
        },
        customer: CustomerInput {
            email: "jo@example.com".to_string(),
            first_name: "Jo".to_string(),
            last_name: "Bloggs".to_string(),
            phone: None,
            billing_address: None,
            external_reference: None,
        },
        order_id: None,
        idempotency_key: key.map(|k| k.to_string()),
        correlation_id: None,
    }
}

#[tokio::test]
async fn idempotent_purchase_submits_exactly_once() {
    let h = harness();

    let first = h.orchestrator.purchase(card_request(dec!(10.00), Some("K1"))).await.unwrap();
    let second = h.orchestrator.purchase(card_request(dec!(10.00), Some("K1"))).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.processor.calls(), 1);
    assert_eq!(h.transactions.all().len(), 1);
    assert_eq!(first.status, PaymentStatus::Settled);
    assert!(first.approved);
}

#[tokio::test]
async fn reused_key_with_different_request_conflicts() {
    let h = harness();

    h.orchestrator.purchase(card_request(dec!(10.00), Some("K1"))).await.unwrap();
    let err = h
        .orchestrator
        .purchase(card_request(dec!(20.00), Some("K1")))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::IdempotencyConflict(_)));
    assert_eq!(h.processor.calls(), 1);
}

#[tokio::test]
async fn declined_purchase_is_terminal_failed() {
    let h = harness();
    h.processor.push_decline("2", "This transaction has been declined.");

    let response = h.orchestrator.purchase(card_request(dec!(10.00), None)).await.unwrap();

    assert!(!response.approved);
    assert_eq!(response.status, PaymentStatus::Failed);

    let stored = h.transactions.all().pop().unwrap();
    assert!(stored.status.is_terminal());
    assert_eq!(stored.failure_reason.as_deref(), Some("This transaction has been declined."));
}

#[tokio::test]
async fn transient_error_leaves_transaction_pending() {
    let h = harness();
    h.processor.push_transient_error();

    let response = h.orchestrator.purchase(card_request(dec!(10.00), None)).await.unwrap();

    assert!(!response.approved);
    assert_eq!(response.status, PaymentStatus::Pending);
    assert_eq!(h.transactions.all()[0].status, PaymentStatus::Pending);
}

#[tokio::test]
async fn authorize_then_capture() {
    let h = harness();

    let auth = h.orchestrator.authorize(card_request(dec!(50.00), None)).await.unwrap();
    assert_eq!(auth.status, PaymentStatus::Authorized);

    let capture = h
        .orchestrator
        .capture(FollowUpRequest {
            transaction_id: auth.transaction_id,
            amount: Some(dec!(30.00)),
            idempotency_key: None,
        })
        .await
        .unwrap();

    assert_eq!(capture.status, PaymentStatus::Captured);
    assert_eq!(capture.amount, dec!(30.00));

    let parent = h
        .transactions
        .find_by_id(auth.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.status, PaymentStatus::Captured);

    let children = h.transactions.list_children(auth.transaction_id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].transaction_type, TransactionType::Capture);
}

#[tokio::test]
async fn capture_amount_cannot_exceed_authorization() {
    let h = harness();
    let auth = h.orchestrator.authorize(card_request(dec!(50.00), None)).await.unwrap();

    let err = h
        .orchestrator
        .capture(FollowUpRequest {
            transaction_id: auth.transaction_id,
            amount: Some(dec!(60.00)),
            idempotency_key: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidAmount(_)));
}

#[tokio::test]
async fn void_releases_authorization() {
    let h = harness();
    let auth = h.orchestrator.authorize(card_request(dec!(50.00), None)).await.unwrap();

    let void = h
        .orchestrator
        .void(FollowUpRequest {
            transaction_id: auth.transaction_id,
            amount: None,
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert_eq!(void.status, PaymentStatus::Voided);

    let parent = h.transactions.find_by_id(auth.transaction_id).await.unwrap().unwrap();
    assert_eq!(parent.status, PaymentStatus::Voided);
    assert!(parent.status.is_terminal());

    // voided authorizations cannot be captured
    let err = h
        .orchestrator
        .capture(FollowUpRequest {
            transaction_id: auth.transaction_id,
            amount: None,
            idempotency_key: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn capture_rejects_settled_purchase() {
    let h = harness();
    let purchase = h.orchestrator.purchase(card_request(dec!(10.00), None)).await.unwrap();

    let err = h
        .orchestrator
        .capture(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: None,
            idempotency_key: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn partial_then_full_refund() {
    let h = harness();
    let purchase = h.orchestrator.purchase(card_request(dec!(100.00), None)).await.unwrap();

    let partial = h
        .orchestrator
        .refund(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: Some(dec!(30.00)),
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert_eq!(partial.transaction_type, TransactionType::PartialRefund);

    let parent = h.transactions.find_by_id(purchase.transaction_id).await.unwrap().unwrap();
    assert_eq!(parent.status, PaymentStatus::PartiallyRefunded);

    let view = h.orchestrator.status(purchase.transaction_id).await.unwrap();
    assert_eq!(view.refunded_amount, dec!(30.00));
    assert_eq!(view.available_refund_amount, dec!(70.00));

    let full = h
        .orchestrator
        .refund(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: Some(dec!(70.00)),
            idempotency_key: None,
        })
        .await
        .unwrap();
    assert!(full.approved);

    let parent = h.transactions.find_by_id(purchase.transaction_id).await.unwrap().unwrap();
    assert_eq!(parent.status, PaymentStatus::Refunded);

    // refund total never exceeds the original amount
    let view = h.orchestrator.status(purchase.transaction_id).await.unwrap();
    assert!(view.refunded_amount <= view.amount);
    assert_eq!(view.available_refund_amount, Decimal::ZERO);
}

#[tokio::test]
async fn refund_after_full_refund_is_invalid_amount() {
    let h = harness();
    let purchase = h.orchestrator.purchase(card_request(dec!(100.00), None)).await.unwrap();

    h.orchestrator
        .refund(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: None,
            idempotency_key: None,
        })
        .await
        .unwrap();

    let err = h
        .orchestrator
        .refund(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: Some(dec!(1.00)),
            idempotency_key: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_) | Error::InvalidAmount(_)));
}

#[tokio::test]
async fn refund_exceeding_remaining_is_rejected() {
    let h = harness();
    let purchase = h.orchestrator.purchase(card_request(dec!(100.00), None)).await.unwrap();

    h.orchestrator
        .refund(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: Some(dec!(80.00)),
            idempotency_key: None,
        })
        .await
        .unwrap();

    let err = h
        .orchestrator
        .refund(FollowUpRequest {
            transaction_id: purchase.transaction_id,
            amount: Some(dec!(30.00)),
            idempotency_key: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAmount(_)));
}

#[tokio::test]
async fn invalid_card_never_reaches_processor() {
    let h = harness();
    let mut request = card_request(dec!(10.00), None);
    request.payment_method.card_number = Some("1234".to_string());

    let err = h.orchestrator.purchase(request).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.processor.calls(), 0);
    assert!(h.transactions.all().is_empty());
}

#[tokio::test]
async fn velocity_limit_blocks_rapid_charges() {
    let config = BillingConfig { velocity_limit_per_hour: 2, ..BillingConfig::default() };
    let h = harness_with_config(config);

    h.orchestrator.purchase(card_request(dec!(10.00), None)).await.unwrap();
    h.orchestrator.purchase(card_request(dec!(11.00), None)).await.unwrap();

    let err = h.orchestrator.purchase(card_request(dec!(12.00), None)).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { .. }));
    assert_eq!(h.processor.calls(), 2);
}

#[tokio::test]
async fn customer_created_and_profile_backfilled_on_first_payment() {
    let h = harness();

    h.orchestrator.purchase(card_request(dec!(10.00), None)).await.unwrap();

    let customer = h.customers.find_by_email("jo@example.com").await.unwrap().unwrap();
    assert!(customer.processor_profile_id.is_some());

    // second payment reuses the customer and profile
    h.orchestrator.purchase(card_request(dec!(15.00), None)).await.unwrap();
    assert_eq!(h.processor.profile_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn held_for_review_reconciles_from_processor() {
    let h = harness();
    h.processor.push_held_for_review("ext-held-1");

    let response = h.orchestrator.purchase(card_request(dec!(10.00), None)).await.unwrap();
    assert_eq!(response.status, PaymentStatus::Pending);

    let pending = h.transactions.all().pop().unwrap();
    assert_eq!(pending.external_processor_id.as_deref(), Some("ext-held-1"));

    // the fraud team approves; the backfill sweep finds the settled state
    h.processor.set_remote(
        "ext-held-1",
        RemoteTransaction {
            external_id: "ext-held-1".to_string(),
            status: RemoteStatus::SettledSuccessfully,
            settle_amount: Some(dec!(10.00)),
            response_code: Some("1".to_string()),
        },
    );

    h.orchestrator.reconcile(&pending).await.unwrap();

    let settled = h.transactions.find_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(settled.status, PaymentStatus::Settled);

    // reconciling again is a no-op
    h.orchestrator.reconcile(&settled).await.unwrap();
    let unchanged = h.transactions.find_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, PaymentStatus::Settled);
}

#[tokio::test]
async fn status_view_reports_refund_aggregates() {
    let h = harness();
    let purchase = h.orchestrator.purchase(card_request(dec!(60.00), None)).await.unwrap();

    let view = h.orchestrator.status(purchase.transaction_id).await.unwrap();
    assert_eq!(view.refunded_amount, Decimal::ZERO);
    assert_eq!(view.available_refund_amount, dec!(60.00));
    assert_eq!(view.status, PaymentStatus::Settled);
}
