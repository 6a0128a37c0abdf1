//! Webhook persistence model and outbound event envelope

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Direction of a webhook record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "webhook_direction", rename_all = "snake_case")]
pub enum WebhookDirection {
    Inbound,
    Outbound,
}

/// Webhook delivery status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "webhook_status", rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Delivered,
    Retrying,
    Failed,
}

impl WebhookStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WebhookStatus::Delivered | WebhookStatus::Failed)
    }
}

/// Webhook record, inbound or outbound
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub direction: WebhookDirection,
    pub event_type: String,
    pub event_id: String,
    /// Delivery target; absent on inbound rows
    pub endpoint_url: Option<String>,
    pub status: WebhookStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub request_body: String,
    pub request_headers: sqlx::types::Json<serde_json::Value>,
    pub response_code: Option<i32>,
    pub response_headers: Option<sqlx::types::Json<serde_json::Value>>,
    pub response_body: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outbound event envelope delivered to merchant endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event_date: DateTime<Utc>,
    pub payload: OutboundPayload,
}

/// Payload of an outbound event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub transaction_id: Uuid,
    pub response_code: Option<String>,
    pub auth_code: Option<String>,
    pub avs_response: Option<String>,
    pub card_code_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_amount: Option<Decimal>,
}

/// Token bucket row backing the distributed rate limiter
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateBucket {
    pub bucket_key: String,
    pub tokens_remaining: i64,
    pub window_expires_at: DateTime<Utc>,
}
