//! Outbound webhook delivery
//!
//! State changes enqueue rows; a five-minute sweeper claims due rows and
//! delivers them on a bounded pool. Responses classify as delivered (2xx),
//! terminal failure (4xx except 429), or retryable (429/5xx/transport),
//! with exponential backoff and optional jitter between attempts.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::models::{OutboundEnvelope, OutboundPayload, Webhook, WebhookDirection, WebhookStatus};
use crate::repository::{NewWebhook, WebhookRepository};
use crate::webhooks::breaker::{BreakerDecision, CircuitBreakerRegistry};
use crate::{Error, Result};

const CLAIM_BATCH: i64 = 100;
/// Stored response bodies are clipped to keep rows bounded
const MAX_STORED_BODY: usize = 4096;
/// How long a breaker-skipped delivery waits before the queue retries it
const SKIP_REQUEUE_MINUTES: i64 = 5;

/// Counters reported by a delivery sweep
#[derive(Debug, Default, Clone, Copy)]
pub struct DeliveryStats {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct OutboundDispatcher {
    webhooks: Arc<dyn WebhookRepository>,
    breaker: Arc<CircuitBreakerRegistry>,
    client: reqwest::Client,
    config: WebhookConfig,
    concurrency: Arc<Semaphore>,
}

impl OutboundDispatcher {
    pub fn new(
        webhooks: Arc<dyn WebhookRepository>,
        breaker: Arc<CircuitBreakerRegistry>,
        config: WebhookConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::network(format!("failed to build webhook client: {}", e)))?;

        let concurrency = Arc::new(Semaphore::new(config.delivery_concurrency));
        Ok(Self { webhooks, breaker, client, config, concurrency })
    }

    /// Queue one delivery for a specific endpoint
    pub async fn enqueue(
        &self,
        endpoint_url: &str,
        envelope: &OutboundEnvelope,
        correlation_id: &str,
    ) -> Result<Uuid> {
        let parsed = url::Url::parse(endpoint_url)
            .map_err(|e| Error::validation(format!("invalid webhook endpoint: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation("webhook endpoints must be http(s)"));
        }

        let record = self
            .webhooks
            .insert(NewWebhook {
                direction: WebhookDirection::Outbound,
                event_type: envelope.event_type.clone(),
                event_id: envelope.event_id.clone(),
                endpoint_url: Some(endpoint_url.to_string()),
                status: WebhookStatus::Pending,
                max_attempts: self.config.max_attempts,
                next_attempt_at: Some(Utc::now()),
                request_body: serde_json::to_string(envelope)?,
                request_headers: serde_json::json!({ "content-type": "application/json" }),
                correlation_id: correlation_id.to_string(),
            })
            .await?;

        Ok(record.id)
    }

    /// Queue a state-change event for every configured merchant endpoint
    pub async fn broadcast(
        &self,
        event_type: &str,
        payload: OutboundPayload,
        correlation_id: &str,
    ) -> Result<usize> {
        let envelope = OutboundEnvelope {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            event_date: Utc::now(),
            payload,
        };

        let mut queued = 0;
        for endpoint in &self.config.endpoints {
            self.enqueue(endpoint, &envelope, correlation_id).await?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Five-minute sweep: claim due rows and deliver them concurrently
    pub async fn deliver_due(&self) -> Result<DeliveryStats> {
        let claimed = self.webhooks.claim_due_deliveries(Utc::now(), CLAIM_BATCH).await?;
        let mut stats = DeliveryStats { claimed: claimed.len(), ..Default::default() };

        let mut handles = Vec::with_capacity(claimed.len());
        for webhook in claimed {
            let dispatcher = self.clone();
            let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore closed");
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                dispatcher.deliver_one(webhook).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(result)) => match result {
                    DeliveryResult::Delivered => stats.delivered += 1,
                    DeliveryResult::Retried => stats.retried += 1,
                    DeliveryResult::Failed => stats.failed += 1,
                    DeliveryResult::Skipped => stats.skipped += 1,
                },
                Ok(Err(e)) => {
                    stats.failed += 1;
                    error!(error = %e, "webhook delivery task failed");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(error = %e, "webhook delivery task panicked");
                }
            }
        }

        if stats.claimed > 0 {
            info!(
                claimed = stats.claimed,
                delivered = stats.delivered,
                retried = stats.retried,
                failed = stats.failed,
                skipped = stats.skipped,
                "outbound delivery sweep complete"
            );
        }
        Ok(stats)
    }

    /// Daily cleanup: drop delivered and failed rows past retention
    pub async fn cleanup(&self) -> Result<u64> {
        let now = Utc::now();
        let removed = self
            .webhooks
            .cleanup(
                now - ChronoDuration::days(self.config.cleanup.delivered_retention_days),
                now - ChronoDuration::days(self.config.cleanup.failed_retention_days),
            )
            .await?;

        if removed > 0 {
            info!(removed, "webhook retention cleanup complete");
        }
        Ok(removed)
    }

    async fn deliver_one(&self, webhook: Webhook) -> Result<DeliveryResult> {
        let endpoint = webhook
            .endpoint_url
            .clone()
            .ok_or_else(|| Error::validation("outbound webhook has no endpoint"))?;

        match self.breaker.check(&endpoint) {
            BreakerDecision::Skip => {
                let retry_at = Utc::now() + ChronoDuration::minutes(SKIP_REQUEUE_MINUTES);
                self.webhooks.requeue_delivery(webhook.id, retry_at).await?;
                return Ok(DeliveryResult::Skipped);
            }
            BreakerDecision::Allow | BreakerDecision::Probe => {}
        }

        let attempt = webhook.attempts + 1;
        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("X-Correlation-ID", &webhook.correlation_id)
            .header("X-Webhook-ID", webhook.id.to_string())
            .header("X-Event-Type", &webhook.event_type)
            .header("X-Attempt", attempt.to_string())
            .header("X-Timestamp", Utc::now().to_rfc3339())
            .body(webhook.request_body.clone())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let headers = Self::headers_json(response.headers());
                let body = response.text().await.unwrap_or_default();
                let body = Self::clip(&body);

                if status.is_success() {
                    self.breaker.record_success(&endpoint);
                    self.webhooks
                        .record_delivery_success(webhook.id, attempt, status.as_u16() as i32, headers, &body)
                        .await?;
                    Ok(DeliveryResult::Delivered)
                } else if status.as_u16() == 429 || status.is_server_error() {
                    self.breaker.record_failure(&endpoint);
                    self.handle_retryable(&webhook, attempt, Some(status.as_u16() as i32), Some(&body))
                        .await
                } else {
                    // Other 4xx: the endpoint rejected the event, do not retry
                    self.webhooks
                        .record_delivery_failure(webhook.id, attempt, Some(status.as_u16() as i32), Some(&body))
                        .await?;
                    warn!(
                        webhook_id = %webhook.id,
                        endpoint = %endpoint,
                        status = status.as_u16(),
                        "delivery rejected, not retrying"
                    );
                    Ok(DeliveryResult::Failed)
                }
            }
            Err(e) => {
                // Timeout / connection error
                self.breaker.record_failure(&endpoint);
                warn!(webhook_id = %webhook.id, endpoint = %endpoint, error = %e, "delivery transport error");
                self.handle_retryable(&webhook, attempt, None, Some(&e.to_string())).await
            }
        }
    }

    async fn handle_retryable(
        &self,
        webhook: &Webhook,
        attempt: i32,
        response_code: Option<i32>,
        body: Option<&str>,
    ) -> Result<DeliveryResult> {
        if attempt >= webhook.max_attempts {
            self.webhooks
                .record_delivery_failure(webhook.id, attempt, response_code, body)
                .await?;
            warn!(webhook_id = %webhook.id, attempt, "delivery attempts exhausted");
            return Ok(DeliveryResult::Failed);
        }

        let delay = self.backoff_delay(attempt);
        self.webhooks
            .record_delivery_retry(webhook.id, attempt, Utc::now() + delay, response_code, body)
            .await?;
        Ok(DeliveryResult::Retried)
    }

    /// `min(max_delay, initial * multiplier^attempts)` minutes, with ±10%
    /// jitter when enabled
    fn backoff_delay(&self, attempts: i32) -> ChronoDuration {
        let retry = &self.config.retry;
        let base = retry.initial_delay_minutes as f64 * retry.multiplier.powi(attempts.max(0));
        let capped = base.min(retry.max_delay_minutes as f64);

        let minutes = if retry.jitter {
            use rand::Rng;
            let jitter = capped * 0.1;
            let offset = rand::thread_rng().gen_range(-jitter..=jitter);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        ChronoDuration::seconds((minutes * 60.0) as i64)
    }

    fn clip(body: &str) -> String {
        if body.len() > MAX_STORED_BODY {
            body.chars().take(MAX_STORED_BODY).collect()
        } else {
            body.to_string()
        }
    }

    fn headers_json(headers: &reqwest::header::HeaderMap) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    serde_json::Value::String(value.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryResult {
    Delivered,
    Retried,
    Failed,
    Skipped,
}

/// Next-attempt delay schedule helper used by tests and operators
pub fn backoff_schedule(config: &WebhookConfig, attempts: u32) -> Vec<i64> {
    (0..attempts)
        .map(|n| {
            let base = config.retry.initial_delay_minutes as f64 * config.retry.multiplier.powi(n as i32);
            base.min(config.retry.max_delay_minutes as f64) as i64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookRetryConfig;

    fn config(jitter: bool) -> WebhookConfig {
        WebhookConfig {
            retry: WebhookRetryConfig {
                initial_delay_minutes: 1,
                multiplier: 2.0,
                max_delay_minutes: 1440,
                jitter,
            },
            ..WebhookConfig::default()
        }
    }

    #[test]
    fn test_backoff_schedule_doubles_to_cap() {
        let schedule = backoff_schedule(&config(false), 12);
        assert_eq!(&schedule[..6], &[1, 2, 4, 8, 16, 32]);
        // 2^11 = 2048 exceeds the 1440-minute cap
        assert_eq!(schedule[11], 1440);
    }

    #[test]
    fn test_backoff_delay_without_jitter() {
        let dispatcher_config = config(false);
        let retry = &dispatcher_config.retry;
        let base = retry.initial_delay_minutes as f64 * retry.multiplier.powi(3);
        assert_eq!(base as i64, 8);
    }

    #[test]
    fn test_clip_bounds_body() {
        let long = "x".repeat(10_000);
        assert_eq!(OutboundDispatcher::clip(&long).len(), MAX_STORED_BODY);
        assert_eq!(OutboundDispatcher::clip("short"), "short");
    }
}
