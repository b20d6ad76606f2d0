/// Worker orchestrator
///
/// Polls the delivery queue, sends claimed deliveries concurrently and
/// records each outcome.
///
/// # Architecture
///
/// ```text
/// Orchestrator
///   ├─> DeliveryQueue: recover stale rows, claim due rows
///   ├─> build_request: sign webhooks, pass postbacks through
///   ├─> Deliverer: send (HTTP in production, mock in tests)
///   └─> DeliveryQueue: succeeded | retry with backoff | failed
/// ```
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use trackdesk_worker::deliverers::HttpDeliverer;
/// use trackdesk_worker::orchestrator::{OrchestratorConfig, WorkerOrchestrator};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> anyhow::Result<()> {
/// let deliverer = Arc::new(HttpDeliverer::new(Duration::from_secs(10))?);
/// let orchestrator = WorkerOrchestrator::new(pool, deliverer, OrchestratorConfig::default());
///
/// let shutdown = orchestrator.shutdown_token();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     shutdown.cancel();
/// });
///
/// orchestrator.run().await?;
/// # Ok(())
/// # }
/// ```

use crate::backoff;
use crate::deliverers::{Deliverer, DeliveryMethod, DeliveryRequest};
use crate::queue::{ClaimedDelivery, DeliveryQueue, STALE_AFTER};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use trackdesk_shared::models::delivery::DeliveryKind;
use trackdesk_shared::signing::sign_payload;

pub const EVENT_HEADER: &str = "X-Trackdesk-Event";
pub const DELIVERY_HEADER: &str = "X-Trackdesk-Delivery";
pub const SIGNATURE_HEADER: &str = "X-Trackdesk-Signature";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait between polls when the queue is empty
    pub poll_interval: Duration,

    /// Deliveries in flight at once
    pub max_concurrent: usize,

    /// Rows claimed per poll
    pub batch_size: usize,

    /// Upper bound on attempts; a row's own `max_attempts` may be lower
    pub max_attempts: i32,

    /// How often stale `in_flight` rows are swept
    pub recovery_interval: Duration,

    /// In-flight deliveries get this long to finish on shutdown
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            poll_interval: Duration::from_secs(1),
            max_concurrent: 10,
            batch_size: 20,
            max_attempts: 6,
            recovery_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Retrying,
    Failed,
}

pub struct WorkerOrchestrator {
    queue: DeliveryQueue,
    deliverer: Arc<dyn Deliverer>,
    config: OrchestratorConfig,
    shutdown_token: CancellationToken,
}

/// Builds the HTTP request for a claimed delivery
///
/// Webhooks are POSTed with the envelope as body and signed over
/// `"{timestamp}.{body}"`. Postbacks are a bare GET of the expanded URL.
pub fn build_request(claimed: &ClaimedDelivery, timestamp: i64) -> Result<DeliveryRequest, String> {
    let delivery = &claimed.delivery;

    match delivery.kind {
        DeliveryKind::Postback => match DeliveryMethod::from_stored(&delivery.method) {
            DeliveryMethod::Get => Ok(DeliveryRequest::get(&delivery.url)),
            DeliveryMethod::Post => Err("postbacks are sent with GET".to_string()),
        },
        DeliveryKind::Webhook => {
            let secret = claimed
                .secret
                .as_deref()
                .ok_or_else(|| "webhook no longer exists".to_string())?;
            if claimed.webhook_active == Some(false) {
                return Err("webhook is disabled".to_string());
            }

            let body = serde_json::to_vec(&delivery.payload).map_err(|e| e.to_string())?;
            let signature = sign_payload(secret, timestamp, &body);

            Ok(DeliveryRequest::post_json(
                &delivery.url,
                body,
                vec![
                    (EVENT_HEADER.to_string(), delivery.event_type.clone()),
                    (DELIVERY_HEADER.to_string(), delivery.id.to_string()),
                    (SIGNATURE_HEADER.to_string(), signature),
                ],
            ))
        }
    }
}

/// Sends one delivery and records the result
async fn process(
    queue: &DeliveryQueue,
    deliverer: &dyn Deliverer,
    claimed: ClaimedDelivery,
    max_attempts: i32,
) -> anyhow::Result<Outcome> {
    let delivery = &claimed.delivery;
    let id = delivery.id;
    let attempts = delivery.attempts;
    let exhausted = attempts >= delivery.max_attempts.min(max_attempts);

    let request = match build_request(&claimed, Utc::now().timestamp()) {
        Ok(request) => request,
        Err(reason) => {
            tracing::warn!(delivery_id = %id, reason = %reason, "Dropping undeliverable delivery");
            queue.mark_failed(id, None, &reason).await?;
            return Ok(Outcome::Failed);
        }
    };

    let (status_code, error) = match deliverer.deliver(request).await {
        Ok(response) if response.is_success() => {
            queue.mark_succeeded(id, response.status).await?;
            tracing::info!(
                delivery_id = %id,
                event = %delivery.event_type,
                status = response.status,
                attempts,
                "Delivered"
            );
            return Ok(Outcome::Succeeded);
        }
        Ok(response) => {
            let error = match &response.body_excerpt {
                Some(body) => format!("HTTP {}: {}", response.status, body),
                None => format!("HTTP {}", response.status),
            };
            (Some(response.status), error)
        }
        Err(e) => (None, e.to_string()),
    };

    if exhausted {
        tracing::warn!(delivery_id = %id, attempts, error = %error, "Delivery failed permanently");
        queue.mark_failed(id, status_code, &error).await?;
        return Ok(Outcome::Failed);
    }

    let next_attempt_at = backoff::next_attempt_at(attempts, Utc::now());
    tracing::debug!(
        delivery_id = %id,
        attempts,
        error = %error,
        next_attempt_at = %next_attempt_at,
        "Delivery failed, retrying"
    );
    queue.mark_retry(id, status_code, &error, next_attempt_at).await?;

    Ok(Outcome::Retrying)
}

impl WorkerOrchestrator {
    pub fn new(db: sqlx::PgPool, deliverer: Arc<dyn Deliverer>, config: OrchestratorConfig) -> Self {
        WorkerOrchestrator {
            queue: DeliveryQueue::new(db),
            deliverer,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancel to stop the loop after in-flight deliveries finish
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Claims and sends one batch, waiting for every delivery to finish
    ///
    /// Returns the outcomes in completion order.
    pub async fn process_batch(&self) -> anyhow::Result<Vec<Outcome>> {
        let claimed = self.queue.claim(self.config.batch_size).await?;
        let mut outcomes = Vec::with_capacity(claimed.len());

        for delivery in claimed {
            outcomes.push(process(&self.queue, self.deliverer.as_ref(), delivery, self.config.max_attempts).await?);
        }

        Ok(outcomes)
    }

    /// Runs until the shutdown token is cancelled
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            deliverer = self.deliverer.name(),
            max_concurrent = self.config.max_concurrent,
            batch_size = self.config.batch_size,
            "Worker orchestrator starting"
        );

        let mut active: JoinSet<()> = JoinSet::new();
        let mut last_recovery: Option<Instant> = None;

        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            // Reap finished deliveries
            while let Some(joined) = active.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Delivery task panicked");
                }
            }

            if last_recovery.map_or(true, |at| at.elapsed() >= self.config.recovery_interval) {
                if let Err(e) = self.queue.recover_stale(STALE_AFTER).await {
                    tracing::error!(error = %e, "Failed to recover stale deliveries");
                }
                last_recovery = Some(Instant::now());
            }

            let available = self.config.max_concurrent.saturating_sub(active.len());
            if available == 0 {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => break,
                    _ = active.join_next() => {}
                }
                continue;
            }

            let claimed = match self.queue.claim(available.min(self.config.batch_size)).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim deliveries");
                    self.idle().await;
                    continue;
                }
            };

            if claimed.is_empty() {
                self.idle().await;
                continue;
            }

            for delivery in claimed {
                let queue = self.queue.clone();
                let deliverer = self.deliverer.clone();
                let max_attempts = self.config.max_attempts;
                let id = delivery.delivery.id;

                active.spawn(async move {
                    if let Err(e) = process(&queue, deliverer.as_ref(), delivery, max_attempts).await {
                        tracing::error!(delivery_id = %id, error = %e, "Failed to record delivery outcome");
                    }
                });
            }
        }

        self.drain(active).await;
        tracing::info!("Worker orchestrator shut down");
        Ok(())
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown_token.cancelled() => {}
            _ = sleep(self.config.poll_interval) => {}
        }
    }

    /// Waits for in-flight deliveries, aborting those past the grace period
    async fn drain(&self, mut active: JoinSet<()>) {
        if active.is_empty() {
            return;
        }

        tracing::info!(count = active.len(), "Waiting for in-flight deliveries");
        let deadline = sleep(self.config.shutdown_grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = active.join_next() => {
                    if joined.is_none() {
                        return;
                    }
                }
                _ = &mut deadline => {
                    // Aborted rows stay in_flight until the next stale sweep
                    tracing::warn!(count = active.len(), "Aborting deliveries still in flight");
                    active.abort_all();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trackdesk_shared::models::delivery::{Delivery, DeliveryStatus};
    use trackdesk_shared::signing::verify_trackdesk_signature;
    use uuid::Uuid;

    fn claimed(kind: DeliveryKind, secret: Option<&str>, active: Option<bool>) -> ClaimedDelivery {
        let now = Utc::now();
        ClaimedDelivery {
            delivery: Delivery {
                id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                webhook_id: secret.map(|_| Uuid::new_v4()),
                affiliate_id: None,
                kind,
                event_type: "conversion.approved".to_string(),
                method: if kind == DeliveryKind::Webhook { "POST" } else { "GET" }.to_string(),
                url: "https://hooks.example.com/trackdesk".to_string(),
                payload: json!({"type": "conversion.approved", "data": {"amount_cents": 4990}}),
                status: DeliveryStatus::InFlight,
                attempts: 1,
                max_attempts: 6,
                next_attempt_at: now,
                last_status_code: None,
                last_error: None,
                delivered_at: None,
                created_at: now,
                updated_at: now,
            },
            secret: secret.map(str::to_string),
            webhook_active: active,
        }
    }

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_attempts, 6);
    }

    #[test]
    fn test_webhook_request_is_signed() {
        let delivery = claimed(DeliveryKind::Webhook, Some("whsec_test"), Some(true));
        let request = build_request(&delivery, 1_700_000_000).unwrap();

        assert_eq!(request.method, DeliveryMethod::Post);
        assert_eq!(request.header(EVENT_HEADER), Some("conversion.approved"));
        assert_eq!(request.header(DELIVERY_HEADER), Some(delivery.delivery.id.to_string().as_str()));

        let body = request.body.clone().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, delivery.delivery.payload);

        let signature = request.header(SIGNATURE_HEADER).unwrap();
        assert!(verify_trackdesk_signature("whsec_test", signature, &body, 1_700_000_000, 300).is_ok());
    }

    #[test]
    fn test_postback_request_is_plain_get() {
        let delivery = claimed(DeliveryKind::Postback, None, None);
        let request = build_request(&delivery, 0).unwrap();

        assert_eq!(request.method, DeliveryMethod::Get);
        assert!(request.body.is_none());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_disabled_or_missing_webhook_not_sent() {
        assert!(build_request(&claimed(DeliveryKind::Webhook, Some("s"), Some(false)), 0).is_err());
        assert!(build_request(&claimed(DeliveryKind::Webhook, None, None), 0).is_err());
    }
}
