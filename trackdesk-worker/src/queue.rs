/// Delivery queue
///
/// Workers share the `deliveries` table. Claiming a row moves it from
/// `pending` to `in_flight` and counts the attempt; `FOR UPDATE SKIP LOCKED`
/// keeps concurrent workers off each other's rows.
///
/// # Row lifecycle
///
/// ```text
/// pending ──claim──> in_flight ──2xx──> succeeded
///    ^                   │
///    └──retry (backoff)──┤
///                        └──attempts exhausted──> failed
/// ```
///
/// A worker that dies mid-delivery leaves its rows `in_flight`;
/// [`DeliveryQueue::recover_stale`] returns them to `pending`.
///
/// # Example
///
/// ```no_run
/// use trackdesk_worker::queue::DeliveryQueue;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = DeliveryQueue::new(pool);
/// for claimed in queue.claim(10).await? {
///     println!("Claimed delivery {} to {}", claimed.delivery.id, claimed.delivery.url);
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use trackdesk_shared::models::delivery::Delivery;
use uuid::Uuid;

/// Claimed rows left `in_flight` longer than this are presumed abandoned
pub const STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Longest error text stored on a row
const MAX_ERROR_LEN: usize = 1000;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Delivery not found or not in flight: {0}")]
    NotInFlight(Uuid),
}

/// A claimed delivery with its webhook's signing state
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedDelivery {
    #[sqlx(flatten)]
    pub delivery: Delivery,

    /// Signing secret; `None` for postbacks
    pub secret: Option<String>,

    /// `None` for postbacks
    pub webhook_active: Option<bool>,
}

const CLAIMED_COLUMNS: &str = "d.id, d.tenant_id, d.webhook_id, d.affiliate_id, d.kind, d.event_type, \
     d.method, d.url, d.payload, d.status, d.attempts, d.max_attempts, d.next_attempt_at, \
     d.last_status_code, d.last_error, d.delivered_at, d.created_at, d.updated_at, \
     due.secret, due.webhook_active";

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}

#[derive(Clone)]
pub struct DeliveryQueue {
    db: PgPool,
}

impl DeliveryQueue {
    pub fn new(db: PgPool) -> Self {
        DeliveryQueue { db }
    }

    /// Claims up to `limit` due deliveries, oldest due first
    pub async fn claim(&self, limit: usize) -> Result<Vec<ClaimedDelivery>, QueueError> {
        let claimed = sqlx::query_as::<_, ClaimedDelivery>(&format!(
            r#"
            WITH due AS (
                SELECT dl.id, w.secret, w.active AS webhook_active
                FROM deliveries dl
                LEFT JOIN webhooks w ON w.id = dl.webhook_id
                WHERE dl.status = 'pending' AND dl.next_attempt_at <= NOW()
                ORDER BY dl.next_attempt_at
                LIMIT $1
                FOR UPDATE OF dl SKIP LOCKED
            )
            UPDATE deliveries d
            SET status = 'in_flight', attempts = d.attempts + 1, updated_at = NOW()
            FROM due
            WHERE d.id = due.id
            RETURNING {CLAIMED_COLUMNS}
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), "Claimed deliveries");
        }

        Ok(claimed)
    }

    pub async fn mark_succeeded(&self, id: Uuid, status_code: u16) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'succeeded', delivered_at = NOW(), last_status_code = $2,
                last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(i32::from(status_code))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotInFlight(id));
        }
        Ok(())
    }

    /// Puts a delivery back to `pending`, due at `next_attempt_at`
    pub async fn mark_retry(
        &self,
        id: Uuid,
        status_code: Option<u16>,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'pending', next_attempt_at = $2, last_status_code = $3,
                last_error = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(status_code.map(i32::from))
        .bind(truncate_error(error))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotInFlight(id));
        }
        Ok(())
    }

    /// Gives up on a delivery
    pub async fn mark_failed(&self, id: Uuid, status_code: Option<u16>, error: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'failed', last_status_code = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(status_code.map(i32::from))
        .bind(truncate_error(error))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotInFlight(id));
        }
        Ok(())
    }

    /// Returns rows stuck `in_flight` longer than `older_than` to `pending`
    ///
    /// The attempt they were claimed for still counts.
    pub async fn recover_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'pending', next_attempt_at = NOW(),
                last_error = COALESCE(last_error, 'worker stopped mid-delivery'), updated_at = NOW()
            WHERE status = 'in_flight' AND updated_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.db)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered stale in-flight deliveries");
        }
        Ok(recovered)
    }

    pub async fn pending_count(&self) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries WHERE status = 'pending'")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("HTTP 500"), "HTTP 500");

        let long = "ü".repeat(MAX_ERROR_LEN);
        let cut = truncate_error(&long);
        assert!(cut.len() <= MAX_ERROR_LEN);
        assert!(cut.chars().all(|c| c == 'ü'));
    }

    #[test]
    fn test_stale_window() {
        assert_eq!(STALE_AFTER.as_secs(), 300);
    }
}
