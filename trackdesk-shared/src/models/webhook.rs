/// Webhook model and database operations
///
/// A webhook subscribes a tenant endpoint to event types. Each delivery is
/// signed with the webhook's secret (see `crate::signing`). The secret is
/// never serialized; handlers return it explicitly on create and rotate.
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::models::webhook::{Webhook, CreateWebhook};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> Result<(), sqlx::Error> {
/// let webhook = Webhook::create(&pool, CreateWebhook {
///     tenant_id,
///     url: "https://crm.example.com/hooks/trackdesk".to_string(),
///     events: vec!["conversion.approved".to_string()],
/// }).await?;
///
/// let subscribed = Webhook::list_subscribed(&pool, tenant_id, "conversion.approved").await?;
/// assert_eq!(subscribed.len(), 1);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::api_key::generate_random_string;

/// Prefix of generated signing secrets
pub const SECRET_PREFIX: &str = "whsec_";

/// Webhook subscription
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,

    /// HMAC signing secret
    #[serde(skip_serializing)]
    pub secret: String,

    pub active: bool,

    /// Subscribed event types, `*` for all
    pub events: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebhook {
    pub tenant_id: Uuid,
    pub url: String,
    pub events: Vec<String>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWebhook {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
}

const WEBHOOK_COLUMNS: &str = "id, tenant_id, url, secret, active, events, created_at, updated_at";

/// Generates a fresh signing secret
pub fn generate_secret() -> String {
    format!("{}{}", SECRET_PREFIX, generate_random_string(32))
}

impl Webhook {
    /// Whether this webhook receives `event_type`
    pub fn is_subscribed(&self, event_type: &str) -> bool {
        self.active && self.events.iter().any(|e| e == "*" || e == event_type)
    }

    pub async fn create(pool: &PgPool, data: CreateWebhook) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            r#"
            INSERT INTO webhooks (id, tenant_id, url, secret, events)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {WEBHOOK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(&data.url)
        .bind(generate_secret())
        .bind(&data.events)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }

    /// Active webhooks subscribed to `event_type` (directly or via `*`)
    pub async fn list_subscribed<'e, E>(
        executor: E,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Webhook>(&format!(
            r#"
            SELECT {WEBHOOK_COLUMNS} FROM webhooks
            WHERE tenant_id = $1 AND active AND ($2 = ANY(events) OR '*' = ANY(events))
            "#
        ))
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(executor)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateWebhook,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            r#"
            UPDATE webhooks SET
                url = COALESCE($3, url),
                events = COALESCE($4, events),
                active = COALESCE($5, active),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {WEBHOOK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(data.url)
        .bind(data.events)
        .bind(data.active)
        .fetch_optional(pool)
        .await
    }

    /// Replaces the signing secret
    pub async fn rotate_secret(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            "UPDATE webhooks SET secret = $3, updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 RETURNING {WEBHOOK_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(generate_secret())
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(pool: &PgPool, tenant_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM webhooks WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(pool)
            .await
    }
}
