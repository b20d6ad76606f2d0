/// Outbound delivery model
///
/// A delivery is one pending HTTP call: a signed webhook POST or an affiliate
/// postback GET. The API enqueues rows; `trackdesk-worker` claims and sends
/// them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Default attempt budget
pub const DEFAULT_MAX_ATTEMPTS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// Signed JSON POST to a tenant webhook
    Webhook,

    /// GET to an affiliate postback URL
    Postback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

/// Delivery row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub webhook_id: Option<Uuid>,
    pub affiliate_id: Option<Uuid>,
    pub kind: DeliveryKind,
    pub event_type: String,
    pub method: String,

    /// Fully expanded target URL
    pub url: String,

    /// Event envelope for webhooks, empty object for postbacks
    pub payload: JsonValue,

    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for enqueueing a delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDelivery {
    pub tenant_id: Uuid,
    pub webhook_id: Option<Uuid>,
    pub affiliate_id: Option<Uuid>,
    pub kind: DeliveryKind,
    pub event_type: String,
    pub url: String,
    pub payload: JsonValue,
}

impl NewDelivery {
    /// HTTP method implied by the kind
    pub fn method(&self) -> &'static str {
        match self.kind {
            DeliveryKind::Webhook => "POST",
            DeliveryKind::Postback => "GET",
        }
    }
}

pub const DELIVERY_COLUMNS: &str = "id, tenant_id, webhook_id, affiliate_id, kind, event_type, \
     method, url, payload, status, attempts, max_attempts, next_attempt_at, last_status_code, \
     last_error, delivered_at, created_at, updated_at";

impl Delivery {
    /// Enqueues a delivery, due immediately
    pub async fn enqueue<'e, E>(executor: E, data: NewDelivery) -> Result<Self, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Delivery>(&format!(
            r#"
            INSERT INTO deliveries (
                id, tenant_id, webhook_id, affiliate_id, kind, event_type, method, url, payload, max_attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.webhook_id)
        .bind(data.affiliate_id)
        .bind(data.kind)
        .bind(&data.event_type)
        .bind(data.method())
        .bind(&data.url)
        .bind(&data.payload)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .fetch_one(executor)
        .await
    }

    /// Recent deliveries for a webhook, newest first
    pub async fn list_by_webhook(
        pool: &PgPool,
        tenant_id: Uuid,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries \
             WHERE tenant_id = $1 AND webhook_id = $2 ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(tenant_id)
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_follows_kind() {
        let mut delivery = NewDelivery {
            tenant_id: Uuid::new_v4(),
            webhook_id: None,
            affiliate_id: None,
            kind: DeliveryKind::Webhook,
            event_type: "conversion.created".to_string(),
            url: "https://example.com".to_string(),
            payload: serde_json::json!({}),
        };
        assert_eq!(delivery.method(), "POST");

        delivery.kind = DeliveryKind::Postback;
        assert_eq!(delivery.method(), "GET");
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(serde_json::to_string(&DeliveryStatus::InFlight).unwrap(), "\"in_flight\"");
    }
}
