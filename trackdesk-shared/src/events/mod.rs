/// Outbound events
///
/// Domain changes are published as [`EventEnvelope`]s. Publishing enqueues
/// one delivery row per subscribed webhook; `trackdesk-worker` signs and
/// sends them.
///
/// # Example
///
/// ```no_run
/// use serde_json::json;
/// use trackdesk_shared::events::{publish, EventType};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> Result<(), sqlx::Error> {
/// let mut conn = pool.acquire().await?;
/// let queued = publish(&mut conn, tenant_id, EventType::AffiliateApproved, json!({"id": Uuid::new_v4()})).await?;
/// println!("{} deliveries queued", queued);
/// # Ok(())
/// # }
/// ```

pub mod postback;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::delivery::{Delivery, DeliveryKind, NewDelivery};
use crate::models::webhook::Webhook;

/// Event types a webhook can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "affiliate.created")]
    AffiliateCreated,
    #[serde(rename = "affiliate.approved")]
    AffiliateApproved,
    #[serde(rename = "click.flagged")]
    ClickFlagged,
    #[serde(rename = "conversion.created")]
    ConversionCreated,
    #[serde(rename = "conversion.approved")]
    ConversionApproved,
    #[serde(rename = "conversion.rejected")]
    ConversionRejected,
    #[serde(rename = "payout.created")]
    PayoutCreated,
    #[serde(rename = "payout.completed")]
    PayoutCompleted,
    #[serde(rename = "webhook.test")]
    WebhookTest,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::AffiliateCreated,
        EventType::AffiliateApproved,
        EventType::ClickFlagged,
        EventType::ConversionCreated,
        EventType::ConversionApproved,
        EventType::ConversionRejected,
        EventType::PayoutCreated,
        EventType::PayoutCompleted,
        EventType::WebhookTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AffiliateCreated => "affiliate.created",
            EventType::AffiliateApproved => "affiliate.approved",
            EventType::ClickFlagged => "click.flagged",
            EventType::ConversionCreated => "conversion.created",
            EventType::ConversionApproved => "conversion.approved",
            EventType::ConversionRejected => "conversion.rejected",
            EventType::PayoutCreated => "payout.created",
            EventType::PayoutCompleted => "payout.completed",
            EventType::WebhookTest => "webhook.test",
        }
    }

    /// Parses a subscription name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `name` is a valid webhook subscription (`*` or a known event)
pub fn is_subscribable(name: &str) -> bool {
    name == "*" || EventType::parse(name).is_some()
}

/// Event body posted to webhooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub event_type: EventType,

    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: JsonValue,
}

impl EventEnvelope {
    pub fn new(tenant_id: Uuid, event_type: EventType, data: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            tenant_id,
            created_at: Utc::now(),
            data,
        }
    }
}

/// Queues `event` for every subscribed webhook of the tenant
///
/// Pass `&mut *tx` to make the deliveries part of the same commit as the
/// change that caused them.
///
/// # Returns
///
/// Number of deliveries queued
pub async fn publish(
    conn: &mut sqlx::PgConnection,
    tenant_id: Uuid,
    event_type: EventType,
    data: JsonValue,
) -> Result<usize, sqlx::Error> {
    let webhooks = Webhook::list_subscribed(&mut *conn, tenant_id, event_type.as_str()).await?;
    if webhooks.is_empty() {
        return Ok(0);
    }

    let envelope = EventEnvelope::new(tenant_id, event_type, data);
    let payload = serde_json::to_value(&envelope).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    for webhook in &webhooks {
        Delivery::enqueue(
            &mut *conn,
            NewDelivery {
                tenant_id,
                webhook_id: Some(webhook.id),
                affiliate_id: None,
                kind: DeliveryKind::Webhook,
                event_type: event_type.as_str().to_string(),
                url: webhook.url.clone(),
                payload: payload.clone(),
            },
        )
        .await?;
    }

    tracing::debug!(
        tenant_id = %tenant_id,
        event = %event_type,
        count = webhooks.len(),
        "Queued webhook deliveries"
    );

    Ok(webhooks.len())
}

/// Queues one event to a single webhook regardless of its subscriptions
pub async fn publish_to(
    pool: &sqlx::PgPool,
    webhook: &Webhook,
    event_type: EventType,
    data: JsonValue,
) -> Result<Delivery, sqlx::Error> {
    let envelope = EventEnvelope::new(webhook.tenant_id, event_type, data);
    let payload = serde_json::to_value(&envelope).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Delivery::enqueue(
        pool,
        NewDelivery {
            tenant_id: webhook.tenant_id,
            webhook_id: Some(webhook.id),
            affiliate_id: None,
            kind: DeliveryKind::Webhook,
            event_type: event_type.as_str().to_string(),
            url: webhook.url.clone(),
            payload,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names_round_trip() {
        for event in EventType::ALL {
            assert_eq!(EventType::parse(event.as_str()), Some(event));
            assert_eq!(
                serde_json::to_value(event).unwrap(),
                json!(event.as_str())
            );
        }
    }

    #[test]
    fn test_is_subscribable() {
        assert!(is_subscribable("*"));
        assert!(is_subscribable("conversion.approved"));
        assert!(!is_subscribable("conversion.deleted"));
    }

    #[test]
    fn test_envelope_shape() {
        let tenant_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(tenant_id, EventType::PayoutCreated, json!({"amount_cents": 5000}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "payout.created");
        assert_eq!(value["tenant_id"], json!(tenant_id));
        assert_eq!(value["data"]["amount_cents"], 5000);
        assert!(value.get("id").is_some());
        assert!(value.get("created_at").is_some());
    }
}
