/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Register, login, refresh, current session
/// - `api_keys`, `team`: Tenant access management
/// - `affiliates`, `offers`, `coupons`: Program catalogue
/// - `links`, `smart_links`, `clicks`: Tracking links and click listings
/// - `tracking`: Public click redirect and server postback
/// - `conversions`, `payouts`: Money flow
/// - `rules`: Fraud, quality and traffic rules
/// - `webhooks`: Outbound event subscriptions
/// - `branding`: White-label settings
/// - `integrations`: Stripe and Shopify receivers and their secrets
/// - `dashboard`: Aggregated statistics

pub mod affiliates;
pub mod api_keys;
pub mod auth;
pub mod branding;
pub mod clicks;
pub mod conversions;
pub mod coupons;
pub mod dashboard;
pub mod health;
pub mod integrations;
pub mod links;
pub mod offers;
pub mod payouts;
pub mod rules;
pub mod smart_links;
pub mod team;
pub mod tracking;
pub mod webhooks;

use crate::error::ApiError;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use trackdesk_shared::events::{self, EventType};
use trackdesk_shared::models::Pagination;
use url::Url;
use uuid::Uuid;

/// `?page=&per_page=` for list endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.per_page)
    }
}

/// Parses an absolute http(s) URL
pub(crate) fn parse_http_url(field: &str, value: &str) -> Result<Url, ApiError> {
    let url = Url::parse(value.trim()).map_err(|_| ApiError::invalid(field, "Must be an absolute URL"))?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ApiError::invalid(field, "Must be an http or https URL")),
    }
}

/// Like [`parse_http_url`], but plain http is only accepted for localhost
pub(crate) fn parse_secure_url(field: &str, value: &str) -> Result<Url, ApiError> {
    let url = parse_http_url(field, value)?;

    let local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    if url.scheme() == "http" && !local {
        return Err(ApiError::invalid(field, "Must use https"));
    }

    Ok(url)
}

/// Queues webhook deliveries for an event that already happened
///
/// The change is committed by the time this runs, so a failure to queue is
/// logged rather than turned into an error response.
pub(crate) async fn emit(db: &PgPool, tenant_id: Uuid, event_type: EventType, data: JsonValue) {
    let queued = match db.acquire().await {
        Ok(mut conn) => events::publish(&mut conn, tenant_id, event_type, data).await,
        Err(e) => Err(e),
    };
    if let Err(e) = queued {
        tracing::error!(tenant_id = %tenant_id, event = %event_type, error = %e, "Failed to queue event");
    }
}
