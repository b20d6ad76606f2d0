/// Webhook endpoints (admin+)
///
/// # Endpoints
///
/// - `POST /v1/webhooks` - Subscribe; the response carries the signing secret
/// - `GET /v1/webhooks`
/// - `GET|PUT|DELETE /v1/webhooks/:id`
/// - `POST /v1/webhooks/:id/rotate-secret` - New secret, shown once
/// - `POST /v1/webhooks/:id/test` - Queue a `webhook.test` delivery
/// - `GET /v1/webhooks/:id/deliveries?limit=` - Recent delivery attempts
///
/// Deliveries are signed with `X-Trackdesk-Signature: t=<unix>,v1=<hex>` over
/// `"{t}.{body}"`.

use super::parse_secure_url;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use trackdesk_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    events::{self, is_subscribable, EventType},
    models::{
        delivery::Delivery,
        webhook::{CreateWebhook, UpdateWebhook, Webhook},
    },
    quota::{QuotaEnforcer, QuotaType},
};
use uuid::Uuid;

const DEFAULT_DELIVERY_LIMIT: i64 = 50;
const MAX_DELIVERY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,

    /// Event types, or `["*"]`
    pub events: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
}

/// Webhook with its secret, returned on create and rotate only
#[derive(Debug, Serialize)]
pub struct WebhookSecretResponse {
    #[serde(flatten)]
    pub webhook: Webhook,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct WebhooksResponse {
    pub webhooks: Vec<Webhook>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveriesQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveriesResponse {
    pub deliveries: Vec<Delivery>,
}

impl From<Webhook> for WebhookSecretResponse {
    fn from(webhook: Webhook) -> Self {
        let secret = webhook.secret.clone();
        Self { webhook, secret }
    }
}

/// Trims, dedups and checks event names
fn normalize_events(events: Vec<String>) -> ApiResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(events.len());

    for event in events {
        let event = event.trim().to_string();
        if !is_subscribable(&event) {
            return Err(ApiError::invalid("events", format!("Unknown event type: {}", event)));
        }
        if !normalized.contains(&event) {
            normalized.push(event);
        }
    }

    if normalized.is_empty() {
        return Err(ApiError::invalid("events", "Subscribe to at least one event"));
    }

    Ok(normalized)
}

async fn load(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Webhook> {
    Webhook::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook not found".to_string()))
}

/// Create webhook
///
/// # Errors
///
/// - `403 Forbidden`: Plan webhook limit reached
/// - `422 Unprocessable Entity`: Non-HTTPS URL or unknown event type
pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<WebhookSecretResponse>)> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:write")?;

    let url = parse_secure_url("url", &req.url)?;
    let events = normalize_events(req.events)?;

    QuotaEnforcer::new(state.db.clone())
        .enforce(auth.tenant_id, QuotaType::Webhooks)
        .await?;

    let webhook = Webhook::create(
        &state.db,
        CreateWebhook {
            tenant_id: auth.tenant_id,
            url: url.to_string(),
            events,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, webhook_id = %webhook.id, "Created webhook");

    Ok((StatusCode::CREATED, Json(webhook.into())))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<WebhooksResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:read")?;

    let webhooks = Webhook::list(&state.db, auth.tenant_id).await?;
    Ok(Json(WebhooksResponse { webhooks }))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Webhook>> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:read")?;
    Ok(Json(load(&state, &auth, id).await?))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateWebhookRequest>,
) -> ApiResult<Json<Webhook>> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:write")?;

    let url = req
        .url
        .as_deref()
        .map(|u| parse_secure_url("url", u))
        .transpose()?
        .map(|u| u.to_string());
    let events = req.events.map(normalize_events).transpose()?;

    let webhook = Webhook::update(
        &state.db,
        auth.tenant_id,
        id,
        UpdateWebhook {
            url,
            events,
            active: req.active,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Webhook not found".to_string()))?;

    Ok(Json(webhook))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:write")?;

    if !Webhook::delete(&state.db, auth.tenant_id, id).await? {
        return Err(ApiError::NotFound("Webhook not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn rotate_secret(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookSecretResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:write")?;

    let webhook = Webhook::rotate_secret(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook not found".to_string()))?;

    tracing::info!(tenant_id = %auth.tenant_id, webhook_id = %id, "Rotated webhook secret");

    Ok(Json(webhook.into()))
}

/// Queues a test delivery, ignoring the event subscription
pub async fn test_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Delivery>)> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:write")?;

    let webhook = load(&state, &auth, id).await?;
    let delivery = events::publish_to(
        &state.db,
        &webhook,
        EventType::WebhookTest,
        json!({ "webhook_id": webhook.id, "sent_at": Utc::now() }),
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(delivery)))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> ApiResult<Json<DeliveriesResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "webhooks:read")?;

    let webhook = load(&state, &auth, id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DELIVERY_LIMIT)
        .clamp(1, MAX_DELIVERY_LIMIT);

    let deliveries = Delivery::list_by_webhook(&state.db, auth.tenant_id, webhook.id, limit).await?;
    Ok(Json(DeliveriesResponse { deliveries }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_events() {
        let events = normalize_events(vec![
            " conversion.approved ".to_string(),
            "conversion.approved".to_string(),
            "payout.completed".to_string(),
        ])
        .unwrap();
        assert_eq!(events, vec!["conversion.approved", "payout.completed"]);

        assert!(normalize_events(vec!["*".to_string()]).is_ok());
        assert!(normalize_events(vec![]).is_err());
        assert!(normalize_events(vec!["order.created".to_string()]).is_err());
    }
}
