/// Third-party order receivers and their secrets
///
/// # Endpoints
///
/// - `POST /integrations/stripe/:tenant_slug` - Stripe events (public, signed)
/// - `POST /integrations/shopify/:tenant_slug` - Shopify order webhooks (public, signed)
/// - `GET /v1/integrations` - Configured providers, secrets masked (admin+)
/// - `PUT /v1/integrations/:provider` - Set a provider's signing secret (admin+)
///
/// Orders that cannot be credited to an affiliate are acknowledged with
/// `{"status":"ignored"}` so the provider stops retrying.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use trackdesk_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        conversion::ConversionSource,
        integration::{Integration, IntegrationProvider, IntegrationSummary},
        tenant::Tenant,
    },
    signing::{verify_shopify_hmac, verify_stripe_signature},
    tracking::{parse_amount_to_cents, record_conversion, AttributionRequest, ConversionRequest, TrackingError},
};
use uuid::Uuid;
use validator::Validate;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const SHOPIFY_HMAC_HEADER: &str = "x-shopify-hmac-sha256";
const SHOPIFY_TOPIC_HEADER: &str = "x-shopify-topic";

const STRIPE_EVENTS: [&str; 2] = ["checkout.session.completed", "payment_intent.succeeded"];
const SHOPIFY_ORDER_TOPIC: &str = "orders/create";

/// Order extracted from a provider payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProviderOrder {
    pub attribution: AttributionRequest,
    pub amount_cents: i64,
    pub order_id: String,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntegrationAck {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_id: Option<Uuid>,
}

impl IntegrationAck {
    fn ignored() -> Self {
        Self {
            status: "ignored",
            conversion_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertIntegrationRequest {
    #[validate(length(min = 8, max = 500, message = "Secret must be 8-500 characters"))]
    pub secret: String,

    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct IntegrationsResponse {
    pub integrations: Vec<IntegrationSummary>,
}

fn non_empty(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_uuid(value: Option<&JsonValue>) -> Option<Uuid> {
    non_empty(value).and_then(|s| Uuid::parse_str(&s).ok())
}

/// Reads a `checkout.session.completed` or `payment_intent.succeeded` event
///
/// Returns `None` for any other event type.
pub(crate) fn stripe_order(event: &JsonValue) -> ApiResult<Option<ProviderOrder>> {
    let event_type = event["type"].as_str().unwrap_or_default();
    if !STRIPE_EVENTS.contains(&event_type) {
        return Ok(None);
    }

    let object = &event["data"]["object"];
    let order_id = non_empty(object.get("id"))
        .ok_or_else(|| ApiError::BadRequest("Event object has no id".to_string()))?;

    // Stripe amounts are already in minor units
    let amount_cents = object["amount_total"]
        .as_i64()
        .or_else(|| object["amount_received"].as_i64())
        .or_else(|| object["amount"].as_i64())
        .unwrap_or(0);

    let metadata = &object["metadata"];
    Ok(Some(ProviderOrder {
        attribution: AttributionRequest {
            click_id: parse_uuid(metadata.get("click_id")),
            coupon: non_empty(metadata.get("coupon")),
            referral_code: non_empty(metadata.get("referral_code")),
            offer_id: parse_uuid(metadata.get("offer_id")),
        },
        amount_cents,
        order_id,
        currency: non_empty(object.get("currency")).map(|c| c.to_ascii_uppercase()),
    }))
}

/// Reads an `orders/create` payload
pub(crate) fn shopify_order(order: &JsonValue) -> ApiResult<ProviderOrder> {
    let order_id = match &order["id"] {
        JsonValue::Number(n) => n.to_string(),
        other => non_empty(Some(other))
            .ok_or_else(|| ApiError::BadRequest("Order has no id".to_string()))?,
    };

    let amount_cents = match non_empty(order.get("total_price")) {
        Some(total) => parse_amount_to_cents(&total)?,
        None => 0,
    };

    let note = |name: &str| {
        order["note_attributes"]
            .as_array()
            .and_then(|attrs| attrs.iter().find(|a| a["name"].as_str() == Some(name)))
            .and_then(|a| non_empty(a.get("value")))
    };

    let coupon = order["discount_codes"]
        .as_array()
        .and_then(|codes| codes.first())
        .and_then(|c| non_empty(c.get("code")));

    Ok(ProviderOrder {
        attribution: AttributionRequest {
            click_id: note("click_id").and_then(|s| Uuid::parse_str(&s).ok()),
            coupon,
            referral_code: note("referral_code"),
            offer_id: note("offer_id").and_then(|s| Uuid::parse_str(&s).ok()),
        },
        amount_cents,
        order_id,
        currency: non_empty(order.get("currency")).map(|c| c.to_ascii_uppercase()),
    })
}

async fn load_secret(state: &AppState, tenant_slug: &str, provider: IntegrationProvider) -> ApiResult<Integration> {
    let tenant = Tenant::find_by_slug(&state.db, tenant_slug)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))?;

    Integration::find_active(&state.db, tenant.id, provider)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} integration is not configured", provider.as_str())))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", name)))
}

fn parse_body(body: &[u8]) -> ApiResult<JsonValue> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Records the order, acknowledging unattributed and repeated ones
async fn record(
    state: &AppState,
    tenant_id: Uuid,
    provider: IntegrationProvider,
    source: ConversionSource,
    order: ProviderOrder,
    raw: JsonValue,
) -> ApiResult<Json<IntegrationAck>> {
    if order.attribution.is_empty() {
        tracing::debug!(tenant_id = %tenant_id, provider = provider.as_str(), "Order carries no attribution");
        return Ok(Json(IntegrationAck::ignored()));
    }

    let request = ConversionRequest {
        attribution: order.attribution,
        amount_cents: order.amount_cents,
        order_id: Some(order.order_id.clone()),
        currency: order.currency,
        source,
        metadata: Some(json!({ "provider": provider.as_str(), "provider_payload": raw })),
    };

    match record_conversion(&state.db, tenant_id, request).await {
        Ok(conversion) => Ok(Json(IntegrationAck {
            status: "recorded",
            conversion_id: Some(conversion.id),
        })),
        Err(TrackingError::Unattributed | TrackingError::CouponUnavailable(_)) => {
            tracing::info!(
                tenant_id = %tenant_id,
                provider = provider.as_str(),
                order_id = %order.order_id,
                "Ignoring unattributed order"
            );
            Ok(Json(IntegrationAck::ignored()))
        }
        Err(TrackingError::DuplicateOrder { existing_id, .. }) => Ok(Json(IntegrationAck {
            status: "duplicate",
            conversion_id: Some(existing_id),
        })),
        Err(e) => Err(e.into()),
    }
}

/// Stripe receiver
///
/// # Errors
///
/// - `401 Unauthorized`: Missing or invalid `Stripe-Signature`
/// - `404 Not Found`: Unknown tenant, or Stripe not configured
pub async fn stripe_webhook(
    State(state): State<AppState>,
    Path(tenant_slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IntegrationAck>> {
    let integration = load_secret(&state, &tenant_slug, IntegrationProvider::Stripe).await?;
    let signature = required_header(&headers, STRIPE_SIGNATURE_HEADER)?;
    verify_stripe_signature(&integration.secret, signature, &body, Utc::now().timestamp())?;

    let event = parse_body(&body)?;
    let Some(order) = stripe_order(&event)? else {
        tracing::debug!(event_type = ?event["type"].as_str(), "Ignoring Stripe event");
        return Ok(Json(IntegrationAck::ignored()));
    };

    let object = event["data"]["object"].clone();
    record(
        &state,
        integration.tenant_id,
        IntegrationProvider::Stripe,
        ConversionSource::Stripe,
        order,
        object,
    )
    .await
}

/// Shopify receiver
///
/// # Errors
///
/// - `401 Unauthorized`: Missing or invalid `X-Shopify-Hmac-Sha256`
/// - `404 Not Found`: Unknown tenant, or Shopify not configured
pub async fn shopify_webhook(
    State(state): State<AppState>,
    Path(tenant_slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IntegrationAck>> {
    let integration = load_secret(&state, &tenant_slug, IntegrationProvider::Shopify).await?;
    let hmac = required_header(&headers, SHOPIFY_HMAC_HEADER)?;
    verify_shopify_hmac(&integration.secret, hmac, &body)?;

    let topic = headers
        .get(SHOPIFY_TOPIC_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if topic != SHOPIFY_ORDER_TOPIC {
        tracing::debug!(topic = %topic, "Ignoring Shopify topic");
        return Ok(Json(IntegrationAck::ignored()));
    }

    let payload = parse_body(&body)?;
    let order = shopify_order(&payload)?;

    record(
        &state,
        integration.tenant_id,
        IntegrationProvider::Shopify,
        ConversionSource::Shopify,
        order,
        payload,
    )
    .await
}

pub async fn list_integrations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<IntegrationsResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "integrations:read")?;

    let integrations = Integration::list(&state.db, auth.tenant_id)
        .await?
        .iter()
        .map(Integration::summary)
        .collect();

    Ok(Json(IntegrationsResponse { integrations }))
}

pub async fn upsert_integration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(provider): Path<String>,
    Json(req): Json<UpsertIntegrationRequest>,
) -> ApiResult<Json<IntegrationSummary>> {
    require_permission(&auth, ResourcePermission::Manage, "integrations:write")?;

    let provider: IntegrationProvider = provider.parse().map_err(ApiError::NotFound)?;
    req.validate()?;

    let integration = Integration::upsert(
        &state.db,
        auth.tenant_id,
        provider,
        req.secret.trim(),
        req.active.unwrap_or(true),
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, provider = provider.as_str(), "Saved integration secret");

    Ok(Json(integration.summary()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_checkout_session() {
        let click_id = Uuid::new_v4();
        let event = json!({
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_123",
                "amount_total": 4990,
                "currency": "usd",
                "metadata": {"click_id": click_id.to_string()}
            }}
        });

        let order = stripe_order(&event).unwrap().unwrap();
        assert_eq!(order.order_id, "cs_test_123");
        assert_eq!(order.amount_cents, 4990);
        assert_eq!(order.currency.as_deref(), Some("USD"));
        assert_eq!(order.attribution.click_id, Some(click_id));
    }

    #[test]
    fn test_stripe_payment_intent_uses_amount() {
        let event = json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1", "amount": 1200, "metadata": {"coupon": "SPRING"}}}
        });

        let order = stripe_order(&event).unwrap().unwrap();
        assert_eq!(order.amount_cents, 1200);
        assert_eq!(order.attribution.coupon.as_deref(), Some("SPRING"));
    }

    #[test]
    fn test_stripe_other_events_ignored() {
        let event = json!({"type": "invoice.paid", "data": {"object": {"id": "in_1"}}});
        assert_eq!(stripe_order(&event).unwrap(), None);
    }

    #[test]
    fn test_shopify_order() {
        let click_id = Uuid::new_v4();
        let payload = json!({
            "id": 820982911946154508u64,
            "total_price": "49.90",
            "currency": "cad",
            "note_attributes": [
                {"name": "gift", "value": "no"},
                {"name": "click_id", "value": click_id.to_string()}
            ],
            "discount_codes": [{"code": "TRAIL10"}, {"code": "OTHER"}]
        });

        let order = shopify_order(&payload).unwrap();
        assert_eq!(order.order_id, "820982911946154508");
        assert_eq!(order.amount_cents, 4990);
        assert_eq!(order.currency.as_deref(), Some("CAD"));
        assert_eq!(order.attribution.click_id, Some(click_id));
        assert_eq!(order.attribution.coupon.as_deref(), Some("TRAIL10"));
    }

    #[test]
    fn test_shopify_order_without_attribution() {
        let order = shopify_order(&json!({"id": 1, "total_price": "10.00"})).unwrap();
        assert!(order.attribution.is_empty());
    }
}
