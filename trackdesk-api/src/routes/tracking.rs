/// Public tracking endpoints
///
/// # Endpoints
///
/// - `GET /t/:code` - Record a click and redirect
/// - `GET /t/postback` - Server-to-server conversion postback
///
/// Neither endpoint is authenticated. The click id handed to the advertiser
/// on redirect is what ties a later postback back to the tenant.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use trackdesk_shared::{
    models::{
        click::Click,
        conversion::{ConversionSource, ConversionStatus},
        tenant::Tenant,
    },
    tracking::{
        context::Visitor, parse_amount_to_cents, record_conversion, track_click, AttributionRequest,
        ClickOutcome, ClickRequest, ConversionRequest, TrackingError,
    },
};
use uuid::Uuid;

/// Country headers set by the CDN in front of the tracker, in order of preference
const COUNTRY_HEADERS: [&str; 2] = ["cf-ipcountry", "x-country-code"];

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client IP: first `X-Forwarded-For` hop, then the socket peer
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

fn country(headers: &HeaderMap) -> Option<String> {
    COUNTRY_HEADERS
        .iter()
        .find_map(|name| header_str(headers, *name))
        // XX means unknown
        .filter(|c| c.len() == 2 && !c.eq_ignore_ascii_case("XX"))
        .map(|c| c.to_ascii_uppercase())
}

/// Builds the visitor from request headers and query
pub(crate) fn visitor_from_request(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    query: &HashMap<String, String>,
) -> Visitor {
    Visitor {
        ip: client_ip(headers, peer),
        user_agent: header_str(headers, header::USER_AGENT).map(str::to_string),
        referrer: header_str(headers, header::REFERER).map(str::to_string),
        country: country(headers),
        ..Visitor::default()
    }
    .with_sub_ids(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (
            StatusCode::FOUND,
            [(header::LOCATION, value), (header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        )
            .into_response(),
        Err(_) => {
            tracing::warn!(location = %location, "Destination is not a valid header value");
            ApiError::NotFound("Destination unavailable".to_string()).into_response()
        }
    }
}

/// Click redirect
///
/// # Responses
///
/// - `302 Found` to the destination, with `click_id` appended
/// - `302 Found` to a smart link fallback when the link is not serving
/// - `302 Found` to a traffic rule's redirect URL when the click was blocked
/// - `403 Forbidden` when a traffic rule blocked the click
/// - `404 Not Found` for an unknown code or an inactive offer link
pub async fn click(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let visitor = visitor_from_request(&headers, peer.map(|ConnectInfo(addr)| addr), &query);

    let outcome = track_click(&state.db, state.redis.as_ref(), ClickRequest { code, visitor }).await?;

    Ok(match outcome {
        ClickOutcome::Redirect { location, .. } => redirect(&location),
        ClickOutcome::Fallback { location } => redirect(&location),
        ClickOutcome::Blocked {
            redirect_url: Some(url),
            ..
        } => redirect(&url),
        ClickOutcome::Blocked { click_id, .. } => {
            tracing::debug!(click_id = %click_id, "Click blocked by traffic rule");
            ApiError::Forbidden("Traffic refused".to_string()).into_response()
        }
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct PostbackQuery {
    pub click_id: Option<Uuid>,

    /// Major units, decimal (`19.99`)
    pub amount: Option<String>,

    pub order_id: Option<String>,
    pub currency: Option<String>,

    /// Tenant slug; required when no `click_id` is given
    pub tenant: Option<String>,

    pub coupon: Option<String>,
    pub referral_code: Option<String>,
    pub offer_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PostbackResponse {
    pub conversion_id: Uuid,
    pub status: ConversionStatus,
    pub commission_cents: i64,
}

/// Resolves the tenant from the click, or from the `tenant` slug
async fn postback_tenant(state: &AppState, query: &PostbackQuery) -> ApiResult<Uuid> {
    let from_slug = match query.tenant.as_deref().filter(|s| !s.is_empty()) {
        Some(slug) => Some(
            Tenant::find_by_slug(&state.db, slug)
                .await?
                .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))?
                .id,
        ),
        None => None,
    };

    let from_click = match query.click_id {
        Some(click_id) => Some(
            Click::find_tenant(&state.db, click_id)
                .await?
                .ok_or_else(|| ApiError::from(TrackingError::Unattributed))?,
        ),
        None => None,
    };

    match (from_click, from_slug) {
        (Some(click_tenant), Some(slug_tenant)) if click_tenant != slug_tenant => {
            Err(TrackingError::Unattributed.into())
        }
        (Some(tenant_id), _) | (None, Some(tenant_id)) => Ok(tenant_id),
        (None, None) => Err(ApiError::invalid("click_id", "click_id or tenant is required")),
    }
}

/// Server-to-server postback
///
/// ```text
/// GET /t/postback?click_id=<uuid>&amount=49.90&order_id=A-1001&currency=USD
/// ```
pub async fn postback(
    State(state): State<AppState>,
    Query(query): Query<PostbackQuery>,
) -> ApiResult<Json<PostbackResponse>> {
    let tenant_id = postback_tenant(&state, &query).await?;

    let amount_cents = match query.amount.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(amount) => parse_amount_to_cents(amount)?,
        None => 0,
    };

    let conversion = record_conversion(
        &state.db,
        tenant_id,
        ConversionRequest {
            attribution: AttributionRequest {
                click_id: query.click_id,
                coupon: query.coupon,
                referral_code: query.referral_code,
                offer_id: query.offer_id,
            },
            amount_cents,
            order_id: query.order_id,
            currency: query.currency,
            source: ConversionSource::Postback,
            metadata: None,
        },
    )
    .await?;

    Ok(Json(PostbackResponse {
        conversion_id: conversion.id,
        status: conversion.status,
        commission_cents: conversion.commission_cents,
    }))
}
