/// Conversion endpoints
///
/// # Endpoints
///
/// - `POST /v1/conversions` - Record a conversion through the API (manager+)
/// - `GET /v1/conversions` - List (affiliate, offer, status, source, date range)
/// - `GET /v1/conversions/:id`
/// - `POST /v1/conversions/:id/approve` - pending → approved
/// - `POST /v1/conversions/:id/reject` - pending|approved → rejected
///
/// A conversion already reserved by a payout, or paid, cannot be rejected.

use super::emit;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use trackdesk_shared::{
    auth::{
        authorization::{affiliate_scope, require_affiliate_access, require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    events::EventType,
    models::{
        conversion::{Conversion, ConversionFilter, ConversionSource, ConversionStatus},
        Page, Pagination,
    },
    tracking::{record_conversion, AttributionRequest, ConversionRequest},
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateConversionRequest {
    pub click_id: Option<Uuid>,

    #[validate(length(min = 1, max = 64))]
    pub coupon: Option<String>,

    #[validate(length(min = 1, max = 64))]
    pub referral_code: Option<String>,

    pub offer_id: Option<Uuid>,

    /// Order amount in minor units
    #[validate(range(min = 0, message = "Must not be negative"))]
    pub amount_cents: i64,

    #[validate(length(min = 1, max = 255))]
    pub order_id: Option<String>,

    pub currency: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListConversionsQuery {
    pub affiliate_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub status: Option<ConversionStatus>,
    pub source: Option<ConversionSource>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

/// Record a conversion
///
/// # Errors
///
/// - `409 Conflict`: `order_id` already recorded (body carries `existing_id`)
/// - `422 Unprocessable Entity`: No affiliate could be credited, or the coupon
///   cannot be redeemed
pub async fn create_conversion(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateConversionRequest>,
) -> ApiResult<(StatusCode, Json<Conversion>)> {
    require_permission(&auth, ResourcePermission::Write, "conversions:write")?;
    req.validate()?;

    let conversion = record_conversion(
        &state.db,
        auth.tenant_id,
        ConversionRequest {
            attribution: AttributionRequest {
                click_id: req.click_id,
                coupon: req.coupon,
                referral_code: req.referral_code,
                offer_id: req.offer_id,
            },
            amount_cents: req.amount_cents,
            order_id: req.order_id,
            currency: req.currency,
            source: ConversionSource::Api,
            metadata: req.metadata,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(conversion)))
}

pub async fn list_conversions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListConversionsQuery>,
) -> ApiResult<Json<Page<Conversion>>> {
    require_permission(&auth, ResourcePermission::Read, "conversions:read")?;

    let filter = ConversionFilter {
        affiliate_id: affiliate_scope(&auth)?.or(query.affiliate_id),
        offer_id: query.offer_id,
        status: query.status,
        source: query.source,
        from: query.from,
        to: query.to,
    };

    let page = Conversion::list(
        &state.db,
        auth.tenant_id,
        &filter,
        Pagination::new(query.page, query.per_page),
    )
    .await?;

    Ok(Json(page))
}

pub async fn get_conversion(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversion>> {
    require_permission(&auth, ResourcePermission::Read, "conversions:read")?;

    let conversion = Conversion::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversion not found".to_string()))?;
    require_affiliate_access(&auth, conversion.affiliate_id)?;

    Ok(Json(conversion))
}

async fn transition(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
    target: ConversionStatus,
    metadata: JsonValue,
) -> ApiResult<Conversion> {
    require_permission(auth, ResourcePermission::Write, "conversions:write")?;

    if let Some(conversion) = Conversion::transition(&state.db, auth.tenant_id, id, target, metadata).await? {
        tracing::info!(
            tenant_id = %auth.tenant_id,
            conversion_id = %id,
            status = target.as_str(),
            "Conversion status changed"
        );
        return Ok(conversion);
    }

    let current = Conversion::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversion not found".to_string()))?;

    let message = if current.payout_id.is_some() && target == ConversionStatus::Rejected {
        "Conversion is part of a payout and cannot be rejected".to_string()
    } else {
        format!(
            "Cannot change conversion from {} to {}",
            current.status.as_str(),
            target.as_str()
        )
    };

    Err(ApiError::Conflict(message))
}

pub async fn approve_conversion(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversion>> {
    let metadata = json!({ "reviewed_by": auth.user_id, "reviewed_at": Utc::now() });
    let conversion = transition(&state, &auth, id, ConversionStatus::Approved, metadata).await?;

    emit(&state.db, auth.tenant_id, EventType::ConversionApproved, json!(conversion)).await;

    Ok(Json(conversion))
}

pub async fn reject_conversion(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<Json<Conversion>> {
    let reason = body.and_then(|Json(req)| req.reason);
    let metadata = json!({
        "reviewed_by": auth.user_id,
        "reviewed_at": Utc::now(),
        "reason": reason.unwrap_or_else(|| "manual".to_string()),
    });
    let conversion = transition(&state, &auth, id, ConversionStatus::Rejected, metadata).await?;

    emit(&state.db, auth.tenant_id, EventType::ConversionRejected, json!(conversion)).await;

    Ok(Json(conversion))
}
