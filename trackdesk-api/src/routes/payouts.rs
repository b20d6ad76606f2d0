/// Payout endpoints
///
/// # Endpoints
///
/// - `GET /v1/payouts/preview` - Payable balances per affiliate (admin+)
/// - `POST /v1/payouts` - Build one affiliate's payout (admin+)
/// - `POST /v1/payouts/batch` - Build payouts for every payable affiliate (admin+)
/// - `GET /v1/payouts` - List (affiliates see their own)
/// - `GET /v1/payouts/:id`
/// - `POST /v1/payouts/:id/{process,complete,fail,cancel}` - Lifecycle
///
/// A payout reserves the approved conversions it sums. Failing or cancelling
/// it releases them for the next run.

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
use serde::{Deserialize, Serialize};
use trackdesk_shared::{
    auth::{
        authorization::{affiliate_scope, require_affiliate_access, require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        payout::{Payout, PayoutFilter, PayoutStatus},
        Page, Pagination,
    },
    payouts::{self, BuildPayout, PayoutPreview},
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub period_end: Option<DateTime<Utc>>,
    pub min_amount_cents: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub affiliates: Vec<PayoutPreview>,
    pub total_cents: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePayoutRequest {
    pub affiliate_id: Uuid,
    pub period_end: Option<DateTime<Utc>>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub min_amount_cents: Option<i64>,

    #[validate(length(min = 1, max = 50))]
    pub method: Option<String>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchPayoutRequest {
    pub period_end: Option<DateTime<Utc>>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub min_amount_cents: Option<i64>,

    #[validate(length(min = 1, max = 50))]
    pub method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchPayoutResponse {
    pub payouts: Vec<Payout>,
    pub total_cents: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPayoutsQuery {
    pub affiliate_id: Option<Uuid>,
    pub status: Option<PayoutStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletePayoutRequest {
    /// Processor transaction id
    pub reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FailPayoutRequest {
    pub reason: Option<String>,
}

pub async fn preview_payouts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<PreviewResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "payouts:read")?;

    if query.min_amount_cents.is_some_and(|m| m < 0) {
        return Err(ApiError::invalid("min_amount_cents", "Must not be negative"));
    }

    let affiliates = payouts::preview(&state.db, auth.tenant_id, query.period_end, query.min_amount_cents).await?;
    let total_cents = affiliates.iter().map(|p| p.amount_cents).sum();

    Ok(Json(PreviewResponse {
        affiliates,
        total_cents,
    }))
}

/// Build a payout for one affiliate
///
/// # Errors
///
/// - `404 Not Found`: Affiliate not in this tenant
/// - `422 Unprocessable Entity`: Nothing payable, or below the minimum
pub async fn create_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreatePayoutRequest>,
) -> ApiResult<(StatusCode, Json<Payout>)> {
    require_permission(&auth, ResourcePermission::Manage, "payouts:write")?;
    req.validate()?;

    let payout = payouts::build_payout(
        &state.db,
        auth.tenant_id,
        BuildPayout {
            affiliate_id: req.affiliate_id,
            period_end: req.period_end,
            min_amount_cents: req.min_amount_cents,
            method: req.method,
            notes: req.notes,
        },
    )
    .await?;

    tracing::info!(
        tenant_id = %auth.tenant_id,
        payout_id = %payout.id,
        affiliate_id = %payout.affiliate_id,
        amount_cents = payout.amount_cents,
        "Created payout"
    );

    Ok((StatusCode::CREATED, Json(payout)))
}

pub async fn batch_payouts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<BatchPayoutRequest>,
) -> ApiResult<(StatusCode, Json<BatchPayoutResponse>)> {
    require_permission(&auth, ResourcePermission::Manage, "payouts:write")?;
    req.validate()?;

    let payouts = payouts::build_batch(
        &state.db,
        auth.tenant_id,
        req.period_end,
        req.min_amount_cents,
        req.method,
    )
    .await?;
    let total_cents = payouts.iter().map(|p| p.amount_cents).sum();

    tracing::info!(
        tenant_id = %auth.tenant_id,
        count = payouts.len(),
        total_cents,
        "Built payout batch"
    );

    Ok((StatusCode::CREATED, Json(BatchPayoutResponse { payouts, total_cents })))
}

pub async fn list_payouts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListPayoutsQuery>,
) -> ApiResult<Json<Page<Payout>>> {
    require_permission(&auth, ResourcePermission::Read, "payouts:read")?;

    let filter = PayoutFilter {
        affiliate_id: affiliate_scope(&auth)?.or(query.affiliate_id),
        status: query.status,
    };

    let page = Payout::list(
        &state.db,
        auth.tenant_id,
        &filter,
        Pagination::new(query.page, query.per_page),
    )
    .await?;

    Ok(Json(page))
}

pub async fn get_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payout>> {
    require_permission(&auth, ResourcePermission::Read, "payouts:read")?;

    let payout = Payout::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Payout not found".to_string()))?;
    require_affiliate_access(&auth, payout.affiliate_id)?;

    Ok(Json(payout))
}

async fn transition(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
    target: PayoutStatus,
    note: Option<String>,
) -> ApiResult<Json<Payout>> {
    require_permission(auth, ResourcePermission::Manage, "payouts:write")?;

    let payout = payouts::transition(&state.db, auth.tenant_id, id, target, note).await?;

    tracing::info!(
        tenant_id = %auth.tenant_id,
        payout_id = %id,
        status = target.as_str(),
        "Payout status changed"
    );

    Ok(Json(payout))
}

pub async fn process_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payout>> {
    transition(&state, &auth, id, PayoutStatus::Processing, None).await
}

pub async fn complete_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<CompletePayoutRequest>>,
) -> ApiResult<Json<Payout>> {
    let reference = body
        .and_then(|Json(req)| req.reference)
        .filter(|r| !r.trim().is_empty());
    transition(&state, &auth, id, PayoutStatus::Completed, reference).await
}

pub async fn fail_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<FailPayoutRequest>>,
) -> ApiResult<Json<Payout>> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "failed".to_string());
    transition(&state, &auth, id, PayoutStatus::Failed, Some(reason)).await
}

pub async fn cancel_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payout>> {
    transition(&state, &auth, id, PayoutStatus::Cancelled, None).await
}
