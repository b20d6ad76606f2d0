/// Affiliate endpoints
///
/// Managers and above manage affiliates. An affiliate-role user only sees its
/// own record.
///
/// # Endpoints
///
/// - `POST /v1/affiliates` - Create affiliate
/// - `GET /v1/affiliates` - List (`status`, `search`, `page`, `per_page`)
/// - `GET|PUT|DELETE /v1/affiliates/:id`
/// - `POST /v1/affiliates/:id/{approve,suspend,reject}` - Status changes
/// - `GET /v1/affiliates/:id/stats` - Lifetime totals and pending balance

use super::{emit, parse_http_url};
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use trackdesk_shared::{
    auth::{
        authorization::{affiliate_scope, require_affiliate_access, require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    events::EventType,
    models::{
        affiliate::{Affiliate, AffiliateFilter, AffiliateStatus, CreateAffiliate, UpdateAffiliate},
        Page, Pagination,
    },
    quota::{QuotaEnforcer, QuotaType},
    stats::{self, AffiliateStats},
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAffiliateRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(max = 200))]
    pub company: Option<String>,

    /// Defaults to `pending`
    pub status: Option<AffiliateStatus>,

    #[validate(length(min = 1, max = 50))]
    pub tier: Option<String>,

    /// Revshare override in basis points
    #[validate(range(min = 0, max = 10000, message = "Must be between 0 and 10000"))]
    pub commission_rate_bps: Option<i32>,

    /// Generated when absent
    #[validate(length(min = 3, max = 32, message = "Referral code must be 3-32 characters"))]
    pub referral_code: Option<String>,

    /// Portal user to link (must be a member of this tenant)
    pub user_id: Option<Uuid>,

    pub payment_method: Option<String>,
    pub payment_details: Option<JsonValue>,
    pub postback_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAffiliateRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 200))]
    pub company: Option<String>,

    #[validate(length(min = 1, max = 50))]
    pub tier: Option<String>,

    #[validate(range(min = 0, max = 10000, message = "Must be between 0 and 10000"))]
    pub commission_rate_bps: Option<i32>,

    pub user_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub payment_details: Option<JsonValue>,
    pub postback_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAffiliatesQuery {
    pub status: Option<AffiliateStatus>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

fn validate_postback_url(url: Option<&str>) -> ApiResult<()> {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
        // Macros such as {click_id} are not valid URL characters until expanded
        let probe = url.replace(['{', '}'], "");
        parse_http_url("postback_url", &probe)?;
    }
    Ok(())
}

async fn load(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Affiliate> {
    require_affiliate_access(auth, id)?;

    Affiliate::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Affiliate not found".to_string()))
}

/// Create affiliate
///
/// # Errors
///
/// - `403 Forbidden`: Below manager, or the plan's affiliate quota is used up
/// - `409 Conflict`: Email or referral code already used in this tenant
pub async fn create_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateAffiliateRequest>,
) -> ApiResult<(StatusCode, Json<Affiliate>)> {
    require_permission(&auth, ResourcePermission::Write, "affiliates:write")?;
    req.validate()?;
    validate_postback_url(req.postback_url.as_deref())?;

    QuotaEnforcer::new(state.db.clone())
        .enforce(auth.tenant_id, QuotaType::Affiliates)
        .await?;

    let affiliate = Affiliate::create(
        &state.db,
        CreateAffiliate {
            tenant_id: auth.tenant_id,
            user_id: req.user_id,
            name: req.name,
            email: req.email,
            company: req.company,
            status: req.status,
            tier: req.tier,
            commission_rate_bps: req.commission_rate_bps,
            referral_code: req.referral_code,
            payment_method: req.payment_method,
            payment_details: req.payment_details,
            postback_url: req.postback_url,
            notes: req.notes,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, affiliate_id = %affiliate.id, "Created affiliate");
    emit(&state.db, auth.tenant_id, EventType::AffiliateCreated, json!(affiliate)).await;

    Ok((StatusCode::CREATED, Json(affiliate)))
}

pub async fn list_affiliates(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListAffiliatesQuery>,
) -> ApiResult<Json<Page<Affiliate>>> {
    require_permission(&auth, ResourcePermission::Read, "affiliates:read")?;
    let pagination = Pagination::new(query.page, query.per_page);

    if let Some(own) = affiliate_scope(&auth)? {
        let data: Vec<Affiliate> = Affiliate::find_by_id(&state.db, auth.tenant_id, own)
            .await?
            .into_iter()
            .collect();
        let total = data.len() as i64;
        return Ok(Json(Page::new(data, pagination, total)));
    }

    let filter = AffiliateFilter {
        status: query.status,
        search: query.search,
    };
    let page = Affiliate::list(&state.db, auth.tenant_id, &filter, pagination).await?;

    Ok(Json(page))
}

pub async fn get_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affiliate>> {
    require_permission(&auth, ResourcePermission::Read, "affiliates:read")?;
    Ok(Json(load(&state, &auth, id).await?))
}

pub async fn update_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAffiliateRequest>,
) -> ApiResult<Json<Affiliate>> {
    require_permission(&auth, ResourcePermission::Write, "affiliates:write")?;
    req.validate()?;
    validate_postback_url(req.postback_url.as_deref())?;

    let affiliate = Affiliate::update(
        &state.db,
        auth.tenant_id,
        id,
        UpdateAffiliate {
            user_id: req.user_id,
            name: req.name,
            email: req.email,
            company: req.company,
            tier: req.tier,
            commission_rate_bps: req.commission_rate_bps,
            payment_method: req.payment_method,
            payment_details: req.payment_details,
            postback_url: req.postback_url,
            notes: req.notes,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Affiliate not found".to_string()))?;

    Ok(Json(affiliate))
}

/// Delete affiliate
///
/// Removes the affiliate along with its links, clicks and conversions.
pub async fn delete_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Write, "affiliates:write")?;

    if !Affiliate::delete(&state.db, auth.tenant_id, id).await? {
        return Err(ApiError::NotFound("Affiliate not found".to_string()));
    }

    tracing::info!(tenant_id = %auth.tenant_id, affiliate_id = %id, "Deleted affiliate");
    Ok(StatusCode::NO_CONTENT)
}

/// Moves an affiliate to `target`
///
/// Tells a missing affiliate (404) apart from a disallowed transition (409).
async fn transition(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
    target: AffiliateStatus,
) -> ApiResult<Affiliate> {
    require_permission(auth, ResourcePermission::Write, "affiliates:write")?;

    if let Some(affiliate) = Affiliate::transition(&state.db, auth.tenant_id, id, target).await? {
        tracing::info!(
            tenant_id = %auth.tenant_id,
            affiliate_id = %id,
            status = target.as_str(),
            "Affiliate status changed"
        );
        return Ok(affiliate);
    }

    let current = Affiliate::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Affiliate not found".to_string()))?;

    Err(ApiError::Conflict(format!(
        "Cannot change affiliate from {} to {}",
        current.status.as_str(),
        target.as_str()
    )))
}

pub async fn approve_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affiliate>> {
    let affiliate = transition(&state, &auth, id, AffiliateStatus::Active).await?;
    emit(&state.db, auth.tenant_id, EventType::AffiliateApproved, json!(affiliate)).await;

    Ok(Json(affiliate))
}

pub async fn suspend_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affiliate>> {
    Ok(Json(transition(&state, &auth, id, AffiliateStatus::Suspended).await?))
}

pub async fn reject_affiliate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affiliate>> {
    Ok(Json(transition(&state, &auth, id, AffiliateStatus::Rejected).await?))
}

pub async fn affiliate_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AffiliateStats>> {
    require_permission(&auth, ResourcePermission::Read, "stats:read")?;
    let affiliate = load(&state, &auth, id).await?;

    Ok(Json(stats::affiliate_stats(&state.db, auth.tenant_id, affiliate.id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postback_url_with_macros_accepted() {
        assert!(validate_postback_url(Some("https://net.example.com/pb?cid={click_id}&amt={amount}")).is_ok());
        assert!(validate_postback_url(None).is_ok());
        assert!(validate_postback_url(Some("")).is_ok());
        assert!(validate_postback_url(Some("ftp://net.example.com/{click_id}")).is_err());
    }

    #[test]
    fn test_create_request_validation() {
        let req: CreateAffiliateRequest = serde_json::from_value(json!({
            "name": "Trail Blog",
            "email": "not-an-email",
            "commission_rate_bps": 20000
        }))
        .unwrap();

        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("commission_rate_bps"));
    }
}
