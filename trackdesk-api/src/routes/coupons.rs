/// Coupon endpoints
///
/// A coupon code credits its affiliate when it shows up on an order. Codes
/// are unique per tenant, ignoring case.
///
/// - `POST /v1/coupons` (manager+)
/// - `GET /v1/coupons?affiliate_id=` (affiliates see their own)
/// - `GET|PUT|DELETE /v1/coupons/:id`

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
        affiliate::Affiliate,
        coupon::{Coupon, CreateCoupon, UpdateCoupon},
        offer::Offer,
    },
};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_code(code: &str) -> Result<(), ValidationError> {
    let ok = (3..=64).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        let mut error = ValidationError::new("code");
        error.message = Some("Code must be 3-64 letters, digits, '-' or '_'".into());
        Err(error)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    pub affiliate_id: Uuid,
    pub offer_id: Option<Uuid>,

    #[validate(custom(function = "validate_code"))]
    pub code: String,

    #[validate(range(min = 1, message = "Must be at least 1"))]
    pub max_uses: Option<i32>,

    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCouponRequest {
    pub offer_id: Option<Uuid>,
    pub active: Option<bool>,

    #[validate(range(min = 1, message = "Must be at least 1"))]
    pub max_uses: Option<i32>,

    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCouponsQuery {
    pub affiliate_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CouponsResponse {
    pub coupons: Vec<Coupon>,
}

async fn ensure_offer(state: &AppState, tenant_id: Uuid, offer_id: Option<Uuid>) -> ApiResult<()> {
    if let Some(offer_id) = offer_id {
        Offer::find_by_id(&state.db, tenant_id, offer_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;
    }
    Ok(())
}

async fn load(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Coupon> {
    let coupon = Coupon::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coupon not found".to_string()))?;

    require_affiliate_access(auth, coupon.affiliate_id)?;
    Ok(coupon)
}

/// Create coupon
///
/// # Errors
///
/// - `409 Conflict`: Code already exists in this tenant
pub async fn create_coupon(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateCouponRequest>,
) -> ApiResult<(StatusCode, Json<Coupon>)> {
    require_permission(&auth, ResourcePermission::Write, "coupons:write")?;
    req.validate()?;

    Affiliate::find_by_id(&state.db, auth.tenant_id, req.affiliate_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Affiliate not found".to_string()))?;
    ensure_offer(&state, auth.tenant_id, req.offer_id).await?;

    let coupon = Coupon::create(
        &state.db,
        CreateCoupon {
            tenant_id: auth.tenant_id,
            affiliate_id: req.affiliate_id,
            offer_id: req.offer_id,
            code: req.code,
            max_uses: req.max_uses,
            expires_at: req.expires_at,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, coupon_id = %coupon.id, code = %coupon.code, "Created coupon");

    Ok((StatusCode::CREATED, Json(coupon)))
}

pub async fn list_coupons(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListCouponsQuery>,
) -> ApiResult<Json<CouponsResponse>> {
    require_permission(&auth, ResourcePermission::Read, "coupons:read")?;

    let affiliate_id = affiliate_scope(&auth)?.or(query.affiliate_id);
    let coupons = Coupon::list(&state.db, auth.tenant_id, affiliate_id).await?;

    Ok(Json(CouponsResponse { coupons }))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Coupon>> {
    require_permission(&auth, ResourcePermission::Read, "coupons:read")?;
    Ok(Json(load(&state, &auth, id).await?))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCouponRequest>,
) -> ApiResult<Json<Coupon>> {
    require_permission(&auth, ResourcePermission::Write, "coupons:write")?;
    req.validate()?;
    ensure_offer(&state, auth.tenant_id, req.offer_id).await?;

    let coupon = Coupon::update(
        &state.db,
        auth.tenant_id,
        id,
        UpdateCoupon {
            offer_id: req.offer_id,
            active: req.active,
            max_uses: req.max_uses,
            expires_at: req.expires_at,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Coupon not found".to_string()))?;

    Ok(Json(coupon))
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Write, "coupons:write")?;

    if !Coupon::delete(&state.db, auth.tenant_id, id).await? {
        return Err(ApiError::NotFound("Coupon not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_code() {
        assert!(validate_code("SPRING-25").is_ok());
        assert!(validate_code("trail_blog").is_ok());
        assert!(validate_code("ab").is_err());
        assert!(validate_code("has space").is_err());
    }
}
