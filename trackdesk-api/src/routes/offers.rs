/// Offer endpoints
///
/// # Endpoints
///
/// - `POST /v1/offers` - Create offer (manager+)
/// - `GET /v1/offers` - List (`status`, `page`, `per_page`)
/// - `GET|PUT /v1/offers/:id`
/// - `DELETE /v1/offers/:id` - Archive when it has conversions, delete otherwise
///
/// Affiliate-role users may browse the catalogue but only see active offers.

use super::parse_http_url;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use trackdesk_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        offer::{CreateOffer, Offer, OfferRemoval, OfferStatus, PayoutType, UpdateOffer},
        Page, Pagination,
    },
    quota::{QuotaEnforcer, QuotaType},
};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut error = ValidationError::new("currency");
        error.message = Some("Must be a 3-letter ISO 4217 code".into());
        Err(error)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOfferRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    pub description: Option<String>,

    /// http(s) only
    pub landing_url: String,

    /// Defaults to `draft`
    pub status: Option<OfferStatus>,

    /// Defaults to `cpa`
    pub payout_type: Option<PayoutType>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub payout_amount_cents: Option<i64>,

    #[validate(range(min = 0, max = 10000, message = "Must be between 0 and 10000"))]
    pub revshare_bps: Option<i32>,

    /// Defaults to USD
    #[validate(custom(function = "validate_currency"))]
    pub currency: Option<String>,

    #[validate(range(min = 1, message = "Cap must be at least 1"))]
    pub daily_conversion_cap: Option<i32>,

    pub require_approval: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOfferRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    pub description: Option<String>,
    pub landing_url: Option<String>,
    pub status: Option<OfferStatus>,
    pub payout_type: Option<PayoutType>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub payout_amount_cents: Option<i64>,

    #[validate(range(min = 0, max = 10000, message = "Must be between 0 and 10000"))]
    pub revshare_bps: Option<i32>,

    #[validate(custom(function = "validate_currency"))]
    pub currency: Option<String>,

    #[validate(range(min = 1, message = "Cap must be at least 1"))]
    pub daily_conversion_cap: Option<i32>,

    pub require_approval: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOffersQuery {
    pub status: Option<OfferStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeleteOfferResponse {
    pub id: Uuid,
    pub result: OfferRemoval,
}

pub async fn create_offer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateOfferRequest>,
) -> ApiResult<(StatusCode, Json<Offer>)> {
    require_permission(&auth, ResourcePermission::Write, "offers:write")?;
    req.validate()?;
    let landing_url = parse_http_url("landing_url", &req.landing_url)?;

    QuotaEnforcer::new(state.db.clone())
        .enforce(auth.tenant_id, QuotaType::Offers)
        .await?;

    let offer = Offer::create(
        &state.db,
        CreateOffer {
            tenant_id: auth.tenant_id,
            name: req.name,
            description: req.description,
            landing_url: landing_url.to_string(),
            status: req.status,
            payout_type: req.payout_type,
            payout_amount_cents: req.payout_amount_cents,
            revshare_bps: req.revshare_bps,
            currency: req.currency.map(|c| c.to_ascii_uppercase()),
            daily_conversion_cap: req.daily_conversion_cap,
            require_approval: req.require_approval,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, offer_id = %offer.id, "Created offer");

    Ok((StatusCode::CREATED, Json(offer)))
}

pub async fn list_offers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListOffersQuery>,
) -> ApiResult<Json<Page<Offer>>> {
    require_permission(&auth, ResourcePermission::Read, "offers:read")?;

    let status = if auth.is_affiliate() {
        Some(OfferStatus::Active)
    } else {
        query.status
    };

    let page = Offer::list(
        &state.db,
        auth.tenant_id,
        status,
        Pagination::new(query.page, query.per_page),
    )
    .await?;

    Ok(Json(page))
}

pub async fn get_offer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Offer>> {
    require_permission(&auth, ResourcePermission::Read, "offers:read")?;

    let offer = Offer::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .filter(|offer| !auth.is_affiliate() || offer.status == OfferStatus::Active)
        .ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;

    Ok(Json(offer))
}

pub async fn update_offer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOfferRequest>,
) -> ApiResult<Json<Offer>> {
    require_permission(&auth, ResourcePermission::Write, "offers:write")?;
    req.validate()?;

    let landing_url = req
        .landing_url
        .as_deref()
        .map(|url| parse_http_url("landing_url", url).map(|u| u.to_string()))
        .transpose()?;

    let offer = Offer::update(
        &state.db,
        auth.tenant_id,
        id,
        UpdateOffer {
            name: req.name,
            description: req.description,
            landing_url,
            status: req.status,
            payout_type: req.payout_type,
            payout_amount_cents: req.payout_amount_cents,
            revshare_bps: req.revshare_bps,
            currency: req.currency.map(|c| c.to_ascii_uppercase()),
            daily_conversion_cap: req.daily_conversion_cap,
            require_approval: req.require_approval,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;

    Ok(Json(offer))
}

pub async fn delete_offer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteOfferResponse>> {
    require_permission(&auth, ResourcePermission::Write, "offers:write")?;

    let result = Offer::delete_or_archive(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;

    tracing::info!(tenant_id = %auth.tenant_id, offer_id = %id, result = ?result, "Removed offer");

    Ok(Json(DeleteOfferResponse { id, result }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_currency() {
        assert!(validate_currency("USD").is_ok());
        assert!(validate_currency("eur").is_ok());
        assert!(validate_currency("US").is_err());
        assert!(validate_currency("U5D").is_err());
    }

    #[test]
    fn test_revshare_over_100_percent_rejected() {
        let req: CreateOfferRequest = serde_json::from_value(json!({
            "name": "Tent",
            "landing_url": "https://shop.example.com/tent",
            "revshare_bps": 12000
        }))
        .unwrap();

        assert!(req.validate().unwrap_err().field_errors().contains_key("revshare_bps"));
    }
}
