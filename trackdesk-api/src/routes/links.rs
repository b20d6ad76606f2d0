/// Tracking link endpoints
///
/// A link belongs to one affiliate and targets exactly one offer or smart
/// link. Affiliate-role users manage links for themselves only; staff manage
/// links for anyone.
///
/// # Endpoints
///
/// - `POST /v1/links`
/// - `GET /v1/links` (`affiliate_id`, `page`, `per_page`)
/// - `GET|PUT|DELETE /v1/links/:id`

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
        authorization::{affiliate_scope, require_affiliate_access, require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        affiliate::Affiliate,
        offer::Offer,
        smart_link::SmartLink,
        tracking_link::{CreateTrackingLink, TrackingLink},
        Page, Pagination,
    },
};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    /// Ignored for affiliate-role callers
    pub affiliate_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub smart_link_id: Option<Uuid>,

    /// Overrides the offer landing page
    pub destination_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLinkRequest {
    /// `null` clears the override
    pub destination_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLinksQuery {
    pub affiliate_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Link plus its public URL
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    #[serde(flatten)]
    pub link: TrackingLink,
    pub url: String,
}

impl LinkResponse {
    fn new(link: TrackingLink, state: &AppState) -> Self {
        let url = link.url(&state.config.tracking.base_url);
        Self { link, url }
    }
}

fn destination(url: Option<&str>) -> ApiResult<Option<String>> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            // Strip macros before parsing; they are substituted at click time
            parse_http_url("destination_url", &url.replace(['{', '}'], ""))?;
            Ok(Some(url.to_string()))
        }
        None => Ok(None),
    }
}

async fn load(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<TrackingLink> {
    let link = TrackingLink::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Link not found".to_string()))?;

    require_affiliate_access(auth, link.affiliate_id)?;
    Ok(link)
}

/// Create link
///
/// # Errors
///
/// - `404 Not Found`: Affiliate, offer or smart link not in this tenant
/// - `422 Unprocessable Entity`: Not exactly one of `offer_id` / `smart_link_id`
pub async fn create_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateLinkRequest>,
) -> ApiResult<(StatusCode, Json<LinkResponse>)> {
    require_permission(&auth, ResourcePermission::Read, "links:write")?;

    let affiliate_id = match affiliate_scope(&auth)? {
        Some(own) => own,
        None => req
            .affiliate_id
            .ok_or_else(|| ApiError::invalid("affiliate_id", "Affiliate is required"))?,
    };

    if req.offer_id.is_some() == req.smart_link_id.is_some() {
        return Err(ApiError::invalid("offer_id", "Provide exactly one of offer_id or smart_link_id"));
    }

    let destination_url = destination(req.destination_url.as_deref())?;

    Affiliate::find_by_id(&state.db, auth.tenant_id, affiliate_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Affiliate not found".to_string()))?;

    if let Some(offer_id) = req.offer_id {
        Offer::find_by_id(&state.db, auth.tenant_id, offer_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Offer not found".to_string()))?;
    }
    if let Some(smart_link_id) = req.smart_link_id {
        SmartLink::find_by_id(&state.db, auth.tenant_id, smart_link_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Smart link not found".to_string()))?;
    }

    let link = TrackingLink::create(
        &state.db,
        CreateTrackingLink {
            tenant_id: auth.tenant_id,
            affiliate_id,
            offer_id: req.offer_id,
            smart_link_id: req.smart_link_id,
            destination_url,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, link_id = %link.id, code = %link.code, "Created tracking link");

    Ok((StatusCode::CREATED, Json(LinkResponse::new(link, &state))))
}

pub async fn list_links(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListLinksQuery>,
) -> ApiResult<Json<Page<LinkResponse>>> {
    require_permission(&auth, ResourcePermission::Read, "links:read")?;

    let affiliate_id = affiliate_scope(&auth)?.or(query.affiliate_id);
    let page = TrackingLink::list(
        &state.db,
        auth.tenant_id,
        affiliate_id,
        Pagination::new(query.page, query.per_page),
    )
    .await?;

    Ok(Json(Page {
        data: page.data.into_iter().map(|link| LinkResponse::new(link, &state)).collect(),
        page: page.page,
        per_page: page.per_page,
        total: page.total,
    }))
}

pub async fn get_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LinkResponse>> {
    require_permission(&auth, ResourcePermission::Read, "links:read")?;

    let link = load(&state, &auth, id).await?;
    Ok(Json(LinkResponse::new(link, &state)))
}

pub async fn update_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLinkRequest>,
) -> ApiResult<Json<LinkResponse>> {
    require_permission(&auth, ResourcePermission::Read, "links:write")?;
    load(&state, &auth, id).await?;

    let destination_url = destination(req.destination_url.as_deref())?;
    let link = TrackingLink::set_destination(&state.db, auth.tenant_id, id, destination_url)
        .await?
        .ok_or_else(|| ApiError::NotFound("Link not found".to_string()))?;

    Ok(Json(LinkResponse::new(link, &state)))
}

pub async fn delete_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Read, "links:write")?;
    load(&state, &auth, id).await?;

    TrackingLink::delete(&state.db, auth.tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
