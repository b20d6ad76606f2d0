/// Smart link endpoints (manager+)
///
/// - `POST /v1/smart-links`
/// - `GET /v1/smart-links`
/// - `GET|PUT|DELETE /v1/smart-links/:id`

use super::parse_http_url;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
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
        offer::Offer,
        smart_link::{CreateSmartLink, SmartLink, SmartTarget, UpdateSmartLink},
    },
    rules::validate_conditions,
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSmartLinkRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    pub fallback_url: String,

    #[serde(default)]
    pub targets: Vec<SmartTarget>,

    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSmartLinkRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,
    pub fallback_url: Option<String>,
    pub targets: Option<Vec<SmartTarget>>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SmartLinksResponse {
    pub smart_links: Vec<SmartLink>,
}

/// Checks target URLs, conditions and that credited offers belong to the tenant
async fn validate_targets(state: &AppState, tenant_id: Uuid, targets: &[SmartTarget]) -> ApiResult<()> {
    for (i, target) in targets.iter().enumerate() {
        parse_http_url(&format!("targets[{}].url", i), &target.url.replace(['{', '}'], ""))?;
        validate_conditions(&target.conditions)?;

        if let Some(offer_id) = target.offer_id {
            Offer::find_by_id(&state.db, tenant_id, offer_id)
                .await?
                .ok_or_else(|| ApiError::invalid(format!("targets[{}].offer_id", i), "Offer not found"))?;
        }
    }

    Ok(())
}

pub async fn create_smart_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateSmartLinkRequest>,
) -> ApiResult<(StatusCode, Json<SmartLink>)> {
    require_permission(&auth, ResourcePermission::Write, "links:write")?;
    req.validate()?;
    parse_http_url("fallback_url", &req.fallback_url)?;
    validate_targets(&state, auth.tenant_id, &req.targets).await?;

    let smart_link = SmartLink::create(
        &state.db,
        CreateSmartLink {
            tenant_id: auth.tenant_id,
            name: req.name,
            fallback_url: req.fallback_url.trim().to_string(),
            targets: req.targets,
            active: req.active,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, smart_link_id = %smart_link.id, "Created smart link");

    Ok((StatusCode::CREATED, Json(smart_link)))
}

pub async fn list_smart_links(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<SmartLinksResponse>> {
    require_permission(&auth, ResourcePermission::Write, "links:read")?;

    let smart_links = SmartLink::list(&state.db, auth.tenant_id).await?;
    Ok(Json(SmartLinksResponse { smart_links }))
}

pub async fn get_smart_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SmartLink>> {
    require_permission(&auth, ResourcePermission::Write, "links:read")?;

    let smart_link = SmartLink::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Smart link not found".to_string()))?;

    Ok(Json(smart_link))
}

pub async fn update_smart_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSmartLinkRequest>,
) -> ApiResult<Json<SmartLink>> {
    require_permission(&auth, ResourcePermission::Write, "links:write")?;
    req.validate()?;

    if let Some(fallback_url) = &req.fallback_url {
        parse_http_url("fallback_url", fallback_url)?;
    }
    if let Some(targets) = &req.targets {
        validate_targets(&state, auth.tenant_id, targets).await?;
    }

    let smart_link = SmartLink::update(
        &state.db,
        auth.tenant_id,
        id,
        UpdateSmartLink {
            name: req.name,
            fallback_url: req.fallback_url.map(|u| u.trim().to_string()),
            targets: req.targets,
            active: req.active,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Smart link not found".to_string()))?;

    Ok(Json(smart_link))
}

pub async fn delete_smart_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Write, "links:write")?;

    if !SmartLink::delete(&state.db, auth.tenant_id, id).await? {
        return Err(ApiError::NotFound("Smart link not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
