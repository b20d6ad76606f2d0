/// Click listing
///
/// `GET /v1/clicks?affiliate_id=&offer_id=&status=&from=&to=&page=&per_page=`
///
/// Affiliate-role users only see clicks on their own links.

use crate::{app::AppState, error::ApiResult};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use trackdesk_shared::{
    auth::{
        authorization::{affiliate_scope, require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        click::{Click, ClickFilter, ClickStatus},
        Page, Pagination,
    },
};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ListClicksQuery {
    pub affiliate_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub status: Option<ClickStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn list_clicks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListClicksQuery>,
) -> ApiResult<Json<Page<Click>>> {
    require_permission(&auth, ResourcePermission::Read, "clicks:read")?;

    let filter = ClickFilter {
        affiliate_id: affiliate_scope(&auth)?.or(query.affiliate_id),
        offer_id: query.offer_id,
        status: query.status,
        from: query.from,
        to: query.to,
    };

    let page = Click::list(
        &state.db,
        auth.tenant_id,
        &filter,
        Pagination::new(query.page, query.per_page),
    )
    .await?;

    Ok(Json(page))
}
