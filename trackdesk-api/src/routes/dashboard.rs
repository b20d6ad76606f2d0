/// Dashboard statistics
///
/// Every endpoint takes `from`/`to` (RFC 3339, default: last 30 days).
/// Affiliate-role callers get the same numbers limited to their own traffic.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use trackdesk_shared::{
    auth::{
        authorization::{affiliate_scope, require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    stats::{self, Interval, StatsScope, Summary, TimeseriesPoint, TopEntry},
};

const DEFAULT_TOP_LIMIT: i64 = 10;
const MAX_TOP_LIMIT: i64 = 100;

/// Hourly series are capped to keep the bucket count bounded
const MAX_HOURLY_RANGE_DAYS: i64 = 31;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeseriesQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,

    #[serde(default)]
    pub interval: Interval,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TimeseriesResponse {
    pub interval: Interval,
    pub points: Vec<TimeseriesPoint>,
}

#[derive(Debug, Serialize)]
pub struct TopResponse {
    pub entries: Vec<TopEntry>,
}

fn scope(
    auth: &AuthContext,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> ApiResult<StatsScope> {
    require_permission(auth, ResourcePermission::Read, "stats:read")?;

    let scope = StatsScope::new(auth.tenant_id, affiliate_scope(auth)?, from, to);
    if scope.from > scope.to {
        return Err(ApiError::invalid("from", "Must not be after 'to'"));
    }

    Ok(scope)
}

fn top_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, MAX_TOP_LIMIT)
}

pub async fn summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Summary>> {
    let scope = scope(&auth, query.from, query.to)?;
    Ok(Json(stats::summary(&state.db, &scope).await?))
}

pub async fn timeseries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TimeseriesQuery>,
) -> ApiResult<Json<TimeseriesResponse>> {
    let scope = scope(&auth, query.from, query.to)?;

    if query.interval == Interval::Hour && scope.to - scope.from > Duration::days(MAX_HOURLY_RANGE_DAYS) {
        return Err(ApiError::invalid(
            "interval",
            format!("Hourly series cover at most {} days", MAX_HOURLY_RANGE_DAYS),
        ));
    }

    let points = stats::timeseries(&state.db, &scope, query.interval).await?;
    Ok(Json(TimeseriesResponse {
        interval: query.interval,
        points,
    }))
}

pub async fn top_affiliates(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Json<TopResponse>> {
    let scope = scope(&auth, query.from, query.to)?;
    let entries = stats::top_affiliates(&state.db, &scope, top_limit(query.limit)).await?;
    Ok(Json(TopResponse { entries }))
}

pub async fn top_offers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Json<TopResponse>> {
    let scope = scope(&auth, query.from, query.to)?;
    let entries = stats::top_offers(&state.db, &scope, top_limit(query.limit)).await?;
    Ok(Json(TopResponse { entries }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_limit() {
        assert_eq!(top_limit(None), 10);
        assert_eq!(top_limit(Some(0)), 1);
        assert_eq!(top_limit(Some(500)), 100);
    }
}
