/// Rule set endpoints (admin+)
///
/// - `POST /v1/rules`
/// - `GET /v1/rules?kind=`
/// - `POST /v1/rules/test` - Dry-run the active rules of a kind against a context
/// - `GET|PUT|DELETE /v1/rules/:id`

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
use serde_json::Value as JsonValue;
use trackdesk_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::rule_set::{CreateRuleSet, RuleKind, RuleSet, UpdateRuleSet},
    rules::{evaluate, validate_actions, validate_conditions, Action, Condition, Logic, Verdict},
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRuleRequest {
    pub kind: RuleKind,

    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[serde(default)]
    pub logic: Logic,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    pub actions: Vec<Action>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRuleRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,
    pub logic: Option<Logic>,
    pub conditions: Option<Vec<Condition>>,
    pub actions: Option<Vec<Action>>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRulesQuery {
    pub kind: Option<RuleKind>,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleSet>,
}

/// Dry-run input; `context` is the same document the tracker builds
#[derive(Debug, Deserialize)]
pub struct TestRulesRequest {
    pub kind: RuleKind,
    pub context: JsonValue,
}

pub async fn create_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateRuleRequest>,
) -> ApiResult<(StatusCode, Json<RuleSet>)> {
    require_permission(&auth, ResourcePermission::Manage, "rules:write")?;
    req.validate()?;
    validate_conditions(&req.conditions)?;
    validate_actions(&req.actions)?;

    let rule = RuleSet::create(
        &state.db,
        CreateRuleSet {
            tenant_id: auth.tenant_id,
            kind: req.kind,
            name: req.name,
            logic: req.logic,
            conditions: req.conditions,
            actions: req.actions,
            priority: req.priority,
            active: req.active,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, rule_id = %rule.id, kind = ?rule.kind, "Created rule set");

    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn list_rules(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListRulesQuery>,
) -> ApiResult<Json<RulesResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "rules:read")?;

    let rules = RuleSet::list(&state.db, auth.tenant_id, query.kind).await?;
    Ok(Json(RulesResponse { rules }))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RuleSet>> {
    require_permission(&auth, ResourcePermission::Manage, "rules:read")?;

    let rule = RuleSet::find_by_id(&state.db, auth.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Rule set not found".to_string()))?;

    Ok(Json(rule))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRuleRequest>,
) -> ApiResult<Json<RuleSet>> {
    require_permission(&auth, ResourcePermission::Manage, "rules:write")?;
    req.validate()?;

    if let Some(conditions) = &req.conditions {
        validate_conditions(conditions)?;
    }
    if let Some(actions) = &req.actions {
        validate_actions(actions)?;
    }

    let rule = RuleSet::update(
        &state.db,
        auth.tenant_id,
        id,
        UpdateRuleSet {
            name: req.name,
            logic: req.logic,
            conditions: req.conditions,
            actions: req.actions,
            priority: req.priority,
            active: req.active,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Rule set not found".to_string()))?;

    Ok(Json(rule))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Manage, "rules:write")?;

    if !RuleSet::delete(&state.db, auth.tenant_id, id).await? {
        return Err(ApiError::NotFound("Rule set not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Evaluates the tenant's active rules without recording anything
pub async fn test_rules(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<TestRulesRequest>,
) -> ApiResult<Json<Verdict>> {
    require_permission(&auth, ResourcePermission::Manage, "rules:read")?;

    if !req.context.is_object() {
        return Err(ApiError::invalid("context", "Must be a JSON object"));
    }

    let rules = RuleSet::list_active(&state.db, auth.tenant_id, req.kind).await?;
    Ok(Json(evaluate(&rules, &req.context)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateRuleRequest = serde_json::from_value(json!({
            "kind": "fraud",
            "name": "Datacenter traffic",
            "actions": [{"type": "score", "points": 60}]
        }))
        .unwrap();

        assert_eq!(req.logic, Logic::And);
        assert!(req.conditions.is_empty());
        assert_eq!(req.actions, vec![Action::Score { points: 60 }]);
        assert!(req.validate().is_ok());
    }
}
