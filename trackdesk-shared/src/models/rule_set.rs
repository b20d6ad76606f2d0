/// Rule set model and database operations
///
/// Stored fraud, quality and traffic rules. Evaluation lives in
/// `crate::rules`; this module only persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::rules::{Action, Condition, Logic};

/// Pipeline stage a rule set applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Clicks and conversions; scores, flags and blocks
    Fraud,

    /// Conversions; approves or rejects
    Quality,

    /// Clicks before redirect; blocks or reroutes
    Traffic,
}

/// Rule set
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleSet {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: RuleKind,
    pub name: String,
    pub logic: Logic,
    pub conditions: Json<Vec<Condition>>,
    pub actions: Json<Vec<Action>>,

    /// Lower runs first
    pub priority: i32,

    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRuleSet {
    pub tenant_id: Uuid,
    pub kind: RuleKind,
    pub name: String,
    pub logic: Logic,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

/// Partial update; list fields replace the stored lists when present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRuleSet {
    pub name: Option<String>,
    pub logic: Option<Logic>,
    pub conditions: Option<Vec<Condition>>,
    pub actions: Option<Vec<Action>>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

const RULE_SET_COLUMNS: &str =
    "id, tenant_id, kind, name, logic, conditions, actions, priority, active, created_at, updated_at";

impl RuleSet {
    pub async fn create(pool: &PgPool, data: CreateRuleSet) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, RuleSet>(&format!(
            r#"
            INSERT INTO rule_sets (id, tenant_id, kind, name, logic, conditions, actions, priority, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {RULE_SET_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.kind)
        .bind(data.name.trim())
        .bind(data.logic)
        .bind(Json(&data.conditions))
        .bind(Json(&data.actions))
        .bind(data.priority.unwrap_or(100))
        .bind(data.active.unwrap_or(true))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, RuleSet>(&format!(
            "SELECT {RULE_SET_COLUMNS} FROM rule_sets WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Lists rule sets in evaluation order, optionally of one kind
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        kind: Option<RuleKind>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RuleSet>(&format!(
            "SELECT {RULE_SET_COLUMNS} FROM rule_sets \
             WHERE tenant_id = $1 AND ($2::rule_kind IS NULL OR kind = $2) \
             ORDER BY priority, name"
        ))
        .bind(tenant_id)
        .bind(kind)
        .fetch_all(pool)
        .await
    }

    /// Active rule sets of one kind, in evaluation order
    pub async fn list_active(
        pool: &PgPool,
        tenant_id: Uuid,
        kind: RuleKind,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RuleSet>(&format!(
            "SELECT {RULE_SET_COLUMNS} FROM rule_sets \
             WHERE tenant_id = $1 AND kind = $2 AND active ORDER BY priority, name"
        ))
        .bind(tenant_id)
        .bind(kind)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateRuleSet,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, RuleSet>(&format!(
            r#"
            UPDATE rule_sets SET
                name = COALESCE($3, name),
                logic = COALESCE($4, logic),
                conditions = COALESCE($5, conditions),
                actions = COALESCE($6, actions),
                priority = COALESCE($7, priority),
                active = COALESCE($8, active),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {RULE_SET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.logic)
        .bind(data.conditions.map(Json))
        .bind(data.actions.map(Json))
        .bind(data.priority)
        .bind(data.active)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rule_sets WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
