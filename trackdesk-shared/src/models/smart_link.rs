/// Smart link model and database operations
///
/// A smart link is one tracking destination that fans out to several target
/// URLs. Routing between targets is done by `crate::tracking::smart_link`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::rules::{Condition, Logic};

/// One routing target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartTarget {
    /// Destination URL (may contain `{click_id}`-style macros)
    pub url: String,

    /// Offer credited for clicks routed here
    #[serde(default)]
    pub offer_id: Option<Uuid>,

    /// Relative weight for random selection among unconditional targets
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Evaluation order for conditional targets, ascending
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub logic: Logic,

    /// Empty means unconditional
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

fn default_weight() -> u32 {
    1
}

/// Smart link
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SmartLink {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,

    /// Used when no target applies
    pub fallback_url: String,

    pub targets: Json<Vec<SmartTarget>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a smart link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSmartLink {
    pub tenant_id: Uuid,
    pub name: String,
    pub fallback_url: String,
    pub targets: Vec<SmartTarget>,
    pub active: Option<bool>,
}

/// Partial update; `targets` replaces the whole list when present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSmartLink {
    pub name: Option<String>,
    pub fallback_url: Option<String>,
    pub targets: Option<Vec<SmartTarget>>,
    pub active: Option<bool>,
}

const SMART_LINK_COLUMNS: &str =
    "id, tenant_id, name, fallback_url, targets, active, created_at, updated_at";

impl SmartLink {
    pub async fn create(pool: &PgPool, data: CreateSmartLink) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SmartLink>(&format!(
            r#"
            INSERT INTO smart_links (id, tenant_id, name, fallback_url, targets, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SMART_LINK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.name.trim())
        .bind(&data.fallback_url)
        .bind(Json(&data.targets))
        .bind(data.active.unwrap_or(true))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SmartLink>(&format!(
            "SELECT {SMART_LINK_COLUMNS} FROM smart_links WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SmartLink>(&format!(
            "SELECT {SMART_LINK_COLUMNS} FROM smart_links WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateSmartLink,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SmartLink>(&format!(
            r#"
            UPDATE smart_links SET
                name = COALESCE($3, name),
                fallback_url = COALESCE($4, fallback_url),
                targets = COALESCE($5, targets),
                active = COALESCE($6, active),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {SMART_LINK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.fallback_url)
        .bind(data.targets.map(Json))
        .bind(data.active)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM smart_links WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
