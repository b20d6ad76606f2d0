/// Click model and database operations
///
/// Clicks are written once by the tracking pipeline and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Page, Pagination};

/// Outcome of rule evaluation for a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "click_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ClickStatus {
    Valid,
    Flagged,
    Blocked,
}

impl ClickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickStatus::Valid => "valid",
            ClickStatus::Flagged => "flagged",
            ClickStatus::Blocked => "blocked",
        }
    }
}

/// Recorded click
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Click {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub link_id: Uuid,
    pub affiliate_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub device: String,

    /// `sub1`..`sub5` values passed on the tracking URL
    pub sub_ids: JsonValue,

    /// Where the visitor was sent (empty for blocked clicks)
    pub destination_url: String,

    pub is_unique: bool,
    pub fraud_score: i32,
    pub status: ClickStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a click
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClick {
    /// Pre-generated so the ID can be embedded in the destination URL
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub link_id: Uuid,
    pub affiliate_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub device: String,
    pub sub_ids: JsonValue,
    pub destination_url: String,
    pub is_unique: bool,
    pub fraud_score: i32,
    pub status: ClickStatus,
}

/// List filters
#[derive(Debug, Clone, Default)]
pub struct ClickFilter {
    pub affiliate_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub status: Option<ClickStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

const CLICK_COLUMNS: &str = "id, tenant_id, link_id, affiliate_id, offer_id, ip, user_agent, \
     referrer, country, device, sub_ids, destination_url, is_unique, fraud_score, status, created_at";

impl Click {
    pub async fn insert(pool: &PgPool, data: NewClick) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Click>(&format!(
            r#"
            INSERT INTO clicks (
                id, tenant_id, link_id, affiliate_id, offer_id, ip, user_agent, referrer,
                country, device, sub_ids, destination_url, is_unique, fraud_score, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {CLICK_COLUMNS}
            "#
        ))
        .bind(data.id)
        .bind(data.tenant_id)
        .bind(data.link_id)
        .bind(data.affiliate_id)
        .bind(data.offer_id)
        .bind(&data.ip)
        .bind(&data.user_agent)
        .bind(&data.referrer)
        .bind(&data.country)
        .bind(&data.device)
        .bind(&data.sub_ids)
        .bind(&data.destination_url)
        .bind(data.is_unique)
        .bind(data.fraud_score)
        .bind(data.status)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Click>(&format!(
            "SELECT {CLICK_COLUMNS} FROM clicks WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Tenant of a click, for postbacks that carry only a click ID
    pub async fn find_tenant(pool: &PgPool, id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT tenant_id FROM clicks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Whether a non-blocked click from `ip` on `link_id` exists since `since`
    pub async fn seen_since(
        pool: &PgPool,
        tenant_id: Uuid,
        link_id: Uuid,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM clicks
                WHERE tenant_id = $1 AND link_id = $2 AND ip = $3
                  AND created_at >= $4 AND status <> 'blocked'
            )
            "#,
        )
        .bind(tenant_id)
        .bind(link_id)
        .bind(ip)
        .bind(since)
        .fetch_one(pool)
        .await
    }

    /// Lists clicks, newest first
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        filter: &ClickFilter,
        pagination: Pagination,
    ) -> Result<Page<Self>, sqlx::Error> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR affiliate_id = $2)
              AND ($3::uuid IS NULL OR offer_id = $3)
              AND ($4::click_status IS NULL OR status = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at < $6)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM clicks {WHERE}"))
            .bind(tenant_id)
            .bind(filter.affiliate_id)
            .bind(filter.offer_id)
            .bind(filter.status)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(pool)
            .await?;

        let data = sqlx::query_as::<_, Click>(&format!(
            "SELECT {CLICK_COLUMNS} FROM clicks {WHERE} \
             ORDER BY created_at DESC, id LIMIT $7 OFFSET $8"
        ))
        .bind(tenant_id)
        .bind(filter.affiliate_id)
        .bind(filter.offer_id)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(data, pagination, total))
    }
}
