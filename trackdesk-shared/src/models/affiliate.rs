/// Affiliate model and database operations
///
/// Affiliates are the partners who promote a tenant's offers. Each has a
/// referral code, unique within the tenant, used for code-based attribution
/// and printed into tracking links.
///
/// # Status lifecycle
///
/// ```text
///            approve                suspend
/// pending ───────────► active ───────────────► suspended
///    │                   ▲                          │
///    │ reject            └──────── approve ─────────┘
///    ▼                   ▲
/// rejected ──────────────┘ approve
/// ```
///
/// Only `active` affiliates receive clicks and conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use super::{like_pattern, Page, Pagination};
use crate::auth::api_key::generate_random_string;

/// Length of generated referral codes
pub const REFERRAL_CODE_LENGTH: usize = 8;

/// Affiliate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "affiliate_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AffiliateStatus {
    Pending,
    Active,
    Suspended,
    Rejected,
}

impl AffiliateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliateStatus::Pending => "pending",
            AffiliateStatus::Active => "active",
            AffiliateStatus::Suspended => "suspended",
            AffiliateStatus::Rejected => "rejected",
        }
    }

    /// States from which a transition to `self` is allowed
    pub fn allowed_sources(&self) -> &'static [AffiliateStatus] {
        match self {
            AffiliateStatus::Active => &[
                AffiliateStatus::Pending,
                AffiliateStatus::Suspended,
                AffiliateStatus::Rejected,
            ],
            AffiliateStatus::Suspended => &[AffiliateStatus::Active],
            AffiliateStatus::Rejected => &[AffiliateStatus::Pending],
            AffiliateStatus::Pending => &[],
        }
    }

    /// Whether `self -> target` is a valid transition
    pub fn can_transition_to(&self, target: AffiliateStatus) -> bool {
        target.allowed_sources().contains(self)
    }
}

/// Affiliate partner
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Affiliate {
    pub id: Uuid,
    pub tenant_id: Uuid,

    /// Portal login, when the affiliate has one
    pub user_id: Option<Uuid>,

    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub status: AffiliateStatus,

    /// Free-form tier label (e.g. "standard", "gold")
    pub tier: String,

    /// Revshare override in basis points
    pub commission_rate_bps: Option<i32>,

    pub referral_code: String,
    pub payment_method: Option<String>,
    pub payment_details: JsonValue,

    /// Server-to-server postback template
    pub postback_url: Option<String>,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an affiliate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAffiliate {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub status: Option<AffiliateStatus>,
    pub tier: Option<String>,
    pub commission_rate_bps: Option<i32>,

    /// Generated when absent
    pub referral_code: Option<String>,

    pub payment_method: Option<String>,
    pub payment_details: Option<JsonValue>,
    pub postback_url: Option<String>,
    pub notes: Option<String>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAffiliate {
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub tier: Option<String>,
    pub commission_rate_bps: Option<i32>,
    pub payment_method: Option<String>,
    pub payment_details: Option<JsonValue>,
    pub postback_url: Option<String>,
    pub notes: Option<String>,
}

/// List filters
#[derive(Debug, Clone, Default)]
pub struct AffiliateFilter {
    pub status: Option<AffiliateStatus>,

    /// Case-insensitive substring of name, email, company or referral code
    pub search: Option<String>,
}

const AFFILIATE_COLUMNS: &str = "id, tenant_id, user_id, name, email, company, status, tier, \
     commission_rate_bps, referral_code, payment_method, payment_details, postback_url, notes, \
     created_at, updated_at";

/// Generates an uppercase referral code
pub fn generate_referral_code() -> String {
    generate_random_string(REFERRAL_CODE_LENGTH).to_ascii_uppercase()
}

impl Affiliate {
    /// Creates an affiliate
    ///
    /// # Errors
    ///
    /// Unique violations on `affiliates_tenant_email_key` or
    /// `affiliates_tenant_referral_code_key` for duplicates.
    pub async fn create(pool: &PgPool, data: CreateAffiliate) -> Result<Self, sqlx::Error> {
        let referral_code = data
            .referral_code
            .map(|code| code.trim().to_string())
            .unwrap_or_else(generate_referral_code);

        sqlx::query_as::<_, Affiliate>(&format!(
            r#"
            INSERT INTO affiliates (
                id, tenant_id, user_id, name, email, company, status, tier,
                commission_rate_bps, referral_code, payment_method, payment_details,
                postback_url, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {AFFILIATE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.user_id)
        .bind(data.name.trim())
        .bind(data.email.trim())
        .bind(&data.company)
        .bind(data.status.unwrap_or(AffiliateStatus::Pending))
        .bind(data.tier.as_deref().unwrap_or("standard"))
        .bind(data.commission_rate_bps)
        .bind(referral_code)
        .bind(&data.payment_method)
        .bind(data.payment_details.unwrap_or_else(|| serde_json::json!({})))
        .bind(&data.postback_url)
        .bind(&data.notes)
        .fetch_one(pool)
        .await
    }

    /// Finds an affiliate within a tenant
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Affiliate>(&format!(
            "SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Finds an affiliate by referral code, ignoring case
    pub async fn find_by_referral_code(
        pool: &PgPool,
        tenant_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Affiliate>(&format!(
            "SELECT {AFFILIATE_COLUMNS} FROM affiliates \
             WHERE tenant_id = $1 AND upper(referral_code) = upper($2)"
        ))
        .bind(tenant_id)
        .bind(code.trim())
        .fetch_optional(pool)
        .await
    }

    /// Affiliate ID linked to a portal user
    pub async fn find_id_by_user(
        pool: &PgPool,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM affiliates WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists affiliates, newest first
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        filter: &AffiliateFilter,
        pagination: Pagination,
    ) -> Result<Page<Self>, sqlx::Error> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
              AND ($2::affiliate_status IS NULL OR status = $2)
              AND ($3::text IS NULL
                   OR name ILIKE $3 OR email ILIKE $3
                   OR company ILIKE $3 OR referral_code ILIKE $3)
        "#;

        let search = filter.search.as_deref().filter(|s| !s.trim().is_empty()).map(like_pattern);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM affiliates {WHERE}"))
            .bind(tenant_id)
            .bind(filter.status)
            .bind(&search)
            .fetch_one(pool)
            .await?;

        let data = sqlx::query_as::<_, Affiliate>(&format!(
            "SELECT {AFFILIATE_COLUMNS} FROM affiliates {WHERE} \
             ORDER BY created_at DESC, id LIMIT $4 OFFSET $5"
        ))
        .bind(tenant_id)
        .bind(filter.status)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(data, pagination, total))
    }

    /// Applies a partial update
    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateAffiliate,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Affiliate>(&format!(
            r#"
            UPDATE affiliates SET
                user_id = COALESCE($3, user_id),
                name = COALESCE($4, name),
                email = COALESCE($5, email),
                company = COALESCE($6, company),
                tier = COALESCE($7, tier),
                commission_rate_bps = COALESCE($8, commission_rate_bps),
                payment_method = COALESCE($9, payment_method),
                payment_details = COALESCE($10, payment_details),
                postback_url = COALESCE($11, postback_url),
                notes = COALESCE($12, notes),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {AFFILIATE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(data.user_id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.email.as_deref().map(str::trim))
        .bind(data.company)
        .bind(data.tier)
        .bind(data.commission_rate_bps)
        .bind(data.payment_method)
        .bind(data.payment_details)
        .bind(data.postback_url)
        .bind(data.notes)
        .fetch_optional(pool)
        .await
    }

    /// Moves an affiliate to `target` when its current status allows it
    ///
    /// # Returns
    ///
    /// `None` when the affiliate is missing or its current status is not a
    /// valid source for `target`.
    pub async fn transition(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        target: AffiliateStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sources: Vec<&str> = target.allowed_sources().iter().map(|s| s.as_str()).collect();

        sqlx::query_as::<_, Affiliate>(&format!(
            r#"
            UPDATE affiliates
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status::text = ANY($4)
            RETURNING {AFFILIATE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(target)
        .bind(sources)
        .fetch_optional(pool)
        .await
    }

    /// Deletes an affiliate and its links, clicks and conversions
    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM affiliates WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of affiliates in a tenant
    pub async fn count(pool: &PgPool, tenant_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM affiliates WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(pool)
            .await
    }

    /// Active affiliates of a tenant
    pub async fn list_active(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Affiliate>(&format!(
            "SELECT {AFFILIATE_COLUMNS} FROM affiliates \
             WHERE tenant_id = $1 AND status = 'active' ORDER BY name"
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }
}
