/// Payout model and database operations
///
/// Payouts are built by `crate::payouts`, which reserves the approved
/// conversions a payout covers by setting their `payout_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Page, Pagination};

/// Payout status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Cancelled => "cancelled",
        }
    }

    /// States from which a transition to `self` is allowed
    pub fn allowed_sources(&self) -> &'static [PayoutStatus] {
        match self {
            PayoutStatus::Processing => &[PayoutStatus::Pending],
            PayoutStatus::Completed => &[PayoutStatus::Pending, PayoutStatus::Processing],
            PayoutStatus::Failed => &[PayoutStatus::Processing],
            PayoutStatus::Cancelled => &[PayoutStatus::Pending],
            PayoutStatus::Pending => &[],
        }
    }

    /// Whether conversions are handed back for a later payout
    pub fn releases_conversions(&self) -> bool {
        matches!(self, PayoutStatus::Failed | PayoutStatus::Cancelled)
    }
}

/// Payout
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payout {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub affiliate_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PayoutStatus,

    /// Payment rail (e.g. "paypal", "wire")
    pub method: Option<String>,

    /// External transaction reference, set on completion
    pub reference: Option<String>,

    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub conversion_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for inserting a payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayout {
    pub tenant_id: Uuid,
    pub affiliate_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub method: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub conversion_count: i32,
}

/// List filters
#[derive(Debug, Clone, Default)]
pub struct PayoutFilter {
    pub affiliate_id: Option<Uuid>,
    pub status: Option<PayoutStatus>,
}

pub(crate) const PAYOUT_COLUMNS: &str = "id, tenant_id, affiliate_id, amount_cents, currency, \
     status, method, reference, period_start, period_end, notes, conversion_count, created_at, \
     updated_at, completed_at";

impl Payout {
    pub async fn insert<'e, E>(executor: E, data: NewPayout) -> Result<Self, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payout>(&format!(
            r#"
            INSERT INTO payouts (
                id, tenant_id, affiliate_id, amount_cents, currency, method,
                period_start, period_end, notes, conversion_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.affiliate_id)
        .bind(data.amount_cents)
        .bind(&data.currency)
        .bind(&data.method)
        .bind(data.period_start)
        .bind(data.period_end)
        .bind(&data.notes)
        .bind(data.conversion_count)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Lists payouts, newest first
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        filter: &PayoutFilter,
        pagination: Pagination,
    ) -> Result<Page<Self>, sqlx::Error> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR affiliate_id = $2)
              AND ($3::payout_status IS NULL OR status = $3)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM payouts {WHERE}"))
            .bind(tenant_id)
            .bind(filter.affiliate_id)
            .bind(filter.status)
            .fetch_one(pool)
            .await?;

        let data = sqlx::query_as::<_, Payout>(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts {WHERE} \
             ORDER BY created_at DESC, id LIMIT $4 OFFSET $5"
        ))
        .bind(tenant_id)
        .bind(filter.affiliate_id)
        .bind(filter.status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(data, pagination, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use PayoutStatus::*;

        assert!(Processing.allowed_sources().contains(&Pending));
        assert!(Completed.allowed_sources().contains(&Processing));
        assert!(Completed.allowed_sources().contains(&Pending));
        assert!(!Failed.allowed_sources().contains(&Pending));
        assert!(!Cancelled.allowed_sources().contains(&Processing));
        assert!(Pending.allowed_sources().is_empty());
    }

    #[test]
    fn test_releases_conversions() {
        assert!(PayoutStatus::Failed.releases_conversions());
        assert!(PayoutStatus::Cancelled.releases_conversions());
        assert!(!PayoutStatus::Completed.releases_conversions());
    }
}
