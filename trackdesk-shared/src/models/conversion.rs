/// Conversion model and database operations
///
/// A conversion is an attributed sale or lead. Rows are created by
/// `crate::tracking::conversion::record_conversion` and afterwards only move
/// through their status lifecycle:
///
/// ```text
/// pending ──► approved ──► paid
///    │           │
///    └──► rejected ◄┘
/// ```
///
/// `paid` is set by the payout builder when the payout completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Page, Pagination};

/// Unique index deduplicating `(tenant_id, order_id)`
pub const ORDER_ID_CONSTRAINT: &str = "conversions_tenant_order_id_key";

/// Conversion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversion_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Pending => "pending",
            ConversionStatus::Approved => "approved",
            ConversionStatus::Rejected => "rejected",
            ConversionStatus::Paid => "paid",
        }
    }

    /// States from which a manual transition to `self` is allowed
    pub fn allowed_sources(&self) -> &'static [ConversionStatus] {
        match self {
            ConversionStatus::Approved => &[ConversionStatus::Pending],
            ConversionStatus::Rejected => &[ConversionStatus::Pending, ConversionStatus::Approved],
            ConversionStatus::Pending | ConversionStatus::Paid => &[],
        }
    }
}

/// Where a conversion was reported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversion_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversionSource {
    Postback,
    Api,
    Coupon,
    Stripe,
    Shopify,
}

impl ConversionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionSource::Postback => "postback",
            ConversionSource::Api => "api",
            ConversionSource::Coupon => "coupon",
            ConversionSource::Stripe => "stripe",
            ConversionSource::Shopify => "shopify",
        }
    }
}

/// Conversion
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub click_id: Option<Uuid>,
    pub affiliate_id: Uuid,
    pub offer_id: Uuid,
    pub coupon_id: Option<Uuid>,

    /// Merchant order reference, unique per tenant
    pub order_id: Option<String>,

    /// Order amount in minor units
    pub amount_cents: i64,

    /// Affiliate commission in minor units
    pub commission_cents: i64,

    pub currency: String,
    pub status: ConversionStatus,
    pub fraud_score: i32,
    pub source: ConversionSource,

    /// Payout this conversion is reserved for
    pub payout_id: Option<Uuid>,

    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversion {
    pub tenant_id: Uuid,
    pub click_id: Option<Uuid>,
    pub affiliate_id: Uuid,
    pub offer_id: Uuid,
    pub coupon_id: Option<Uuid>,
    pub order_id: Option<String>,
    pub amount_cents: i64,
    pub commission_cents: i64,
    pub currency: String,
    pub status: ConversionStatus,
    pub fraud_score: i32,
    pub source: ConversionSource,
    pub metadata: JsonValue,
}

/// List filters
#[derive(Debug, Clone, Default)]
pub struct ConversionFilter {
    pub affiliate_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub status: Option<ConversionStatus>,
    pub source: Option<ConversionSource>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub(crate) const CONVERSION_COLUMNS: &str = "id, tenant_id, click_id, affiliate_id, offer_id, \
     coupon_id, order_id, amount_cents, commission_cents, currency, status, fraud_score, source, \
     payout_id, metadata, created_at, updated_at";

impl Conversion {
    /// Inserts a conversion
    ///
    /// # Errors
    ///
    /// A unique violation on [`ORDER_ID_CONSTRAINT`] when the order was already recorded.
    pub async fn insert<'e, E>(executor: E, data: NewConversion) -> Result<Self, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Conversion>(&format!(
            r#"
            INSERT INTO conversions (
                id, tenant_id, click_id, affiliate_id, offer_id, coupon_id, order_id,
                amount_cents, commission_cents, currency, status, fraud_score, source, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {CONVERSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.click_id)
        .bind(data.affiliate_id)
        .bind(data.offer_id)
        .bind(data.coupon_id)
        .bind(&data.order_id)
        .bind(data.amount_cents)
        .bind(data.commission_cents)
        .bind(&data.currency)
        .bind(data.status)
        .bind(data.fraud_score)
        .bind(data.source)
        .bind(&data.metadata)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Conversion>(&format!(
            "SELECT {CONVERSION_COLUMNS} FROM conversions WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// ID of the conversion already recorded for an order
    pub async fn find_id_by_order(
        pool: &PgPool,
        tenant_id: Uuid,
        order_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM conversions WHERE tenant_id = $1 AND order_id = $2")
            .bind(tenant_id)
            .bind(order_id)
            .fetch_optional(pool)
            .await
    }

    /// Non-rejected conversions on an offer since `since`
    pub async fn count_for_offer_since<'e, E>(
        executor: E,
        tenant_id: Uuid,
        offer_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM conversions
            WHERE tenant_id = $1 AND offer_id = $2 AND created_at >= $3 AND status <> 'rejected'
            "#,
        )
        .bind(tenant_id)
        .bind(offer_id)
        .bind(since)
        .fetch_one(executor)
        .await
    }

    /// Lists conversions, newest first
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        filter: &ConversionFilter,
        pagination: Pagination,
    ) -> Result<Page<Self>, sqlx::Error> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR affiliate_id = $2)
              AND ($3::uuid IS NULL OR offer_id = $3)
              AND ($4::conversion_status IS NULL OR status = $4)
              AND ($5::conversion_source IS NULL OR source = $5)
              AND ($6::timestamptz IS NULL OR created_at >= $6)
              AND ($7::timestamptz IS NULL OR created_at < $7)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM conversions {WHERE}"))
            .bind(tenant_id)
            .bind(filter.affiliate_id)
            .bind(filter.offer_id)
            .bind(filter.status)
            .bind(filter.source)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(pool)
            .await?;

        let data = sqlx::query_as::<_, Conversion>(&format!(
            "SELECT {CONVERSION_COLUMNS} FROM conversions {WHERE} \
             ORDER BY created_at DESC, id LIMIT $8 OFFSET $9"
        ))
        .bind(tenant_id)
        .bind(filter.affiliate_id)
        .bind(filter.offer_id)
        .bind(filter.status)
        .bind(filter.source)
        .bind(filter.from)
        .bind(filter.to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(data, pagination, total))
    }

    /// Moves a conversion to `target` when allowed, merging `metadata` into the row
    ///
    /// Conversions reserved for a payout cannot be rejected.
    ///
    /// # Returns
    ///
    /// `None` when the conversion is missing or not in a valid source state
    pub async fn transition(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        target: ConversionStatus,
        metadata: JsonValue,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sources: Vec<&str> = target.allowed_sources().iter().map(|s| s.as_str()).collect();

        sqlx::query_as::<_, Conversion>(&format!(
            r#"
            UPDATE conversions
            SET status = $3, metadata = metadata || $5, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status::text = ANY($4)
              AND ($3 <> 'rejected'::conversion_status OR payout_id IS NULL)
            RETURNING {CONVERSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(target)
        .bind(sources)
        .bind(metadata)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_sources() {
        use ConversionStatus::*;

        assert_eq!(Approved.allowed_sources(), &[Pending]);
        assert!(Rejected.allowed_sources().contains(&Approved));
        assert!(!Rejected.allowed_sources().contains(&Paid));
        assert!(Paid.allowed_sources().is_empty());
    }

    #[test]
    fn test_source_serde() {
        let source: ConversionSource = serde_json::from_str("\"shopify\"").unwrap();
        assert_eq!(source, ConversionSource::Shopify);
        assert_eq!(ConversionSource::Postback.as_str(), "postback");
    }
}
