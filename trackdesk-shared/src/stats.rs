//! Reporting queries for the dashboard and affiliate stats
//!
//! Every query takes a [`StatsScope`]; the affiliate role passes its own
//! affiliate id so the numbers never include other partners. Rejected
//! conversions are counted by status but excluded from revenue and commission.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Default dashboard window
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Largest `limit` for the top lists
pub const MAX_TOP_LIMIT: i64 = 100;

/// Tenant, optional affiliate and a half-open `[from, to)` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsScope {
    pub tenant_id: Uuid,
    pub affiliate_id: Option<Uuid>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl StatsScope {
    /// Fills a missing range with the last 30 days ending now
    pub fn new(
        tenant_id: Uuid,
        affiliate_id: Option<Uuid>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
        Self {
            tenant_id,
            affiliate_id,
            from,
            to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Day,
    Hour,
}

impl Interval {
    fn as_str(&self) -> &'static str {
        match self {
            Interval::Day => "day",
            Interval::Hour => "hour",
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Day
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversionCounts {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub paid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub clicks: i64,
    pub unique_clicks: i64,
    pub flagged_clicks: i64,
    pub conversions: ConversionCounts,
    pub revenue_cents: i64,
    pub commission_cents: i64,

    /// Non-rejected conversions per unique click
    pub conversion_rate: f64,

    /// Commission per click, in cents
    pub epc_cents: f64,

    pub active_affiliates: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeseriesPoint {
    pub bucket: DateTime<Utc>,
    pub clicks: i64,
    pub conversions: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopEntry {
    pub id: Uuid,
    pub name: String,
    pub conversions: i64,
    pub revenue_cents: i64,
    pub commission_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliateStats {
    pub affiliate_id: Uuid,
    pub clicks: i64,
    pub unique_clicks: i64,
    pub conversions: i64,
    pub revenue_cents: i64,
    pub commission_cents: i64,

    /// Approved commission not yet reserved by a payout
    pub pending_balance_cents: i64,
}

#[derive(Debug, Default, sqlx::FromRow)]
struct ClickCounts {
    clicks: i64,
    unique_clicks: i64,
    flagged_clicks: i64,
}

#[derive(Debug, Default, sqlx::FromRow)]
struct Money {
    revenue_cents: i64,
    commission_cents: i64,
}

/// `numerator / denominator`, or 0 when there is nothing to divide by
pub fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

async fn click_counts(pool: &PgPool, scope: &StatsScope) -> Result<ClickCounts, sqlx::Error> {
    sqlx::query_as::<_, ClickCounts>(
        r#"
        SELECT COUNT(*) FILTER (WHERE status <> 'blocked') AS clicks,
               COUNT(*) FILTER (WHERE status <> 'blocked' AND is_unique) AS unique_clicks,
               COUNT(*) FILTER (WHERE status = 'flagged') AS flagged_clicks
        FROM clicks
        WHERE tenant_id = $1
          AND ($2::uuid IS NULL OR affiliate_id = $2)
          AND created_at >= $3 AND created_at < $4
        "#,
    )
    .bind(scope.tenant_id)
    .bind(scope.affiliate_id)
    .bind(scope.from)
    .bind(scope.to)
    .fetch_one(pool)
    .await
}

async fn conversion_counts(pool: &PgPool, scope: &StatsScope) -> Result<(ConversionCounts, Money), sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct Row {
        #[sqlx(flatten)]
        counts: ConversionCounts,
        #[sqlx(flatten)]
        money: Money,
    }

    let row = sqlx::query_as::<_, Row>(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'pending') AS pending,
               COUNT(*) FILTER (WHERE status = 'approved') AS approved,
               COUNT(*) FILTER (WHERE status = 'rejected') AS rejected,
               COUNT(*) FILTER (WHERE status = 'paid') AS paid,
               COALESCE(SUM(amount_cents) FILTER (WHERE status <> 'rejected'), 0)::BIGINT AS revenue_cents,
               COALESCE(SUM(commission_cents) FILTER (WHERE status <> 'rejected'), 0)::BIGINT AS commission_cents
        FROM conversions
        WHERE tenant_id = $1
          AND ($2::uuid IS NULL OR affiliate_id = $2)
          AND created_at >= $3 AND created_at < $4
        "#,
    )
    .bind(scope.tenant_id)
    .bind(scope.affiliate_id)
    .bind(scope.from)
    .bind(scope.to)
    .fetch_one(pool)
    .await?;

    Ok((row.counts, row.money))
}

/// Dashboard headline numbers
pub async fn summary(pool: &PgPool, scope: &StatsScope) -> Result<Summary, sqlx::Error> {
    let clicks = click_counts(pool, scope).await?;
    let (conversions, money) = conversion_counts(pool, scope).await?;

    let active_affiliates: i64 = match scope.affiliate_id {
        Some(_) => 1,
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM affiliates WHERE tenant_id = $1 AND status = 'active'",
            )
            .bind(scope.tenant_id)
            .fetch_one(pool)
            .await?
        }
    };

    let converted = conversions.total - conversions.rejected;

    Ok(Summary {
        from: scope.from,
        to: scope.to,
        clicks: clicks.clicks,
        unique_clicks: clicks.unique_clicks,
        flagged_clicks: clicks.flagged_clicks,
        conversion_rate: ratio(converted, clicks.unique_clicks),
        epc_cents: ratio(money.commission_cents, clicks.clicks),
        conversions,
        revenue_cents: money.revenue_cents,
        commission_cents: money.commission_cents,
        active_affiliates,
    })
}

/// Clicks, conversions and revenue per day or hour, empty buckets included
pub async fn timeseries(
    pool: &PgPool,
    scope: &StatsScope,
    interval: Interval,
) -> Result<Vec<TimeseriesPoint>, sqlx::Error> {
    sqlx::query_as::<_, TimeseriesPoint>(
        r#"
        WITH buckets AS (
            SELECT generate_series(
                date_trunc($5::text, $3::timestamptz),
                date_trunc($5::text, $4::timestamptz - interval '1 microsecond'),
                ('1 ' || $5::text)::interval
            ) AS bucket
        ),
        click_buckets AS (
            SELECT date_trunc($5::text, created_at) AS bucket, COUNT(*) AS clicks
            FROM clicks
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR affiliate_id = $2)
              AND status <> 'blocked'
              AND created_at >= $3 AND created_at < $4
            GROUP BY 1
        ),
        conversion_buckets AS (
            SELECT date_trunc($5::text, created_at) AS bucket,
                   COUNT(*) AS conversions,
                   COALESCE(SUM(amount_cents), 0)::BIGINT AS revenue_cents
            FROM conversions
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR affiliate_id = $2)
              AND status <> 'rejected'
              AND created_at >= $3 AND created_at < $4
            GROUP BY 1
        )
        SELECT b.bucket,
               COALESCE(cl.clicks, 0) AS clicks,
               COALESCE(cv.conversions, 0) AS conversions,
               COALESCE(cv.revenue_cents, 0)::BIGINT AS revenue_cents
        FROM buckets b
        LEFT JOIN click_buckets cl ON cl.bucket = b.bucket
        LEFT JOIN conversion_buckets cv ON cv.bucket = b.bucket
        ORDER BY b.bucket
        "#,
    )
    .bind(scope.tenant_id)
    .bind(scope.affiliate_id)
    .bind(scope.from)
    .bind(scope.to)
    .bind(interval.as_str())
    .fetch_all(pool)
    .await
}

/// Affiliates ranked by commission in the window
pub async fn top_affiliates(pool: &PgPool, scope: &StatsScope, limit: i64) -> Result<Vec<TopEntry>, sqlx::Error> {
    sqlx::query_as::<_, TopEntry>(
        r#"
        SELECT a.id, a.name,
               COUNT(c.id) AS conversions,
               COALESCE(SUM(c.amount_cents), 0)::BIGINT AS revenue_cents,
               COALESCE(SUM(c.commission_cents), 0)::BIGINT AS commission_cents
        FROM conversions c
        JOIN affiliates a ON a.id = c.affiliate_id
        WHERE c.tenant_id = $1
          AND ($2::uuid IS NULL OR c.affiliate_id = $2)
          AND c.status <> 'rejected'
          AND c.created_at >= $3 AND c.created_at < $4
        GROUP BY a.id, a.name
        ORDER BY commission_cents DESC, a.name
        LIMIT $5
        "#,
    )
    .bind(scope.tenant_id)
    .bind(scope.affiliate_id)
    .bind(scope.from)
    .bind(scope.to)
    .bind(limit.clamp(1, MAX_TOP_LIMIT))
    .fetch_all(pool)
    .await
}

/// Offers ranked by commission in the window
pub async fn top_offers(pool: &PgPool, scope: &StatsScope, limit: i64) -> Result<Vec<TopEntry>, sqlx::Error> {
    sqlx::query_as::<_, TopEntry>(
        r#"
        SELECT o.id, o.name,
               COUNT(c.id) AS conversions,
               COALESCE(SUM(c.amount_cents), 0)::BIGINT AS revenue_cents,
               COALESCE(SUM(c.commission_cents), 0)::BIGINT AS commission_cents
        FROM conversions c
        JOIN offers o ON o.id = c.offer_id
        WHERE c.tenant_id = $1
          AND ($2::uuid IS NULL OR c.affiliate_id = $2)
          AND c.status <> 'rejected'
          AND c.created_at >= $3 AND c.created_at < $4
        GROUP BY o.id, o.name
        ORDER BY commission_cents DESC, o.name
        LIMIT $5
        "#,
    )
    .bind(scope.tenant_id)
    .bind(scope.affiliate_id)
    .bind(scope.from)
    .bind(scope.to)
    .bind(limit.clamp(1, MAX_TOP_LIMIT))
    .fetch_all(pool)
    .await
}

/// Lifetime numbers for one affiliate
pub async fn affiliate_stats(pool: &PgPool, tenant_id: Uuid, affiliate_id: Uuid) -> Result<AffiliateStats, sqlx::Error> {
    let scope = StatsScope {
        tenant_id,
        affiliate_id: Some(affiliate_id),
        from: DateTime::<Utc>::UNIX_EPOCH,
        to: Utc::now() + Duration::days(1),
    };

    let clicks = click_counts(pool, &scope).await?;
    let (conversions, money) = conversion_counts(pool, &scope).await?;

    let pending_balance_cents: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(commission_cents), 0)::BIGINT
        FROM conversions
        WHERE tenant_id = $1 AND affiliate_id = $2
          AND status = 'approved' AND payout_id IS NULL
        "#,
    )
    .bind(tenant_id)
    .bind(affiliate_id)
    .fetch_one(pool)
    .await?;

    Ok(AffiliateStats {
        affiliate_id,
        clicks: clicks.clicks,
        unique_clicks: clicks.unique_clicks,
        conversions: conversions.total - conversions.rejected,
        revenue_cents: money.revenue_cents,
        commission_cents: money.commission_cents,
        pending_balance_cents,
    })
}
