/// Payout builder
///
/// A payout covers an affiliate's approved, not yet reserved conversions.
/// Building one locks those conversions (`FOR UPDATE`), creates the payout
/// and stamps each conversion's `payout_id` in a single transaction, so a
/// conversion is never paid twice.
///
/// Lifecycle:
///
/// ```text
/// pending ──process──> processing ──complete──> completed (conversions -> paid)
///    │                     │
///    ├──complete───────────┘
///    │                     └──fail──> failed     (conversions released)
///    └──cancel──> cancelled                      (conversions released)
/// ```
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::payouts::{build_payout, BuildPayout};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid, affiliate_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let payout = build_payout(&pool, tenant_id, BuildPayout::for_affiliate(affiliate_id)).await?;
/// println!("{} cents over {} conversions", payout.amount_cents, payout.conversion_count);
/// # Ok(())
/// # }
/// ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{publish, EventType};
use crate::models::affiliate::Affiliate;
use crate::models::payout::{NewPayout, Payout, PayoutStatus, PAYOUT_COLUMNS};

/// Threshold used when a request names none
pub const DEFAULT_MIN_PAYOUT_CENTS: i64 = 5_000;

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Payout not found")]
    NotFound,

    #[error("Affiliate not found")]
    AffiliateNotFound,

    #[error("Cannot move payout from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: PayoutStatus, to: PayoutStatus },

    #[error("No approved unpaid conversions to pay")]
    NothingToPay,

    #[error("Payout total {total} is below the minimum of {minimum}")]
    BelowThreshold { total: i64, minimum: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One affiliate's payable balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PayoutPreview {
    pub affiliate_id: Uuid,
    pub affiliate_name: String,
    pub email: String,
    pub payment_method: Option<String>,
    pub currency: String,
    pub amount_cents: i64,
    pub conversion_count: i64,
    pub oldest_conversion_at: DateTime<Utc>,
}

/// Input for building a payout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildPayout {
    pub affiliate_id: Uuid,

    /// Only conversions created before this instant; defaults to now
    pub period_end: Option<DateTime<Utc>>,

    pub min_amount_cents: Option<i64>,
    pub method: Option<String>,
    pub notes: Option<String>,
}

impl BuildPayout {
    pub fn for_affiliate(affiliate_id: Uuid) -> Self {
        Self {
            affiliate_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PayableConversion {
    id: Uuid,
    commission_cents: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

/// Payable balances for active affiliates at or above `min_amount_cents`
///
/// Balances are grouped per currency.
pub async fn preview(
    pool: &PgPool,
    tenant_id: Uuid,
    period_end: Option<DateTime<Utc>>,
    min_amount_cents: Option<i64>,
) -> Result<Vec<PayoutPreview>, sqlx::Error> {
    sqlx::query_as::<_, PayoutPreview>(
        r#"
        SELECT a.id AS affiliate_id, a.name AS affiliate_name, a.email, a.payment_method,
               c.currency, SUM(c.commission_cents)::BIGINT AS amount_cents,
               COUNT(*) AS conversion_count, MIN(c.created_at) AS oldest_conversion_at
        FROM conversions c
        JOIN affiliates a ON a.id = c.affiliate_id
        WHERE c.tenant_id = $1
          AND a.status = 'active'
          AND c.status = 'approved'
          AND c.payout_id IS NULL
          AND c.created_at < $2
        GROUP BY a.id, a.name, a.email, a.payment_method, c.currency
        HAVING SUM(c.commission_cents) >= $3
        ORDER BY amount_cents DESC, a.name
        "#,
    )
    .bind(tenant_id)
    .bind(period_end.unwrap_or_else(Utc::now))
    .bind(min_amount_cents.unwrap_or(DEFAULT_MIN_PAYOUT_CENTS))
    .fetch_all(pool)
    .await
}

/// Sums payable conversions in the currency of the oldest one
fn select_payable(rows: &[PayableConversion]) -> (String, Vec<Uuid>, i64, Option<DateTime<Utc>>) {
    let Some(first) = rows.first() else {
        return (String::new(), Vec::new(), 0, None);
    };
    let currency = first.currency.clone();

    let same_currency: Vec<&PayableConversion> =
        rows.iter().filter(|r| r.currency == currency).collect();

    let ids = same_currency.iter().map(|r| r.id).collect();
    let total = same_currency.iter().map(|r| r.commission_cents).sum();
    let period_start = same_currency.iter().map(|r| r.created_at).min();

    (currency, ids, total, period_start)
}

/// Affiliates in preview order, each once
fn payable_affiliates(candidates: &[PayoutPreview]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .iter()
        .map(|c| c.affiliate_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Builds one payout for an affiliate
///
/// # Errors
///
/// - [`PayoutError::NothingToPay`] when no conversion qualifies
/// - [`PayoutError::BelowThreshold`] when the total is under the minimum
pub async fn build_payout(
    pool: &PgPool,
    tenant_id: Uuid,
    request: BuildPayout,
) -> Result<Payout, PayoutError> {
    let affiliate = Affiliate::find_by_id(pool, tenant_id, request.affiliate_id)
        .await?
        .ok_or(PayoutError::AffiliateNotFound)?;

    let period_end = request.period_end.unwrap_or_else(Utc::now);
    let minimum = request.min_amount_cents.unwrap_or(DEFAULT_MIN_PAYOUT_CENTS);

    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, PayableConversion>(
        r#"
        SELECT id, commission_cents, currency, created_at
        FROM conversions
        WHERE tenant_id = $1 AND affiliate_id = $2
          AND status = 'approved' AND payout_id IS NULL AND created_at < $3
        ORDER BY created_at, id
        FOR UPDATE
        "#,
    )
    .bind(tenant_id)
    .bind(affiliate.id)
    .bind(period_end)
    .fetch_all(&mut *tx)
    .await?;

    let (currency, ids, total, period_start) = select_payable(&rows);

    if ids.is_empty() {
        return Err(PayoutError::NothingToPay);
    }
    if total < minimum {
        return Err(PayoutError::BelowThreshold { total, minimum });
    }

    let payout = Payout::insert(
        &mut *tx,
        NewPayout {
            tenant_id,
            affiliate_id: affiliate.id,
            amount_cents: total,
            currency,
            method: request.method.or_else(|| affiliate.payment_method.clone()),
            period_start,
            period_end: Some(period_end),
            notes: request.notes,
            conversion_count: i32::try_from(ids.len()).unwrap_or(i32::MAX),
        },
    )
    .await?;

    sqlx::query("UPDATE conversions SET payout_id = $1, updated_at = NOW() WHERE id = ANY($2)")
        .bind(payout.id)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

    publish(&mut *tx, tenant_id, EventType::PayoutCreated, json!(payout)).await?;

    tx.commit().await?;

    tracing::info!(
        tenant_id = %tenant_id,
        payout_id = %payout.id,
        affiliate_id = %affiliate.id,
        amount_cents = payout.amount_cents,
        conversions = payout.conversion_count,
        "Payout created"
    );

    Ok(payout)
}

/// Builds payouts for every affiliate in the preview
///
/// Affiliates whose balance changed in between and no longer qualify are
/// skipped.
pub async fn build_batch(
    pool: &PgPool,
    tenant_id: Uuid,
    period_end: Option<DateTime<Utc>>,
    min_amount_cents: Option<i64>,
    method: Option<String>,
) -> Result<Vec<Payout>, PayoutError> {
    let period_end = period_end.unwrap_or_else(Utc::now);
    let candidates = preview(pool, tenant_id, Some(period_end), min_amount_cents).await?;

    let affiliate_ids = payable_affiliates(&candidates);

    let mut payouts = Vec::with_capacity(affiliate_ids.len());
    for affiliate_id in affiliate_ids {
        let request = BuildPayout {
            affiliate_id,
            period_end: Some(period_end),
            min_amount_cents,
            method: method.clone(),
            notes: None,
        };

        match build_payout(pool, tenant_id, request).await {
            Ok(payout) => payouts.push(payout),
            Err(PayoutError::NothingToPay | PayoutError::BelowThreshold { .. }) => {
                tracing::debug!(affiliate_id = %affiliate_id, "Skipping affiliate no longer payable");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(payouts)
}

/// Moves a payout to `target`, updating its conversions
///
/// `completed` marks the conversions `paid`; `failed` and `cancelled` clear
/// their `payout_id` so the next payout picks them up again. `note` is stored
/// as the reference on completion and appended to the notes otherwise.
pub async fn transition(
    pool: &PgPool,
    tenant_id: Uuid,
    id: Uuid,
    target: PayoutStatus,
    note: Option<String>,
) -> Result<Payout, PayoutError> {
    let sources: Vec<&str> = target.allowed_sources().iter().map(|s| s.as_str()).collect();
    let completing = target == PayoutStatus::Completed;

    let mut tx = pool.begin().await?;

    let updated = sqlx::query_as::<_, Payout>(&format!(
        r#"
        UPDATE payouts SET
            status = $3,
            reference = CASE WHEN $5 THEN COALESCE($6, reference) ELSE reference END,
            notes = CASE
                WHEN $5 OR $6::text IS NULL THEN notes
                ELSE concat_ws(E'\n', notes, $6)
            END,
            completed_at = CASE WHEN $5 THEN NOW() ELSE completed_at END,
            updated_at = NOW()
        WHERE id = $1 AND tenant_id = $2 AND status::text = ANY($4)
        RETURNING {PAYOUT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(tenant_id)
    .bind(target)
    .bind(&sources)
    .bind(completing)
    .bind(&note)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(payout) = updated else {
        drop(tx);
        return match Payout::find_by_id(pool, tenant_id, id).await? {
            Some(current) => Err(PayoutError::InvalidTransition {
                from: current.status,
                to: target,
            }),
            None => Err(PayoutError::NotFound),
        };
    };

    if completing {
        sqlx::query(
            "UPDATE conversions SET status = 'paid', updated_at = NOW() WHERE payout_id = $1 AND tenant_id = $2",
        )
        .bind(payout.id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        publish(&mut *tx, tenant_id, EventType::PayoutCompleted, json!(payout)).await?;
    } else if target.releases_conversions() {
        sqlx::query(
            "UPDATE conversions SET payout_id = NULL, updated_at = NOW() WHERE payout_id = $1 AND tenant_id = $2",
        )
        .bind(payout.id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        tenant_id = %tenant_id,
        payout_id = %payout.id,
        status = payout.status.as_str(),
        "Payout status changed"
    );

    Ok(payout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(commission_cents: i64, currency: &str, age_days: i64) -> PayableConversion {
        PayableConversion {
            id: Uuid::new_v4(),
            commission_cents,
            currency: currency.to_string(),
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn test_select_payable_single_currency() {
        let rows = vec![row(2_000, "USD", 10), row(500, "EUR", 9), row(3_500, "USD", 2)];
        let (currency, ids, total, period_start) = select_payable(&rows);

        assert_eq!(currency, "USD");
        assert_eq!(ids, vec![rows[0].id, rows[2].id]);
        assert_eq!(total, 5_500);
        assert_eq!(period_start, Some(rows[0].created_at));
    }

    #[test]
    fn test_select_payable_empty() {
        let (_, ids, total, period_start) = select_payable(&[]);
        assert!(ids.is_empty());
        assert_eq!(total, 0);
        assert!(period_start.is_none());
    }

    fn candidate(affiliate_id: Uuid, currency: &str, amount_cents: i64) -> PayoutPreview {
        PayoutPreview {
            affiliate_id,
            affiliate_name: "Partner".to_string(),
            email: "partner@example.com".to_string(),
            payment_method: None,
            currency: currency.to_string(),
            amount_cents,
            conversion_count: 1,
            oldest_conversion_at: Utc::now(),
        }
    }

    #[test]
    fn test_payable_affiliates_visits_each_once() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        // Ordered by amount, so `a`'s two currencies are not adjacent
        let candidates = vec![
            candidate(a, "USD", 9_000),
            candidate(b, "USD", 7_000),
            candidate(a, "EUR", 6_000),
        ];

        assert_eq!(payable_affiliates(&candidates), vec![a, b]);
        assert!(payable_affiliates(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_payout_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let pool = PgPool::connect_lazy("postgres://localhost/trackdesk_test").unwrap();
        let tenant_id = Uuid::new_v4();

        let build = build_payout(&pool, tenant_id, BuildPayout::for_affiliate(Uuid::new_v4()));
        assert_send(&build);
        let batch = build_batch(&pool, tenant_id, None, None, None);
        assert_send(&batch);
        let complete = transition(&pool, tenant_id, Uuid::new_v4(), PayoutStatus::Completed, None);
        assert_send(&complete);
    }

    #[test]
    fn test_error_messages() {
        let err = PayoutError::InvalidTransition {
            from: PayoutStatus::Completed,
            to: PayoutStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "Cannot move payout from completed to cancelled");

        let err = PayoutError::BelowThreshold { total: 1200, minimum: 5000 };
        assert!(err.to_string().contains("below the minimum"));
    }
}
