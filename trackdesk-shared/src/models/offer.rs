/// Offer model and database operations
///
/// An offer is something affiliates promote: a landing page plus the
/// commission terms for conversions on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Page, Pagination};

/// Offer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "offer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

/// How commission is calculated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutType {
    /// Fixed amount per conversion
    Cpa,

    /// Percentage of the order amount
    Revshare,

    /// Fixed amount plus percentage
    Hybrid,
}

/// Offer
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Offer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub landing_url: String,
    pub status: OfferStatus,
    pub payout_type: PayoutType,

    /// Fixed commission (cpa, hybrid)
    pub payout_amount_cents: i64,

    /// Percentage commission in basis points (revshare, hybrid)
    pub revshare_bps: i32,

    pub currency: String,

    /// Maximum conversions per UTC day
    pub daily_conversion_cap: Option<i32>,

    /// Conversions start `pending` instead of `approved`
    pub require_approval: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOffer {
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub landing_url: String,
    pub status: Option<OfferStatus>,
    pub payout_type: Option<PayoutType>,
    pub payout_amount_cents: Option<i64>,
    pub revshare_bps: Option<i32>,
    pub currency: Option<String>,
    pub daily_conversion_cap: Option<i32>,
    pub require_approval: Option<bool>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOffer {
    pub name: Option<String>,
    pub description: Option<String>,
    pub landing_url: Option<String>,
    pub status: Option<OfferStatus>,
    pub payout_type: Option<PayoutType>,
    pub payout_amount_cents: Option<i64>,
    pub revshare_bps: Option<i32>,
    pub currency: Option<String>,
    pub daily_conversion_cap: Option<i32>,
    pub require_approval: Option<bool>,
}

const OFFER_COLUMNS: &str = "id, tenant_id, name, description, landing_url, status, payout_type, \
     payout_amount_cents, revshare_bps, currency, daily_conversion_cap, require_approval, \
     created_at, updated_at";

/// Outcome of [`Offer::delete_or_archive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferRemoval {
    Deleted,
    Archived,
}

impl Offer {
    pub async fn create(pool: &PgPool, data: CreateOffer) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Offer>(&format!(
            r#"
            INSERT INTO offers (
                id, tenant_id, name, description, landing_url, status, payout_type,
                payout_amount_cents, revshare_bps, currency, daily_conversion_cap, require_approval
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.name.trim())
        .bind(&data.description)
        .bind(&data.landing_url)
        .bind(data.status.unwrap_or(OfferStatus::Draft))
        .bind(data.payout_type.unwrap_or(PayoutType::Cpa))
        .bind(data.payout_amount_cents.unwrap_or(0))
        .bind(data.revshare_bps.unwrap_or(0))
        .bind(
            data.currency
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_else(|| "USD".to_string()),
        )
        .bind(data.daily_conversion_cap)
        .bind(data.require_approval.unwrap_or(false))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Lists offers, newest first
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        status: Option<OfferStatus>,
        pagination: Pagination,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offers \
             WHERE tenant_id = $1 AND ($2::offer_status IS NULL OR status = $2)",
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_one(pool)
        .await?;

        let data = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers \
             WHERE tenant_id = $1 AND ($2::offer_status IS NULL OR status = $2) \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        ))
        .bind(tenant_id)
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(data, pagination, total))
    }

    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateOffer,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Offer>(&format!(
            r#"
            UPDATE offers SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                landing_url = COALESCE($5, landing_url),
                status = COALESCE($6, status),
                payout_type = COALESCE($7, payout_type),
                payout_amount_cents = COALESCE($8, payout_amount_cents),
                revshare_bps = COALESCE($9, revshare_bps),
                currency = COALESCE($10, currency),
                daily_conversion_cap = COALESCE($11, daily_conversion_cap),
                require_approval = COALESCE($12, require_approval),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.description)
        .bind(data.landing_url)
        .bind(data.status)
        .bind(data.payout_type)
        .bind(data.payout_amount_cents)
        .bind(data.revshare_bps)
        .bind(data.currency.map(|c| c.to_ascii_uppercase()))
        .bind(data.daily_conversion_cap)
        .bind(data.require_approval)
        .fetch_optional(pool)
        .await
    }

    /// Row-locks an offer until the surrounding transaction ends
    ///
    /// # Returns
    ///
    /// `false` if the offer doesn't exist
    pub async fn lock(conn: &mut sqlx::PgConnection, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM offers WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
                .bind(id)
                .bind(tenant_id)
                .fetch_optional(conn)
                .await?;
        Ok(locked.is_some())
    }

    /// Archives an offer that has conversions, deletes one that has none
    ///
    /// # Returns
    ///
    /// `None` if the offer doesn't exist
    pub async fn delete_or_archive(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<OfferRemoval>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let has_conversions: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM conversions WHERE offer_id = o.id)
            FROM offers o
            WHERE o.id = $1 AND o.tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let removal = match has_conversions {
            None => return Ok(None),
            Some(true) => {
                sqlx::query("UPDATE offers SET status = 'archived', updated_at = NOW() WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                OfferRemoval::Archived
            }
            Some(false) => {
                sqlx::query("DELETE FROM offers WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                OfferRemoval::Deleted
            }
        };

        tx.commit().await?;
        Ok(Some(removal))
    }

    /// Number of non-archived offers in a tenant
    pub async fn count(pool: &PgPool, tenant_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM offers WHERE tenant_id = $1 AND status <> 'archived'",
        )
        .bind(tenant_id)
        .fetch_one(pool)
        .await
    }
}
