/// Coupon model and database operations
///
/// Coupon codes attribute sales to an affiliate without a click, e.g. a
/// podcast host reading out `TRAILS20`. Codes are unique per tenant, ignoring case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Coupon
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub affiliate_id: Uuid,

    /// Offer credited when the conversion names none
    pub offer_id: Option<Uuid>,

    pub code: String,
    pub active: bool,
    pub usage_count: i32,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a coupon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCoupon {
    pub tenant_id: Uuid,
    pub affiliate_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub code: String,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCoupon {
    pub offer_id: Option<Uuid>,
    pub active: Option<bool>,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

const COUPON_COLUMNS: &str =
    "id, tenant_id, affiliate_id, offer_id, code, active, usage_count, max_uses, expires_at, created_at";

impl Coupon {
    /// Whether the coupon can be redeemed at `now`
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.expires_at.map_or(true, |expires_at| expires_at > now)
            && self.max_uses.map_or(true, |max| self.usage_count < max)
    }

    /// # Errors
    ///
    /// A unique violation on `coupons_tenant_code_key` for a duplicate code.
    pub async fn create(pool: &PgPool, data: CreateCoupon) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Coupon>(&format!(
            r#"
            INSERT INTO coupons (id, tenant_id, affiliate_id, offer_id, code, max_uses, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.affiliate_id)
        .bind(data.offer_id)
        .bind(data.code.trim())
        .bind(data.max_uses)
        .bind(data.expires_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Finds a coupon by code, ignoring case
    pub async fn find_by_code(
        pool: &PgPool,
        tenant_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE tenant_id = $1 AND lower(code) = lower($2)"
        ))
        .bind(tenant_id)
        .bind(code.trim())
        .fetch_optional(pool)
        .await
    }

    /// Lists coupons, optionally for one affiliate
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        affiliate_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons \
             WHERE tenant_id = $1 AND ($2::uuid IS NULL OR affiliate_id = $2) \
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .bind(affiliate_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateCoupon,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Coupon>(&format!(
            r#"
            UPDATE coupons SET
                offer_id = COALESCE($3, offer_id),
                active = COALESCE($4, active),
                max_uses = COALESCE($5, max_uses),
                expires_at = COALESCE($6, expires_at)
            WHERE id = $1 AND tenant_id = $2
            RETURNING {COUPON_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(data.offer_id)
        .bind(data.active)
        .bind(data.max_uses)
        .bind(data.expires_at)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM coupons WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically records one use if the coupon is still redeemable
    ///
    /// # Returns
    ///
    /// `false` if the coupon became inactive, expired or exhausted meanwhile
    pub async fn redeem<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET usage_count = usage_count + 1
            WHERE id = $1
              AND active
              AND (expires_at IS NULL OR expires_at > NOW())
              AND (max_uses IS NULL OR usage_count < max_uses)
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon() -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            affiliate_id: Uuid::new_v4(),
            offer_id: None,
            code: "TRAILS20".to_string(),
            active: true,
            usage_count: 4,
            max_uses: Some(5),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_redeemable() {
        let now = Utc::now();
        assert!(coupon().is_redeemable(now));

        let exhausted = Coupon { usage_count: 5, ..coupon() };
        assert!(!exhausted.is_redeemable(now));

        let inactive = Coupon { active: false, ..coupon() };
        assert!(!inactive.is_redeemable(now));

        let expired = Coupon { expires_at: Some(now - Duration::minutes(1)), ..coupon() };
        assert!(!expired.is_redeemable(now));

        let unlimited = Coupon { max_uses: None, usage_count: 10_000, ..coupon() };
        assert!(unlimited.is_redeemable(now));
    }
}
