/// Tracking link model and database operations
///
/// A tracking link is the URL an affiliate shares: `/t/{code}`. It belongs to
/// one affiliate and targets exactly one offer or one smart link (enforced by
/// the `tracking_links_single_target` check constraint).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Page, Pagination};
use crate::auth::api_key::generate_random_string;

/// Length of link codes
pub const LINK_CODE_LENGTH: usize = 8;

const MAX_CODE_ATTEMPTS: usize = 5;

/// Tracking link
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackingLink {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub affiliate_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub smart_link_id: Option<Uuid>,

    /// Globally unique base62 code
    pub code: String,

    /// Overrides the offer's landing URL
    pub destination_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a tracking link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTrackingLink {
    pub tenant_id: Uuid,
    pub affiliate_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub smart_link_id: Option<Uuid>,
    pub destination_url: Option<String>,
}

const LINK_COLUMNS: &str =
    "id, tenant_id, affiliate_id, offer_id, smart_link_id, code, destination_url, created_at";

fn is_code_collision(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.constraint() == Some("tracking_links_code_key"))
}

impl TrackingLink {
    /// Creates a link with a fresh random code
    ///
    /// A code collision is retried with a new code a few times before the
    /// error is returned.
    pub async fn create(pool: &PgPool, data: CreateTrackingLink) -> Result<Self, sqlx::Error> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = sqlx::query_as::<_, TrackingLink>(&format!(
                r#"
                INSERT INTO tracking_links (id, tenant_id, affiliate_id, offer_id, smart_link_id, code, destination_url)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {LINK_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(data.tenant_id)
            .bind(data.affiliate_id)
            .bind(data.offer_id)
            .bind(data.smart_link_id)
            .bind(generate_random_string(LINK_CODE_LENGTH))
            .bind(&data.destination_url)
            .fetch_one(pool)
            .await;

            match result {
                Err(e) if is_code_collision(&e) && attempt < MAX_CODE_ATTEMPTS => {
                    tracing::warn!(attempt, "Tracking link code collision, retrying");
                }
                other => return other,
            }
        }
    }

    /// Looks up a link by code across all tenants (public click endpoint)
    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TrackingLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracking_links WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TrackingLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracking_links WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Lists links, optionally for one affiliate, newest first
    pub async fn list(
        pool: &PgPool,
        tenant_id: Uuid,
        affiliate_id: Option<Uuid>,
        pagination: Pagination,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tracking_links \
             WHERE tenant_id = $1 AND ($2::uuid IS NULL OR affiliate_id = $2)",
        )
        .bind(tenant_id)
        .bind(affiliate_id)
        .fetch_one(pool)
        .await?;

        let data = sqlx::query_as::<_, TrackingLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracking_links \
             WHERE tenant_id = $1 AND ($2::uuid IS NULL OR affiliate_id = $2) \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        ))
        .bind(tenant_id)
        .bind(affiliate_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(data, pagination, total))
    }

    /// Replaces the destination override (`None` clears it)
    pub async fn set_destination(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        destination_url: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TrackingLink>(&format!(
            "UPDATE tracking_links SET destination_url = $3 \
             WHERE id = $1 AND tenant_id = $2 RETURNING {LINK_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(destination_url)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tracking_links WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Public URL for this link
    pub fn url(&self, tracking_base_url: &str) -> String {
        format!("{}/t/{}", tracking_base_url.trim_end_matches('/'), self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let link = TrackingLink {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            affiliate_id: Uuid::new_v4(),
            offer_id: Some(Uuid::new_v4()),
            smart_link_id: None,
            code: "Ab3dE6gH".to_string(),
            destination_url: None,
            created_at: Utc::now(),
        };

        assert_eq!(link.url("https://trk.example.com/"), "https://trk.example.com/t/Ab3dE6gH");
        assert_eq!(link.url("http://localhost:8080"), "http://localhost:8080/t/Ab3dE6gH");
    }
}
