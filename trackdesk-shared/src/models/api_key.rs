/// API key model and database operations
///
/// API keys let a tenant's own systems (storefront backends, BI jobs) call
/// the management API without a user session. Only the SHA-256 hash of a key
/// is persisted; the plaintext is returned exactly once, from [`ApiKey::create`].
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::models::api_key::{ApiKey, CreateApiKey};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> Result<(), sqlx::Error> {
/// let (key, plaintext) = ApiKey::create(&pool, CreateApiKey {
///     tenant_id,
///     name: "Storefront".to_string(),
///     scopes: vec!["conversions:write".to_string()],
///     expires_at: None,
/// }).await?;
///
/// // Later, on an incoming request
/// let found = ApiKey::validate(&pool, &plaintext).await?;
/// assert_eq!(found.map(|k| k.id), Some(key.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::api_key::{extract_prefix, generate_api_key, hash_api_key};

/// Stored API key
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique key ID
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    /// Human-readable label
    pub name: String,

    /// First characters of the key, shown in listings
    pub key_prefix: String,

    /// SHA-256 hex digest of the full key
    #[serde(skip_serializing)]
    pub key_hash: String,

    /// Granted scopes (`resource:action`, `resource:*` or `*`)
    pub scopes: Vec<String>,

    /// Whether the key has been revoked
    pub revoked: bool,

    /// When the key was created
    pub created_at: DateTime<Utc>,

    /// Last successful authentication
    pub last_used_at: Option<DateTime<Utc>>,

    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for creating an API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKey {
    /// Owning tenant
    pub tenant_id: Uuid,

    /// Human-readable label
    pub name: String,

    /// Granted scopes
    pub scopes: Vec<String>,

    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

const API_KEY_COLUMNS: &str =
    "id, tenant_id, name, key_prefix, key_hash, scopes, revoked, created_at, last_used_at, expires_at";

impl ApiKey {
    /// Whether `expires_at` has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= Utc::now())
    }

    /// Generates and stores a new key
    ///
    /// # Returns
    ///
    /// The stored row and the plaintext key. The plaintext cannot be recovered later.
    pub async fn create(pool: &PgPool, data: CreateApiKey) -> Result<(Self, String), sqlx::Error> {
        let (plaintext_key, key_hash) = generate_api_key();

        let api_key = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            INSERT INTO api_keys (id, tenant_id, name, key_prefix, key_hash, scopes, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {API_KEY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(&data.name)
        .bind(extract_prefix(&plaintext_key))
        .bind(key_hash)
        .bind(&data.scopes)
        .bind(data.expires_at)
        .fetch_one(pool)
        .await?;

        Ok((api_key, plaintext_key))
    }

    /// Looks up a plaintext key and stamps `last_used_at`
    ///
    /// Revoked and expired keys are not returned.
    pub async fn validate(pool: &PgPool, plaintext_key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            UPDATE api_keys
            SET last_used_at = NOW()
            WHERE key_hash = $1
              AND revoked = FALSE
              AND (expires_at IS NULL OR expires_at > NOW())
            RETURNING {API_KEY_COLUMNS}
            "#
        ))
        .bind(hash_api_key(plaintext_key))
        .fetch_optional(pool)
        .await
    }

    /// Finds a key by its plaintext without touching `last_used_at`, including revoked keys
    pub async fn find_by_plaintext(
        pool: &PgPool,
        plaintext_key: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(hash_api_key(plaintext_key))
        .fetch_optional(pool)
        .await
    }

    /// Revokes a key belonging to `tenant_id`
    pub async fn revoke(pool: &PgPool, id: Uuid, tenant_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE api_keys SET revoked = TRUE WHERE id = $1 AND tenant_id = $2 AND revoked = FALSE",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists a tenant's keys, newest first
    pub async fn list_by_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_at: Option<DateTime<Utc>>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Storefront".to_string(),
            key_prefix: "tdk_abcdef".to_string(),
            key_hash: "0".repeat(64),
            scopes: vec!["conversions:write".to_string()],
            revoked: false,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
        }
    }

    #[test]
    fn test_is_expired() {
        assert!(!key(None).is_expired());
        assert!(!key(Some(Utc::now() + Duration::hours(1))).is_expired());
        assert!(key(Some(Utc::now() - Duration::seconds(1))).is_expired());
    }

    #[test]
    fn test_hash_not_serialized() {
        let json = serde_json::to_value(key(None)).unwrap();
        assert!(json.get("key_hash").is_none());
        assert_eq!(json["key_prefix"], "tdk_abcdef");
    }
}
