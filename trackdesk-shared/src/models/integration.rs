/// Third-party integration secrets
///
/// Stores the signing secret used to verify inbound Stripe and Shopify
/// webhooks, one row per tenant and provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "integration_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IntegrationProvider {
    Stripe,
    Shopify,
}

impl IntegrationProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationProvider::Stripe => "stripe",
            IntegrationProvider::Shopify => "shopify",
        }
    }
}

impl std::str::FromStr for IntegrationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(IntegrationProvider::Stripe),
            "shopify" => Ok(IntegrationProvider::Shopify),
            other => Err(format!("Unknown integration provider: {}", other)),
        }
    }
}

/// Integration row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Integration {
    pub tenant_id: Uuid,
    pub provider: IntegrationProvider,

    #[serde(skip_serializing)]
    pub secret: String,

    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing view with the secret masked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSummary {
    pub provider: IntegrationProvider,
    pub active: bool,
    pub secret_hint: String,
    pub updated_at: DateTime<Utc>,
}

/// Masks all but the last four characters
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }

    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

const INTEGRATION_COLUMNS: &str = "tenant_id, provider, secret, active, created_at, updated_at";

impl Integration {
    pub fn summary(&self) -> IntegrationSummary {
        IntegrationSummary {
            provider: self.provider,
            active: self.active,
            secret_hint: mask_secret(&self.secret),
            updated_at: self.updated_at,
        }
    }

    pub async fn upsert(
        pool: &PgPool,
        tenant_id: Uuid,
        provider: IntegrationProvider,
        secret: &str,
        active: bool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Integration>(&format!(
            r#"
            INSERT INTO integrations (tenant_id, provider, secret, active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, provider) DO UPDATE SET
                secret = EXCLUDED.secret,
                active = EXCLUDED.active,
                updated_at = NOW()
            RETURNING {INTEGRATION_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(provider)
        .bind(secret)
        .bind(active)
        .fetch_one(pool)
        .await
    }

    /// Active integration for a provider
    pub async fn find_active(
        pool: &PgPool,
        tenant_id: Uuid,
        provider: IntegrationProvider,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Integration>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations \
             WHERE tenant_id = $1 AND provider = $2 AND active"
        ))
        .bind(tenant_id)
        .bind(provider)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Integration>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE tenant_id = $1 ORDER BY provider"
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }
}
