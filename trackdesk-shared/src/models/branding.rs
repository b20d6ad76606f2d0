/// White-label branding settings
///
/// One row per tenant. Tenants without a row get [`Branding::default_for`]
/// built from the tenant name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

pub const DEFAULT_PRIMARY_COLOR: &str = "#2563EB";
pub const DEFAULT_SECONDARY_COLOR: &str = "#1E293B";

/// Branding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Branding {
    pub tenant_id: Uuid,
    pub company_name: String,
    pub logo_url: Option<String>,
    pub favicon_url: Option<String>,

    /// `#RRGGBB`
    pub primary_color: String,

    /// `#RRGGBB`
    pub secondary_color: String,

    /// Portal hostname, unique across tenants
    pub custom_domain: Option<String>,

    pub support_email: Option<String>,
    pub custom_css: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Full replacement of a tenant's branding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertBranding {
    pub company_name: String,
    pub logo_url: Option<String>,
    pub favicon_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub custom_domain: Option<String>,
    pub support_email: Option<String>,
    pub custom_css: Option<String>,
}

const BRANDING_COLUMNS: &str = "tenant_id, company_name, logo_url, favicon_url, primary_color, \
     secondary_color, custom_domain, support_email, custom_css, updated_at";

/// Whether `color` is `#RRGGBB`
pub fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Branding {
    /// Branding used before a tenant saves its own
    pub fn default_for(tenant_id: Uuid, company_name: &str) -> Self {
        Self {
            tenant_id,
            company_name: company_name.to_string(),
            logo_url: None,
            favicon_url: None,
            primary_color: DEFAULT_PRIMARY_COLOR.to_string(),
            secondary_color: DEFAULT_SECONDARY_COLOR.to_string(),
            custom_domain: None,
            support_email: None,
            custom_css: None,
            updated_at: Utc::now(),
        }
    }

    pub async fn find(pool: &PgPool, tenant_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Branding>(&format!(
            "SELECT {BRANDING_COLUMNS} FROM branding_settings WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Finds branding by custom domain, ignoring case
    pub async fn find_by_domain(pool: &PgPool, domain: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Branding>(&format!(
            "SELECT {BRANDING_COLUMNS} FROM branding_settings WHERE lower(custom_domain) = lower($1)"
        ))
        .bind(domain.trim())
        .fetch_optional(pool)
        .await
    }

    /// Inserts or replaces a tenant's branding
    ///
    /// # Errors
    ///
    /// A unique violation on `branding_custom_domain_key` when another tenant
    /// already uses the domain.
    pub async fn upsert(
        pool: &PgPool,
        tenant_id: Uuid,
        data: UpsertBranding,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Branding>(&format!(
            r#"
            INSERT INTO branding_settings (
                tenant_id, company_name, logo_url, favicon_url, primary_color,
                secondary_color, custom_domain, support_email, custom_css
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_id) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                logo_url = EXCLUDED.logo_url,
                favicon_url = EXCLUDED.favicon_url,
                primary_color = EXCLUDED.primary_color,
                secondary_color = EXCLUDED.secondary_color,
                custom_domain = EXCLUDED.custom_domain,
                support_email = EXCLUDED.support_email,
                custom_css = EXCLUDED.custom_css,
                updated_at = NOW()
            RETURNING {BRANDING_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(data.company_name.trim())
        .bind(&data.logo_url)
        .bind(&data.favicon_url)
        .bind(data.primary_color.as_deref().unwrap_or(DEFAULT_PRIMARY_COLOR).to_ascii_uppercase())
        .bind(data.secondary_color.as_deref().unwrap_or(DEFAULT_SECONDARY_COLOR).to_ascii_uppercase())
        .bind(data.custom_domain.as_deref().map(|d| d.trim().to_ascii_lowercase()))
        .bind(&data.support_email)
        .bind(&data.custom_css)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hex_color() {
        assert!(is_hex_color("#2563EB"));
        assert!(is_hex_color("#abcdef"));
        assert!(!is_hex_color("2563EB"));
        assert!(!is_hex_color("#2563E"));
        assert!(!is_hex_color("#GGGGGG"));
        assert!(!is_hex_color("#2563EBFF"));
    }

    #[test]
    fn test_default_for() {
        let tenant_id = Uuid::new_v4();
        let branding = Branding::default_for(tenant_id, "Acme Outdoors");

        assert_eq!(branding.tenant_id, tenant_id);
        assert_eq!(branding.company_name, "Acme Outdoors");
        assert_eq!(branding.primary_color, DEFAULT_PRIMARY_COLOR);
        assert!(branding.custom_domain.is_none());
    }
}
