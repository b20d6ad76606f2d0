/// Tenant model and database operations
///
/// A tenant is one affiliate program operator (a brand running its own
/// partner program). Every other row in the schema hangs off a tenant and
/// every query in the API is scoped by `tenant_id`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tenants (
///     id UUID PRIMARY KEY,
///     name TEXT NOT NULL,
///     slug TEXT NOT NULL UNIQUE,
///     plan tenant_plan NOT NULL DEFAULT 'trial',
///     settings JSONB NOT NULL DEFAULT '{}'::jsonb,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::models::tenant::{Tenant, CreateTenant, TenantPlan};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let tenant = Tenant::create(&pool, CreateTenant {
///     name: "Acme Outdoors".to_string(),
///     slug: None,
///     plan: TenantPlan::Trial,
/// }).await?;
///
/// assert_eq!(tenant.slug, "acme-outdoors");
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Billing plan
///
/// Plans drive rate limits and resource quotas (see `crate::quota`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tenant_plan", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    /// Free trial with small quotas
    Trial,

    /// Small programs
    Starter,

    /// Growing programs
    Pro,

    /// Unlimited resources
    Enterprise,
}

impl TenantPlan {
    /// Converts plan to its wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantPlan::Trial => "trial",
            TenantPlan::Starter => "starter",
            TenantPlan::Pro => "pro",
            TenantPlan::Enterprise => "enterprise",
        }
    }
}

/// Tenant model representing an affiliate program operator
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    /// Unique tenant ID
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// URL-safe unique identifier, used by public integration endpoints
    pub slug: String,

    /// Current billing plan
    pub plan: TenantPlan,

    /// Free-form program settings (JSONB)
    pub settings: JsonValue,

    /// When the tenant was created
    pub created_at: DateTime<Utc>,

    /// When the tenant was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    /// Display name
    pub name: String,

    /// Explicit slug; derived from `name` when absent
    pub slug: Option<String>,

    /// Initial billing plan
    #[serde(default = "default_plan")]
    pub plan: TenantPlan,
}

fn default_plan() -> TenantPlan {
    TenantPlan::Trial
}

/// Input for updating an existing tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTenant {
    /// New name
    pub name: Option<String>,

    /// New plan
    pub plan: Option<TenantPlan>,

    /// Settings to merge into the existing settings object
    pub settings: Option<JsonValue>,
}

const TENANT_COLUMNS: &str = "id, name, slug, plan, settings, created_at, updated_at";

/// Turns a display name into a lowercase, dash-separated slug
///
/// Runs of non-alphanumeric characters collapse into one dash and the result
/// never starts or ends with a dash. An empty result becomes `"program"`.
///
/// ```
/// use trackdesk_shared::models::tenant::slugify;
///
/// assert_eq!(slugify("Acme Outdoors, Inc."), "acme-outdoors-inc");
/// assert_eq!(slugify("!!!"), "program");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "program".to_string()
    } else {
        slug.truncate(48);
        slug.trim_end_matches('-').to_string()
    }
}

impl Tenant {
    /// Creates a new tenant
    ///
    /// When no slug is supplied one is derived from the name. A numeric suffix
    /// is appended until the slug is unique.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or an explicit slug
    /// is already taken.
    pub async fn create(pool: &PgPool, data: CreateTenant) -> Result<Self, sqlx::Error> {
        let slug = match data.slug {
            Some(slug) => slug,
            None => Self::available_slug(pool, &slugify(&data.name)).await?,
        };

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            INSERT INTO tenants (id, name, slug, plan)
            VALUES ($1, $2, $3, $4)
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(&slug)
        .bind(data.plan)
        .fetch_one(pool)
        .await?;

        Ok(tenant)
    }

    /// Finds the first free slug starting from `base` (`base`, `base-2`, `base-3`, ...)
    async fn available_slug(pool: &PgPool, base: &str) -> Result<String, sqlx::Error> {
        let taken: Vec<String> = sqlx::query_scalar(
            "SELECT slug FROM tenants WHERE slug = $1 OR slug LIKE $1 || '-%'",
        )
        .bind(base)
        .fetch_all(pool)
        .await?;

        if !taken.iter().any(|s| s == base) {
            return Ok(base.to_string());
        }

        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Finds a tenant by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Finds a tenant by slug
    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(pool)
        .await
    }

    /// Updates a tenant
    ///
    /// Only fields that are `Some` are written. `settings` is merged into the
    /// existing object with the JSONB `||` operator rather than replacing it.
    ///
    /// # Returns
    ///
    /// The updated tenant, or `None` if it doesn't exist
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateTenant,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE tenants SET updated_at = NOW()");
        let mut bind_count = 1;

        if data.name.is_some() {
            bind_count += 1;
            query.push_str(&format!(", name = ${}", bind_count));
        }
        if data.plan.is_some() {
            bind_count += 1;
            query.push_str(&format!(", plan = ${}", bind_count));
        }
        if data.settings.is_some() {
            bind_count += 1;
            query.push_str(&format!(", settings = settings || ${}", bind_count));
        }

        query.push_str(&format!(" WHERE id = $1 RETURNING {TENANT_COLUMNS}"));

        let mut q = sqlx::query_as::<_, Tenant>(&query).bind(id);

        if let Some(name) = data.name {
            q = q.bind(name);
        }
        if let Some(plan) = data.plan {
            q = q.bind(plan);
        }
        if let Some(settings) = data.settings {
            q = q.bind(settings);
        }

        q.fetch_optional(pool).await
    }

    /// Deletes a tenant and, through cascades, everything it owns
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
