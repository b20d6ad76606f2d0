/// Branding endpoints
///
/// - `GET /v1/branding` (any member)
/// - `PUT /v1/branding` (admin+)
/// - `GET /public/branding?domain=|tenant=` (public, for the affiliate portal)

use super::parse_http_url;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use trackdesk_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        branding::{is_hex_color, Branding, UpsertBranding},
        tenant::Tenant,
    },
};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_color(color: &str) -> Result<(), ValidationError> {
    if is_hex_color(color) {
        Ok(())
    } else {
        let mut error = ValidationError::new("color");
        error.message = Some("Must be a #RRGGBB color".into());
        Err(error)
    }
}

/// Bare host name: labels of letters, digits and hyphens
fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    let domain = domain.trim();
    let ok = domain.len() <= 253
        && domain.contains('.')
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if ok {
        Ok(())
    } else {
        let mut error = ValidationError::new("domain");
        error.message = Some("Must be a host name such as partners.example.com".into());
        Err(error)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBrandingRequest {
    #[validate(length(min = 1, max = 200, message = "Company name must be 1-200 characters"))]
    pub company_name: String,

    pub logo_url: Option<String>,
    pub favicon_url: Option<String>,

    #[validate(custom(function = "validate_color"))]
    pub primary_color: Option<String>,

    #[validate(custom(function = "validate_color"))]
    pub secondary_color: Option<String>,

    #[validate(custom(function = "validate_domain"))]
    pub custom_domain: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub support_email: Option<String>,

    #[validate(length(max = 20000))]
    pub custom_css: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicBrandingQuery {
    pub domain: Option<String>,

    /// Tenant slug
    pub tenant: Option<String>,
}

async fn branding_or_default(state: &AppState, tenant: &Tenant) -> ApiResult<Branding> {
    Ok(Branding::find(&state.db, tenant.id)
        .await?
        .unwrap_or_else(|| Branding::default_for(tenant.id, &tenant.name)))
}

async fn tenant(state: &AppState, tenant_id: Uuid) -> ApiResult<Tenant> {
    Tenant::find_by_id(&state.db, tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))
}

pub async fn get_branding(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Branding>> {
    require_permission(&auth, ResourcePermission::Read, "branding:read")?;

    let tenant = tenant(&state, auth.tenant_id).await?;
    Ok(Json(branding_or_default(&state, &tenant).await?))
}

/// Replace branding
///
/// # Errors
///
/// - `409 Conflict`: Custom domain is used by another tenant
pub async fn update_branding(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateBrandingRequest>,
) -> ApiResult<Json<Branding>> {
    require_permission(&auth, ResourcePermission::Manage, "branding:write")?;
    req.validate()?;

    for (field, url) in [("logo_url", &req.logo_url), ("favicon_url", &req.favicon_url)] {
        if let Some(url) = url {
            parse_http_url(field, url)?;
        }
    }

    let branding = Branding::upsert(
        &state.db,
        auth.tenant_id,
        UpsertBranding {
            company_name: req.company_name,
            logo_url: req.logo_url,
            favicon_url: req.favicon_url,
            primary_color: req.primary_color,
            secondary_color: req.secondary_color,
            custom_domain: req.custom_domain.filter(|d| !d.trim().is_empty()),
            support_email: req.support_email,
            custom_css: req.custom_css,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, "Updated branding");

    Ok(Json(branding))
}

/// Portal branding by custom domain, falling back to the tenant slug
pub async fn public_branding(
    State(state): State<AppState>,
    Query(query): Query<PublicBrandingQuery>,
) -> ApiResult<Json<Branding>> {
    if let Some(domain) = query.domain.as_deref().filter(|d| !d.trim().is_empty()) {
        if let Some(branding) = Branding::find_by_domain(&state.db, domain).await? {
            return Ok(Json(branding));
        }

        // A tenant slug is accepted as the domain's first label
        let slug = domain.trim().split('.').next().unwrap_or_default();
        if let Some(tenant) = Tenant::find_by_slug(&state.db, slug).await? {
            return Ok(Json(branding_or_default(&state, &tenant).await?));
        }

        return Err(ApiError::NotFound("No branding for this domain".to_string()));
    }

    let slug = query
        .tenant
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::invalid("domain", "domain or tenant is required"))?;

    let tenant = Tenant::find_by_slug(&state.db, slug)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))?;

    Ok(Json(branding_or_default(&state, &tenant).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("partners.example.com").is_ok());
        assert!(validate_domain("a-b.io").is_ok());
        assert!(validate_domain("localhost").is_err());
        assert!(validate_domain("https://x.com").is_err());
        assert!(validate_domain("-bad.example.com").is_err());
    }

    #[test]
    fn test_branding_request_rejects_bad_color() {
        let req: UpdateBrandingRequest = serde_json::from_value(serde_json::json!({
            "company_name": "Acme",
            "primary_color": "blue"
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: UpdateBrandingRequest = serde_json::from_value(serde_json::json!({
            "company_name": "Acme",
            "primary_color": "#0a0B0c"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
    }
}
