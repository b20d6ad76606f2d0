/// API key management endpoints
///
/// Keys authenticate server-to-server integrations. They act with the
/// `admin` role, narrowed by their scopes. Admin+ only.
///
/// # Endpoints
///
/// - `POST /v1/api-keys` - Create API key
/// - `GET /v1/api-keys` - List API keys
/// - `POST /v1/api-keys/:id/revoke` - Revoke API key

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trackdesk_shared::{
    auth::{
        api_key as api_key_util,
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::api_key::{ApiKey, CreateApiKey},
};
use uuid::Uuid;
use validator::Validate;

/// Resources that scopes may name
pub const SCOPE_RESOURCES: [&str; 14] = [
    "affiliates",
    "offers",
    "links",
    "clicks",
    "conversions",
    "coupons",
    "payouts",
    "rules",
    "webhooks",
    "branding",
    "integrations",
    "api_keys",
    "team",
    "stats",
];

/// Create API key request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    /// Comma-separated scopes (e.g., "conversions:write,affiliates:read")
    ///
    /// - `*`: everything
    /// - `conversions:*`: every action on conversions
    /// - `conversions:read` / `conversions:write`
    #[validate(length(min = 1, message = "At least one scope is required"))]
    pub scopes: String,

    /// Optional expiration date (ISO 8601)
    pub expires_at: Option<DateTime<Utc>>,
}

/// Create API key response
#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: Uuid,

    /// The plaintext API key (ONLY returned on creation)
    pub key: String,

    pub name: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// API key list item (masked)
#[derive(Debug, Serialize)]
pub struct ApiKeyListItem {
    pub id: Uuid,
    pub name: String,

    /// Key prefix (e.g., "tdk_a1B2c3")
    pub key_prefix: String,

    pub scopes: Vec<String>,
    pub revoked: bool,
    pub expired: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ApiKey> for ApiKeyListItem {
    fn from(key: ApiKey) -> Self {
        Self {
            expired: key.is_expired(),
            id: key.id,
            name: key.name,
            key_prefix: key.key_prefix,
            scopes: key.scopes,
            revoked: key.revoked,
            created_at: key.created_at,
            last_used_at: key.last_used_at,
            expires_at: key.expires_at,
        }
    }
}

/// List API keys response
#[derive(Debug, Serialize)]
pub struct ListApiKeysResponse {
    pub keys: Vec<ApiKeyListItem>,
}

/// Revoke API key response
#[derive(Debug, Serialize)]
pub struct RevokeApiKeyResponse {
    pub revoked: bool,
}

/// Checks one scope: `*`, `resource:*` or `resource:read|write`
fn validate_scope(scope: &str) -> Result<(), String> {
    if scope == "*" {
        return Ok(());
    }

    let (resource, action) = scope
        .split_once(':')
        .ok_or_else(|| format!("Scope '{}' must look like resource:action", scope))?;

    if !SCOPE_RESOURCES.contains(&resource) {
        return Err(format!("Unknown scope resource '{}'", resource));
    }
    if !matches!(action, "*" | "read" | "write") {
        return Err(format!("Unknown scope action '{}'", action));
    }

    Ok(())
}

/// Create API key
///
/// Returns the plaintext key ONLY on creation.
///
/// # Endpoint
///
/// ```text
/// POST /v1/api-keys
/// Authorization: Bearer <jwt_token>
/// Content-Type: application/json
///
/// {
///   "name": "Checkout server",
///   "scopes": "conversions:write",
///   "expires_at": "2027-01-01T00:00:00Z"
/// }
/// ```
///
/// # Errors
///
/// - `403 Forbidden`: Below admin
/// - `422 Unprocessable Entity`: Invalid name, scopes or past expiry
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    require_permission(&auth, ResourcePermission::Manage, "api_keys:write")?;
    req.validate()?;

    let scopes = api_key_util::parse_scopes(&req.scopes);
    if scopes.is_empty() {
        return Err(ApiError::invalid("scopes", "At least one scope is required"));
    }
    for scope in &scopes {
        validate_scope(scope).map_err(|message| ApiError::invalid("scopes", message))?;
    }

    if matches!(req.expires_at, Some(at) if at <= Utc::now()) {
        return Err(ApiError::invalid("expires_at", "Expiry must be in the future"));
    }

    let (api_key, plaintext_key) = ApiKey::create(
        &state.db,
        CreateApiKey {
            tenant_id: auth.tenant_id,
            name: req.name.clone(),
            scopes,
            expires_at: req.expires_at,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, api_key_id = %api_key.id, "Created API key");

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            id: api_key.id,
            key: plaintext_key,
            name: api_key.name,
            scopes: api_key.scopes,
            created_at: api_key.created_at,
            expires_at: api_key.expires_at,
        }),
    ))
}

/// List API keys
///
/// Keys are masked (only prefix shown).
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ListApiKeysResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "api_keys:read")?;

    let keys = ApiKey::list_by_tenant(&state.db, auth.tenant_id)
        .await?
        .into_iter()
        .map(ApiKeyListItem::from)
        .collect();

    Ok(Json(ListApiKeysResponse { keys }))
}

/// Revoke API key
///
/// # Errors
///
/// - `404 Not Found`: API key not found in this tenant
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RevokeApiKeyResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "api_keys:write")?;

    if !ApiKey::revoke(&state.db, id, auth.tenant_id).await? {
        return Err(ApiError::NotFound("API key not found".to_string()));
    }

    tracing::info!(tenant_id = %auth.tenant_id, api_key_id = %id, "Revoked API key");

    Ok(Json(RevokeApiKeyResponse { revoked: true }))
}
