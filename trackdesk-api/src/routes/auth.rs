/// Authentication endpoints
///
/// This module provides user authentication endpoints:
/// - Registration (creates the user, a tenant and an owner membership)
/// - Login
/// - Token refresh
/// - Current session
///
/// # Endpoints
///
/// - `POST /v1/auth/register` - Register a new program
/// - `POST /v1/auth/login` - Login and get tokens
/// - `POST /v1/auth/refresh` - Refresh access token
/// - `GET /v1/auth/me` - Current user, tenant and role

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use trackdesk_shared::{
    auth::{jwt, middleware::AuthContext, password},
    models::{
        membership::{CreateMembership, Membership, MembershipRole},
        tenant::{CreateTenant, Tenant, TenantPlan},
        user::{CreateUser, User},
    },
};
use uuid::Uuid;
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Password (will be validated for strength)
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    /// Name of the affiliate program; the tenant slug is derived from it
    #[validate(length(min = 1, max = 100, message = "Company name must be 1-100 characters"))]
    pub company_name: String,
}

/// Token pair returned by register and login
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: MembershipRole,

    /// Access token (24h)
    pub access_token: String,

    /// Refresh token (30d)
    pub refresh_token: String,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,

    /// Tenant to sign in to; defaults to the user's first membership
    pub tenant_id: Option<Uuid>,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Refresh token response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// New access token (24h)
    pub access_token: String,
}

/// Current session
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: Option<User>,
    pub tenant: Tenant,
    pub role: MembershipRole,
    pub method: trackdesk_shared::auth::middleware::AuthMethod,

    /// Set for affiliate-role users linked to an affiliate record
    pub affiliate_id: Option<Uuid>,
}

/// Register a new program
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/register
/// Content-Type: application/json
///
/// {
///   "email": "owner@example.com",
///   "password": "SecureP@ss123",
///   "name": "Dana",
///   "company_name": "Acme Outdoor"
/// }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: Email already exists
/// - `422 Unprocessable Entity`: Validation failed or password too weak
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    req.validate()?;
    password::validate_password_strength(&req.password)?;

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            email: req.email.trim().to_string(),
            password_hash,
            name: req.name.clone(),
        },
    )
    .await?;

    let tenant = match Tenant::create(
        &state.db,
        CreateTenant {
            name: req.company_name.trim().to_string(),
            slug: None,
            plan: TenantPlan::Trial,
        },
    )
    .await
    {
        Ok(tenant) => tenant,
        Err(e) => {
            // Leave no orphaned user behind so the email can register again
            if let Err(cleanup) = User::delete(&state.db, user.id).await {
                tracing::error!(user_id = %user.id, error = %cleanup, "Failed to remove user after tenant error");
            }
            return Err(e.into());
        }
    };

    Membership::create(
        &state.db,
        CreateMembership {
            tenant_id: tenant.id,
            user_id: user.id,
            role: MembershipRole::Owner,
        },
    )
    .await?;

    let (access_token, refresh_token) =
        jwt::issue_token_pair(user.id, tenant.id, MembershipRole::Owner, state.jwt_secret())?;

    tracing::info!(user_id = %user.id, tenant_id = %tenant.id, slug = %tenant.slug, "Registered program");

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            user_id: user.id,
            tenant_id: tenant.id,
            role: MembershipRole::Owner,
            access_token,
            refresh_token,
        }),
    ))
}

/// Login endpoint
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/login
/// Content-Type: application/json
///
/// {
///   "email": "owner@example.com",
///   "password": "SecureP@ss123",
///   "tenant_id": "optional-uuid"
/// }
/// ```
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid credentials
/// - `403 Forbidden`: Not a member of the requested tenant, or of any tenant
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    req.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = User::find_by_email(&state.db, req.email.trim())
        .await?
        .ok_or_else(invalid)?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::debug!(user_id = %user.id, "Login with wrong password");
        return Err(invalid());
    }

    let membership = match req.tenant_id {
        Some(tenant_id) => Membership::find(&state.db, tenant_id, user.id).await?,
        None => Membership::list_by_user(&state.db, user.id).await?.into_iter().next(),
    }
    .ok_or_else(|| ApiError::Forbidden("Not a member of this tenant".to_string()))?;

    User::update_last_login(&state.db, user.id).await?;

    let (access_token, refresh_token) =
        jwt::issue_token_pair(user.id, membership.tenant_id, membership.role, state.jwt_secret())?;

    Ok(Json(TokenResponse {
        user_id: user.id,
        tenant_id: membership.tenant_id,
        role: membership.role,
        access_token,
        refresh_token,
    }))
}

/// Token refresh endpoint
///
/// The role is re-read from the membership so a demoted user does not keep
/// the old role for another 24 hours.
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid or expired refresh token, or membership gone
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let claims = jwt::validate_refresh_token(&req.refresh_token, state.jwt_secret())?;

    let role = Membership::get_role(&state.db, claims.tenant_id, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Membership no longer exists".to_string()))?;

    let access_claims = jwt::Claims::new(claims.sub, claims.tenant_id, role, jwt::TokenType::Access);
    let access_token = jwt::create_token(&access_claims, state.jwt_secret())?;

    Ok(Json(RefreshResponse { access_token }))
}

/// Current session
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MeResponse>> {
    let tenant = Tenant::find_by_id(&state.db, auth.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))?;

    let user = match auth.user_id {
        Some(user_id) => User::find_by_id(&state.db, user_id).await?,
        None => None,
    };

    Ok(Json(MeResponse {
        user,
        tenant,
        role: auth.role,
        method: auth.method,
        affiliate_id: auth.affiliate_id,
    }))
}
