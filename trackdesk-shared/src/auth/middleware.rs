/// Request authentication
///
/// Resolves the credentials on a request into an [`AuthContext`]. Two
/// credential types are accepted:
///
/// - `Authorization: Bearer <jwt>` for dashboard users. The membership is
///   re-read on every request so role changes and removals apply at once.
/// - `X-Api-Key: tdk_...` for server-to-server callers. Keys act with the
///   `admin` role, narrowed by their scopes.
///
/// A bearer token takes precedence when both headers are present.
///
/// # Example
///
/// ```no_run
/// use axum::http::HeaderMap;
/// use trackdesk_shared::auth::middleware::authenticate;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, headers: HeaderMap) {
/// match authenticate(&pool, "jwt-secret", &headers).await {
///     Ok(auth) => println!("tenant {}", auth.tenant_id),
///     Err(e) => println!("rejected: {}", e),
/// }
/// # }
/// ```

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::api_key::{has_scope, validate_api_key_format};
use super::jwt::{validate_access_token, JwtError};
use crate::models::affiliate::Affiliate;
use crate::models::api_key::ApiKey;
use crate::models::membership::{Membership, MembershipRole};

/// Header carrying an API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// How the request was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Dashboard session token
    Jwt,

    /// Tenant API key
    ApiKey,
}

/// Authenticated caller, inserted into request extensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// User ID, `None` for API keys
    pub user_id: Option<Uuid>,

    /// Tenant every query is scoped to
    pub tenant_id: Uuid,

    /// Effective role
    pub role: MembershipRole,

    /// Authentication method
    pub method: AuthMethod,

    /// API key scopes, `None` for JWT sessions
    pub scopes: Option<Vec<String>>,

    /// API key ID, when authenticated by key
    pub api_key_id: Option<Uuid>,

    /// Affiliate record linked to an `affiliate`-role user
    pub affiliate_id: Option<Uuid>,
}

impl AuthContext {
    /// Context for a dashboard user
    pub fn from_jwt(user_id: Uuid, tenant_id: Uuid, role: MembershipRole) -> Self {
        Self {
            user_id: Some(user_id),
            tenant_id,
            role,
            method: AuthMethod::Jwt,
            scopes: None,
            api_key_id: None,
            affiliate_id: None,
        }
    }

    /// Context for an API key, acting as `admin`
    pub fn from_api_key(api_key: &ApiKey) -> Self {
        Self {
            user_id: None,
            tenant_id: api_key.tenant_id,
            role: MembershipRole::Admin,
            method: AuthMethod::ApiKey,
            scopes: Some(api_key.scopes.clone()),
            api_key_id: Some(api_key.id),
            affiliate_id: None,
        }
    }

    /// Whether the caller may use `required_scope`
    ///
    /// JWT sessions are limited by role only, so they hold every scope.
    pub fn has_scope(&self, required_scope: &str) -> bool {
        match (&self.method, &self.scopes) {
            (AuthMethod::Jwt, _) => true,
            (AuthMethod::ApiKey, Some(scopes)) => has_scope(scopes, required_scope),
            (AuthMethod::ApiKey, None) => false,
        }
    }

    /// Whether the caller is confined to one affiliate's records
    pub fn is_affiliate(&self) -> bool {
        self.role.is_affiliate()
    }
}

/// Authentication failures
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Neither header present
    #[error("Missing credentials")]
    MissingCredentials,

    /// Header present but unusable
    #[error("{0}")]
    InvalidFormat(String),

    /// Bad, expired or wrong-type token
    #[error("{0}")]
    InvalidToken(String),

    /// Unknown, revoked or expired key
    #[error("{0}")]
    InvalidApiKey(String),

    /// Valid token for a tenant the user no longer belongs to
    #[error("Not a member of this tenant")]
    NotMember,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingCredentials
            | AuthError::InvalidFormat(_)
            | AuthError::InvalidToken(_)
            | AuthError::InvalidApiKey(_) => StatusCode::UNAUTHORIZED,
            AuthError::NotMember => StatusCode::FORBIDDEN,
            AuthError::DatabaseError(_) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        };

        (status, self.to_string()).into_response()
    }
}

/// Authenticates a request from its headers
pub async fn authenticate(
    pool: &PgPool,
    jwt_secret: &str,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| AuthError::InvalidFormat("Malformed Authorization header".to_string()))?;

        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?;

        return authenticate_jwt(pool, jwt_secret, token.trim()).await;
    }

    if let Some(value) = headers.get(API_KEY_HEADER) {
        let key = value
            .to_str()
            .map_err(|_| AuthError::InvalidFormat("Malformed X-Api-Key header".to_string()))?;

        return authenticate_api_key(pool, key.trim()).await;
    }

    Err(AuthError::MissingCredentials)
}

async fn authenticate_jwt(
    pool: &PgPool,
    jwt_secret: &str,
    token: &str,
) -> Result<AuthContext, AuthError> {
    let claims = validate_access_token(token, jwt_secret).map_err(|e| match e {
        JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
        JwtError::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
        _ => AuthError::InvalidToken("Invalid token".to_string()),
    })?;

    let role = Membership::get_role(pool, claims.tenant_id, claims.sub)
        .await?
        .ok_or(AuthError::NotMember)?;

    let mut context = AuthContext::from_jwt(claims.sub, claims.tenant_id, role);

    if role.is_affiliate() {
        context.affiliate_id = Affiliate::find_id_by_user(pool, claims.tenant_id, claims.sub).await?;
    }

    Ok(context)
}

async fn authenticate_api_key(pool: &PgPool, key: &str) -> Result<AuthContext, AuthError> {
    if !validate_api_key_format(key) {
        return Err(AuthError::InvalidApiKey("Invalid API key format".to_string()));
    }

    let api_key = ApiKey::validate(pool, key)
        .await?
        .ok_or_else(|| AuthError::InvalidApiKey("Invalid, revoked or expired API key".to_string()))?;

    tracing::debug!(api_key_id = %api_key.id, tenant_id = %api_key.tenant_id, "API key authenticated");

    Ok(AuthContext::from_api_key(&api_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn api_key(scopes: &[&str]) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "ci".to_string(),
            key_prefix: "tdk_abcdef".to_string(),
            key_hash: String::new(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            revoked: false,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_auth_context_from_jwt() {
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let context = AuthContext::from_jwt(user_id, tenant_id, MembershipRole::Manager);

        assert_eq!(context.user_id, Some(user_id));
        assert_eq!(context.tenant_id, tenant_id);
        assert_eq!(context.method, AuthMethod::Jwt);
        assert!(context.scopes.is_none());
        assert!(context.has_scope("payouts:write"));
    }

    #[test]
    fn test_auth_context_from_api_key() {
        let key = api_key(&["conversions:*"]);
        let context = AuthContext::from_api_key(&key);

        assert_eq!(context.role, MembershipRole::Admin);
        assert_eq!(context.api_key_id, Some(key.id));
        assert!(context.user_id.is_none());
        assert!(context.has_scope("conversions:write"));
        assert!(!context.has_scope("affiliates:read"));
    }

    #[test]
    fn test_auth_error_into_response() {
        assert_eq!(
            AuthError::MissingCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidFormat("x".to_string()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::NotMember.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::DatabaseError(sqlx::Error::PoolTimedOut).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        let result = authenticate(&pool, "secret", &HeaderMap::new()).await;
        assert!(matches!(result, Err(AuthError::MissingCredentials)));
    }

    #[tokio::test]
    async fn test_malformed_api_key_rejected_before_lookup() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "not-a-key".parse().unwrap());

        let result = authenticate(&pool, "secret", &headers).await;
        assert!(matches!(result, Err(AuthError::InvalidApiKey(_))));
    }

    #[tokio::test]
    async fn test_bad_bearer_token_rejected_before_lookup() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer garbage".parse().unwrap());

        let result = authenticate(&pool, "secret", &headers).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }
}
