/// Role and scope checks
///
/// Handlers call [`require_permission`] once, at the top, with the minimum
/// permission and the API key scope the operation needs. The role comes from
/// the [`AuthContext`] the authentication layer built, so no query is needed.
///
/// | permission | minimum role | typical use                                  |
/// |------------|--------------|----------------------------------------------|
/// | `Read`     | affiliate    | reading one's own profile, links, payouts    |
/// | `Write`    | manager      | affiliates, offers, links, conversions       |
/// | `Manage`   | admin        | payouts, rules, webhooks, branding, team     |
/// | `Own`      | owner        | plan and billing                             |
///
/// # Example
///
/// ```
/// use trackdesk_shared::auth::authorization::{require_permission, ResourcePermission};
/// use trackdesk_shared::auth::middleware::AuthContext;
/// use trackdesk_shared::models::membership::MembershipRole;
/// use uuid::Uuid;
///
/// let auth = AuthContext::from_jwt(Uuid::new_v4(), Uuid::new_v4(), MembershipRole::Manager);
/// assert!(require_permission(&auth, ResourcePermission::Write, "offers:write").is_ok());
/// assert!(require_permission(&auth, ResourcePermission::Manage, "payouts:write").is_err());
/// ```

use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::membership::MembershipRole;

/// Authorization errors
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("Insufficient permissions: requires {required:?}, has {actual:?}")]
    InsufficientRole {
        required: MembershipRole,
        actual: MembershipRole,
    },

    #[error("Missing required scope: {0}")]
    MissingScope(String),

    /// Affiliate-role caller touching another affiliate's record
    #[error("Not authorized to access this resource")]
    NotAuthorized,
}

/// Permission levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePermission {
    Read,
    Write,
    Manage,
    Own,
}

impl ResourcePermission {
    /// Minimum role holding this permission
    pub fn min_role(&self) -> MembershipRole {
        match self {
            ResourcePermission::Read => MembershipRole::Affiliate,
            ResourcePermission::Write => MembershipRole::Manager,
            ResourcePermission::Manage => MembershipRole::Admin,
            ResourcePermission::Own => MembershipRole::Owner,
        }
    }
}

/// Requires at least `required_role`
pub fn require_role(auth: &AuthContext, required_role: MembershipRole) -> Result<(), AuthzError> {
    if !auth.role.has_permission(&required_role) {
        return Err(AuthzError::InsufficientRole {
            required: required_role,
            actual: auth.role,
        });
    }

    Ok(())
}

/// Requires an API key scope (always satisfied for JWT sessions)
pub fn require_scope(auth: &AuthContext, required_scope: &str) -> Result<(), AuthzError> {
    if !auth.has_scope(required_scope) {
        return Err(AuthzError::MissingScope(required_scope.to_string()));
    }

    Ok(())
}

/// Requires both the role for `permission` and `scope`
pub fn require_permission(
    auth: &AuthContext,
    permission: ResourcePermission,
    scope: &str,
) -> Result<(), AuthzError> {
    require_role(auth, permission.min_role())?;
    require_scope(auth, scope)
}

/// Affiliate filter to apply to a query
///
/// Staff see everything (`None`). An affiliate-role caller is pinned to its
/// own affiliate ID; one with no linked affiliate record sees nothing.
pub fn affiliate_scope(auth: &AuthContext) -> Result<Option<Uuid>, AuthzError> {
    if !auth.is_affiliate() {
        return Ok(None);
    }

    auth.affiliate_id.map(Some).ok_or(AuthzError::NotAuthorized)
}

/// Allows staff, or the affiliate that owns `affiliate_id`
pub fn require_affiliate_access(auth: &AuthContext, affiliate_id: Uuid) -> Result<(), AuthzError> {
    match affiliate_scope(auth)? {
        Some(own) if own != affiliate_id => Err(AuthzError::NotAuthorized),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::middleware::AuthMethod;

    fn ctx(role: MembershipRole) -> AuthContext {
        AuthContext::from_jwt(Uuid::new_v4(), Uuid::new_v4(), role)
    }

    #[test]
    fn test_resource_permission_min_role() {
        assert_eq!(ResourcePermission::Read.min_role(), MembershipRole::Affiliate);
        assert_eq!(ResourcePermission::Write.min_role(), MembershipRole::Manager);
        assert_eq!(ResourcePermission::Manage.min_role(), MembershipRole::Admin);
        assert_eq!(ResourcePermission::Own.min_role(), MembershipRole::Owner);
    }

    #[test]
    fn test_require_role() {
        assert!(require_role(&ctx(MembershipRole::Owner), MembershipRole::Admin).is_ok());
        assert!(require_role(&ctx(MembershipRole::Manager), MembershipRole::Manager).is_ok());
        assert!(matches!(
            require_role(&ctx(MembershipRole::Affiliate), MembershipRole::Manager),
            Err(AuthzError::InsufficientRole { .. })
        ));
    }

    #[test]
    fn test_require_scope() {
        let mut auth = ctx(MembershipRole::Admin);
        assert!(require_scope(&auth, "anything").is_ok());

        auth.method = AuthMethod::ApiKey;
        auth.scopes = Some(vec!["conversions:write".to_string()]);

        assert!(require_scope(&auth, "conversions:write").is_ok());
        assert!(matches!(
            require_scope(&auth, "payouts:write"),
            Err(AuthzError::MissingScope(_))
        ));
    }

    #[test]
    fn test_api_key_cannot_act_as_owner() {
        let mut auth = ctx(MembershipRole::Admin);
        auth.method = AuthMethod::ApiKey;
        auth.scopes = Some(vec!["*".to_string()]);

        assert!(require_permission(&auth, ResourcePermission::Manage, "rules:write").is_ok());
        assert!(require_permission(&auth, ResourcePermission::Own, "billing:write").is_err());
    }

    #[test]
    fn test_affiliate_scope() {
        assert_eq!(affiliate_scope(&ctx(MembershipRole::Manager)).unwrap(), None);

        let mut affiliate = ctx(MembershipRole::Affiliate);
        assert!(matches!(affiliate_scope(&affiliate), Err(AuthzError::NotAuthorized)));

        let own = Uuid::new_v4();
        affiliate.affiliate_id = Some(own);
        assert_eq!(affiliate_scope(&affiliate).unwrap(), Some(own));
        assert!(require_affiliate_access(&affiliate, own).is_ok());
        assert!(require_affiliate_access(&affiliate, Uuid::new_v4()).is_err());
        assert!(require_affiliate_access(&ctx(MembershipRole::Admin), own).is_ok());
    }
}
