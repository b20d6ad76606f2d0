/// Authentication and authorization
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength checks
/// - [`jwt`]: access/refresh token pairs
/// - [`api_key`]: `tdk_` key generation, hashing and scope matching
/// - [`middleware`]: resolves request headers into an `AuthContext`
/// - [`authorization`]: role, scope and affiliate-ownership checks
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::auth::password::{hash_password, verify_password};
/// use trackdesk_shared::auth::jwt::issue_token_pair;
/// use trackdesk_shared::models::membership::MembershipRole;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("trails2026")?;
/// assert!(verify_password("trails2026", &hash)?);
///
/// let (access, refresh) = issue_token_pair(
///     Uuid::new_v4(),
///     Uuid::new_v4(),
///     MembershipRole::Owner,
///     "an-example-secret-of-at-least-32-bytes",
/// )?;
/// # Ok(())
/// # }
/// ```

pub mod api_key;
pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
