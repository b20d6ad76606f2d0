/// Middleware modules for the API server
///
/// - `auth`: Bearer/API-key authentication
/// - `rate_limit`: Per-tenant token bucket
/// - `security`: Security response headers

pub mod auth;
pub mod rate_limit;
pub mod security;
