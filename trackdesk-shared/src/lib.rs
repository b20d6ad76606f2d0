//! # Trackdesk Shared Library
//!
//! Domain types, persistence and business logic used by the Trackdesk API
//! server and the delivery worker.
//!
//! ## Module Organization
//!
//! - `auth`: Passwords, JWTs, API keys and role checks
//! - `db`: Connection pool and migrations
//! - `models`: Database models and data structures
//! - `rules`: Condition/action rule engine for traffic, fraud and quality
//! - `tracking`: Click and conversion pipelines, attribution and commission
//! - `payouts`: Payout builder and lifecycle
//! - `events`: Outbound webhook events and affiliate postbacks
//! - `signing`: HMAC signatures for outbound and inbound webhooks
//! - `stats`: Dashboard and affiliate reporting
//! - `quota`: Per-plan resource limits
//! - `redis`: Redis client used for rate limits and click uniqueness

pub mod auth;
pub mod db;
pub mod events;
pub mod models;
pub mod payouts;
pub mod quota;
pub mod redis;
pub mod rules;
pub mod signing;
pub mod stats;
pub mod tracking;

/// Current version of the Trackdesk shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
