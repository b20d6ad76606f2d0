/// Redis integration
///
/// Optional shared state for horizontally scaled API instances:
///
/// ```text
/// ratelimit:tenant:{tenant_id}    token bucket (hash, TTL 2m)
/// uniq:{tenant_id}:{link_id}:{ip} unique-click marker (TTL 24h)
/// ```

pub mod client;

pub use client::{RedisClient, RedisClientError, RedisConfig, RedisStats};
