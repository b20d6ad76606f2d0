/// Per-tenant rate limiting for authenticated routes
///
/// Token bucket sized to the tenant plan's requests-per-minute. Bucket state
/// lives in Redis when it is configured (so every API instance shares it) and
/// falls back to process memory otherwise, or when Redis errors.
///
/// # Rate Limits by Plan
///
/// - **Trial**: 60 requests/minute
/// - **Starter**: 300 requests/minute
/// - **Pro**: 1,200 requests/minute
/// - **Enterprise**: 6,000 requests/minute
///
/// # Storage
///
/// Redis keys: `ratelimit:tenant:{tenant_id}` (hash of `tokens`, `ts`),
/// expiring after 2 minutes of inactivity.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: requests allowed per minute
/// - `X-RateLimit-Remaining`: tokens left
/// - `X-RateLimit-Reset`: Unix timestamp when the bucket is full again
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Extension, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use trackdesk_shared::auth::middleware::AuthContext;
use trackdesk_shared::models::tenant::{Tenant, TenantPlan};
use trackdesk_shared::quota::QuotaLimits;
use trackdesk_shared::redis::RedisClient;
use uuid::Uuid;

const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2]) / 60000
local now = tonumber(ARGV[3])

local bucket = redis.call('HMGET', key, 'tokens', 'ts')
local tokens = tonumber(bucket[1])
local ts = tonumber(bucket[2])

if not tokens then
    tokens = capacity
    ts = now
end

tokens = math.min(capacity, tokens + math.max(0, now - ts) * rate)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'ts', now)
redis.call('PEXPIRE', key, 120000)

local wait = 0
if allowed == 0 then
    wait = math.ceil((1 - tokens) / rate / 1000)
end

return {allowed, math.floor(tokens), wait}
"#;

/// Rate limit configuration for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_per_minute: u32,

    /// Burst capacity
    pub bucket_capacity: u32,
}

impl RateLimit {
    pub fn for_plan(plan: TenantPlan) -> Self {
        let requests_per_minute = QuotaLimits::for_plan(plan).requests_per_minute;
        Self {
            requests_per_minute,
            bucket_capacity: requests_per_minute,
        }
    }

    /// Tokens added per millisecond
    fn refill_per_ms(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60_000.0
    }
}

/// In-memory token bucket
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,

    /// Last refill, Unix milliseconds
    last_refill_ms: i64,
}

impl TokenBucket {
    fn new(capacity: u32, now_ms: i64) -> Self {
        TokenBucket {
            tokens: f64::from(capacity),
            last_refill_ms: now_ms,
        }
    }

    fn refill(&mut self, limit: &RateLimit, now_ms: i64) {
        let elapsed = (now_ms - self.last_refill_ms).max(0) as f64;
        self.tokens = (self.tokens + elapsed * limit.refill_per_ms()).min(f64::from(limit.bucket_capacity));
        self.last_refill_ms = now_ms;
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn seconds_until_available(&self, limit: &RateLimit) -> u64 {
        let deficit = 1.0 - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / limit.refill_per_ms() / 1000.0).ceil() as u64
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,

    /// Seconds to wait before retrying; 0 when allowed
    pub retry_after: u64,
}

impl RateLimitDecision {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        let reset = Utc::now().timestamp().max(0) as u64 + 60;
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(self.remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));
    }
}

/// Token buckets for every tenant
pub struct RateLimiter {
    script: redis::Script,
    local: Mutex<HashMap<Uuid, TokenBucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            script: redis::Script::new(BUCKET_SCRIPT),
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token from `tenant_id`'s bucket
    pub async fn check(
        &self,
        redis: Option<&RedisClient>,
        tenant_id: Uuid,
        limit: RateLimit,
        now_ms: i64,
    ) -> RateLimitDecision {
        if let Some(redis) = redis {
            let key = format!("ratelimit:tenant:{}", tenant_id);
            let args = [
                i64::from(limit.bucket_capacity),
                i64::from(limit.requests_per_minute),
                now_ms,
            ];

            match redis.eval_script::<Vec<i64>>(&self.script, &[key.as_str()], &args).await {
                Ok(reply) if reply.len() == 3 => {
                    return RateLimitDecision {
                        allowed: reply[0] == 1,
                        limit: limit.requests_per_minute,
                        remaining: u32::try_from(reply[1].max(0)).unwrap_or(0),
                        retry_after: u64::try_from(reply[2].max(0)).unwrap_or(0),
                    };
                }
                Ok(reply) => {
                    tracing::warn!(len = reply.len(), "Unexpected rate limit script reply, using local bucket");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Redis rate limit failed, using local bucket");
                }
            }
        }

        self.check_local(tenant_id, limit, now_ms)
    }

    fn check_local(&self, tenant_id: Uuid, limit: RateLimit, now_ms: i64) -> RateLimitDecision {
        let mut buckets = self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let bucket = buckets
            .entry(tenant_id)
            .or_insert_with(|| TokenBucket::new(limit.bucket_capacity, now_ms));

        bucket.refill(&limit, now_ms);
        let allowed = bucket.try_consume();

        RateLimitDecision {
            allowed,
            limit: limit.requests_per_minute,
            remaining: bucket.tokens.floor().max(0.0) as u32,
            retry_after: if allowed { 0 } else { bucket.seconds_until_available(&limit) },
        }
    }
}

/// Rate limiting middleware layer
///
/// Runs after authentication. Returns 429 with `Retry-After` when the
/// tenant's bucket is empty.
pub async fn rate_limit_layer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant = Tenant::find_by_id(&state.db, auth.tenant_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(tenant_id = %auth.tenant_id, "Tenant not found");
            ApiError::Unauthorized("Tenant not found".to_string())
        })?;

    let limit = RateLimit::for_plan(tenant.plan);
    let decision = state
        .rate_limiter
        .check(state.redis.as_ref(), auth.tenant_id, limit, Utc::now().timestamp_millis())
        .await;

    if !decision.allowed {
        tracing::info!(tenant_id = %auth.tenant_id, retry_after = decision.retry_after, "Rate limit exceeded");

        let mut response = ApiError::RateLimitExceeded {
            retry_after: decision.retry_after,
            message: format!("Rate limit exceeded. Try again in {} seconds", decision.retry_after),
        }
        .into_response();
        decision.apply_headers(response.headers_mut());
        return Ok(response);
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());

    Ok(response)
}
