/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use trackdesk_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let app = trackdesk_api::app::build_router(AppState::new(pool, config));
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::{auth::auth_layer, rate_limit::{rate_limit_layer, RateLimiter}, security::SecurityHeadersLayer},
    routes,
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use trackdesk_shared::auth::middleware::API_KEY_HEADER;
use trackdesk_shared::redis::RedisClient;

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,

    /// Present when `REDIS_URL` is configured and reachable
    pub redis: Option<RedisClient>,

    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            redis: None,
            rate_limiter: Arc::new(RateLimiter::new()),
        }
    }

    pub fn with_redis(mut self, redis: RedisClient) -> Self {
        self.redis = Some(redis);
        self
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// ```text
/// /
/// ├── /health                            public
/// ├── /t/:code  /t/postback              public tracking
/// ├── /public/branding                   public portal branding
/// ├── /integrations/{stripe,shopify}/:slug   signed provider webhooks
/// └── /v1/
///     ├── /auth/{register,login,refresh} public
///     └── everything else                auth + per-tenant rate limit
/// ```
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/t/postback", get(routes::tracking::postback))
        .route("/t/:code", get(routes::tracking::click))
        .route("/public/branding", get(routes::branding::public_branding))
        .route("/integrations/stripe/:tenant_slug", post(routes::integrations::stripe_webhook))
        .route("/integrations/shopify/:tenant_slug", post(routes::integrations::shopify_webhook));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    let protected_routes = Router::new()
        .route("/auth/me", get(routes::auth::me))
        // API keys
        .route("/api-keys", post(routes::api_keys::create_api_key).get(routes::api_keys::list_api_keys))
        .route("/api-keys/:id/revoke", post(routes::api_keys::revoke_api_key))
        // Team
        .route("/team", get(routes::team::list_team).post(routes::team::add_member))
        .route("/team/:user_id", put(routes::team::update_member).delete(routes::team::remove_member))
        // Affiliates
        .route("/affiliates", post(routes::affiliates::create_affiliate).get(routes::affiliates::list_affiliates))
        .route(
            "/affiliates/:id",
            get(routes::affiliates::get_affiliate)
                .put(routes::affiliates::update_affiliate)
                .delete(routes::affiliates::delete_affiliate),
        )
        .route("/affiliates/:id/approve", post(routes::affiliates::approve_affiliate))
        .route("/affiliates/:id/suspend", post(routes::affiliates::suspend_affiliate))
        .route("/affiliates/:id/reject", post(routes::affiliates::reject_affiliate))
        .route("/affiliates/:id/stats", get(routes::affiliates::affiliate_stats))
        // Offers
        .route("/offers", post(routes::offers::create_offer).get(routes::offers::list_offers))
        .route(
            "/offers/:id",
            get(routes::offers::get_offer)
                .put(routes::offers::update_offer)
                .delete(routes::offers::delete_offer),
        )
        // Tracking links and smart links
        .route("/links", post(routes::links::create_link).get(routes::links::list_links))
        .route(
            "/links/:id",
            get(routes::links::get_link)
                .put(routes::links::update_link)
                .delete(routes::links::delete_link),
        )
        .route(
            "/smart-links",
            post(routes::smart_links::create_smart_link).get(routes::smart_links::list_smart_links),
        )
        .route(
            "/smart-links/:id",
            get(routes::smart_links::get_smart_link)
                .put(routes::smart_links::update_smart_link)
                .delete(routes::smart_links::delete_smart_link),
        )
        // Clicks and conversions
        .route("/clicks", get(routes::clicks::list_clicks))
        .route(
            "/conversions",
            post(routes::conversions::create_conversion).get(routes::conversions::list_conversions),
        )
        .route("/conversions/:id", get(routes::conversions::get_conversion))
        .route("/conversions/:id/approve", post(routes::conversions::approve_conversion))
        .route("/conversions/:id/reject", post(routes::conversions::reject_conversion))
        // Coupons
        .route("/coupons", post(routes::coupons::create_coupon).get(routes::coupons::list_coupons))
        .route(
            "/coupons/:id",
            get(routes::coupons::get_coupon)
                .put(routes::coupons::update_coupon)
                .delete(routes::coupons::delete_coupon),
        )
        // Payouts
        .route("/payouts", post(routes::payouts::create_payout).get(routes::payouts::list_payouts))
        .route("/payouts/preview", get(routes::payouts::preview_payouts))
        .route("/payouts/batch", post(routes::payouts::batch_payouts))
        .route("/payouts/:id", get(routes::payouts::get_payout))
        .route("/payouts/:id/process", post(routes::payouts::process_payout))
        .route("/payouts/:id/complete", post(routes::payouts::complete_payout))
        .route("/payouts/:id/fail", post(routes::payouts::fail_payout))
        .route("/payouts/:id/cancel", post(routes::payouts::cancel_payout))
        // Rules
        .route("/rules", post(routes::rules::create_rule).get(routes::rules::list_rules))
        .route("/rules/test", post(routes::rules::test_rules))
        .route(
            "/rules/:id",
            get(routes::rules::get_rule)
                .put(routes::rules::update_rule)
                .delete(routes::rules::delete_rule),
        )
        // Webhooks
        .route("/webhooks", post(routes::webhooks::create_webhook).get(routes::webhooks::list_webhooks))
        .route(
            "/webhooks/:id",
            get(routes::webhooks::get_webhook)
                .put(routes::webhooks::update_webhook)
                .delete(routes::webhooks::delete_webhook),
        )
        .route("/webhooks/:id/rotate-secret", post(routes::webhooks::rotate_secret))
        .route("/webhooks/:id/test", post(routes::webhooks::test_webhook))
        .route("/webhooks/:id/deliveries", get(routes::webhooks::list_deliveries))
        // Branding and integrations
        .route("/branding", get(routes::branding::get_branding).put(routes::branding::update_branding))
        .route("/integrations", get(routes::integrations::list_integrations))
        .route("/integrations/:provider", put(routes::integrations::upsert_integration))
        // Dashboard
        .route("/dashboard/summary", get(routes::dashboard::summary))
        .route("/dashboard/timeseries", get(routes::dashboard::timeseries))
        .route("/dashboard/top-affiliates", get(routes::dashboard::top_affiliates))
        .route("/dashboard/top-offers", get(routes::dashboard::top_offers))
        // Layers run bottom to top: authenticate, then rate limit
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_layer))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_layer));

    let v1_routes = Router::new().nest("/auth", auth_routes).merge(protected_routes);

    Router::new()
        .merge(public_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.api.cors_origins))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|origin| origin.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_explicit_origins() {
        let _ = cors_layer(&["https://app.example.com".to_string(), "not a header\n".to_string()]);
        let _ = cors_layer(&["*".to_string()]);
    }
}
