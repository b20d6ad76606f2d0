/// Common test utilities for integration tests
///
/// This module provides shared infrastructure for integration tests:
/// - Test database setup and cleanup
/// - Test tenant, owner and affiliate user creation
/// - JWT token generation
/// - Request helpers

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use sqlx::PgPool;
use tower::Service as _;
use trackdesk_api::app::{build_router, AppState};
use trackdesk_api::config::Config;
use trackdesk_shared::auth::jwt::{create_token, Claims, TokenType};
use trackdesk_shared::models::membership::{CreateMembership, Membership, MembershipRole};
use trackdesk_shared::models::tenant::{CreateTenant, Tenant, TenantPlan};
use trackdesk_shared::models::user::{CreateUser, User};
use trackdesk_shared::redis::{RedisClient, RedisConfig};
use uuid::Uuid;

/// Test context containing all necessary resources
pub struct TestContext {
    pub db: PgPool,
    pub app: axum::Router,
    pub config: Config,
    pub tenant: Tenant,
    pub user: User,
    pub jwt_token: String,
}

async fn create_user(db: &PgPool, label: &str) -> anyhow::Result<User> {
    let user = User::create(
        db,
        CreateUser {
            email: format!("{}-{}@example.com", label, Uuid::new_v4()),
            password_hash: "test_hash".to_string(), // Not used in tests
            name: Some(format!("Test {}", label)),
        },
    )
    .await?;
    Ok(user)
}

impl TestContext {
    /// Creates a new test context with a fresh tenant owned by a fresh user
    pub async fn new() -> anyhow::Result<Self> {
        let config = Config::from_env()?;

        let db = PgPool::connect(&config.database.url).await?;

        // Path relative to Cargo.toml, not this file
        sqlx::migrate!("../migrations").run(&db).await?;

        let tenant = Tenant::create(
            &db,
            CreateTenant {
                name: format!("Test Program {}", Uuid::new_v4()),
                slug: None,
                plan: TenantPlan::Pro, // Pro avoids quota limits
            },
        )
        .await?;

        let user = create_user(&db, "owner").await?;
        let jwt_token = Self::membership_token(&db, &config, tenant.id, user.id, MembershipRole::Owner).await?;

        let mut state = AppState::new(db.clone(), config.clone());
        if let Some(redis) = &config.redis {
            state = state.with_redis(RedisClient::new(RedisConfig::new(redis.url.clone())).await?);
        }
        let app = build_router(state);

        Ok(TestContext {
            db,
            app,
            config,
            tenant,
            user,
            jwt_token,
        })
    }

    async fn membership_token(
        db: &PgPool,
        config: &Config,
        tenant_id: Uuid,
        user_id: Uuid,
        role: MembershipRole,
    ) -> anyhow::Result<String> {
        Membership::create(
            db,
            CreateMembership {
                tenant_id,
                user_id,
                role,
            },
        )
        .await?;

        let claims = Claims::new(user_id, tenant_id, role, TokenType::Access);
        Ok(create_token(&claims, &config.jwt.secret)?)
    }

    /// Adds a member with `role` and returns their user and access token
    pub async fn member(&self, role: MembershipRole) -> anyhow::Result<(User, String)> {
        let user = create_user(&self.db, role.as_str()).await?;
        let token = Self::membership_token(&self.db, &self.config, self.tenant.id, user.id, role).await?;
        Ok((user, token))
    }

    /// Returns authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.jwt_token)
    }

    /// Sends a request with the owner's token
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send_as(&self.jwt_token, method, uri, body).await
    }

    /// Sends a request with `token` and parses the JSON body (`Null` when empty)
    pub async fn send_as(&self, token: &str, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token));

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, _, value) = self.call(request).await;
        (status, value)
    }

    /// Sends a prepared request, returning status, headers and the JSON body (`Null` when empty)
    pub async fn call(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.app.clone().call(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, headers, value)
    }

    /// Cleans up test data
    pub async fn cleanup(&self) -> anyhow::Result<()> {
        // Cascades to memberships, affiliates, offers, and the rest of the program
        Tenant::delete(&self.db, self.tenant.id).await?;
        User::delete(&self.db, self.user.id).await.ok();
        Ok(())
    }
}
