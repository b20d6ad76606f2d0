/// Shared setup for worker integration tests
///
/// Needs `DATABASE_URL` pointing at a disposable database.

use sqlx::PgPool;
use trackdesk_shared::models::tenant::{CreateTenant, Tenant, TenantPlan};
use trackdesk_shared::models::webhook::{CreateWebhook, Webhook};
use uuid::Uuid;

pub struct TestContext {
    pub db: PgPool,
    pub tenant: Tenant,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL")?;

        let db = PgPool::connect(&url).await?;
        sqlx::migrate!("../migrations").run(&db).await?;

        let tenant = Tenant::create(
            &db,
            CreateTenant {
                name: format!("Worker Test {}", Uuid::new_v4()),
                slug: None,
                plan: TenantPlan::Pro,
            },
        )
        .await?;

        Ok(TestContext { db, tenant })
    }

    pub async fn webhook(&self) -> anyhow::Result<Webhook> {
        let webhook = Webhook::create(
            &self.db,
            CreateWebhook {
                tenant_id: self.tenant.id,
                url: "https://hooks.example.com/trackdesk".to_string(),
                events: vec!["conversion.created".to_string()],
            },
        )
        .await?;
        Ok(webhook)
    }

    /// Deletes the tenant; deliveries and webhooks cascade
    pub async fn cleanup(&self) -> anyhow::Result<()> {
        Tenant::delete(&self.db, self.tenant.id).await?;
        Ok(())
    }
}
