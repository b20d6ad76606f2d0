/// Plan quotas for multi-tenant resource limits
///
/// Quotas cap how many affiliates, offers and webhooks a tenant may create,
/// and how many API requests per minute it may make.
///
/// # Quota Limits by Plan
///
/// | plan       | affiliates | offers | webhooks | requests/min |
/// |------------|-----------:|-------:|---------:|-------------:|
/// | trial      | 25         | 5      | 2        | 60           |
/// | starter    | 250        | 25     | 5        | 300          |
/// | pro        | 5,000      | 250    | 20       | 1,200        |
/// | enterprise | unlimited  | unlimited | unlimited | 6,000     |
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::quota::{QuotaEnforcer, QuotaType};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let enforcer = QuotaEnforcer::new(pool);
///
/// // Fails with QuotaError::LimitExceeded once the plan's cap is reached
/// enforcer.enforce(tenant_id, QuotaType::Affiliates).await?;
/// # Ok(())
/// # }
/// ```

use crate::models::affiliate::Affiliate;
use crate::models::offer::Offer;
use crate::models::tenant::{Tenant, TenantPlan};
use crate::models::webhook::Webhook;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// Quota enforcement error
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("{} limit exceeded ({current}/{limit}); upgrade your plan to add more", .quota_type.as_str())]
    LimitExceeded {
        quota_type: QuotaType,
        limit: u32,
        current: u32,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Tenant not found: {0}")]
    TenantNotFound(Uuid),
}

/// Counted resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaType {
    Affiliates,
    Offers,
    Webhooks,
}

impl QuotaType {
    /// Human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::Affiliates => "Affiliates",
            QuotaType::Offers => "Offers",
            QuotaType::Webhooks => "Webhooks",
        }
    }
}

/// Plan limits; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub affiliates: Option<u32>,
    pub offers: Option<u32>,
    pub webhooks: Option<u32>,

    /// Token bucket capacity, refilled over one minute
    pub requests_per_minute: u32,
}

impl QuotaLimits {
    /// Gets quota limits for a tenant plan
    pub fn for_plan(plan: TenantPlan) -> Self {
        match plan {
            TenantPlan::Trial => QuotaLimits {
                affiliates: Some(25),
                offers: Some(5),
                webhooks: Some(2),
                requests_per_minute: 60,
            },
            TenantPlan::Starter => QuotaLimits {
                affiliates: Some(250),
                offers: Some(25),
                webhooks: Some(5),
                requests_per_minute: 300,
            },
            TenantPlan::Pro => QuotaLimits {
                affiliates: Some(5_000),
                offers: Some(250),
                webhooks: Some(20),
                requests_per_minute: 1_200,
            },
            TenantPlan::Enterprise => QuotaLimits {
                affiliates: None,
                offers: None,
                webhooks: None,
                requests_per_minute: 6_000,
            },
        }
    }

    /// Gets limit for a specific quota type
    pub fn get(&self, quota_type: QuotaType) -> Option<u32> {
        match quota_type {
            QuotaType::Affiliates => self.affiliates,
            QuotaType::Offers => self.offers,
            QuotaType::Webhooks => self.webhooks,
        }
    }
}

/// Result of quota check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheckResult {
    pub allowed: bool,
    pub current: u32,
    pub limit: Option<u32>,
}

impl QuotaCheckResult {
    pub fn evaluate(current: u32, limit: Option<u32>) -> Self {
        QuotaCheckResult {
            allowed: limit.map_or(true, |limit| current < limit),
            current,
            limit,
        }
    }

    /// Remaining headroom, `None` when unlimited
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.current))
    }
}

/// Quota enforcement service
pub struct QuotaEnforcer {
    db: PgPool,
}

impl QuotaEnforcer {
    pub fn new(db: PgPool) -> Self {
        QuotaEnforcer { db }
    }

    /// Checks whether the tenant can create one more of `quota_type`
    ///
    /// # Errors
    ///
    /// Returns error if database query fails or tenant not found
    pub async fn check(
        &self,
        tenant_id: Uuid,
        quota_type: QuotaType,
    ) -> Result<QuotaCheckResult, QuotaError> {
        let limits = self.get_limits(tenant_id).await?;

        let current = match quota_type {
            QuotaType::Affiliates => Affiliate::count(&self.db, tenant_id).await?,
            QuotaType::Offers => Offer::count(&self.db, tenant_id).await?,
            QuotaType::Webhooks => Webhook::count(&self.db, tenant_id).await?,
        };

        Ok(QuotaCheckResult::evaluate(
            u32::try_from(current).unwrap_or(u32::MAX),
            limits.get(quota_type),
        ))
    }

    /// Returns `QuotaError::LimitExceeded` if the quota is used up
    pub async fn enforce(&self, tenant_id: Uuid, quota_type: QuotaType) -> Result<(), QuotaError> {
        let result = self.check(tenant_id, quota_type).await?;

        if let (false, Some(limit)) = (result.allowed, result.limit) {
            tracing::info!(
                tenant_id = %tenant_id,
                quota = quota_type.as_str(),
                current = result.current,
                limit,
                "Quota exceeded"
            );
            return Err(QuotaError::LimitExceeded {
                quota_type,
                limit,
                current: result.current,
            });
        }

        Ok(())
    }

    /// Gets quota limits for a tenant
    pub async fn get_limits(&self, tenant_id: Uuid) -> Result<QuotaLimits, QuotaError> {
        let tenant = Tenant::find_by_id(&self.db, tenant_id)
            .await?
            .ok_or(QuotaError::TenantNotFound(tenant_id))?;

        Ok(QuotaLimits::for_plan(tenant.plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_limits_trial() {
        let limits = QuotaLimits::for_plan(TenantPlan::Trial);
        assert_eq!(limits.affiliates, Some(25));
        assert_eq!(limits.offers, Some(5));
        assert_eq!(limits.webhooks, Some(2));
        assert_eq!(limits.requests_per_minute, 60);
    }

    #[test]
    fn test_quota_limits_starter_and_pro() {
        let starter = QuotaLimits::for_plan(TenantPlan::Starter);
        assert_eq!((starter.affiliates, starter.offers, starter.webhooks), (Some(250), Some(25), Some(5)));

        let pro = QuotaLimits::for_plan(TenantPlan::Pro);
        assert_eq!(pro.get(QuotaType::Affiliates), Some(5_000));
        assert_eq!(pro.get(QuotaType::Offers), Some(250));
        assert_eq!(pro.get(QuotaType::Webhooks), Some(20));
        assert_eq!(pro.requests_per_minute, 1_200);
    }

    #[test]
    fn test_enterprise_is_unlimited() {
        let limits = QuotaLimits::for_plan(TenantPlan::Enterprise);
        assert_eq!(limits.get(QuotaType::Affiliates), None);

        let result = QuotaCheckResult::evaluate(1_000_000, limits.affiliates);
        assert!(result.allowed);
        assert_eq!(result.remaining(), None);
    }

    #[test]
    fn test_check_result() {
        let result = QuotaCheckResult::evaluate(4, Some(5));
        assert!(result.allowed);
        assert_eq!(result.remaining(), Some(1));

        let result = QuotaCheckResult::evaluate(5, Some(5));
        assert!(!result.allowed);
        assert_eq!(result.remaining(), Some(0));
    }

    #[test]
    fn test_quota_error_display() {
        let err = QuotaError::LimitExceeded {
            quota_type: QuotaType::Offers,
            limit: 5,
            current: 5,
        };
        assert!(err.to_string().starts_with("Offers limit exceeded (5/5)"));

        let err = QuotaError::TenantNotFound(Uuid::nil());
        assert!(err.to_string().contains("Tenant not found"));
    }
}
