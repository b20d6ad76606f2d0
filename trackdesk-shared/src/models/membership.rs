/// Membership model and database operations
///
/// Memberships link users to tenants with a role. The role hierarchy is
/// `owner > admin > manager > affiliate`:
///
/// - **owner**: everything, including plan and billing changes
/// - **admin**: payouts, rules, webhooks, branding, integrations, API keys, team
/// - **manager**: day-to-day program work (affiliates, offers, links, conversions)
/// - **affiliate**: portal access limited to the affiliate's own records
///
/// # Schema
///
/// ```sql
/// CREATE TYPE membership_role AS ENUM ('owner', 'admin', 'manager', 'affiliate');
///
/// CREATE TABLE memberships (
///     tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     role membership_role NOT NULL DEFAULT 'manager',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (tenant_id, user_id)
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::models::membership::{Membership, CreateMembership, MembershipRole};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid, user_id: Uuid) -> Result<(), sqlx::Error> {
/// Membership::create(&pool, CreateMembership {
///     tenant_id,
///     user_id,
///     role: MembershipRole::Manager,
/// }).await?;
///
/// let role = Membership::get_role(&pool, tenant_id, user_id).await?;
/// assert_eq!(role, Some(MembershipRole::Manager));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// RBAC roles for tenant memberships
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "membership_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    /// Full control, including plan and billing
    Owner,

    /// Program administration
    Admin,

    /// Day-to-day program management
    Manager,

    /// Affiliate portal user
    Affiliate,
}

impl MembershipRole {
    /// Converts role to its wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Admin => "admin",
            MembershipRole::Manager => "manager",
            MembershipRole::Affiliate => "affiliate",
        }
    }

    /// Checks if this role is at least as privileged as `required`
    ///
    /// Hierarchy: Owner > Admin > Manager > Affiliate
    pub fn has_permission(&self, required: &MembershipRole) -> bool {
        self.permission_level() >= required.permission_level()
    }

    /// Whether the role is limited to one affiliate's own records
    pub fn is_affiliate(&self) -> bool {
        matches!(self, MembershipRole::Affiliate)
    }

    fn permission_level(&self) -> u8 {
        match self {
            MembershipRole::Owner => 4,
            MembershipRole::Admin => 3,
            MembershipRole::Manager => 2,
            MembershipRole::Affiliate => 1,
        }
    }
}

/// User-tenant relationship with role
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    /// Tenant ID
    pub tenant_id: Uuid,

    /// User ID
    pub user_id: Uuid,

    /// Role within the tenant
    pub role: MembershipRole,

    /// When the membership was created
    pub created_at: DateTime<Utc>,
}

/// Membership joined with the member's user record, for team listings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamMember {
    /// User ID
    pub user_id: Uuid,

    /// Member email
    pub email: String,

    /// Member display name
    pub name: Option<String>,

    /// Role within the tenant
    pub role: MembershipRole,

    /// When the member joined
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMembership {
    /// Tenant ID
    pub tenant_id: Uuid,

    /// User ID
    pub user_id: Uuid,

    /// Role to assign
    #[serde(default = "default_role")]
    pub role: MembershipRole,
}

fn default_role() -> MembershipRole {
    MembershipRole::Manager
}

impl Membership {
    /// Adds a user to a tenant
    ///
    /// # Errors
    ///
    /// Fails with a unique violation when the user is already a member, or a
    /// foreign key violation when the tenant or user doesn't exist.
    pub async fn create(pool: &PgPool, data: CreateMembership) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO memberships (tenant_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING tenant_id, user_id, role, created_at
            "#,
        )
        .bind(data.tenant_id)
        .bind(data.user_id)
        .bind(data.role)
        .fetch_one(pool)
        .await
    }

    /// Finds a specific membership
    pub async fn find(
        pool: &PgPool,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            r#"
            SELECT tenant_id, user_id, role, created_at
            FROM memberships
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Gets a user's role in a tenant, `None` when they are not a member
    pub async fn get_role(
        pool: &PgPool,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MembershipRole>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT role FROM memberships
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Changes a member's role
    pub async fn update_role<'e, E>(
        executor: E,
        tenant_id: Uuid,
        user_id: Uuid,
        role: MembershipRole,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Membership>(
            r#"
            UPDATE memberships
            SET role = $3
            WHERE tenant_id = $1 AND user_id = $2
            RETURNING tenant_id, user_id, role, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(role)
        .fetch_optional(executor)
        .await
    }

    /// Removes a user from a tenant
    pub async fn delete<'e, E>(executor: E, tenant_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM memberships WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists a tenant's members with their user details, oldest first
    pub async fn list_team(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<TeamMember>, sqlx::Error> {
        sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT m.user_id, u.email, u.name, m.role, m.created_at
            FROM memberships m
            JOIN users u ON u.id = m.user_id
            WHERE m.tenant_id = $1
            ORDER BY m.created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }

    /// Lists all tenants a user belongs to, oldest membership first
    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            r#"
            SELECT tenant_id, user_id, role, created_at
            FROM memberships
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Counts members holding `role` in a tenant
    pub async fn count_with_role(
        pool: &PgPool,
        tenant_id: Uuid,
        role: MembershipRole,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE tenant_id = $1 AND role = $2")
            .bind(tenant_id)
            .bind(role)
            .fetch_one(pool)
            .await
    }

    /// Row-locks the tenant's owner memberships until the transaction ends
    ///
    /// # Returns
    ///
    /// The owners' user IDs
    pub async fn lock_owners(conn: &mut sqlx::PgConnection, tenant_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT user_id FROM memberships WHERE tenant_id = $1 AND role = 'owner' ORDER BY user_id FOR UPDATE",
        )
        .bind(tenant_id)
        .fetch_all(conn)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        assert!(MembershipRole::Owner.has_permission(&MembershipRole::Admin));
        assert!(MembershipRole::Admin.has_permission(&MembershipRole::Manager));
        assert!(MembershipRole::Manager.has_permission(&MembershipRole::Affiliate));
        assert!(MembershipRole::Manager.has_permission(&MembershipRole::Manager));

        assert!(!MembershipRole::Affiliate.has_permission(&MembershipRole::Manager));
        assert!(!MembershipRole::Manager.has_permission(&MembershipRole::Admin));
        assert!(!MembershipRole::Admin.has_permission(&MembershipRole::Owner));
    }

    #[test]
    fn test_role_serde() {
        let role: MembershipRole = serde_json::from_str("\"affiliate\"").unwrap();
        assert_eq!(role, MembershipRole::Affiliate);
        assert!(role.is_affiliate());
        assert_eq!(MembershipRole::Manager.as_str(), "manager");
    }
}
