/// Team management endpoints (admin+)
///
/// # Endpoints
///
/// - `GET /v1/team` - List members
/// - `POST /v1/team` - Add an existing user
/// - `PUT /v1/team/:user_id` - Change a member's role
/// - `DELETE /v1/team/:user_id` - Remove a member
///
/// Only owners grant or take away the owner role, and the last owner of a
/// tenant can be neither demoted nor removed.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use trackdesk_shared::{
    auth::{
        authorization::{require_permission, require_role, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        membership::{CreateMembership, Membership, MembershipRole, TeamMember},
        user::User,
    },
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct AddMemberRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub role: MembershipRole,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: MembershipRole,
}

#[derive(Debug, Serialize)]
pub struct TeamResponse {
    pub members: Vec<TeamMember>,
}

/// Refuses changes that would leave the tenant without an owner
///
/// Locks the owner memberships, so concurrent demotions and removals are
/// checked one after another.
async fn ensure_not_last_owner(conn: &mut PgConnection, tenant_id: Uuid, user_id: Uuid) -> ApiResult<()> {
    let owners = Membership::lock_owners(conn, tenant_id).await?;
    if is_last_owner(&owners, user_id) {
        return Err(ApiError::Conflict("The last owner cannot be removed or demoted".to_string()));
    }

    Ok(())
}

fn is_last_owner(owners: &[Uuid], user_id: Uuid) -> bool {
    owners.contains(&user_id) && owners.len() <= 1
}

pub async fn list_team(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<TeamResponse>> {
    require_permission(&auth, ResourcePermission::Manage, "team:read")?;

    let members = Membership::list_team(&state.db, auth.tenant_id).await?;
    Ok(Json(TeamResponse { members }))
}

/// Add a member
///
/// # Errors
///
/// - `404 Not Found`: No user with that email
/// - `409 Conflict`: Already a member
pub async fn add_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<(StatusCode, Json<Membership>)> {
    require_permission(&auth, ResourcePermission::Manage, "team:write")?;
    req.validate()?;

    if req.role == MembershipRole::Owner {
        require_role(&auth, MembershipRole::Owner)?;
    }

    let user = User::find_by_email(&state.db, req.email.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound("No user with that email; they must register first".to_string()))?;

    if Membership::find(&state.db, auth.tenant_id, user.id).await?.is_some() {
        return Err(ApiError::Conflict("User is already a member of this tenant".to_string()));
    }

    let membership = Membership::create(
        &state.db,
        CreateMembership {
            tenant_id: auth.tenant_id,
            user_id: user.id,
            role: req.role,
        },
    )
    .await?;

    tracing::info!(tenant_id = %auth.tenant_id, user_id = %user.id, role = req.role.as_str(), "Added team member");

    Ok((StatusCode::CREATED, Json(membership)))
}

pub async fn update_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateMemberRequest>,
) -> ApiResult<Json<Membership>> {
    require_permission(&auth, ResourcePermission::Manage, "team:write")?;

    let current = Membership::get_role(&state.db, auth.tenant_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;

    if current == MembershipRole::Owner || req.role == MembershipRole::Owner {
        require_role(&auth, MembershipRole::Owner)?;
    }

    let mut tx = state.db.begin().await?;
    if req.role != MembershipRole::Owner {
        ensure_not_last_owner(&mut *tx, auth.tenant_id, user_id).await?;
    }

    let membership = Membership::update_role(&mut *tx, auth.tenant_id, user_id, req.role)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    tx.commit().await?;

    Ok(Json(membership))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth, ResourcePermission::Manage, "team:write")?;

    let current = Membership::get_role(&state.db, auth.tenant_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;

    if current == MembershipRole::Owner {
        require_role(&auth, MembershipRole::Owner)?;
    }

    let mut tx = state.db.begin().await?;
    ensure_not_last_owner(&mut *tx, auth.tenant_id, user_id).await?;
    Membership::delete(&mut *tx, auth.tenant_id, user_id).await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %auth.tenant_id, user_id = %user_id, "Removed team member");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_last_owner() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(is_last_owner(&[a], a));
        assert!(!is_last_owner(&[a, b], a));
        // Non-owners can always be changed
        assert!(!is_last_owner(&[a], b));
    }
}
