use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        users::{CurrentUser, ListUsersQuery, ProfileResponse, ProfileUpdate, Role, UserResponse, UserRolesUpdate, VerificationUpdate},
    },
    auth::{
        current_user::MaybeCurrentUser,
        permissions::{RequiresPermission, can_read_all_resources, has_permission, operation, resource},
    },
    db::{
        errors::DbError,
        handlers::{Repository, Users, users::UserFilter},
        models::users::{ProfileUpsertDBRequest, UserUpdateDBRequest},
    },
    errors::Error,
    types::{Operation, Resource, UserId, UserIdOrCurrent},
    validation::ValidatedJson,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

// GET /users - List users (admin only)
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    description = "List all users, filtered by search text and role (admin only)",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Paginated list of users", body = PaginatedResponse<UserResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admin access required"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
) -> Result<Json<PaginatedResponse<UserResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let filter = UserFilter {
        skip,
        limit,
        search: query.search,
        role: query.role,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut pool_conn);
    let users = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        users.into_iter().map(UserResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

// GET /users/{user_id} - Own user or any user for admins
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Get user",
    description = "Get a specific user by ID, or 'current' for the caller",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or 'current' for current user"),
    ),
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    _: RequiresPermission<resource::Users, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<UserResponse>, Error> {
    let target_user_id = user_id.resolve(current_user.id);
    // Other users' accounts are invisible rather than forbidden
    if target_user_id != current_user.id && !can_read_all_resources(&current_user, Resource::Users) {
        return Err(Error::not_found("User", target_user_id));
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut pool_conn)
        .get_by_id(target_user_id)
        .await?
        .ok_or_else(|| Error::not_found("User", target_user_id))?;

    Ok(Json(UserResponse::from(user)))
}

// PATCH /users/{user_id} - Set roles (admin only)
#[utoipa::path(
    patch,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Set user roles",
    description = "Replace a user's roles. Tenant is always kept; admins cannot drop their own admin role.",
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID"),
    ),
    request_body = UserRolesUpdate,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 400, description = "Invalid roles"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn update_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresPermission<resource::Users, operation::UpdateAll>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<UserRolesUpdate>,
) -> Result<Json<UserResponse>, Error> {
    if user_id == current_user.id && !request.roles.contains(&Role::Admin) {
        return Err(Error::bad_request("Admins cannot remove their own admin role"));
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let update = UserUpdateDBRequest {
        roles: Some(request.roles),
        ..Default::default()
    };
    let user = Users::new(&mut pool_conn).update(user_id, &update).await.map_err(|e| match e {
        DbError::NotFound => Error::not_found("User", user_id),
        other => other.into(),
    })?;

    tracing::info!(roles = ?user.roles, updated_by = %current_user.id, "User roles updated");
    Ok(Json(UserResponse::from(user)))
}

// DELETE /users/{user_id} - Delete user (admin only)
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Delete user",
    description = "Delete a user. Admins cannot delete themselves. Users who are party to any contract or own any \
                   transaction are kept for the record and cannot be deleted.",
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete self"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "User not found"),
        (status = 409, description = "User has live contracts, or contract or payment history"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresPermission<resource::Users, operation::DeleteAll>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    if user_id == current_user.id {
        return Err(Error::bad_request("Cannot delete your own account"));
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut tx);

    if repo.has_live_contracts(user_id).await? {
        return Err(Error::conflict("User has live contracts and cannot be deleted"));
    }
    if repo.has_history(user_id).await? {
        return Err(Error::conflict("User has contract or payment history and cannot be deleted"));
    }
    let deleted = repo.delete(user_id).await.map_err(|e| match e {
        // A contract or payment recorded since the check above
        DbError::ForeignKeyViolation { .. } => Error::conflict("User has contract or payment history and cannot be deleted"),
        other => other.into(),
    })?;
    if !deleted {
        return Err(Error::not_found("User", user_id));
    }

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    tracing::info!(deleted_by = %current_user.id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

// GET /users/{user_id}/profile - Public profile
#[utoipa::path(
    get,
    path = "/users/{user_id}/profile",
    tag = "users",
    summary = "Get profile",
    description = "Public profile of a user. Phone, date of birth and ID card number are only shown to the user and admins.",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or 'current' for current user"),
    ),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 401, description = "'current' requested without authentication"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    MaybeCurrentUser(current_user): MaybeCurrentUser,
) -> Result<Json<ProfileResponse>, Error> {
    let target_user_id = match (&user_id, &current_user) {
        (UserIdOrCurrent::Id(id), _) => *id,
        (UserIdOrCurrent::Current(_), Some(user)) => user.id,
        (UserIdOrCurrent::Current(_), None) => return Err(Error::Unauthenticated { message: None }),
    };
    let sees_private = current_user
        .as_ref()
        .is_some_and(|user| user.id == target_user_id || can_read_all_resources(user, Resource::Users));

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut pool_conn);
    let user = repo
        .get_by_id(target_user_id)
        .await?
        .ok_or_else(|| Error::not_found("User", target_user_id))?;
    let detail = repo.get_profile(target_user_id).await?;

    let profile = ProfileResponse::new(&user, detail);
    Ok(Json(if sees_private { profile } else { profile.redacted() }))
}

// PUT /users/{user_id}/profile - Replace profile
#[utoipa::path(
    put,
    path = "/users/{user_id}/profile",
    tag = "users",
    summary = "Update profile",
    description = "Replace the profile of the caller (or any user, for admins). Display name and avatar are mirrored onto the account.",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or 'current' for current user"),
    ),
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    _: RequiresPermission<resource::Profiles, operation::UpdateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, Error> {
    let target_user_id = user_id.resolve(current_user.id);
    if target_user_id != current_user.id && !has_permission(&current_user, Resource::Profiles, Operation::UpdateAll) {
        return Err(Error::not_found("User", target_user_id));
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let (user, detail) = Users::new(&mut pool_conn)
        .upsert_profile(target_user_id, &ProfileUpsertDBRequest::from(request))
        .await
        .map_err(|e| match e {
            DbError::NotFound => Error::not_found("User", target_user_id),
            other => other.into(),
        })?;

    Ok(Json(ProfileResponse::new(&user, Some(detail))))
}

// PATCH /users/{user_id}/verification - Identity verification (admin only)
#[utoipa::path(
    patch,
    path = "/users/{user_id}/verification",
    tag = "users",
    summary = "Set identity verification",
    description = "Mark a user's identity as verified or unverified (admin only)",
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID"),
    ),
    request_body = VerificationUpdate,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn set_verification(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresPermission<resource::Users, operation::UpdateAll>,
    ValidatedJson(request): ValidatedJson<VerificationUpdate>,
) -> Result<Json<ProfileResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut pool_conn);
    let user = repo.get_by_id(user_id).await?.ok_or_else(|| Error::not_found("User", user_id))?;
    let detail = repo.set_identity_verified(user_id, request.identity_verified).await?;

    tracing::info!(verified = request.identity_verified, "Identity verification updated");
    Ok(Json(ProfileResponse::new(&user, Some(detail))))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{contracts::ContractStatus, users::Role},
        db::handlers::{Repository, Users},
        test_utils::{
            bearer_for, create_test_area, create_test_contract, create_test_room, create_test_server, create_test_state,
            create_test_state_with_pool, create_test_user, force_contract_status, test_user,
        },
    };
    use axum::http::StatusCode;
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_list_users_requires_admin() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant, Role::Landlord]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server.get("/api/users").add_header("authorization", auth).await;
        response.assert_status(StatusCode::FORBIDDEN);

        server.get("/api/users").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_other_users_are_hidden_from_non_admins() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server
            .get(&format!("/api/users/{}", Uuid::new_v4()))
            .add_header("authorization", auth)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_cannot_drop_own_admin_role() {
        let state = create_test_state();
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let auth = bearer_for(&admin, &state.config);
        let server = create_test_server(state);

        let response = server
            .patch(&format!("/api/users/{}", admin.id))
            .add_header("authorization", auth)
            .json(&json!({"roles": ["tenant"]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_cannot_delete_self() {
        let state = create_test_state();
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let auth = bearer_for(&admin, &state.config);
        let server = create_test_server(state);

        let response = server
            .delete(&format!("/api/users/{}", admin.id))
            .add_header("authorization", auth)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_current_profile_requires_authentication() {
        let server = create_test_server(create_test_state());
        server
            .get("/api/users/current/profile")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_profile_update_is_validated() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server
            .put("/api/users/current/profile")
            .add_header("authorization", auth)
            .json(&json!({"phone": "abc", "id_card_number": "12345"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        let fields: Vec<&str> = json["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["phone", "id_card_number"]);
    }

    #[tokio::test]
    async fn test_tenant_cannot_edit_someone_elses_profile() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server
            .put(&format!("/api/users/{}/profile", Uuid::new_v4()))
            .add_header("authorization", auth)
            .json(&json!({"bio": "hello"}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verification_requires_admin() {
        let state = create_test_state();
        let landlord = test_user(&[Role::Tenant, Role::Landlord]);
        let auth = bearer_for(&landlord, &state.config);
        let server = create_test_server(state);

        let response = server
            .patch(&format!("/api/users/{}/verification", landlord.id))
            .add_header("authorization", auth)
            .json(&json!({"identity_verified": true}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_user_with_only_expired_contract_conflicts(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &area, "P1001").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
        force_contract_status(&pool, contract.id, ContractStatus::Expired, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap())
            .await;

        let state = create_test_state_with_pool(pool.clone());
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let auth = bearer_for(&admin, &state.config);
        let server = create_test_server(state);

        let response = server
            .delete(&format!("/api/users/{}", tenant.id))
            .add_header("authorization", auth)
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["message"], "User has contract or payment history and cannot be deleted");

        let mut conn = pool.acquire().await.unwrap();
        assert!(Users::new(&mut conn).get_by_id(tenant.id).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_user_without_history(pool: PgPool) {
        let newcomer = create_test_user(&pool, &[Role::Tenant]).await;

        let state = create_test_state_with_pool(pool.clone());
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let auth = bearer_for(&admin, &state.config);
        let server = create_test_server(state);

        server
            .delete(&format!("/api/users/{}", newcomer.id))
            .add_header("authorization", auth.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/api/users/{}", newcomer.id))
            .add_header("authorization", auth)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
