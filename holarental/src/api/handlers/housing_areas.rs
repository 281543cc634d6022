use crate::{
    AppState,
    api::models::{
        housing_areas::{
            HousingAreaCreate, HousingAreaResponse, HousingAreaReview, HousingAreaStatus, HousingAreaUpdate, ListHousingAreasQuery,
        },
        pagination::PaginatedResponse,
        users::CurrentUser,
    },
    auth::{
        current_user::MaybeCurrentUser,
        permissions::{RequiresPermission, has_permission, operation, resource},
    },
    db::{
        errors::DbError,
        handlers::{
            HousingAreas, Repository,
            housing_areas::{AreaVisibility, HousingAreaFilter},
        },
        models::housing_areas::{HousingAreaCreateDBRequest, HousingAreaDBResponse, HousingAreaUpdateDBRequest},
    },
    errors::Error,
    types::{HousingAreaId, Operation, Resource},
    validation::{ValidatedJson, Validator},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

/// Listings carry at most `max_images` image URLs.
pub(super) fn check_image_count(images: Option<&[String]>, max_images: usize) -> Result<(), Error> {
    let mut v = Validator::new();
    if let Some(images) = images {
        v.check(images.len() <= max_images, "images", &format!("must contain at most {max_images} entries"));
    }
    v.finish()
}

/// Listings are public, so moderation rights decide who sees unapproved ones.
pub(super) fn moderates_listings(user: &CurrentUser) -> bool {
    has_permission(user, Resource::HousingAreas, Operation::UpdateAll)
}

/// Whether the caller may see an area that is not approved.
pub(super) fn can_see_area(area: &HousingAreaDBResponse, user: Option<&CurrentUser>) -> bool {
    area.status == HousingAreaStatus::Approved
        || user.is_some_and(|user| user.id == area.owner_id || moderates_listings(user))
}

/// Load an area the caller may modify. Areas the caller cannot see are reported missing.
pub(super) async fn load_owned_area(
    repo: &mut HousingAreas<'_>,
    id: HousingAreaId,
    user: &CurrentUser,
    all_operation: Operation,
) -> Result<HousingAreaDBResponse, Error> {
    let area = repo.get_by_id(id).await?.ok_or_else(|| Error::not_found("HousingArea", id))?;
    if area.owner_id == user.id || has_permission(user, Resource::HousingAreas, all_operation) {
        return Ok(area);
    }
    if can_see_area(&area, Some(user)) {
        Err(Error::Forbidden {
            message: "Only the owner of this housing area can change it".to_string(),
        })
    } else {
        Err(Error::not_found("HousingArea", id))
    }
}

fn restricted_delete(err: Error) -> Error {
    match err {
        Error::Database(DbError::ForeignKeyViolation { .. }) => {
            Error::conflict("Rooms of this housing area have contract history and cannot be deleted")
        }
        other => other,
    }
}

#[utoipa::path(
    post,
    path = "/housing-areas",
    tag = "housing_areas",
    summary = "Create housing area",
    description = "Create a listing owned by the caller. It starts pending when listings require approval.",
    request_body = HousingAreaCreate,
    responses(
        (status = 201, description = "Housing area created", body = HousingAreaResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Landlord role required"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_housing_area(
    State(state): State<AppState>,
    _: RequiresPermission<resource::HousingAreas, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<HousingAreaCreate>,
) -> Result<(StatusCode, Json<HousingAreaResponse>), Error> {
    check_image_count(Some(&request.images), state.config.marketplace.max_images)?;

    let status = if state.config.marketplace.listings_require_approval {
        HousingAreaStatus::Pending
    } else {
        HousingAreaStatus::Approved
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let area = HousingAreas::new(&mut pool_conn)
        .create(&HousingAreaCreateDBRequest::new(current_user.id, request, status))
        .await?;

    tracing::info!(area_id = %area.id, status = ?area.status, "Housing area created");
    Ok((StatusCode::CREATED, Json(HousingAreaResponse::from(area))))
}

#[utoipa::path(
    get,
    path = "/housing-areas",
    tag = "housing_areas",
    summary = "List housing areas",
    description = "Approved listings, boosted first. Owners also see their own listings in any status when filtering by owner_id.",
    params(ListHousingAreasQuery),
    responses(
        (status = 200, description = "Paginated housing areas", body = PaginatedResponse<HousingAreaResponse>),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_housing_areas(
    State(state): State<AppState>,
    Query(query): Query<ListHousingAreasQuery>,
    MaybeCurrentUser(current_user): MaybeCurrentUser,
) -> Result<Json<PaginatedResponse<HousingAreaResponse>>, Error> {
    let (skip, limit) = query.pagination.params();

    let visibility = match &current_user {
        Some(user) if moderates_listings(user) => AreaVisibility::All,
        Some(user) if query.owner_id == Some(user.id) => AreaVisibility::ApprovedOr(user.id),
        _ => AreaVisibility::Approved,
    };
    // A status filter only means something when other statuses are visible
    let status = match visibility {
        AreaVisibility::Approved => None,
        _ => query.status,
    };

    let filter = HousingAreaFilter {
        city: query.city,
        district: query.district,
        search: query.search,
        owner_id: query.owner_id,
        status,
        ..HousingAreaFilter::new(skip, limit, visibility)
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = HousingAreas::new(&mut pool_conn);
    let areas = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        areas.into_iter().map(HousingAreaResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/housing-areas/{id}",
    tag = "housing_areas",
    summary = "Get housing area",
    params(
        ("id" = uuid::Uuid, Path, description = "Housing area ID"),
    ),
    responses(
        (status = 200, description = "Housing area", body = HousingAreaResponse),
        (status = 404, description = "Not found or not visible"),
    )
)]
#[tracing::instrument(skip_all, fields(area_id = %id))]
pub async fn get_housing_area(
    State(state): State<AppState>,
    Path(id): Path<HousingAreaId>,
    MaybeCurrentUser(current_user): MaybeCurrentUser,
) -> Result<Json<HousingAreaResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let area = HousingAreas::new(&mut pool_conn)
        .get_by_id(id)
        .await?
        .filter(|area| can_see_area(area, current_user.as_ref()))
        .ok_or_else(|| Error::not_found("HousingArea", id))?;

    Ok(Json(HousingAreaResponse::from(area)))
}

#[utoipa::path(
    patch,
    path = "/housing-areas/{id}",
    tag = "housing_areas",
    summary = "Update housing area",
    description = "Partial update by the owner or an admin. Editing a rejected listing sends it back for review; \
                   owners may switch an approved listing between approved and hidden.",
    params(
        ("id" = uuid::Uuid, Path, description = "Housing area ID"),
    ),
    request_body = HousingAreaUpdate,
    responses(
        (status = 200, description = "Updated housing area", body = HousingAreaResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Status cannot be changed from the current one"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(area_id = %id))]
pub async fn update_housing_area(
    State(state): State<AppState>,
    Path(id): Path<HousingAreaId>,
    _: RequiresPermission<resource::HousingAreas, operation::UpdateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<HousingAreaUpdate>,
) -> Result<Json<HousingAreaResponse>, Error> {
    check_image_count(request.images.as_deref(), state.config.marketplace.max_images)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = HousingAreas::new(&mut tx);
    let area = load_owned_area(&mut repo, id, &current_user, Operation::UpdateAll).await?;

    let mut update = HousingAreaUpdateDBRequest::from(request);
    if update.status.is_some() && !matches!(area.status, HousingAreaStatus::Approved | HousingAreaStatus::Hidden) {
        return Err(Error::conflict(format!(
            "Only approved listings can be shown or hidden; this one is {}",
            area.status
        )));
    }
    if area.status == HousingAreaStatus::Rejected && area.owner_id == current_user.id {
        update.status = Some(if state.config.marketplace.listings_require_approval {
            HousingAreaStatus::Pending
        } else {
            HousingAreaStatus::Approved
        });
    }

    let updated = repo.update(id, &update).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(HousingAreaResponse::from(updated)))
}

#[utoipa::path(
    delete,
    path = "/housing-areas/{id}",
    tag = "housing_areas",
    summary = "Delete housing area",
    description = "Delete a listing and its rooms. Refused once any room has been under contract.",
    params(
        ("id" = uuid::Uuid, Path, description = "Housing area ID"),
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
        (status = 409, description = "A room has a live contract or contract history"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(area_id = %id))]
pub async fn delete_housing_area(
    State(state): State<AppState>,
    Path(id): Path<HousingAreaId>,
    _: RequiresPermission<resource::HousingAreas, operation::DeleteOwn>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = HousingAreas::new(&mut tx);
    load_owned_area(&mut repo, id, &current_user, Operation::DeleteAll).await?;

    if repo.has_live_contracts(id).await? {
        return Err(Error::conflict("A room of this housing area has a live contract"));
    }
    if repo.has_history(id).await? {
        return Err(Error::conflict("Rooms of this housing area have contract history and cannot be deleted"));
    }
    repo.delete(id).await.map_err(|e| restricted_delete(e.into()))?;
    tx.commit().await.map_err(|e| restricted_delete(Error::Database(e.into())))?;

    tracing::info!(deleted_by = %current_user.id, "Housing area deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    patch,
    path = "/housing-areas/{id}/review",
    tag = "housing_areas",
    summary = "Review housing area",
    description = "Approve or reject a listing (admin only). Rejections need a note.",
    params(
        ("id" = uuid::Uuid, Path, description = "Housing area ID"),
    ),
    request_body = HousingAreaReview,
    responses(
        (status = 200, description = "Reviewed housing area", body = HousingAreaResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(area_id = %id))]
pub async fn review_housing_area(
    State(state): State<AppState>,
    Path(id): Path<HousingAreaId>,
    _: RequiresPermission<resource::HousingAreas, operation::UpdateAll>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<HousingAreaReview>,
) -> Result<Json<HousingAreaResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let note = request.note.as_deref().map(str::trim).filter(|note| !note.is_empty());
    let area = HousingAreas::new(&mut pool_conn)
        .review(id, request.status, note)
        .await
        .map_err(|e| match e {
            DbError::NotFound => Error::not_found("HousingArea", id),
            other => other.into(),
        })?;

    tracing::info!(status = ?area.status, reviewer = %current_user.id, "Housing area reviewed");
    Ok(Json(HousingAreaResponse::from(area)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        test_utils::{bearer_for, create_test_server, create_test_state, test_user},
    };
    use chrono::Utc;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn area(owner_id: uuid::Uuid, status: HousingAreaStatus) -> HousingAreaDBResponse {
        HousingAreaDBResponse {
            id: Uuid::new_v4(),
            owner_id,
            name: "Nhà trọ Bình Thạnh".to_string(),
            description: None,
            address: "45 Xô Viết Nghệ Tĩnh".to_string(),
            ward: None,
            district: Some("Bình Thạnh".to_string()),
            city: "Hồ Chí Minh".to_string(),
            latitude: None,
            longitude: None,
            amenities: vec![],
            images: vec![],
            status,
            review_note: None,
            boosted_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_visibility_of_unapproved_areas() {
        let landlord = test_user(&[Role::Tenant, Role::Landlord]);
        let stranger = test_user(&[Role::Tenant]);
        let admin = test_user(&[Role::Tenant, Role::Admin]);

        let pending = area(landlord.id, HousingAreaStatus::Pending);
        assert!(can_see_area(&pending, Some(&landlord)));
        assert!(can_see_area(&pending, Some(&admin)));
        assert!(!can_see_area(&pending, Some(&stranger)));
        assert!(!can_see_area(&pending, None));

        let approved = area(landlord.id, HousingAreaStatus::Approved);
        assert!(can_see_area(&approved, None));
    }

    #[test]
    fn test_image_count_uses_configured_cap() {
        let images = vec!["https://cdn.holarental.vn/1.jpg".to_string(); 3];
        assert!(check_image_count(Some(&images), 3).is_ok());
        assert!(check_image_count(Some(&images), 2).is_err());
        assert!(check_image_count(None, 0).is_ok());
    }

    #[tokio::test]
    async fn test_tenant_cannot_create_areas() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server
            .post("/api/housing-areas")
            .add_header("authorization", auth)
            .json(&json!({"name": "Nhà trọ", "address": "1 Lê Lợi", "city": "Đà Nẵng"}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_create_area_is_validated() {
        let state = create_test_state();
        let landlord = test_user(&[Role::Tenant, Role::Landlord]);
        let auth = bearer_for(&landlord, &state.config);
        let server = create_test_server(state);

        let response = server
            .post("/api/housing-areas")
            .add_header("authorization", auth)
            .json(&json!({"name": "", "address": "1 Lê Lợi", "city": "Đà Nẵng", "latitude": 16.05}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["errors"][0]["field"], "name");
        assert_eq!(json["errors"][1]["field"], "longitude");
    }

    #[tokio::test]
    async fn test_review_requires_admin_and_a_rejection_note() {
        let state = create_test_state();
        let landlord = test_user(&[Role::Tenant, Role::Landlord]);
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let landlord_auth = bearer_for(&landlord, &state.config);
        let admin_auth = bearer_for(&admin, &state.config);
        let server = create_test_server(state);
        let path = format!("/api/housing-areas/{}/review", Uuid::new_v4());

        server
            .patch(&path)
            .add_header("authorization", landlord_auth)
            .json(&json!({"status": "approved"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .patch(&path)
            .add_header("authorization", admin_auth)
            .json(&json!({"status": "rejected"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
