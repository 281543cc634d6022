use crate::{
    AppState,
    api::{
        handlers::housing_areas::{can_see_area, check_image_count, load_owned_area},
        models::{
            pagination::{PaginatedResponse, Pagination},
            rooms::{ListRoomsQuery, RoomCreate, RoomResponse, RoomUpdate},
            users::CurrentUser,
        },
    },
    auth::{
        current_user::MaybeCurrentUser,
        permissions::{RequiresPermission, operation, resource},
    },
    db::{
        errors::DbError,
        handlers::{HousingAreas, Repository, Rooms, rooms::RoomFilter},
        models::rooms::{RoomCreateDBRequest, RoomDBResponse, RoomUpdateDBRequest},
    },
    errors::Error,
    types::{HousingAreaId, Operation, RoomId},
    validation::ValidatedJson,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;

/// Load a room whose area the caller owns (or may manage as admin).
async fn load_owned_room(
    conn: &mut PgConnection,
    id: RoomId,
    user: &CurrentUser,
    all_operation: Operation,
) -> Result<RoomDBResponse, Error> {
    let room = Rooms::new(&mut *conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Room", id))?;
    let mut areas = HousingAreas::new(&mut *conn);
    load_owned_area(&mut areas, room.housing_area_id, user, all_operation)
        .await
        .map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found("Room", id),
            other => other,
        })?;
    Ok(room)
}

#[utoipa::path(
    post,
    path = "/housing-areas/{id}/rooms",
    tag = "rooms",
    summary = "Create room",
    description = "Add a room to a housing area owned by the caller",
    params(
        ("id" = uuid::Uuid, Path, description = "Housing area ID"),
    ),
    request_body = RoomCreate,
    responses(
        (status = 201, description = "Room created", body = RoomResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Not the owner of the housing area"),
        (status = 404, description = "Housing area not found"),
        (status = 409, description = "A room with this name already exists in the area"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(area_id = %area_id))]
pub async fn create_room(
    State(state): State<AppState>,
    Path(area_id): Path<HousingAreaId>,
    _: RequiresPermission<resource::Rooms, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<RoomCreate>,
) -> Result<(StatusCode, Json<RoomResponse>), Error> {
    check_image_count(Some(&request.images), state.config.marketplace.max_images)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    load_owned_area(&mut HousingAreas::new(&mut tx), area_id, &current_user, Operation::CreateAll).await?;

    let room = Rooms::new(&mut tx).create(&RoomCreateDBRequest::new(area_id, request)).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(room_id = %room.id, "Room created");
    Ok((StatusCode::CREATED, Json(RoomResponse::from(room))))
}

#[utoipa::path(
    get,
    path = "/housing-areas/{id}/rooms",
    tag = "rooms",
    summary = "List rooms of a housing area",
    params(
        ("id" = uuid::Uuid, Path, description = "Housing area ID"),
        Pagination,
    ),
    responses(
        (status = 200, description = "Rooms of the area", body = PaginatedResponse<RoomResponse>),
        (status = 404, description = "Housing area not found or not visible"),
    )
)]
#[tracing::instrument(skip_all, fields(area_id = %area_id))]
pub async fn list_area_rooms(
    State(state): State<AppState>,
    Path(area_id): Path<HousingAreaId>,
    Query(pagination): Query<Pagination>,
    MaybeCurrentUser(current_user): MaybeCurrentUser,
) -> Result<Json<PaginatedResponse<RoomResponse>>, Error> {
    let (skip, limit) = pagination.params();

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    HousingAreas::new(&mut pool_conn)
        .get_by_id(area_id)
        .await?
        .filter(|area| can_see_area(area, current_user.as_ref()))
        .ok_or_else(|| Error::not_found("HousingArea", area_id))?;

    let filter = RoomFilter {
        skip,
        limit,
        housing_area_id: Some(area_id),
        ..Default::default()
    };
    let mut repo = Rooms::new(&mut pool_conn);
    let rooms = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        rooms.into_iter().map(RoomResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    summary = "Search rooms",
    description = "Search rooms of approved housing areas. Rooms of boosted areas come first.",
    params(ListRoomsQuery),
    responses(
        (status = 200, description = "Matching rooms", body = PaginatedResponse<RoomResponse>),
        (status = 400, description = "Invalid price range"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn search_rooms(
    State(state): State<AppState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<PaginatedResponse<RoomResponse>>, Error> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price)
        && min > max
    {
        return Err(Error::bad_request("min_price cannot be greater than max_price"));
    }
    let (skip, limit) = query.pagination.params();
    let facilities = query.facilities();

    let filter = RoomFilter {
        skip,
        limit,
        approved_only: true,
        city: query.city,
        district: query.district,
        min_price: query.min_price,
        max_price: query.max_price,
        min_area: query.min_area,
        min_occupants: query.max_occupants,
        status: query.status,
        facilities,
        search: query.search,
        ..Default::default()
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Rooms::new(&mut pool_conn);
    let rooms = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        rooms.into_iter().map(RoomResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    summary = "Get room",
    params(
        ("id" = uuid::Uuid, Path, description = "Room ID"),
    ),
    responses(
        (status = 200, description = "Room", body = RoomResponse),
        (status = 404, description = "Not found or not visible"),
    )
)]
#[tracing::instrument(skip_all, fields(room_id = %id))]
pub async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<RoomId>,
    MaybeCurrentUser(current_user): MaybeCurrentUser,
) -> Result<Json<RoomResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let room = Rooms::new(&mut pool_conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Room", id))?;
    HousingAreas::new(&mut pool_conn)
        .get_by_id(room.housing_area_id)
        .await?
        .filter(|area| can_see_area(area, current_user.as_ref()))
        .ok_or_else(|| Error::not_found("Room", id))?;

    Ok(Json(RoomResponse::from(room)))
}

#[utoipa::path(
    patch,
    path = "/rooms/{id}",
    tag = "rooms",
    summary = "Update room",
    description = "Partial update by the area owner or an admin. Status may only be switched between available and \
                   maintenance, and not while the room is reserved or rented.",
    params(
        ("id" = uuid::Uuid, Path, description = "Room ID"),
    ),
    request_body = RoomUpdate,
    responses(
        (status = 200, description = "Updated room", body = RoomResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Room status is controlled by a contract"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(room_id = %id))]
pub async fn update_room(
    State(state): State<AppState>,
    Path(id): Path<RoomId>,
    _: RequiresPermission<resource::Rooms, operation::UpdateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<RoomUpdate>,
) -> Result<Json<RoomResponse>, Error> {
    check_image_count(request.images.as_deref(), state.config.marketplace.max_images)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let room = load_owned_room(&mut tx, id, &current_user, Operation::UpdateAll).await?;

    let mut update = RoomUpdateDBRequest::from(request);
    let new_status = update.status.take();
    let mut repo = Rooms::new(&mut tx);

    if let Some(status) = new_status
        && status != room.status
    {
        if !room.status.is_manually_settable() {
            return Err(Error::conflict(format!(
                "Room is {} under a contract and its status cannot be changed by hand",
                room.status
            )));
        }
        // A contract may reserve the room between the read and this write
        if !repo.compare_and_set_status(id, room.status, status).await? {
            return Err(Error::conflict("Room status changed concurrently, please retry"));
        }
    }

    let updated = if update_has_fields(&update) {
        repo.update(id, &update).await?
    } else {
        repo.get_by_id(id).await?.ok_or_else(|| Error::not_found("Room", id))?
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(RoomResponse::from(updated)))
}

fn update_has_fields(update: &RoomUpdateDBRequest) -> bool {
    update.name.is_some()
        || update.description.is_some()
        || update.area_m2.is_some()
        || update.price_per_month.is_some()
        || update.deposit_amount.is_some()
        || update.electricity_price.is_some()
        || update.water_price.is_some()
        || update.max_occupants.is_some()
        || update.facilities.is_some()
        || update.images.is_some()
        || update.status.is_some()
}

#[utoipa::path(
    delete,
    path = "/rooms/{id}",
    tag = "rooms",
    summary = "Delete room",
    params(
        ("id" = uuid::Uuid, Path, description = "Room ID"),
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Room has a live contract or contract history"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(room_id = %id))]
pub async fn delete_room(
    State(state): State<AppState>,
    Path(id): Path<RoomId>,
    _: RequiresPermission<resource::Rooms, operation::DeleteOwn>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    load_owned_room(&mut tx, id, &current_user, Operation::DeleteAll).await?;

    let mut repo = Rooms::new(&mut tx);
    if repo.has_live_contract(id).await? {
        return Err(Error::conflict("Room has a live contract"));
    }
    if repo.has_history(id).await? {
        return Err(Error::conflict("Room has contract history and cannot be deleted"));
    }
    repo.delete(id).await.map_err(|e| match e {
        DbError::ForeignKeyViolation { .. } => Error::conflict("Room is referenced by a contract"),
        other => other.into(),
    })?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(deleted_by = %current_user.id, "Room deleted");
    Ok(StatusCode::NO_CONTENT)
}
