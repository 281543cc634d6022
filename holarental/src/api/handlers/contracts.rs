//! HTTP handlers for rental contracts and their lifecycle transitions.

use crate::{
    AppState,
    api::models::{
        contracts::{
            ContractCreate, ContractResponse, ExtensionDecision, ExtensionRequest, ListContractsQuery, TerminationRequest,
        },
        housing_areas::HousingAreaStatus,
        pagination::PaginatedResponse,
        rooms::RoomStatus,
        users::CurrentUser,
    },
    auth::permissions::{RequiresPermission, has_permission, operation, resource},
    db::{
        errors::DbError,
        handlers::{Contracts, HousingAreas, Repository, Rooms, contracts::ContractFilter},
        models::contracts::{ContractCreateDBRequest, ContractDBResponse},
    },
    errors::Error,
    lifecycle::{self, Event, Party},
    types::{ContractId, Operation, Resource, abbrev_uuid},
    validation::{ValidatedJson, Validator},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Months, Utc};
use sqlx::PgConnection;

fn sees_all_contracts(user: &CurrentUser) -> bool {
    has_permission(user, Resource::Contracts, Operation::ReadAll)
}

/// Load a contract the caller is a party to. Admins see every contract; anyone else gets 404.
async fn load_visible_contract(
    conn: &mut PgConnection,
    id: ContractId,
    user: &CurrentUser,
) -> Result<ContractDBResponse, Error> {
    Contracts::new(conn)
        .get_by_id(id)
        .await?
        .filter(|contract| contract.is_party(user.id) || sees_all_contracts(user))
        .ok_or_else(|| Error::not_found("Contract", id))
}

/// The side the caller acts on. Admins who are not a party act as [`Party::Admin`], which the
/// lifecycle rejects for party-only events.
fn acting_party(contract: &ContractDBResponse, user: &CurrentUser) -> Party {
    Party::of(contract, user.id).unwrap_or(Party::Admin)
}

fn stale_write(err: DbError) -> Error {
    match err {
        DbError::StaleWrite { entity_type, .. } if entity_type == "room" => {
            Error::conflict("The room is no longer available")
        }
        DbError::StaleWrite { .. } => Error::conflict("The contract was changed by another request, please retry"),
        DbError::UniqueViolation { .. } => Error::conflict("This room already has a live contract"),
        other => other.into(),
    }
}

/// Apply a lifecycle event to a contract the caller can see and persist it.
async fn transition_contract(
    state: &AppState,
    id: ContractId,
    user: &CurrentUser,
    event: Event,
) -> Result<ContractResponse, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let contract = load_visible_contract(&mut tx, id, user).await?;

    if let Event::RequestExtension { requested_end_date, .. } = &event {
        let mut v = Validator::new();
        v.check(
            *requested_end_date > contract.end_date,
            "requested_end_date",
            "must be after the current end date",
        );
        v.finish()?;
    }

    let party = acting_party(&contract, user);
    let applied = lifecycle::apply(&contract, &event, party, Some(user.id), Utc::now())?;
    let updated = Contracts::new(&mut tx)
        .apply_transition(&contract, applied)
        .await
        .map_err(stale_write)?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(
        contract_id = %abbrev_uuid(&id),
        %party,
        from = %contract.status,
        to = %updated.status,
        "Contract transition applied"
    );
    Ok(ContractResponse::from(updated))
}

#[utoipa::path(
    post,
    path = "/contracts",
    tag = "contracts",
    summary = "Request a contract",
    description = "The tenant requests a contract for an available room. Rent and deposit are copied from the room.",
    request_body = ContractCreate,
    responses(
        (status = 201, description = "Contract created in pending status", body = ContractResponse),
        (status = 400, description = "Validation failed, or the caller owns the room"),
        (status = 404, description = "Room not found"),
        (status = 409, description = "Room is not available"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_contract(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Contracts, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<ContractCreate>,
) -> Result<(StatusCode, Json<ContractResponse>), Error> {
    let min_months = state.config.marketplace.min_contract_months;
    let earliest_end = request
        .start_date
        .checked_add_months(Months::new(min_months))
        .ok_or_else(|| Error::bad_request("start_date is out of range"))?;
    let mut v = Validator::new();
    v.check(
        request.end_date >= earliest_end,
        "end_date",
        &format!("contract must run for at least {min_months} month(s)"),
    );
    v.finish()?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let room = Rooms::new(&mut tx)
        .get_by_id(request.room_id)
        .await?
        .ok_or_else(|| Error::not_found("Room", request.room_id))?;
    let area = HousingAreas::new(&mut tx)
        .get_by_id(room.housing_area_id)
        .await?
        .filter(|area| area.status == HousingAreaStatus::Approved)
        .ok_or_else(|| Error::not_found("Room", request.room_id))?;

    if area.owner_id == current_user.id {
        return Err(Error::bad_request("You cannot rent a room in your own housing area"));
    }
    if room.status != RoomStatus::Available {
        return Err(Error::conflict("The room is not available for rent"));
    }

    let contract = Contracts::new(&mut tx)
        .create(&ContractCreateDBRequest {
            room_id: room.id,
            tenant_id: current_user.id,
            owner_id: area.owner_id,
            start_date: request.start_date,
            end_date: request.end_date,
            monthly_rent: room.price_per_month,
            deposit_amount: room.deposit_amount,
            terms: request.terms,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(contract_id = %abbrev_uuid(&contract.id), tenant_id = %abbrev_uuid(&current_user.id), "Contract requested");
    Ok((StatusCode::CREATED, Json(ContractResponse::from(contract))))
}

#[utoipa::path(
    get,
    path = "/contracts",
    tag = "contracts",
    summary = "List contracts",
    description = "Contracts where the caller is tenant or owner. Admins see every contract.",
    params(ListContractsQuery),
    responses(
        (status = 200, description = "Contracts", body = PaginatedResponse<ContractResponse>),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_contracts(
    State(state): State<AppState>,
    Query(query): Query<ListContractsQuery>,
    _: RequiresPermission<resource::Contracts, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<ContractResponse>>, Error> {
    let (skip, limit) = query.pagination.params();

    // A role filter always narrows to the caller's own side, admin or not
    let party = if sees_all_contracts(&current_user) && query.role.is_none() {
        None
    } else {
        Some(current_user.id)
    };
    let filter = ContractFilter {
        skip,
        limit,
        party,
        role: query.role,
        status: query.status,
        room_id: query.room_id,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Contracts::new(&mut pool_conn);
    let contracts = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        contracts.into_iter().map(ContractResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/contracts/{id}",
    tag = "contracts",
    summary = "Get contract",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    responses(
        (status = 200, description = "Contract", body = ContractResponse),
        (status = 404, description = "Not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn get_contract(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<ContractResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let contract = load_visible_contract(&mut pool_conn, id, &current_user).await?;
    Ok(Json(ContractResponse::from(contract)))
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/sign",
    tag = "contracts",
    summary = "Sign contract",
    description = "Each party signs once. The second signature reserves the room.",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    responses(
        (status = 200, description = "Signed", body = ContractResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already signed, not pending, or the room is no longer available"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn sign_contract(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
) -> Result<Json<ContractResponse>, Error> {
    transition_contract(&state, id, &current_user, Event::Sign).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/cancel",
    tag = "contracts",
    summary = "Cancel contract",
    description = "Either party cancels a pending or signed contract. A reserved room is released.",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    responses(
        (status = 200, description = "Cancelled", body = ContractResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Contract can no longer be cancelled"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn cancel_contract(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
) -> Result<Json<ContractResponse>, Error> {
    transition_contract(&state, id, &current_user, Event::Cancel).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/extension",
    tag = "contracts",
    summary = "Request extension",
    description = "The tenant asks to move the end date of an active contract",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    request_body = ExtensionRequest,
    responses(
        (status = 200, description = "Extension requested", body = ContractResponse),
        (status = 400, description = "Requested date is not after the current end date"),
        (status = 403, description = "Only the tenant may request an extension"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Contract is not active"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn request_extension(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<ExtensionRequest>,
) -> Result<Json<ContractResponse>, Error> {
    let event = Event::RequestExtension {
        requested_end_date: request.requested_end_date,
        note: request.note.map(|note| note.trim().to_string()).filter(|note| !note.is_empty()),
    };
    transition_contract(&state, id, &current_user, event).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/extension/respond",
    tag = "contracts",
    summary = "Respond to extension",
    description = "The owner approves (end date moves) or rejects a pending extension",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    request_body = ExtensionDecision,
    responses(
        (status = 200, description = "Extension decided", body = ContractResponse),
        (status = 403, description = "Only the owner may respond"),
        (status = 404, description = "Not found"),
        (status = 409, description = "No extension pending"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn respond_extension(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<ExtensionDecision>,
) -> Result<Json<ContractResponse>, Error> {
    let event = if request.approve {
        Event::ApproveExtension
    } else {
        Event::RejectExtension
    };
    transition_contract(&state, id, &current_user, event).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/termination",
    tag = "contracts",
    summary = "Request termination",
    description = "Either party asks to end an active contract early. The other party confirms.",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    request_body = TerminationRequest,
    responses(
        (status = 200, description = "Termination requested", body = ContractResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Contract is not active"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn request_termination(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<TerminationRequest>,
) -> Result<Json<ContractResponse>, Error> {
    let event = Event::RequestTermination {
        reason: request.reason.trim().to_string(),
    };
    transition_contract(&state, id, &current_user, event).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/termination/confirm",
    tag = "contracts",
    summary = "Confirm termination",
    description = "The party who did not request the termination confirms it. The room becomes available.",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    responses(
        (status = 200, description = "Terminated", body = ContractResponse),
        (status = 403, description = "The requester cannot confirm their own request"),
        (status = 404, description = "Not found"),
        (status = 409, description = "No termination pending"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn confirm_termination(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
) -> Result<Json<ContractResponse>, Error> {
    transition_contract(&state, id, &current_user, Event::ConfirmTermination)
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/contracts/{id}/termination/withdraw",
    tag = "contracts",
    summary = "Withdraw termination",
    description = "The requester withdraws a pending termination and the contract returns to active",
    params(
        ("id" = uuid::Uuid, Path, description = "Contract ID"),
    ),
    responses(
        (status = 200, description = "Withdrawn", body = ContractResponse),
        (status = 403, description = "Only the requester may withdraw"),
        (status = 404, description = "Not found"),
        (status = 409, description = "No termination pending"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(contract_id = %id))]
pub async fn withdraw_termination(
    State(state): State<AppState>,
    Path(id): Path<ContractId>,
    _: RequiresPermission<resource::Contracts, operation::UpdateOwn>,
    current_user: CurrentUser,
) -> Result<Json<ContractResponse>, Error> {
    transition_contract(&state, id, &current_user, Event::WithdrawTermination)
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::{contracts::ContractStatus, users::Role},
        test_utils::{bearer_for, create_test_server, create_test_state, test_user},
    };
    use chrono::{Days, NaiveDate};
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn contract(tenant: &CurrentUser) -> ContractDBResponse {
        let now = Utc::now();
        ContractDBResponse {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            tenant_id: tenant.id,
            owner_id: Uuid::new_v4(),
            start_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2027, 5, 1).unwrap(),
            monthly_rent: 4_000_000,
            deposit_amount: 4_000_000,
            terms: None,
            status: ContractStatus::Pending,
            tenant_signed_at: None,
            owner_signed_at: None,
            requested_end_date: None,
            extension_note: None,
            termination_requested_by: None,
            termination_reason: None,
            terminated_at: None,
            cancelled_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_acting_party() {
        let tenant = test_user(&[Role::Tenant]);
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let c = contract(&tenant);
        assert_eq!(acting_party(&c, &tenant), Party::Tenant);
        assert_eq!(acting_party(&c, &admin), Party::Admin);
        assert!(sees_all_contracts(&admin));
        assert!(!sees_all_contracts(&tenant));
    }

    #[test]
    fn test_room_race_maps_to_conflict() {
        let err = stale_write(DbError::stale("room", Uuid::new_v4()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "The room is no longer available");

        let err = stale_write(DbError::stale("contract", Uuid::new_v4()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_contracts_require_authentication() {
        let server = create_test_server(create_test_state());
        server.get("/api/contracts").await.assert_status(StatusCode::UNAUTHORIZED);
        server
            .post(&format!("/api/contracts/{}/sign", Uuid::new_v4()))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_rejects_past_and_inverted_dates() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);
        let today = crate::types::vietnam_today();

        let response = server
            .post("/api/contracts")
            .add_header("authorization", auth.clone())
            .json(&json!({
                "room_id": Uuid::new_v4(),
                "start_date": today - Days::new(3),
                "end_date": today - Days::new(5),
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["code"], "validation_failed");
        assert_eq!(json["errors"][0]["field"], "start_date");
        assert_eq!(json["errors"][1]["field"], "end_date");
    }

    #[tokio::test]
    async fn test_create_enforces_minimum_duration() {
        let mut config = crate::test_utils::create_test_config();
        config.marketplace.min_contract_months = 3;
        let state = crate::test_utils::create_test_state_with(config);
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);
        let today = crate::types::vietnam_today();

        let response = server
            .post("/api/contracts")
            .add_header("authorization", auth)
            .json(&json!({
                "room_id": Uuid::new_v4(),
                "start_date": today + Days::new(1),
                "end_date": today + Days::new(40),
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["errors"][0]["field"], "end_date");
    }

    #[tokio::test]
    async fn test_termination_reason_is_required() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server
            .post(&format!("/api/contracts/{}/termination", Uuid::new_v4()))
            .add_header("authorization", auth)
            .json(&json!({"reason": ""}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["errors"][0]["field"], "reason");
    }
}
