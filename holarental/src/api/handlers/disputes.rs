//! HTTP handlers for contract disputes.
//!
//! Opening a dispute moves the contract to `disputed` and records the status it had, so that
//! withdrawing or dismissing the dispute can put it back.

use crate::{
    AppState,
    api::{
        handlers::transactions::check_refund_cap,
        models::{
            disputes::{DisputeCreate, DisputeResolution, DisputeResolve, DisputeResponse, DisputeStatus, ListDisputesQuery},
            pagination::PaginatedResponse,
            users::CurrentUser,
        },
    },
    auth::permissions::{RequiresPermission, can_read_all_resources, operation, resource},
    db::{
        errors::DbError,
        handlers::{Contracts, Disputes, Transactions, disputes::DisputeFilter},
        models::{
            contracts::ContractDBResponse,
            disputes::{DisputeCreateDBRequest, DisputeDBResponse, DisputeResolutionDBRequest},
            transactions::TransactionCreateDBRequest,
        },
    },
    errors::{Error, Result},
    lifecycle::{self, Event, Party},
    types::{DisputeId, Resource, abbrev_uuid},
    validation::ValidatedJson,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use sqlx::PgConnection;

fn sees_all_disputes(user: &CurrentUser) -> bool {
    can_read_all_resources(user, Resource::Disputes)
}

async fn load_visible_dispute(conn: &mut PgConnection, id: DisputeId, user: &CurrentUser) -> Result<DisputeDBResponse> {
    Disputes::new(conn)
        .get_by_id(id)
        .await?
        .filter(|d| d.raised_by == user.id || d.respondent_id == user.id || sees_all_disputes(user))
        .ok_or_else(|| Error::not_found("Dispute", id))
}

async fn load_contract(conn: &mut PgConnection, dispute: &DisputeDBResponse) -> Result<ContractDBResponse> {
    Contracts::new(conn)
        .get_by_id(dispute.contract_id)
        .await?
        .ok_or_else(|| Error::not_found("Contract", dispute.contract_id))
}

fn contract_write_conflict(err: DbError) -> Error {
    match err {
        DbError::StaleWrite { .. } => Error::conflict("The contract was changed by another request, please retry"),
        other => other.into(),
    }
}

/// Refund due under a `refund_tenant` resolution: the requested amount, or everything still
/// refundable when none was given. `None` when nothing is left to refund.
fn refund_due(requested: Option<i64>, refundable: i64) -> Result<Option<i64>> {
    match requested {
        Some(amount) => {
            check_refund_cap(amount, refundable)?;
            Ok(Some(amount))
        }
        None if refundable > 0 => Ok(Some(refundable)),
        None => Ok(None),
    }
}

#[utoipa::path(
    post,
    path = "/disputes",
    tag = "disputes",
    summary = "Open dispute",
    description = "A party to a running contract opens a dispute. The other party becomes the respondent and the \
                   contract moves to disputed.",
    request_body = DisputeCreate,
    responses(
        (status = 201, description = "Dispute opened", body = DisputeResponse),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Contract not found"),
        (status = 409, description = "Contract is not running or already has an open dispute"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_dispute(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Disputes, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<DisputeCreate>,
) -> Result<(StatusCode, Json<DisputeResponse>)> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let contract = Contracts::new(&mut tx)
        .get_by_id(request.contract_id)
        .await?
        .ok_or_else(|| Error::not_found("Contract", request.contract_id))?;
    let (Some(party), Some(respondent_id)) = (
        Party::of(&contract, current_user.id),
        contract.counterparty(current_user.id),
    ) else {
        return Err(Error::not_found("Contract", request.contract_id));
    };

    let applied = lifecycle::apply(&contract, &Event::OpenDispute, party, Some(current_user.id), Utc::now())?;
    Contracts::new(&mut tx)
        .apply_transition(&contract, applied)
        .await
        .map_err(contract_write_conflict)?;

    let dispute = Disputes::new(&mut tx)
        .create(&DisputeCreateDBRequest {
            contract_id: contract.id,
            raised_by: current_user.id,
            respondent_id,
            category: request.category,
            description: request.description.trim().to_string(),
            evidence_urls: request.evidence_urls,
            contract_status_before: contract.status,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(
        dispute_id = %abbrev_uuid(&dispute.id),
        contract_id = %abbrev_uuid(&contract.id),
        %party,
        "Dispute opened"
    );
    Ok((StatusCode::CREATED, Json(DisputeResponse::from(dispute))))
}

#[utoipa::path(
    get,
    path = "/disputes",
    tag = "disputes",
    summary = "List disputes",
    description = "Disputes the caller raised or responds to. Admins see every dispute.",
    params(ListDisputesQuery),
    responses(
        (status = 200, description = "Disputes", body = PaginatedResponse<DisputeResponse>),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_disputes(
    State(state): State<AppState>,
    Query(query): Query<ListDisputesQuery>,
    _: RequiresPermission<resource::Disputes, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<DisputeResponse>>> {
    let (skip, limit) = query.pagination.params();
    let filter = DisputeFilter {
        skip,
        limit,
        party: (!sees_all_disputes(&current_user)).then_some(current_user.id),
        status: query.status,
        contract_id: query.contract_id,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Disputes::new(&mut pool_conn);
    let disputes = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        disputes.into_iter().map(DisputeResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/disputes/{id}",
    tag = "disputes",
    summary = "Get dispute",
    params(
        ("id" = uuid::Uuid, Path, description = "Dispute ID"),
    ),
    responses(
        (status = 200, description = "Dispute", body = DisputeResponse),
        (status = 404, description = "Not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(dispute_id = %id))]
pub async fn get_dispute(
    State(state): State<AppState>,
    Path(id): Path<DisputeId>,
    _: RequiresPermission<resource::Disputes, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<DisputeResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let dispute = load_visible_dispute(&mut pool_conn, id, &current_user).await?;
    Ok(Json(DisputeResponse::from(dispute)))
}

#[utoipa::path(
    post,
    path = "/disputes/{id}/review",
    tag = "disputes",
    summary = "Start review",
    description = "An admin takes an open dispute under review",
    params(
        ("id" = uuid::Uuid, Path, description = "Dispute ID"),
    ),
    responses(
        (status = 200, description = "Under review", body = DisputeResponse),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Dispute is not open"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(dispute_id = %id))]
pub async fn review_dispute(
    State(state): State<AppState>,
    Path(id): Path<DisputeId>,
    _: RequiresPermission<resource::Disputes, operation::UpdateAll>,
    current_user: CurrentUser,
) -> Result<Json<DisputeResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let dispute = load_visible_dispute(&mut pool_conn, id, &current_user).await?;
    if dispute.status != DisputeStatus::Open {
        return Err(Error::conflict(format!(
            "Dispute is {} and cannot be taken under review",
            dispute.status
        )));
    }
    let reviewed = Disputes::new(&mut pool_conn)
        .compare_and_set_status(dispute.id, DisputeStatus::Open, DisputeStatus::UnderReview)
        .await?
        .ok_or_else(|| Error::conflict("The dispute was changed by another request, please retry"))?;

    tracing::info!(reviewer = %abbrev_uuid(&current_user.id), "Dispute under review");
    Ok(Json(DisputeResponse::from(reviewed)))
}

#[utoipa::path(
    post,
    path = "/disputes/{id}/withdraw",
    tag = "disputes",
    summary = "Withdraw dispute",
    description = "The raiser withdraws an open dispute and the contract returns to its previous status",
    params(
        ("id" = uuid::Uuid, Path, description = "Dispute ID"),
    ),
    responses(
        (status = 200, description = "Withdrawn", body = DisputeResponse),
        (status = 403, description = "Only the raiser may withdraw"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Dispute is already closed"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(dispute_id = %id))]
pub async fn withdraw_dispute(
    State(state): State<AppState>,
    Path(id): Path<DisputeId>,
    _: RequiresPermission<resource::Disputes, operation::UpdateOwn>,
    current_user: CurrentUser,
) -> Result<Json<DisputeResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let dispute = load_visible_dispute(&mut tx, id, &current_user).await?;
    if dispute.raised_by != current_user.id {
        return Err(Error::Forbidden {
            message: "Only the party who raised the dispute can withdraw it".to_string(),
        });
    }

    let withdrawn = Disputes::new(&mut tx)
        .withdraw(id)
        .await?
        .ok_or_else(|| Error::conflict("Dispute is already closed"))?;

    let contract = load_contract(&mut tx, &dispute).await?;
    let party = Party::of(&contract, current_user.id).ok_or_else(|| Error::not_found("Dispute", id))?;
    let event = Event::WithdrawDispute {
        restore_to: dispute.contract_status_before,
    };
    let applied = lifecycle::apply(&contract, &event, party, Some(current_user.id), Utc::now())?;
    Contracts::new(&mut tx)
        .apply_transition(&contract, applied)
        .await
        .map_err(contract_write_conflict)?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(restored = %dispute.contract_status_before, "Dispute withdrawn");
    Ok(Json(DisputeResponse::from(withdrawn)))
}

#[utoipa::path(
    post,
    path = "/disputes/{id}/resolve",
    tag = "disputes",
    summary = "Resolve dispute",
    description = "An admin closes the dispute. terminate_contract ends the contract and frees the room; any other \
                   resolution restores the contract's previous status. refund_tenant also records a manual refund, by \
                   default the whole refundable deposit.",
    params(
        ("id" = uuid::Uuid, Path, description = "Dispute ID"),
    ),
    request_body = DisputeResolve,
    responses(
        (status = 200, description = "Resolved", body = DisputeResponse),
        (status = 400, description = "Validation failed or refund exceeds the refundable deposit"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Dispute is already closed"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(dispute_id = %id))]
pub async fn resolve_dispute(
    State(state): State<AppState>,
    Path(id): Path<DisputeId>,
    _: RequiresPermission<resource::Disputes, operation::UpdateAll>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<DisputeResolve>,
) -> Result<Json<DisputeResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let dispute = load_visible_dispute(&mut tx, id, &current_user).await?;
    if !dispute.status.is_open() {
        return Err(Error::conflict("Dispute is already closed"));
    }
    // Locked so a concurrent manual refund cannot spend the same deposit
    let contract = Contracts::new(&mut tx)
        .get_by_id_for_update(dispute.contract_id)
        .await?
        .ok_or_else(|| Error::not_found("Contract", dispute.contract_id))?;
    let note = request.note.trim().to_string();

    let refund_amount = if request.resolution == DisputeResolution::RefundTenant {
        let refundable = Transactions::new(&mut tx).refundable_amount(contract.id).await?;
        refund_due(request.refund_amount, refundable)?
    } else {
        None
    };

    let resolved = Disputes::new(&mut tx)
        .resolve(
            id,
            &DisputeResolutionDBRequest {
                resolution: request.resolution,
                note: note.clone(),
                refund_amount,
                resolved_by: current_user.id,
            },
        )
        .await?
        .ok_or_else(|| Error::conflict("Dispute is already closed"))?;

    let event = Event::ResolveDispute {
        terminate: request.resolution == DisputeResolution::TerminateContract,
        restore_to: dispute.contract_status_before,
    };
    let applied = lifecycle::apply(&contract, &event, Party::Admin, Some(current_user.id), Utc::now())?;
    Contracts::new(&mut tx)
        .apply_transition(&contract, applied)
        .await
        .map_err(contract_write_conflict)?;

    if let Some(amount) = refund_amount {
        Transactions::new(&mut tx)
            .create(&TransactionCreateDBRequest::manual_refund(
                contract.tenant_id,
                amount,
                Some(contract.id),
                Some(id),
                format!("Dispute resolution: {note}"),
            ))
            .await?;
    }
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(
        resolution = ?request.resolution,
        refund_amount,
        resolved_by = %abbrev_uuid(&current_user.id),
        "Dispute resolved"
    );
    Ok(Json(DisputeResponse::from(resolved)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        test_utils::{bearer_for, create_test_server, create_test_state, test_user},
    };
    use serde_json::{Value, json};
    use uuid::Uuid;

    #[test]
    fn test_refund_defaults_to_refundable_deposit() {
        assert_eq!(refund_due(None, 3_500_000).unwrap(), Some(3_500_000));
        assert_eq!(refund_due(None, 0).unwrap(), None);
        assert_eq!(refund_due(Some(1_000_000), 3_500_000).unwrap(), Some(1_000_000));
        assert!(refund_due(Some(4_000_000), 3_500_000).is_err());
    }

    #[tokio::test]
    async fn test_dispute_description_is_validated() {
        let state = create_test_state();
        let tenant = test_user(&[Role::Tenant]);
        let auth = bearer_for(&tenant, &state.config);
        let server = create_test_server(state);

        let response = server
            .post("/api/disputes")
            .add_header("authorization", auth)
            .json(&json!({
                "contract_id": Uuid::new_v4(),
                "category": "property_damage",
                "description": "broken",
                "evidence_urls": ["not a url"]
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["errors"][0]["field"], "description");
        assert_eq!(json["errors"][1]["field"], "evidence_urls");
    }

    #[tokio::test]
    async fn test_review_and_resolve_are_admin_only() {
        let state = create_test_state();
        let landlord = test_user(&[Role::Tenant, Role::Landlord]);
        let auth = bearer_for(&landlord, &state.config);
        let server = create_test_server(state);
        let id = Uuid::new_v4();

        server
            .post(&format!("/api/disputes/{id}/review"))
            .add_header("authorization", auth.clone())
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .post(&format!("/api/disputes/{id}/resolve"))
            .add_header("authorization", auth)
            .json(&json!({"resolution": "dismissed", "note": "no evidence"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_resolve_rejects_refund_amount_without_refund() {
        let state = create_test_state();
        let admin = test_user(&[Role::Tenant, Role::Admin]);
        let auth = bearer_for(&admin, &state.config);
        let server = create_test_server(state);

        let response = server
            .post(&format!("/api/disputes/{}/resolve", Uuid::new_v4()))
            .add_header("authorization", auth)
            .json(&json!({"resolution": "release_to_owner", "note": "damage confirmed", "refund_amount": 100000}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["errors"][0]["field"], "refund_amount");
    }
}
