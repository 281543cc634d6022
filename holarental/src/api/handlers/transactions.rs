//! HTTP handlers for payment transactions.
//!
//! Payers create their own deposit, service fee and boosting transactions; every amount is
//! computed here from the contract, the room price or the marketplace settings. Refunds are only
//! recorded by an admin.

use crate::{
    AppState,
    api::{
        handlers::housing_areas::can_see_area,
        models::{
            contracts::{ContractResponse, ContractStatus},
            housing_areas::HousingAreaStatus,
            pagination::PaginatedResponse,
            transactions::{
                ListTransactionsQuery, PaymentMethod, RefundCreate, TransactionCreate, TransactionCreateResponse,
                TransactionKind, TransactionResponse, TransactionStatus, boosting_amount, service_fee_amount,
            },
            users::CurrentUser,
        },
    },
    auth::permissions::{RequiresPermission, can_read_all_resources, operation, resource},
    db::{
        handlers::{Contracts, HousingAreas, Repository, Transactions, Users, transactions::TransactionFilter},
        models::{
            contracts::ContractDBResponse,
            transactions::{TransactionCreateDBRequest, TransactionDBResponse},
        },
    },
    errors::{Error, Result},
    payment_providers::{PaymentProvider, settlement},
    types::{ContractId, HousingAreaId, Resource, TransactionId, abbrev_uuid},
    validation::{FieldError, ValidatedJson, Validator},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;

/// The payment method transactions are recorded with for `provider`.
pub(super) fn payment_method(provider: &dyn PaymentProvider) -> PaymentMethod {
    match provider.name() {
        "zalopay" => PaymentMethod::ZaloPay,
        _ => PaymentMethod::Dummy,
    }
}

/// Load a contract the payer is a party to, or 404.
async fn load_payer_contract(conn: &mut PgConnection, id: ContractId, user: &CurrentUser) -> Result<ContractDBResponse> {
    Contracts::new(conn)
        .get_by_id(id)
        .await?
        .filter(|contract| contract.is_party(user.id))
        .ok_or_else(|| Error::not_found("Contract", id))
}

fn pending_payment(
    user: &CurrentUser,
    kind: TransactionKind,
    amount: i64,
    method: PaymentMethod,
    description: Option<String>,
) -> TransactionCreateDBRequest {
    TransactionCreateDBRequest {
        user_id: user.id,
        kind,
        amount,
        status: TransactionStatus::Pending,
        payment_method: method,
        contract_id: None,
        housing_area_id: None,
        dispute_id: None,
        boost_days: None,
        description,
    }
}

async fn prepare_deposit(
    conn: &mut PgConnection,
    user: &CurrentUser,
    contract_id: ContractId,
) -> Result<ContractDBResponse> {
    let contract = load_payer_contract(conn, contract_id, user).await?;
    if contract.tenant_id != user.id {
        return Err(Error::Forbidden {
            message: "Only the tenant pays the deposit".to_string(),
        });
    }
    if contract.status != ContractStatus::Signed {
        return Err(Error::conflict(format!(
            "A deposit can only be paid for a signed contract, this one is {}",
            contract.status
        )));
    }
    Ok(contract)
}

async fn prepare_service_fee(
    conn: &mut PgConnection,
    user: &CurrentUser,
    contract_id: ContractId,
) -> Result<ContractDBResponse> {
    let contract = load_payer_contract(conn, contract_id, user).await?;
    if contract.owner_id != user.id {
        return Err(Error::Forbidden {
            message: "Only the owner pays the service fee".to_string(),
        });
    }
    if contract.status != ContractStatus::Active {
        return Err(Error::conflict(format!(
            "The service fee is due once the contract is active, this one is {}",
            contract.status
        )));
    }
    Ok(contract)
}

async fn prepare_boost(conn: &mut PgConnection, user: &CurrentUser, area_id: HousingAreaId) -> Result<()> {
    let area = HousingAreas::new(conn)
        .get_by_id(area_id)
        .await?
        .filter(|area| can_see_area(area, Some(user)))
        .ok_or_else(|| Error::not_found("HousingArea", area_id))?;
    if area.owner_id != user.id {
        return Err(Error::Forbidden {
            message: "Only the owner can boost a housing area".to_string(),
        });
    }
    if area.status != HousingAreaStatus::Approved {
        return Err(Error::conflict("Only approved housing areas can be boosted"));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    summary = "Create transaction",
    description = "Create a pending deposit, service fee or boosting transaction. The amount is computed by the server. \
                   A contract whose deposit is zero is activated directly and no transaction is created.",
    request_body = TransactionCreate,
    responses(
        (status = 201, description = "Transaction created", body = TransactionCreateResponse),
        (status = 200, description = "Nothing to pay, contract activated", body = TransactionCreateResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Caller is not the payer"),
        (status = 404, description = "Contract or housing area not found"),
        (status = 409, description = "Wrong contract or area status, or a live payment already exists"),
        (status = 501, description = "No payment provider configured"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_transaction(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Transactions, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<TransactionCreate>,
) -> Result<(StatusCode, Json<TransactionCreateResponse>)> {
    let market = &state.config.marketplace;
    let provider = state.payment_provider.as_ref().ok_or(Error::PaymentNotConfigured)?;
    let method = payment_method(provider.as_ref());
    let description = request.description.clone();

    if request.kind == Some(TransactionKind::BoostingAds) {
        let mut v = Validator::new();
        v.range("boost_days", request.boost_days.unwrap_or_default(), 1, market.max_boost_days);
        v.finish()?;
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let create = match (request.kind, request.contract_id, request.housing_area_id) {
        (Some(TransactionKind::Deposit), Some(contract_id), _) => {
            let contract = prepare_deposit(&mut tx, &current_user, contract_id).await?;
            if contract.deposit_amount == 0 {
                let activated = settlement::activate_contract(&mut tx, contract_id).await?;
                tx.commit().await.map_err(|e| Error::Database(e.into()))?;
                tracing::info!(contract_id = %abbrev_uuid(&contract_id), "No deposit due, contract activated");
                return Ok((
                    StatusCode::OK,
                    Json(TransactionCreateResponse {
                        transaction: None,
                        contract: Some(ContractResponse::from(activated)),
                    }),
                ));
            }
            TransactionCreateDBRequest {
                contract_id: Some(contract_id),
                ..pending_payment(&current_user, TransactionKind::Deposit, contract.deposit_amount, method, description)
            }
        }
        (Some(TransactionKind::ServiceFee), Some(contract_id), _) => {
            let contract = prepare_service_fee(&mut tx, &current_user, contract_id).await?;
            let amount = service_fee_amount(contract.monthly_rent, market.service_fee_percent);
            TransactionCreateDBRequest {
                contract_id: Some(contract_id),
                ..pending_payment(&current_user, TransactionKind::ServiceFee, amount, method, description)
            }
        }
        (Some(TransactionKind::BoostingAds), _, Some(area_id)) => {
            let days = request.boost_days.unwrap_or_default();
            let amount = boosting_amount(market.boosting_price_per_day, days)
                .ok_or_else(|| Error::bad_request("Boost amount is out of range"))?;
            prepare_boost(&mut tx, &current_user, area_id).await?;
            TransactionCreateDBRequest {
                housing_area_id: Some(area_id),
                boost_days: i32::try_from(days).ok(),
                ..pending_payment(&current_user, TransactionKind::BoostingAds, amount, method, description)
            }
        }
        _ => return Err(Error::bad_request("Unsupported transaction request")),
    };

    let transaction = Transactions::new(&mut tx).create(&create).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(
        transaction_id = %abbrev_uuid(&transaction.id),
        kind = %transaction.kind,
        amount = transaction.amount,
        "Transaction created"
    );
    Ok((
        StatusCode::CREATED,
        Json(TransactionCreateResponse {
            transaction: Some(TransactionResponse::from(transaction)),
            contract: None,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    summary = "List transactions",
    description = "The caller's transactions. Admins see everyone's and may filter by user_id.",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "Transactions", body = PaginatedResponse<TransactionResponse>),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
    _: RequiresPermission<resource::Transactions, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<TransactionResponse>>> {
    let (skip, limit) = query.pagination.params();
    let user_id = if can_read_all_resources(&current_user, Resource::Transactions) {
        query.user_id
    } else {
        Some(current_user.id)
    };
    let filter = TransactionFilter {
        skip,
        limit,
        user_id,
        kind: query.kind,
        status: query.status,
        contract_id: query.contract_id,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Transactions::new(&mut pool_conn);
    let transactions = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        transactions.into_iter().map(TransactionResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Load a transaction owned by the caller. Admins see every transaction; anyone else gets 404.
pub(super) async fn load_visible_transaction(
    conn: &mut PgConnection,
    id: TransactionId,
    user: &CurrentUser,
) -> Result<TransactionDBResponse> {
    Transactions::new(conn)
        .get_by_id(id)
        .await?
        .filter(|t| t.user_id == user.id || can_read_all_resources(user, Resource::Transactions))
        .ok_or_else(|| Error::not_found("Transaction", id))
}

#[utoipa::path(
    get,
    path = "/transactions/{id}",
    tag = "transactions",
    summary = "Get transaction",
    params(
        ("id" = uuid::Uuid, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction", body = TransactionResponse),
        (status = 404, description = "Not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = %id))]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    _: RequiresPermission<resource::Transactions, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<TransactionResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = load_visible_transaction(&mut pool_conn, id, &current_user).await?;
    Ok(Json(TransactionResponse::from(transaction)))
}

#[utoipa::path(
    post,
    path = "/transactions/{id}/cancel",
    tag = "transactions",
    summary = "Cancel transaction",
    description = "Cancel the caller's own pending transaction",
    params(
        ("id" = uuid::Uuid, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Cancelled", body = TransactionResponse),
        (status = 404, description = "Not found"),
        (status = 409, description = "Transaction is no longer pending"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = %id))]
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    _: RequiresPermission<resource::Transactions, operation::CreateOwn>,
    current_user: CurrentUser,
) -> Result<Json<TransactionResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Transactions::new(&mut pool_conn)
        .get_by_id(id)
        .await?
        .filter(|t| t.user_id == current_user.id)
        .ok_or_else(|| Error::not_found("Transaction", id))?;

    let cancelled = Transactions::new(&mut pool_conn)
        .close_pending(transaction.id, TransactionStatus::Cancelled)
        .await?
        .ok_or_else(|| Error::conflict("Only pending transactions can be cancelled"))?;

    tracing::info!("Transaction cancelled by payer");
    Ok(Json(TransactionResponse::from(cancelled)))
}

/// Check a contract-linked refund against what the contract has actually paid in.
pub(super) fn check_refund_cap(amount: i64, refundable: i64) -> Result<()> {
    if amount > refundable {
        return Err(Error::Validation {
            errors: vec![FieldError::new(
                "amount",
                format!("exceeds the refundable deposit of {refundable} VND"),
            )],
        });
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/transactions/refunds",
    tag = "transactions",
    summary = "Record refund",
    description = "Record a refund paid out by hand. Refunds linked to a contract cannot exceed its completed deposit \
                   minus earlier refunds.",
    request_body = RefundCreate,
    responses(
        (status = 201, description = "Refund recorded", body = TransactionResponse),
        (status = 400, description = "Validation failed or amount exceeds the refundable deposit"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User or contract not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_refund(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Transactions, operation::CreateAll>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<RefundCreate>,
) -> Result<(StatusCode, Json<TransactionResponse>)> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    Users::new(&mut tx)
        .get_by_id(request.user_id)
        .await?
        .ok_or_else(|| Error::not_found("User", request.user_id))?;

    if let Some(contract_id) = request.contract_id {
        let contract = Contracts::new(&mut tx)
            .get_by_id_for_update(contract_id)
            .await?
            .ok_or_else(|| Error::not_found("Contract", contract_id))?;
        if !contract.is_party(request.user_id) {
            return Err(Error::bad_request("The refund recipient is not a party to the contract"));
        }
        let refundable = Transactions::new(&mut tx).refundable_amount(contract_id).await?;
        check_refund_cap(request.amount, refundable)?;
    }

    let refund = Transactions::new(&mut tx)
        .create(&TransactionCreateDBRequest::manual_refund(
            request.user_id,
            request.amount,
            request.contract_id,
            request.dispute_id,
            request.description.trim().to_string(),
        ))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(
        refund_id = %abbrev_uuid(&refund.id),
        recipient = %abbrev_uuid(&refund.user_id),
        amount = refund.amount,
        recorded_by = %abbrev_uuid(&current_user.id),
        "Manual refund recorded"
    );
    Ok((StatusCode::CREATED, Json(TransactionResponse::from(refund))))
}
