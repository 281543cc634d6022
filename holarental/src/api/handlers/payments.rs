//! HTTP handlers for payment processing endpoints.

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;

use crate::{
    AppState,
    api::{
        handlers::transactions::load_visible_transaction,
        models::{
            payments::{CheckoutResponse, PaymentSyncResponse, ZaloPayCallbackRequest, ZaloPayCallbackResponse},
            transactions::{TransactionKind, TransactionResponse, TransactionStatus},
            users::CurrentUser,
        },
    },
    auth::permissions::{RequiresPermission, operation, resource},
    db::handlers::Transactions,
    errors::{Error, Result},
    payment_providers::{
        OrderRequest, OrderStatus, PaymentError, PaymentProvider, new_order_reference,
        settlement::{self, Settlement},
    },
    types::{TransactionId, abbrev_uuid},
};

fn provider(state: &AppState) -> Result<&dyn PaymentProvider> {
    state
        .payment_provider
        .as_deref()
        .ok_or(Error::PaymentNotConfigured)
}

fn order_description(kind: TransactionKind, id: &TransactionId) -> String {
    let label = match kind {
        TransactionKind::Deposit => "Tiền cọc",
        TransactionKind::ServiceFee => "Phí dịch vụ",
        TransactionKind::BoostingAds => "Đẩy tin",
        TransactionKind::Refund => "Hoàn tiền",
    };
    format!("HolaRental - {label} #{}", abbrev_uuid(id))
}

fn not_payable(status: TransactionStatus) -> Error {
    Error::conflict(format!("Transaction is {status} and cannot be paid"))
}

#[utoipa::path(
    post,
    path = "/payments/{id}/checkout",
    tag = "payments",
    summary = "Create checkout",
    description = "Open a gateway order for the caller's pending transaction. The order is created once; repeated \
                   calls return the stored order URL.",
    params(
        ("id" = uuid::Uuid, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Order URL to send the payer to", body = CheckoutResponse),
        (status = 400, description = "Refunds are not paid through the gateway"),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Transaction is not pending"),
        (status = 501, description = "No payment provider configured"),
        (status = 502, description = "The gateway rejected the order"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = %id))]
pub async fn create_checkout(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    _: RequiresPermission<resource::Payments, operation::CreateOwn>,
    current_user: CurrentUser,
) -> Result<Json<CheckoutResponse>> {
    let provider = provider(&state)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Transactions::new(&mut pool_conn)
        .get_by_id(id)
        .await?
        .filter(|t| t.user_id == current_user.id)
        .ok_or_else(|| Error::not_found("Transaction", id))?;

    if transaction.kind == TransactionKind::Refund {
        return Err(Error::bad_request("Refunds are not paid through the gateway"));
    }
    if transaction.status != TransactionStatus::Pending {
        return Err(not_payable(transaction.status));
    }
    if let (Some(reference), Some(order_url)) = (&transaction.gateway_reference, &transaction.order_url) {
        return Ok(Json(CheckoutResponse {
            transaction_id: id,
            order_url: order_url.clone(),
            gateway_reference: reference.clone(),
            provider: provider.name().to_string(),
        }));
    }

    // The gateway call runs outside any database transaction
    let reference = new_order_reference(Utc::now());
    let order = provider
        .create_order(&OrderRequest {
            transaction_id: id,
            reference: reference.clone(),
            payer_id: current_user.id,
            amount: transaction.amount,
            description: order_description(transaction.kind, &id),
        })
        .await?;

    let stored = match Transactions::new(&mut pool_conn)
        .set_order(id, &reference, &order.order_url)
        .await?
    {
        Some(stored) => stored,
        // A concurrent checkout stored its order first
        None => Transactions::new(&mut pool_conn)
            .get_by_id(id)
            .await?
            .filter(|t| t.status == TransactionStatus::Pending)
            .ok_or_else(|| Error::conflict("Transaction is no longer pending"))?,
    };

    let (Some(gateway_reference), Some(order_url)) = (stored.gateway_reference, stored.order_url) else {
        return Err(Error::conflict("Transaction is no longer pending"));
    };
    tracing::info!(%gateway_reference, provider = provider.name(), "Checkout opened");
    Ok(Json(CheckoutResponse {
        transaction_id: id,
        order_url,
        gateway_reference,
        provider: provider.name().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/payments/{id}/sync",
    tag = "payments",
    summary = "Sync payment status",
    description = "Ask the gateway for the order status. A paid order is settled, a failed one marks the transaction \
                   failed, and a processing one is left pending. Settling is idempotent.",
    params(
        ("id" = uuid::Uuid, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction after the sync", body = PaymentSyncResponse),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "No gateway order has been opened"),
        (status = 501, description = "No payment provider configured"),
        (status = 502, description = "Gateway error"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = %id))]
pub async fn sync_payment(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    _: RequiresPermission<resource::Payments, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<PaymentSyncResponse>> {
    let provider = provider(&state)?;

    let transaction = {
        let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        load_visible_transaction(&mut pool_conn, id, &current_user).await?
    };
    let reference = transaction
        .gateway_reference
        .clone()
        .ok_or_else(|| Error::conflict("No gateway order has been opened for this transaction"))?;

    let status = provider.query_order(&reference).await?;
    match &status {
        OrderStatus::Paid {
            gateway_transaction_id,
            amount,
        } => {
            let outcome =
                settlement::settle_by_reference(&state.db, &reference, gateway_transaction_id.as_deref(), *amount)
                    .await?;
            tracing::info!(outcome = outcome.outcome(), "Payment synced");
        }
        OrderStatus::Failed { message } => {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            if Transactions::new(&mut pool_conn)
                .close_pending(id, TransactionStatus::Failed)
                .await?
                .is_some()
            {
                tracing::info!(%message, "Gateway reported the payment failed");
            }
        }
        OrderStatus::Processing => {}
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Transactions::new(&mut pool_conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Transaction", id))?;

    Ok(Json(PaymentSyncResponse {
        transaction: TransactionResponse::from(transaction),
        gateway_status: status.label().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/payments/zalopay/callback",
    tag = "payments",
    summary = "ZaloPay callback",
    description = "Called by ZaloPay when an order is paid. The MAC is verified with key2 before anything changes. \
                   Replies with return_code 1 on success, -1 on a bad MAC and 0 when ZaloPay should retry.",
    request_body = ZaloPayCallbackRequest,
    responses(
        (status = 200, description = "Callback acknowledgement", body = ZaloPayCallbackResponse),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn zalopay_callback(
    State(state): State<AppState>,
    Json(request): Json<ZaloPayCallbackRequest>,
) -> Result<Json<ZaloPayCallbackResponse>> {
    let provider = provider(&state)?;

    let confirmation = match provider.verify_callback(&request.data, &request.mac) {
        Ok(confirmation) => confirmation,
        Err(PaymentError::InvalidSignature) => {
            tracing::warn!("Rejected payment callback with a bad MAC");
            settlement::record_callback("invalid_mac");
            return Ok(Json(ZaloPayCallbackResponse::mac_mismatch()));
        }
        Err(e) => {
            tracing::warn!("Rejected payment callback: {e}");
            settlement::record_callback("invalid_data");
            return Ok(Json(ZaloPayCallbackResponse {
                return_code: -1,
                return_message: e.to_string(),
            }));
        }
    };

    let reply = match settlement::settle_by_reference(
        &state.db,
        &confirmation.reference,
        confirmation.gateway_transaction_id.as_deref(),
        Some(confirmation.amount),
    )
    .await
    {
        Ok(Settlement::UnknownReference) => {
            settlement::record_callback(Settlement::UnknownReference.outcome());
            ZaloPayCallbackResponse::retry("unknown app_trans_id")
        }
        Ok(settlement) => {
            settlement::record_callback(settlement.outcome());
            ZaloPayCallbackResponse::success()
        }
        Err(e) => {
            tracing::error!(reference = %confirmation.reference, "Failed to settle payment callback: {e}");
            settlement::record_callback("error");
            ZaloPayCallbackResponse::retry("settlement failed")
        }
    };
    Ok(Json(reply))
}
