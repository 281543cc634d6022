//! Applying confirmed gateway payments.
//!
//! A settlement locks the transaction row by its gateway reference, moves it `pending` ->
//! `completed` and applies the kind's side effect, all in one database transaction:
//!
//! - deposit: the contract is activated and its room becomes `rented`
//! - boosting_ads: the housing area's `boosted_until` is extended
//! - service_fee: nothing
//!
//! Settling an already completed transaction is a no-op, so gateway retries are harmless.

use chrono::Utc;
use metrics::counter;
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};

use crate::{
    api::models::transactions::{TransactionKind, TransactionStatus},
    db::{
        errors::DbError,
        handlers::{Contracts, HousingAreas, Transactions},
        models::{contracts::ContractDBResponse, transactions::TransactionDBResponse},
    },
    errors::{Error, Result},
    lifecycle::{self, Event, Party},
    types::{ContractId, abbrev_uuid},
};

/// What a settlement attempt did.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The transaction was pending and is now completed
    Settled(TransactionDBResponse),
    /// The transaction was completed by an earlier callback or sync
    AlreadySettled(TransactionDBResponse),
    /// The paid amount differs from the transaction; it is now failed
    AmountMismatch { transaction: TransactionDBResponse, paid: i64 },
    /// The transaction was failed or cancelled before the payment arrived
    Closed(TransactionDBResponse),
    /// No transaction carries this gateway reference
    UnknownReference,
}

impl Settlement {
    /// Label for the callback outcome counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            Settlement::Settled(_) => "settled",
            Settlement::AlreadySettled(_) => "duplicate",
            Settlement::AmountMismatch { .. } => "amount_mismatch",
            Settlement::Closed(_) => "closed",
            Settlement::UnknownReference => "unknown_reference",
        }
    }

    pub fn transaction(&self) -> Option<&TransactionDBResponse> {
        match self {
            Settlement::Settled(t) | Settlement::AlreadySettled(t) | Settlement::Closed(t) => Some(t),
            Settlement::AmountMismatch { transaction, .. } => Some(transaction),
            Settlement::UnknownReference => None,
        }
    }
}

pub fn record_callback(outcome: &'static str) {
    counter!("holarental_payment_callbacks_total", "outcome" => outcome).increment(1);
}

/// Settle the transaction whose gateway reference is `reference`.
///
/// `paid_amount` is checked against the stored amount when the gateway reports one.
#[instrument(skip(db), err)]
pub async fn settle_by_reference(
    db: &PgPool,
    reference: &str,
    gateway_transaction_id: Option<&str>,
    paid_amount: Option<i64>,
) -> Result<Settlement> {
    let mut tx = db.begin().await.map_err(DbError::from)?;

    let Some(transaction) = Transactions::new(&mut tx).get_by_reference_for_update(reference).await? else {
        warn!("No transaction for gateway reference");
        return Ok(Settlement::UnknownReference);
    };

    let settlement = match transaction.status {
        TransactionStatus::Completed => Settlement::AlreadySettled(transaction),
        TransactionStatus::Failed | TransactionStatus::Cancelled => {
            warn!(
                transaction_id = %abbrev_uuid(&transaction.id),
                status = ?transaction.status,
                "Payment confirmed for a closed transaction"
            );
            Settlement::Closed(transaction)
        }
        TransactionStatus::Pending => match paid_amount {
            Some(paid) if paid != transaction.amount => {
                warn!(
                    transaction_id = %abbrev_uuid(&transaction.id),
                    expected = transaction.amount,
                    paid,
                    "Paid amount does not match the transaction"
                );
                let failed = Transactions::new(&mut tx)
                    .close_pending(transaction.id, TransactionStatus::Failed)
                    .await?
                    .ok_or_else(|| DbError::stale("transaction", transaction.id))?;
                Settlement::AmountMismatch { transaction: failed, paid }
            }
            _ => {
                let settled = Transactions::new(&mut tx)
                    .settle(transaction.id, gateway_transaction_id)
                    .await?
                    .ok_or_else(|| DbError::stale("transaction", transaction.id))?;
                apply_side_effects(&mut tx, &settled).await?;
                Settlement::Settled(settled)
            }
        },
    };

    tx.commit().await.map_err(DbError::from)?;

    if let Settlement::Settled(settled) = &settlement {
        counter!("holarental_payments_settled_total", "kind" => settled.kind.as_str()).increment(1);
        info!(
            transaction_id = %abbrev_uuid(&settled.id),
            kind = %settled.kind,
            amount = settled.amount,
            "Payment settled"
        );
    }
    Ok(settlement)
}

async fn apply_side_effects(conn: &mut PgConnection, settled: &TransactionDBResponse) -> Result<()> {
    match settled.kind {
        TransactionKind::Deposit => {
            let Some(contract_id) = settled.contract_id else {
                warn!(transaction_id = %abbrev_uuid(&settled.id), "Deposit without a contract");
                return Ok(());
            };
            // The payment is real even if the contract moved on; keep it completed for a refund
            match activate_contract(conn, contract_id).await {
                Ok(_) => Ok(()),
                Err(Error::Conflict { message }) => {
                    warn!(contract_id = %abbrev_uuid(&contract_id), "Deposit settled but contract not activated: {message}");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        TransactionKind::BoostingAds => {
            let (Some(area_id), Some(days)) = (settled.housing_area_id, settled.boost_days) else {
                warn!(transaction_id = %abbrev_uuid(&settled.id), "Boost without an area or duration");
                return Ok(());
            };
            let until = HousingAreas::new(conn).extend_boost(area_id, days).await?;
            info!(housing_area_id = %abbrev_uuid(&area_id), %until, "Housing area boosted");
            Ok(())
        }
        TransactionKind::ServiceFee | TransactionKind::Refund => Ok(()),
    }
}

/// Move a `signed` contract to `active` and its room to `rented`.
///
/// Used when a deposit settles, and directly for contracts without a deposit.
#[instrument(skip(conn), fields(contract_id = %abbrev_uuid(&contract_id)), err)]
pub async fn activate_contract(conn: &mut PgConnection, contract_id: ContractId) -> Result<ContractDBResponse> {
    let mut contracts = Contracts::new(conn);
    let contract = contracts
        .get_by_id(contract_id)
        .await?
        .ok_or_else(|| Error::not_found("Contract", contract_id))?;
    let applied = lifecycle::apply(&contract, &Event::Activate, Party::System, None, Utc::now())?;
    Ok(contracts.apply_transition(&contract, applied).await?)
}
