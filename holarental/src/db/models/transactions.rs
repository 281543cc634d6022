//! Database models for payment transactions.

use crate::api::models::transactions::{PaymentMethod, TransactionKind, TransactionStatus};
use crate::types::{ContractId, DisputeId, HousingAreaId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct TransactionCreateDBRequest {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: i64,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub contract_id: Option<ContractId>,
    pub housing_area_id: Option<HousingAreaId>,
    pub dispute_id: Option<DisputeId>,
    pub boost_days: Option<i32>,
    pub description: Option<String>,
}

impl TransactionCreateDBRequest {
    /// A refund recorded as already paid out by hand.
    pub fn manual_refund(
        user_id: UserId,
        amount: i64,
        contract_id: Option<ContractId>,
        dispute_id: Option<DisputeId>,
        description: String,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Refund,
            amount,
            status: TransactionStatus::Completed,
            payment_method: PaymentMethod::Manual,
            contract_id,
            housing_area_id: None,
            dispute_id,
            boost_days: None,
            description: Some(description),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: i64,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub contract_id: Option<ContractId>,
    pub housing_area_id: Option<HousingAreaId>,
    pub dispute_id: Option<DisputeId>,
    pub boost_days: Option<i32>,
    pub description: Option<String>,
    pub gateway_reference: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub order_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
