//! API request/response models for transactions, and the server-side amount rules.

use super::contracts::ContractResponse;
use super::pagination::Pagination;
use crate::db::models::transactions::TransactionDBResponse;
use crate::types::{ContractId, DisputeId, HousingAreaId, TransactionId, UserId};
use crate::validation::{Validate, Validator};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    ServiceFee,
    Refund,
    BoostingAds,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::ServiceFee => "service_fee",
            TransactionKind::Refund => "refund",
            TransactionKind::BoostingAds => "boosting_ads",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    ZaloPay,
    Dummy,
    Manual,
}

/// Payer-initiated transaction. The amount is always computed on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TransactionCreate {
    pub kind: Option<TransactionKind>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub contract_id: Option<ContractId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub housing_area_id: Option<HousingAreaId>,
    pub boost_days: Option<i64>,
    pub description: Option<String>,
}

impl Validate for TransactionCreate {
    fn validate(&self, v: &mut Validator) {
        match self.kind {
            None => {
                v.error("kind", "is required");
            }
            Some(TransactionKind::Refund) => {
                v.error("kind", "refunds are issued by an admin");
            }
            Some(TransactionKind::Deposit | TransactionKind::ServiceFee) => {
                v.check(self.contract_id.is_some(), "contract_id", "is required");
            }
            Some(TransactionKind::BoostingAds) => {
                v.check(self.housing_area_id.is_some(), "housing_area_id", "is required");
                match self.boost_days {
                    Some(days) => {
                        v.positive("boost_days", days);
                    }
                    None => {
                        v.error("boost_days", "is required");
                    }
                }
            }
        }
        v.optional_text("description", self.description.as_deref(), 500);
    }
}

/// Manual refund recorded by an admin.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundCreate {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub contract_id: Option<ContractId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub dispute_id: Option<DisputeId>,
    pub amount: i64,
    pub description: String,
}

impl Validate for RefundCreate {
    fn validate(&self, v: &mut Validator) {
        v.positive("amount", self.amount).text("description", &self.description, 1, 500);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// VND
    pub amount: i64,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub contract_id: Option<ContractId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub housing_area_id: Option<HousingAreaId>,
    #[schema(value_type = Option<String>, format = "uuid")]
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

impl From<TransactionDBResponse> for TransactionResponse {
    fn from(db: TransactionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            kind: db.kind,
            amount: db.amount,
            status: db.status,
            payment_method: db.payment_method,
            contract_id: db.contract_id,
            housing_area_id: db.housing_area_id,
            dispute_id: db.dispute_id,
            boost_days: db.boost_days,
            description: db.description,
            gateway_reference: db.gateway_reference,
            gateway_transaction_id: db.gateway_transaction_id,
            order_url: db.order_url,
            created_at: db.created_at,
            updated_at: db.updated_at,
            completed_at: db.completed_at,
        }
    }
}

/// Result of `POST /transactions`.
///
/// A deposit of zero has nothing to pay: the contract is activated directly and `transaction`
/// is absent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionCreateResponse {
    pub transaction: Option<TransactionResponse>,
    /// The contract, when creating the transaction changed it
    pub contract: Option<ContractResponse>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub contract_id: Option<ContractId>,
    /// Admin only
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

/// `round(monthly_rent * percent / 100)`, half away from zero, never below 1 VND.
pub fn service_fee_amount(monthly_rent: i64, service_fee_percent: Decimal) -> i64 {
    let fee = (Decimal::from(monthly_rent) * service_fee_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    fee.to_i64().unwrap_or(monthly_rent).max(1)
}

/// `None` on overflow.
pub fn boosting_amount(price_per_day: i64, days: i64) -> Option<i64> {
    price_per_day.checked_mul(days).filter(|amount| *amount > 0)
}
