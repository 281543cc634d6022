//! Database models for contracts.

use crate::api::models::contracts::ContractStatus;
use crate::types::{ContractId, RoomId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct ContractCreateDBRequest {
    pub room_id: RoomId,
    pub tenant_id: UserId,
    pub owner_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: i64,
    pub deposit_amount: i64,
    pub terms: Option<String>,
}

/// A contract row. Lifecycle writes replace every mutable column and are guarded by `version`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ContractDBResponse {
    pub id: ContractId,
    pub room_id: RoomId,
    pub tenant_id: UserId,
    pub owner_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: i64,
    pub deposit_amount: i64,
    pub terms: Option<String>,
    pub status: ContractStatus,
    pub tenant_signed_at: Option<DateTime<Utc>>,
    pub owner_signed_at: Option<DateTime<Utc>>,
    pub requested_end_date: Option<NaiveDate>,
    pub extension_note: Option<String>,
    pub termination_requested_by: Option<UserId>,
    pub termination_reason: Option<String>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractDBResponse {
    pub fn is_party(&self, user_id: UserId) -> bool {
        self.tenant_id == user_id || self.owner_id == user_id
    }

    /// The party on the other side of `user_id`, if `user_id` is a party.
    pub fn counterparty(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.tenant_id {
            Some(self.owner_id)
        } else if user_id == self.owner_id {
            Some(self.tenant_id)
        } else {
            None
        }
    }
}
