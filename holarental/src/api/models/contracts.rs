//! API request/response models for rental contracts.

use super::pagination::Pagination;
use crate::db::models::contracts::ContractDBResponse;
use crate::types::{ContractId, RoomId, UserId};
use crate::validation::{Validate, Validator};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending,
    Signed,
    Active,
    ExtensionRequested,
    TerminationRequested,
    Disputed,
    Terminated,
    Cancelled,
    Expired,
}

impl ContractStatus {
    /// Statuses that hold the room. At most one per room.
    pub const LIVE: [ContractStatus; 5] = [
        ContractStatus::Signed,
        ContractStatus::Active,
        ContractStatus::ExtensionRequested,
        ContractStatus::TerminationRequested,
        ContractStatus::Disputed,
    ];

    /// Statuses in which the tenancy is running and may expire or be disputed.
    pub const RUNNING: [ContractStatus; 3] = [
        ContractStatus::Active,
        ContractStatus::ExtensionRequested,
        ContractStatus::TerminationRequested,
    ];

    pub fn is_live(self) -> bool {
        Self::LIVE.contains(&self)
    }

    pub fn is_running(self) -> bool {
        Self::RUNNING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::Signed => "signed",
            ContractStatus::Active => "active",
            ContractStatus::ExtensionRequested => "extension_requested",
            ContractStatus::TerminationRequested => "termination_requested",
            ContractStatus::Disputed => "disputed",
            ContractStatus::Terminated => "terminated",
            ContractStatus::Cancelled => "cancelled",
            ContractStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContractCreate {
    #[schema(value_type = String, format = "uuid")]
    pub room_id: RoomId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub terms: Option<String>,
}

impl Validate for ContractCreate {
    fn validate(&self, v: &mut Validator) {
        v.date_not_before("start_date", self.start_date, crate::types::vietnam_today())
            .check(
                self.end_date > self.start_date,
                "end_date",
                "must be after start_date",
            )
            .optional_text("terms", self.terms.as_deref(), 10_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExtensionRequest {
    pub requested_end_date: NaiveDate,
    pub note: Option<String>,
}

impl Validate for ExtensionRequest {
    fn validate(&self, v: &mut Validator) {
        v.optional_text("note", self.note.as_deref(), 1000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExtensionDecision {
    pub approve: bool,
}

impl Validate for ExtensionDecision {
    fn validate(&self, _v: &mut Validator) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TerminationRequest {
    pub reason: String,
}

impl Validate for TerminationRequest {
    fn validate(&self, v: &mut Validator) {
        v.text("reason", &self.reason, 1, 2000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContractResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ContractId,
    #[schema(value_type = String, format = "uuid")]
    pub room_id: RoomId,
    #[schema(value_type = String, format = "uuid")]
    pub tenant_id: UserId,
    #[schema(value_type = String, format = "uuid")]
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
    #[schema(value_type = Option<String>, format = "uuid")]
    pub termination_requested_by: Option<UserId>,
    pub termination_reason: Option<String>,
    pub terminated_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub cancelled_by: Option<UserId>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ContractDBResponse> for ContractResponse {
    fn from(db: ContractDBResponse) -> Self {
        Self {
            id: db.id,
            room_id: db.room_id,
            tenant_id: db.tenant_id,
            owner_id: db.owner_id,
            start_date: db.start_date,
            end_date: db.end_date,
            monthly_rent: db.monthly_rent,
            deposit_amount: db.deposit_amount,
            terms: db.terms,
            status: db.status,
            tenant_signed_at: db.tenant_signed_at,
            owner_signed_at: db.owner_signed_at,
            requested_end_date: db.requested_end_date,
            extension_note: db.extension_note,
            termination_requested_by: db.termination_requested_by,
            termination_reason: db.termination_reason,
            terminated_at: db.terminated_at,
            cancelled_by: db.cancelled_by,
            version: db.version,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Which side of the contract the caller is on, for list filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContractRole {
    Tenant,
    Owner,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListContractsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    pub status: Option<ContractStatus>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub room_id: Option<RoomId>,
    pub role: Option<ContractRole>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    #[test]
    fn test_live_statuses_match_room_holding_states() {
        assert!(ContractStatus::Disputed.is_live());
        assert!(ContractStatus::Signed.is_live());
        assert!(!ContractStatus::Pending.is_live());
        assert!(!ContractStatus::Expired.is_live());
        assert!(!ContractStatus::Signed.is_running());
        assert!(ContractStatus::TerminationRequested.is_running());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ContractStatus::ExtensionRequested).unwrap(),
            "\"extension_requested\""
        );
        assert_eq!(ContractStatus::TerminationRequested.to_string(), "termination_requested");
    }

    #[test]
    fn test_contract_dates() {
        let today = crate::types::vietnam_today();
        let past = ContractCreate {
            room_id: uuid::Uuid::new_v4(),
            start_date: today - Days::new(1),
            end_date: today,
            terms: None,
        };
        let mut v = Validator::new();
        past.validate(&mut v);
        assert_eq!(v.errors()[0].field, "start_date");

        let inverted = ContractCreate {
            start_date: today + Days::new(10),
            end_date: today + Days::new(10),
            ..past.clone()
        };
        let mut v = Validator::new();
        inverted.validate(&mut v);
        assert_eq!(v.errors()[0].field, "end_date");

        let ok = ContractCreate {
            start_date: today,
            end_date: today + Days::new(90),
            ..past
        };
        assert!(ok.validate_request().is_ok());
    }

    #[test]
    fn test_termination_needs_reason() {
        let request = TerminationRequest { reason: "  ".to_string() };
        assert!(request.validate_request().is_err());
    }
}
