//! API request/response models for contract disputes.

use super::contracts::ContractStatus;
use super::pagination::Pagination;
use crate::db::models::disputes::DisputeDBResponse;
use crate::types::{ContractId, DisputeId, UserId};
use crate::validation::{Validate, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

pub const MAX_EVIDENCE_URLS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "dispute_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeCategory {
    Payment,
    PropertyDamage,
    ContractViolation,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Withdrawn,
}

impl DisputeStatus {
    pub fn is_open(self) -> bool {
        matches!(self, DisputeStatus::Open | DisputeStatus::UnderReview)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "dispute_resolution", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    RefundTenant,
    ReleaseToOwner,
    TerminateContract,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisputeCreate {
    #[schema(value_type = String, format = "uuid")]
    pub contract_id: ContractId,
    pub category: DisputeCategory,
    pub description: String,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
}

impl Validate for DisputeCreate {
    fn validate(&self, v: &mut Validator) {
        v.text("description", &self.description, 10, 5000)
            .urls("evidence_urls", &self.evidence_urls, MAX_EVIDENCE_URLS);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisputeResolve {
    pub resolution: DisputeResolution,
    pub note: String,
    /// Only for `refund_tenant`. Defaults to the refundable deposit.
    pub refund_amount: Option<i64>,
}

impl Validate for DisputeResolve {
    fn validate(&self, v: &mut Validator) {
        v.text("note", &self.note, 1, 2000);
        if let Some(amount) = self.refund_amount {
            v.positive("refund_amount", amount);
            v.check(
                self.resolution == DisputeResolution::RefundTenant,
                "refund_amount",
                "is only allowed with refund_tenant",
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisputeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DisputeId,
    #[schema(value_type = String, format = "uuid")]
    pub contract_id: ContractId,
    #[schema(value_type = String, format = "uuid")]
    pub raised_by: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub respondent_id: UserId,
    pub category: DisputeCategory,
    pub description: String,
    pub evidence_urls: Vec<String>,
    pub status: DisputeStatus,
    pub contract_status_before: ContractStatus,
    pub resolution: Option<DisputeResolution>,
    pub resolution_note: Option<String>,
    pub refund_amount: Option<i64>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DisputeDBResponse> for DisputeResponse {
    fn from(db: DisputeDBResponse) -> Self {
        Self {
            id: db.id,
            contract_id: db.contract_id,
            raised_by: db.raised_by,
            respondent_id: db.respondent_id,
            category: db.category,
            description: db.description,
            evidence_urls: db.evidence_urls,
            status: db.status,
            contract_status_before: db.contract_status_before,
            resolution: db.resolution,
            resolution_note: db.resolution_note,
            refund_amount: db.refund_amount,
            resolved_by: db.resolved_by,
            resolved_at: db.resolved_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListDisputesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    pub status: Option<DisputeStatus>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub contract_id: Option<ContractId>,
}
