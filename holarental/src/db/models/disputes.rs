//! Database models for disputes.

use crate::api::models::contracts::ContractStatus;
use crate::api::models::disputes::{DisputeCategory, DisputeResolution, DisputeStatus};
use crate::types::{ContractId, DisputeId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct DisputeCreateDBRequest {
    pub contract_id: ContractId,
    pub raised_by: UserId,
    pub respondent_id: UserId,
    pub category: DisputeCategory,
    pub description: String,
    pub evidence_urls: Vec<String>,
    pub contract_status_before: ContractStatus,
}

#[derive(Debug, Clone)]
pub struct DisputeResolutionDBRequest {
    pub resolution: DisputeResolution,
    pub note: String,
    pub refund_amount: Option<i64>,
    pub resolved_by: UserId,
}

#[derive(Debug, Clone, FromRow)]
pub struct DisputeDBResponse {
    pub id: DisputeId,
    pub contract_id: ContractId,
    pub raised_by: UserId,
    pub respondent_id: UserId,
    pub category: DisputeCategory,
    pub description: String,
    pub evidence_urls: Vec<String>,
    pub status: DisputeStatus,
    pub contract_status_before: ContractStatus,
    pub resolution: Option<DisputeResolution>,
    pub resolution_note: Option<String>,
    pub refund_amount: Option<i64>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
