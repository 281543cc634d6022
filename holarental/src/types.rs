//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, RoomId, etc.)
//! - Permission and authorization types
//! - Resource and operation enums for access control
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`HousingAreaId`]: Landlord listing identifier
//! - [`RoomId`]: Rentable room identifier
//! - [`ContractId`]: Tenancy contract identifier
//! - [`TransactionId`]: Payment record identifier
//! - [`DisputeId`]: Dispute identifier
//! - [`ConversationId`] / [`MessageId`]: Chat identifiers
//!
//! # Permission System
//!
//! - [`Resource`]: What entity type is being accessed (Rooms, Contracts, etc.)
//! - [`Operation`]: What action is being performed (Read, Create, Update, Delete)
//! - [`Permission`]: Authorization requirement combining resource and operation
//!
//! Operations come in two flavors:
//! - **All**: Unrestricted access to all entities (e.g., `ReadAll`, `DeleteAll`)
//! - **Own**: Restricted to the caller's own entities (e.g., `ReadOwn`, `UpdateOwn`)
//!
//! Holding an `*All` operation implies the matching `*Own` one. See
//! [`crate::auth::permissions`] for the role matrix.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Deserialize;
use std::fmt;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type HousingAreaId = Uuid;
pub type RoomId = Uuid;
pub type ContractId = Uuid;
pub type TransactionId = Uuid;
pub type DisputeId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Marketplace dates (contract terms, gateway order prefixes) follow Vietnam time, UTC+7.
pub fn vietnam_time(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(7 * 3600).unwrap_or_else(|| Utc.fix());
    at.with_timezone(&offset)
}

pub fn vietnam_today() -> NaiveDate {
    vietnam_time(Utc::now()).date_naive()
}

// Common types for path parameters
#[derive(Debug, Clone, Deserialize)]
pub enum CurrentKeyword {
    #[serde(rename = "current")]
    Current,
}

/// Allows routes like /users/current/profile and /users/{user_id}/profile to hit the same
/// handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserIdOrCurrent {
    Current(CurrentKeyword),
    Id(UserId),
}

impl UserIdOrCurrent {
    /// Resolve to a concrete user id, substituting the caller for `current`.
    pub fn resolve(&self, current: UserId) -> UserId {
        match self {
            UserIdOrCurrent::Current(_) => current,
            UserIdOrCurrent::Id(id) => *id,
        }
    }
}

// Operations that can be performed on resources
// *-All means unrestricted access, *-Own means restricted to own resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAll,
    CreateOwn,
    ReadAll,
    ReadOwn,
    UpdateAll,
    UpdateOwn,
    DeleteAll,
    DeleteOwn,
    SystemAccess,
}

impl Operation {
    /// The unrestricted counterpart of an `*Own` operation, if any.
    pub fn widened(self) -> Option<Operation> {
        match self {
            Operation::CreateOwn => Some(Operation::CreateAll),
            Operation::ReadOwn => Some(Operation::ReadAll),
            Operation::UpdateOwn => Some(Operation::UpdateAll),
            Operation::DeleteOwn => Some(Operation::DeleteAll),
            _ => None,
        }
    }
}

// Resources that can be operated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Profiles,
    HousingAreas,
    Rooms,
    Contracts,
    Transactions,
    Payments,
    Disputes,
    Conversations,
    System,
}

// Permission types for authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Simple permission: (Resource, Operation)
    Allow(Resource, Operation),
    /// Logical combinator
    Any(Vec<Permission>),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateAll | Operation::CreateOwn => write!(f, "Create"),
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
            Operation::UpdateAll | Operation::UpdateOwn => write!(f, "Update"),
            Operation::DeleteAll | Operation::DeleteOwn => write!(f, "Delete"),
            Operation::SystemAccess => write!(f, "Access"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Users => "users",
            Resource::Profiles => "profiles",
            Resource::HousingAreas => "housing areas",
            Resource::Rooms => "rooms",
            Resource::Contracts => "contracts",
            Resource::Transactions => "transactions",
            Resource::Payments => "payments",
            Resource::Disputes => "disputes",
            Resource::Conversations => "conversations",
            Resource::System => "system",
        };
        f.write_str(name)
    }
}
