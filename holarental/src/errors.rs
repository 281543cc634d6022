use crate::db::errors::DbError;
use crate::lifecycle::LifecycleError;
use crate::payment_providers::PaymentError;
use crate::types::{Operation, Permission, Resource};
use crate::validation::FieldError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// User lacks required permissions for the operation
    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: Resource,
    },

    /// Authenticated, permitted in general, but not allowed to act on this entity
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body failed schema validation
    #[error("Validation failed: {} field error(s)", errors.len())]
    Validation { errors: Vec<FieldError> },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// State conflict, e.g. a lifecycle transition from the wrong status
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// No payment provider configured
    #[error("Payment provider not configured")]
    PaymentNotConfigured,

    /// Upstream payment gateway failure
    #[error("Payment gateway error: {message}")]
    PaymentGateway { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON envelope returned for every failed request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    pub code: String,
}

impl Error {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } | Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } | Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PaymentNotConfigured => StatusCode::NOT_IMPLEMENTED,
            Error::PaymentGateway { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } | DbError::StaleWrite { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Machine-readable code carried in the envelope
    pub fn code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "unauthenticated",
            StatusCode::FORBIDDEN => "forbidden",
            StatusCode::BAD_REQUEST if matches!(self, Error::Validation { .. }) => "validation_failed",
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            StatusCode::NOT_IMPLEMENTED => "payment_not_configured",
            StatusCode::BAD_GATEWAY => "payment_gateway_error",
            _ => "internal_error",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource, .. } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::Validation { .. } => "Request validation failed".to_string(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Conflict { message } => message.clone(),
            Error::PaymentNotConfigured => "Payments are not configured on this server".to_string(),
            Error::PaymentGateway { .. } => "The payment gateway could not process the request".to_string(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => unique_violation_message(constraint.as_deref()).to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::StaleWrite { .. } => "The resource was modified by another request, please retry".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            message: self.user_message(),
            errors: match self {
                Error::Validation { errors } => Some(errors.clone()),
                _ => None,
            },
            code: self.code().to_string(),
        }
    }
}

fn unique_violation_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_unique") => "An account with this email address already exists",
        Some("users_username_unique") => "This username is already taken",
        Some("users_external_id_unique") => "This external account is already linked",
        Some("rooms_area_name_unique") => "A room with this name already exists in the housing area",
        Some("contracts_one_live_per_room") => "This room already has a live contract",
        Some("disputes_one_open_per_contract") => "This contract already has an open dispute",
        Some("transactions_one_live_deposit_per_contract") => "A deposit for this contract is already pending or paid",
        Some("transactions_one_live_service_fee_per_contract") => "The service fee for this contract is already pending or paid",
        Some("conversations_pair_unique") => "Conversation already exists",
        _ => "Resource already exists",
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::PaymentGateway { .. } => {
                tracing::error!("Payment gateway error: {}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::Validation { .. } | Error::NotFound { .. } | Error::PaymentNotConfigured => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotConfigured => Error::PaymentNotConfigured,
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            PaymentError::Database(db) => Error::Database(db),
            other => Error::PaymentGateway { message: other.to_string() },
        }
    }
}

impl From<LifecycleError> for Error {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotAllowed { .. } => Error::Forbidden { message: err.to_string() },
            LifecycleError::InvalidState { .. } | LifecycleError::AlreadySigned { .. } => {
                Error::Conflict { message: err.to_string() }
            }
        }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn render(err: Error) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_error_envelope_lists_every_field() {
        let err = Error::Validation {
            errors: vec![
                FieldError::new("name", "must not be empty"),
                FieldError::new("price_per_month", "must be greater than 0"),
            ],
        };
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "validation_failed");
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
        assert_eq!(body["errors"][1]["field"], "price_per_month");
    }

    #[tokio::test]
    async fn test_non_validation_errors_omit_field_list() {
        let (status, body) = render(Error::not_found("Room", "abc")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
        assert!(body.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_internal_details_are_not_leaked() {
        let err = Error::Other(anyhow::anyhow!("connection to 10.0.0.5 refused"));
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "internal_error");
        assert_eq!(body["message"], "Internal server error");
    }

    #[test]
    fn test_status_and_code_mapping() {
        let cases = [
            (Error::Unauthenticated { message: None }, StatusCode::UNAUTHORIZED, "unauthenticated"),
            (Error::Forbidden { message: "no".into() }, StatusCode::FORBIDDEN, "forbidden"),
            (Error::bad_request("bad"), StatusCode::BAD_REQUEST, "bad_request"),
            (Error::conflict("busy"), StatusCode::CONFLICT, "conflict"),
            (Error::PaymentNotConfigured, StatusCode::NOT_IMPLEMENTED, "payment_not_configured"),
            (
                Error::PaymentGateway { message: "timeout".into() },
                StatusCode::BAD_GATEWAY,
                "payment_gateway_error",
            ),
            (
                Error::Database(DbError::stale("contract", "abc")),
                StatusCode::CONFLICT,
                "conflict",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "{err}");
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn test_unique_violation_messages_name_the_constraint() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("contracts_one_live_per_room".to_string()),
            table: Some("contracts".to_string()),
            message: "duplicate key".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "This room already has a live contract");
    }

    #[test]
    fn test_lifecycle_errors_map_to_conflict_or_forbidden() {
        use crate::api::models::contracts::ContractStatus;
        use crate::lifecycle::Party;

        let err: Error = LifecycleError::InvalidState {
            status: ContractStatus::Expired,
            action: "cancel",
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "cannot cancel a contract that is expired");

        let err: Error = LifecycleError::NotAllowed {
            party: Party::Tenant,
            action: "approve the extension of",
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }
}
