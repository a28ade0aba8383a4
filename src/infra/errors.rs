// src/infra/errors.rs — Error types for gpurent

use thiserror::Error;

use crate::core::types::{Money, SessionStatus};

pub type Result<T> = std::result::Result<T, RentalError>;

#[derive(Error, Debug)]
pub enum RentalError {
    // Validation errors (fail-closed, nothing mutated)
    #[error("Cannot {action} session '{session_id}' while it is {status}")]
    InvalidTransition {
        session_id: String,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("User '{actor_id}' is not authorized to access {target}")]
    NotAuthorized { actor_id: String, target: String },

    #[error("GPU '{gpu_id}' is not available: {reason}")]
    ResourceUnavailable { gpu_id: String, reason: String },

    #[error("GPU provider '{provider_id}' is not approved")]
    ProviderNotApproved { provider_id: String },

    #[error("Insufficient wallet balance: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Storage
    #[error("Session '{session_id}' was modified concurrently")]
    Conflict { session_id: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stable, caller-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidTransition,
    NotAuthorized,
    ResourceUnavailable,
    ProviderNotApproved,
    InsufficientFunds,
    NotFound,
    InvalidInput,
    Conflict,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::ProviderNotApproved => "provider_not_approved",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Persistence => "persistence_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl RentalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RentalError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            RentalError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            RentalError::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            RentalError::ProviderNotApproved { .. } => ErrorKind::ProviderNotApproved,
            RentalError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            RentalError::NotFound { .. } => ErrorKind::NotFound,
            RentalError::InvalidInput(_) => ErrorKind::InvalidInput,
            RentalError::Conflict { .. } => ErrorKind::Conflict,
            RentalError::Persistence(_) | RentalError::Io(_) => ErrorKind::Persistence,
            RentalError::Config(_) | RentalError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        RentalError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        RentalError::Persistence(message.into())
    }
}

impl From<rusqlite::Error> for RentalError {
    fn from(err: rusqlite::Error) -> Self {
        RentalError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for RentalError {
    fn from(err: serde_json::Error) -> Self {
        RentalError::Persistence(format!("corrupt JSON column: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message_carries_figures() {
        let err = RentalError::InsufficientFunds {
            required: Money::from_cents(200),
            available: Money::from_cents(100),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        let msg = err.to_string();
        assert!(msg.contains("2.00"));
        assert!(msg.contains("1.00"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = RentalError::InvalidTransition {
            session_id: "s-1".into(),
            status: SessionStatus::Pending,
            action: "stop",
        };
        assert_eq!(err.kind().as_str(), "invalid_transition");
        assert_eq!(err.to_string(), "Cannot stop session 's-1' while it is pending");
    }

    #[test]
    fn test_sqlite_errors_are_persistence() {
        let err: RentalError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
