//! Error types for the recovery request system.

use thiserror::Error;

use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::strategy::StrategyId;

/// Result type alias using the salvor error type.
pub type Result<T> = std::result::Result<T, SalvorError>;

/// Main error type for the recovery request system.
#[derive(Error, Debug)]
pub enum SalvorError {
    /// Malformed identifier, payload, or field value
    #[error("Validation error: {0}")]
    Validation(String),

    /// The actor is not allowed to perform the operation
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Request is in the wrong status for the requested operation
    #[error("Invalid state transition: request {request} is '{current}', cannot {action}")]
    InvalidState {
        request: RequestId,
        current: RequestStatus,
        action: &'static str,
    },

    /// Request not found (or soft-deleted, for read paths)
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    /// Strategy not found in the catalog
    #[error("Strategy not found: {0}")]
    StrategyNotFound(StrategyId),

    /// No association between the request and the strategy
    #[error("Strategy {1} is not attached to request {0}")]
    AssociationNotFound(RequestId, StrategyId),

    /// The calculation could not be handed to the compute service
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// General error from anyhow (storage failures end up here)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error category, for adapters that need to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    StateConflict,
    NotFound,
    Dispatch,
    Internal,
}

impl SalvorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SalvorError::Validation(_) | SalvorError::Serialization(_) => ErrorKind::Validation,
            SalvorError::Unauthorized(_) => ErrorKind::Authorization,
            SalvorError::InvalidState { .. } => ErrorKind::StateConflict,
            SalvorError::RequestNotFound(_)
            | SalvorError::StrategyNotFound(_)
            | SalvorError::AssociationNotFound(..) => ErrorKind::NotFound,
            SalvorError::Dispatch(_) | SalvorError::HttpClient(_) => ErrorKind::Dispatch,
            SalvorError::Config(_) | SalvorError::Other(_) => ErrorKind::Internal,
        }
    }
}
