//! Failure taxonomy for session operations.

use thiserror::Error;

use crate::provider::OperationKind;

/// Why an operation completed unsuccessfully.
///
/// Carried by completion payloads, never returned as an `Err` from the
/// lifecycle operations themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session provider unavailable")]
    Unavailable,
    #[error("A {0} operation is already in flight")]
    Busy(OperationKind),
    #[error("Provider rejected {kind} request: {reason}")]
    SubmissionRejected { kind: OperationKind, reason: String },
    #[error("Provider reported {0} failure")]
    ProviderReportedFailure(OperationKind),
    #[error("Search returned no sessions")]
    EmptyResult,
    #[error("Existing session could not be destroyed")]
    StaleSessionNotDestroyed,
}

/// Programming-contract violation, reported synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("max_public_connections must be greater than zero")]
    InvalidConfig,
    #[error("Search result carries no connection token")]
    InvalidSearchResult,
}
