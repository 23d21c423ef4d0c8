use super::interest_models::InterestKind;
use crate::core::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterestError {
    #[error("Storage is not configured: {0}")]
    Misconfigured(String),

    #[error("Unknown interest kind '{0}'")]
    InvalidKind(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No {kind} interest with id '{id}'")]
    NotFound { kind: InterestKind, id: String },

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Failed to load interest: {0}")]
    FetchFailed(String),

    #[error("Failed to save message: {0}")]
    InsertFailed(String),

    #[error("Failed to update interest: {0}")]
    UpdateFailed(String),
}

impl InterestError {
    /// Map a gateway readiness failure. Any error out of `ensure_configured`
    /// means the gateway is unusable.
    pub fn misconfigured(err: GatewayError) -> Self {
        match err {
            GatewayError::Misconfigured(msg) => InterestError::Misconfigured(msg),
            other => InterestError::Misconfigured(other.to_string()),
        }
    }
}
