//! Error taxonomy shared by the policy, lifecycle and storage layers.
//!
//! Command handlers wrap these in `anyhow::Error`; library code returns them
//! directly so callers can tell a denied action from a failed backend call.

use thiserror::Error;

use crate::models::Status;

#[derive(Debug, Error)]
pub enum TicketError {
    /// Role or ownership check failed.
    #[error("Not allowed: {0}")]
    Unauthorized(String),

    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    #[error("Cannot move ticket from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The backend refused a write that clashes with existing state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage or I/O failure. Never retried.
    #[error("Backend failure: {0}")]
    Transient(String),
}

impl TicketError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        TicketError::NotFound { entity, id }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TicketError::Validation(_) | TicketError::InvalidTransition { .. }
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TicketError::Unauthorized(_))
    }
}

impl From<rusqlite::Error> for TicketError {
    fn from(err: rusqlite::Error) -> Self {
        TicketError::Transient(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TicketError>;
