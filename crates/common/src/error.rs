//! Error types for FSQSB

use thiserror::Error;

use crate::types::ActionKind;

/// Result type alias using FSQSB Error
pub type Result<T> = std::result::Result<T, Error>;

/// FSQSB error types
#[derive(Error, Debug)]
pub enum Error {
    /// No credential in the session store. Raised before any network I/O.
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error ({status_code}): {message}")]
    Remote { status_code: u16, message: String },

    #[error("Action {action} rejected: {reason}")]
    ActionRejected { action: ActionKind, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// HTTP status code for remote errors
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Remote { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Short machine-readable tag used in the uniform response shape
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotAuthenticated => "not_authenticated",
            Error::Transport(_) => "transport",
            Error::Remote { .. } => "remote",
            Error::ActionRejected { .. } => "action_rejected",
            Error::InvalidInput(_) => "invalid_input",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }
}
