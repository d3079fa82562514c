//! Desk runtime errors

use crate::link::LinkError;

/// Errors returned by desk actors and the registry
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeskError {
    #[error("Desk service is not running")]
    NotRunning,

    #[error("Invalid height {height}, range is {min} - {max}")]
    InvalidHeight { height: i32, min: i32, max: i32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    TimedOut,

    #[error("Transport error: {0}")]
    Transport(#[from] LinkError),

    #[error("Desk initialization failed while {stage}: {source}")]
    Initialization {
        stage: &'static str,
        #[source]
        source: LinkError,
    },

    #[error("Desk not found for address {address}: {source}")]
    NotFound {
        address: String,
        #[source]
        source: Box<DeskError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeskError {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            DeskError::NotRunning => "not_running",
            DeskError::InvalidHeight { .. } => "invalid_height",
            DeskError::Cancelled => "cancelled",
            DeskError::TimedOut => "timed_out",
            DeskError::Transport(_) => "transport",
            DeskError::Initialization { .. } => "initialization",
            DeskError::NotFound { .. } => "not_found",
            DeskError::Internal(_) => "internal",
        }
    }
}

/// Result type for desk operations
pub type DeskResult<T> = Result<T, DeskError>;
