//! Outcome of claiming a doubt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Information needed to join the live session after a successful accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionJoin {
    pub session_id: String,
    pub room_name: Option<String>,
    pub join_url: Option<String>,
}

/// Failure kinds of the remote accept call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcceptError {
    /// Another solver claimed the doubt first.
    #[error("doubt was already assigned to another solver")]
    AlreadyAssigned,
    #[error("doubt not found")]
    NotFound,
    #[error("not authorized; re-authentication required")]
    Unauthorized,
    #[error("network error: {0}")]
    Network(String),
}

/// Result of `accept_doubt` as presented to the UI layer.
///
/// `LostRace` and `RetryableFailure` are deliberately separate variants: the
/// first tells the user retrying is pointless, the second that it may help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptResult {
    Success(SessionJoin),
    LostRace,
    NoLongerExists,
    RetryableFailure { reason: String },
}

impl AcceptResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure { .. })
    }

    /// Short message suitable for a toast or status line.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Success(join) => format!("Doubt accepted. Joining session {}.", join.session_id),
            Self::LostRace => "This doubt was just taken by another solver.".to_string(),
            Self::NoLongerExists => "This doubt is no longer available.".to_string(),
            Self::RetryableFailure { reason } => {
                format!("Could not reach the server ({reason}). Please try again.")
            }
        }
    }
}
