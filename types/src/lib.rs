//! Core domain types for EduFoyer solver sessions.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the transport adapters, the
//! availability reconciler, and the terminal front end.
//!
//! # Wire vs. domain
//!
//! Payloads arrive from two unreliable sources (a push stream and a polling
//! endpoint) in the backend's JSON shape. [`DoubtPayload`] mirrors that shape
//! loosely; converting it into an [`AvailableDoubt`] is the single validation
//! boundary. Anything that fails conversion is a [`PayloadError`] and must be
//! dropped by the caller rather than propagated.

#![allow(clippy::missing_errors_doc)]

mod accept;
mod doubt;
mod events;

pub use accept::{AcceptError, AcceptResult, SessionJoin};
pub use doubt::{
    AssignedPayload, AvailableDoubt, DoubtPayload, DoubtStatus, PayloadError, PollList, Schedule,
};
pub use events::{AvailabilityEvent, SolverRegistration, WithdrawReason};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque identifier of a doubt, guaranteed non-empty (after trimming).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DoubtId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("doubt id must not be empty")]
pub struct EmptyDoubtIdError;

impl DoubtId {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyDoubtIdError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EmptyDoubtIdError);
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DoubtId {
    type Error = EmptyDoubtIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DoubtId {
    type Error = EmptyDoubtIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DoubtId> for String {
    fn from(value: DoubtId) -> Self {
        value.0
    }
}

impl AsRef<str> for DoubtId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for DoubtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Bearer token issued by the external auth service.
///
/// Debug output never includes the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<redacted>)")
    }
}
