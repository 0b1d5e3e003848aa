//! Doubt availability reconciliation.
//!
//! A solver learns about open doubts from two unreliable sources: push events
//! on a long-lived stream, and a periodic poll of the available list. This
//! crate merges both into one de-duplicated stream of [`AvailabilityEvent`]s
//! and arbitrates the accept race.
//!
//! # Architecture
//!
//! - [`state`] - the pure core: seen-id tombstones, the ordered available set,
//!   poll epochs and the single accept slot
//! - `driver` - a tokio task that owns the state and serializes every input
//! - [`ReconcilerHandle`] - the cloneable front door used by the UI layer
//! - [`refresh`] - in-process "doubt created" bus that triggers an early poll
//! - [`moderation`] - outgoing chat moderation hook for the session layer
//!
//! # Guarantees
//!
//! Once a doubt id leaves the available set it never comes back for the
//! lifetime of the reconciler. A doubt is announced at most once. The first
//! successful poll populates the set without announcing anything.

mod driver;
mod handle;
pub mod moderation;
pub mod refresh;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use edufoyer_client::{DoubtApi, PushEvent};
use edufoyer_types::DoubtId;
use thiserror::Error;
use tokio::sync::mpsc;

pub use edufoyer_types::{
    AcceptResult, AvailabilityEvent, AvailableDoubt, SessionJoin, WithdrawReason,
};
pub use handle::{ReconcilerHandle, Subscription};
pub use moderation::{BlockedTermsModerator, MessageModerator, ModerationAction, ModerationVerdict};
pub use refresh::{DoubtCreated, RefreshBus};
pub use state::ReconcilerState;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcilerError {
    /// Credentials were rejected; the session must re-authenticate.
    #[error("not authorized; re-authentication required")]
    Unauthorized,
    #[error("an accept for doubt {pending} is already in progress")]
    AcceptInFlight { pending: DoubtId },
    #[error("reconciler has been disposed")]
    Disposed,
}

/// Transport status, for an "offline" indicator.
///
/// Transport failures never reach subscribers as events; this is the only
/// place they are visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealth {
    pub push_connected: bool,
    pub consecutive_poll_failures: u32,
    pub last_poll_ok: Option<DateTime<Utc>>,
    pub auth_failed: bool,
}

impl TransportHealth {
    /// Neither source is currently known to be working.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.auth_failed || (!self.push_connected && self.consecutive_poll_failures > 0)
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub poll_interval: Duration,
    /// Subjects this solver handles; empty means all.
    pub subjects: Vec<String>,
    pub refresh_bus: Option<RefreshBus>,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            subjects: Vec::new(),
            refresh_bus: None,
        }
    }
}

pub struct Reconciler;

impl Reconciler {
    /// Start a reconciler on the current tokio runtime.
    ///
    /// `push` is `None` when the push stream is disabled; polling alone then
    /// keeps the set eventually consistent. The first poll is issued
    /// immediately.
    #[must_use]
    pub fn spawn(
        api: Arc<dyn DoubtApi>,
        push: Option<mpsc::Receiver<PushEvent>>,
        options: ReconcilerOptions,
    ) -> ReconcilerHandle {
        driver::spawn(api, push, options)
    }
}
