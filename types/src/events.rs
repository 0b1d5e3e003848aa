//! Events exchanged between the reconciler, the backend and the UI.

use serde::{Serialize, Serializer, ser::SerializeStruct};

use crate::{AvailableDoubt, DoubtId};

/// Why a doubt left the local available set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WithdrawReason {
    /// A `doubt:assigned` push arrived (this solver or another).
    Assigned,
    /// The doubt was missing from a poll that should have listed it.
    AbsentFromPoll,
    AcceptedBySelf,
    LostRace,
    NoLongerExists,
}

impl WithdrawReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::AbsentFromPoll => "absent_from_poll",
            Self::AcceptedBySelf => "accepted_by_self",
            Self::LostRace => "lost_race",
            Self::NoLongerExists => "no_longer_exists",
        }
    }
}

/// Change to the locally-known available set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityEvent {
    Available(AvailableDoubt),
    Withdrawn { id: DoubtId, reason: WithdrawReason },
}

impl AvailabilityEvent {
    #[must_use]
    pub fn doubt_id(&self) -> &DoubtId {
        match self {
            Self::Available(doubt) => &doubt.id,
            Self::Withdrawn { id, .. } => id,
        }
    }
}

/// Routing registration sent when the push connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverRegistration {
    pub user_id: String,
    pub subjects: Vec<String>,
}

impl Serialize for SolverRegistration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SolverRegistration", 3)?;
        state.serialize_field("type", "registerSolver")?;
        state.serialize_field("userId", &self.user_id)?;
        state.serialize_field("subjects", &self.subjects)?;
        state.end()
    }
}
