//! Pure reconciliation state.
//!
//! No IO and no async: every input is a method call and every output is the
//! list of [`AvailabilityEvent`]s it produced. The driver task owns one
//! of these and feeds it push events, poll results and accept outcomes in
//! arrival order.

use std::collections::HashSet;

use edufoyer_types::{
    AcceptError, AcceptResult, AvailabilityEvent, AvailableDoubt, DoubtId, DoubtStatus, PollList,
    SessionJoin, WithdrawReason,
};

use crate::ReconcilerError;

/// Issued when a poll request goes out; handed back with its result.
///
/// Entries that arrive while the poll is in flight are newer than the list it
/// returns, so they are exempt from that poll's absence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket(u64);

#[derive(Debug, Clone)]
struct Entry {
    doubt: AvailableDoubt,
    /// Number of polls issued when this entry was inserted.
    epoch: u64,
}

#[derive(Debug)]
pub struct ReconcilerState {
    subjects: Vec<String>,
    /// Every id ever surfaced or withdrawn. Never shrinks.
    seen: HashSet<DoubtId>,
    /// Ordered by first arrival.
    available: Vec<Entry>,
    seeded: bool,
    polls_issued: u64,
    pending_accept: Option<DoubtId>,
}

impl ReconcilerState {
    /// `subjects` filters arrivals; empty accepts every subject.
    #[must_use]
    pub fn new(subjects: Vec<String>) -> Self {
        Self {
            subjects,
            seen: HashSet::new(),
            available: Vec::new(),
            seeded: false,
            polls_issued: 0,
            pending_accept: None,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<AvailableDoubt> {
        self.available.iter().map(|e| e.doubt.clone()).collect()
    }

    #[must_use]
    pub fn is_available(&self, id: &DoubtId) -> bool {
        self.available.iter().any(|e| &e.doubt.id == id)
    }

    #[must_use]
    pub fn is_seen(&self, id: &DoubtId) -> bool {
        self.seen.contains(id)
    }

    /// Whether a poll has completed successfully yet.
    #[must_use]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    #[must_use]
    pub fn pending_accept(&self) -> Option<&DoubtId> {
        self.pending_accept.as_ref()
    }

    pub fn on_push_available(&mut self, doubt: AvailableDoubt) -> Vec<AvailabilityEvent> {
        if !doubt.matches_subjects(&self.subjects) {
            tracing::debug!(
                doubt_id = %doubt.id,
                subject = %doubt.subject,
                "Ignoring push for unsubscribed subject"
            );
            return Vec::new();
        }
        if !self.seen.insert(doubt.id.clone()) {
            tracing::trace!(doubt_id = %doubt.id, "Duplicate push arrival");
            return Vec::new();
        }
        if doubt.status == DoubtStatus::Assigned {
            // Tombstone only: an assigned doubt is never surfaced.
            tracing::debug!(doubt_id = %doubt.id, "Push arrival already assigned");
            return Vec::new();
        }

        self.insert(doubt.clone());
        vec![AvailabilityEvent::Available(doubt)]
    }

    /// Handles `doubt:assigned`, whoever the assignee was.
    pub fn on_push_assigned(&mut self, id: &DoubtId) -> Vec<AvailabilityEvent> {
        self.withdraw(id, WithdrawReason::Assigned)
            .into_iter()
            .collect()
    }

    /// Record that a poll request is being issued.
    pub fn begin_poll(&mut self) -> PollTicket {
        self.polls_issued += 1;
        PollTicket(self.polls_issued)
    }

    /// Apply the full list returned by the poll identified by `ticket`.
    ///
    /// The first successful poll seeds silently: its new entries become
    /// available without an `Available` event. Withdrawals are reported on
    /// every poll, the seeding one included. Entries the backend listed but
    /// that failed validation keep their current state.
    pub fn on_poll(&mut self, ticket: PollTicket, list: PollList) -> Vec<AvailabilityEvent> {
        let silent = !self.seeded;
        let mut events = Vec::new();
        let mut listed: HashSet<DoubtId> = list.unreadable.into_iter().collect();
        let mut seeded_count = 0usize;

        for doubt in list.doubts {
            if !doubt.matches_subjects(&self.subjects) {
                continue;
            }
            if doubt.status == DoubtStatus::Assigned {
                events.extend(self.withdraw(&doubt.id, WithdrawReason::Assigned));
                continue;
            }
            listed.insert(doubt.id.clone());
            if !self.seen.insert(doubt.id.clone()) {
                continue;
            }

            self.insert(doubt.clone());
            if silent {
                seeded_count += 1;
            } else {
                tracing::debug!(doubt_id = %doubt.id, "Poll surfaced a missed arrival");
                events.push(AvailabilityEvent::Available(doubt));
            }
        }

        let cutoff = ticket.0;
        let mut absent = Vec::new();
        self.available.retain(|entry| {
            let keep = entry.epoch >= cutoff || listed.contains(&entry.doubt.id);
            if !keep {
                absent.push(entry.doubt.id.clone());
            }
            keep
        });
        for id in absent {
            tracing::debug!(doubt_id = %id, "Doubt absent from poll; withdrawing");
            events.push(AvailabilityEvent::Withdrawn {
                id,
                reason: WithdrawReason::AbsentFromPoll,
            });
        }

        if silent {
            tracing::info!(seeded = seeded_count, "Initial poll seeded available doubts");
            self.seeded = true;
        }
        events
    }

    /// Claim the single accept slot.
    pub fn begin_accept(&mut self, id: &DoubtId) -> Result<(), ReconcilerError> {
        if let Some(pending) = &self.pending_accept {
            return Err(ReconcilerError::AcceptInFlight {
                pending: pending.clone(),
            });
        }
        self.pending_accept = Some(id.clone());
        Ok(())
    }

    /// Apply the remote accept outcome and release the accept slot.
    pub fn finish_accept(
        &mut self,
        id: &DoubtId,
        outcome: Result<SessionJoin, AcceptError>,
    ) -> (Result<AcceptResult, ReconcilerError>, Vec<AvailabilityEvent>) {
        if self.pending_accept.as_ref() == Some(id) {
            self.pending_accept = None;
        }

        let (result, withdraw) = settle_accept(outcome);
        let events = withdraw
            .and_then(|reason| self.withdraw(id, reason))
            .into_iter()
            .collect();
        (result, events)
    }

    fn insert(&mut self, doubt: AvailableDoubt) {
        self.available.push(Entry {
            doubt,
            epoch: self.polls_issued,
        });
    }

    /// Tombstone `id` and drop it from the available set.
    ///
    /// Returns the event to fire, if the doubt was actually available.
    fn withdraw(&mut self, id: &DoubtId, reason: WithdrawReason) -> Option<AvailabilityEvent> {
        self.seen.insert(id.clone());
        let index = self.available.iter().position(|e| &e.doubt.id == id)?;
        self.available.remove(index);
        Some(AvailabilityEvent::Withdrawn {
            id: id.clone(),
            reason,
        })
    }
}

/// Map a remote accept outcome to the caller-facing result, plus the
/// withdrawal it implies (if any).
#[must_use]
pub fn settle_accept(
    outcome: Result<SessionJoin, AcceptError>,
) -> (Result<AcceptResult, ReconcilerError>, Option<WithdrawReason>) {
    match outcome {
        Ok(join) => (
            Ok(AcceptResult::Success(join)),
            Some(WithdrawReason::AcceptedBySelf),
        ),
        Err(AcceptError::AlreadyAssigned) => {
            (Ok(AcceptResult::LostRace), Some(WithdrawReason::LostRace))
        }
        Err(AcceptError::NotFound) => (
            Ok(AcceptResult::NoLongerExists),
            Some(WithdrawReason::NoLongerExists),
        ),
        Err(AcceptError::Network(reason)) => {
            (Ok(AcceptResult::RetryableFailure { reason }), None)
        }
        Err(AcceptError::Unauthorized) => (Err(ReconcilerError::Unauthorized), None),
    }
}
