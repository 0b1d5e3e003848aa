//! The reconciler task.
//!
//! One task owns [`ReconcilerState`] and handles every input to completion
//! before taking the next: commands from handles, push events, poll ticks,
//! refresh notifications, and the results of the poll and accept calls it
//! spawned. Remote calls run on their own tasks so a slow backend never
//! delays push handling.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edufoyer_client::{DoubtApi, FetchError, PushEvent};
use edufoyer_types::{AcceptError, AcceptResult, AvailabilityEvent, DoubtId, PollList, SessionJoin};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::handle::{Command, ReconcilerHandle};
use crate::refresh::DoubtCreated;
use crate::state::{PollTicket, ReconcilerState, settle_accept};
use crate::{ReconcilerError, ReconcilerOptions, TransportHealth};

type AcceptReply = oneshot::Sender<Result<AcceptResult, ReconcilerError>>;

/// Results of work the driver spawned.
enum Completion {
    Poll {
        ticket: PollTicket,
        result: Result<PollList, FetchError>,
    },
    Accept {
        id: DoubtId,
        outcome: Result<SessionJoin, AcceptError>,
        reply: AcceptReply,
    },
}

pub(crate) fn spawn(
    api: Arc<dyn DoubtApi>,
    push: Option<mpsc::Receiver<PushEvent>>,
    options: ReconcilerOptions,
) -> ReconcilerHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let (health_tx, health_rx) = watch::channel(TransportHealth::default());

    let driver = Driver {
        api,
        state: ReconcilerState::new(options.subjects),
        subscribers: Vec::new(),
        health: health_tx,
        completion_tx,
        poll_task: None,
        repoll: false,
    };
    let refresh = options.refresh_bus.map(|bus| bus.subscribe());

    tracing::info!(
        poll_interval_ms = options.poll_interval.as_millis() as u64,
        push = push.is_some(),
        "Starting doubt reconciler"
    );
    tokio::spawn(driver.run(
        command_rx,
        completion_rx,
        push,
        refresh,
        options.poll_interval,
    ));

    ReconcilerHandle::new(command_tx, health_rx)
}

struct Driver {
    api: Arc<dyn DoubtApi>,
    state: ReconcilerState,
    subscribers: Vec<mpsc::UnboundedSender<AvailabilityEvent>>,
    health: watch::Sender<TransportHealth>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    poll_task: Option<JoinHandle<()>>,
    /// A refresh arrived while a poll was in flight.
    repoll: bool,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut push: Option<mpsc::Receiver<PushEvent>>,
        mut refresh: Option<broadcast::Receiver<DoubtCreated>>,
        poll_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let done = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispose(done)) => break Some(done),
                    Some(command) => self.on_command(command),
                    None => break None,
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
                _ = ticker.tick() => self.start_poll(false),
                event = recv_push(&mut push) => match event {
                    Some(event) => self.on_push(event),
                    None => {
                        tracing::info!("Push channel closed; continuing with polling only");
                        push = None;
                        self.set_health(|h| h.push_connected = false);
                    }
                },
                created = recv_refresh(&mut refresh) => match created {
                    Ok(created) => {
                        tracing::debug!(subject = %created.subject, "Doubt created; refreshing");
                        self.start_poll(true);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Refresh bus lagged; refreshing");
                        self.start_poll(true);
                    }
                    Err(broadcast::error::RecvError::Closed) => refresh = None,
                },
            }
        };

        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        // Accepts still running reply on their own once the channel is
        // closed; results already queued are settled here.
        completions.close();
        while let Some(completion) = completions.recv().await {
            if matches!(completion, Completion::Accept { .. }) {
                self.on_completion(completion);
            }
        }
        // Dropping the push receiver stops the listener; dropping the
        // subscriber senders ends every subscription.
        drop(push);
        self.subscribers.clear();
        tracing::info!("Doubt reconciler stopped");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::Accept { id, reply } => self.start_accept(id, reply),
            Command::Refresh => self.start_poll(true),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            Command::Dispose(_) => {}
        }
    }

    fn on_push(&mut self, event: PushEvent) {
        let events = match event {
            PushEvent::Available(doubt) => self.state.on_push_available(doubt),
            PushEvent::Assigned(id) => self.state.on_push_assigned(&id),
            PushEvent::Connected => {
                self.set_health(|h| h.push_connected = true);
                // Catch up on anything missed while disconnected.
                if self.state.is_seeded() {
                    self.start_poll(false);
                }
                return;
            }
            PushEvent::Disconnected { reason } => {
                tracing::debug!(%reason, "Push disconnected; relying on polling");
                self.set_health(|h| h.push_connected = false);
                return;
            }
        };
        self.emit(events);
    }

    fn start_poll(&mut self, queue_if_busy: bool) {
        if self.poll_task.is_some() {
            self.repoll |= queue_if_busy;
            return;
        }

        let ticket = self.state.begin_poll();
        let api = Arc::clone(&self.api);
        let completions = self.completion_tx.clone();
        self.poll_task = Some(tokio::spawn(async move {
            let result = api.poll_available().await;
            let _ = completions.send(Completion::Poll { ticket, result });
        }));
    }

    fn start_accept(&mut self, id: DoubtId, reply: AcceptReply) {
        if let Err(e) = self.state.begin_accept(&id) {
            let _ = reply.send(Err(e));
            return;
        }

        tracing::info!(doubt_id = %id, "Accepting doubt");
        let api = Arc::clone(&self.api);
        let completions = self.completion_tx.clone();
        // Not tracked: an accept runs to completion even across dispose.
        tokio::spawn(async move {
            let outcome = api.accept_doubt(&id).await;
            if let Err(mpsc::error::SendError(Completion::Accept { outcome, reply, .. })) =
                completions.send(Completion::Accept { id, outcome, reply })
            {
                let _ = reply.send(settle_accept(outcome).0);
            }
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Poll { ticket, result } => {
                self.poll_task = None;
                self.on_poll_result(ticket, result);
                if std::mem::take(&mut self.repoll) {
                    self.start_poll(false);
                }
            }
            Completion::Accept { id, outcome, reply } => {
                let (result, events) = self.state.finish_accept(&id, outcome);
                match &result {
                    Ok(accepted) => {
                        tracing::info!(doubt_id = %id, outcome = ?accepted, "Accept settled");
                    }
                    Err(ReconcilerError::Unauthorized) => {
                        tracing::error!(doubt_id = %id, "Accept rejected credentials");
                        self.set_health(|h| h.auth_failed = true);
                    }
                    Err(e) => tracing::warn!(doubt_id = %id, error = %e, "Accept failed"),
                }
                self.emit(events);
                let _ = reply.send(result);
            }
        }
    }

    fn on_poll_result(
        &mut self,
        ticket: PollTicket,
        result: Result<PollList, FetchError>,
    ) {
        match result {
            Ok(list) => {
                tracing::debug!(
                    count = list.doubts.len(),
                    unreadable = list.unreadable.len(),
                    "Poll succeeded"
                );
                let events = self.state.on_poll(ticket, list);
                self.set_health(|h| {
                    h.consecutive_poll_failures = 0;
                    h.last_poll_ok = Some(Utc::now());
                    h.auth_failed = false;
                });
                self.emit(events);
            }
            Err(FetchError::Unauthorized) => {
                tracing::error!("Poll rejected credentials; re-authentication required");
                self.set_health(|h| {
                    h.consecutive_poll_failures = h.consecutive_poll_failures.saturating_add(1);
                    h.auth_failed = true;
                });
            }
            Err(e) => {
                let failures = self.health.borrow().consecutive_poll_failures.saturating_add(1);
                tracing::warn!(error = %e, failures, "Poll failed; retrying next tick");
                self.set_health(|h| h.consecutive_poll_failures = failures);
            }
        }
    }

    fn emit(&mut self, events: Vec<AvailabilityEvent>) {
        for event in events {
            match &event {
                AvailabilityEvent::Available(doubt) => {
                    tracing::info!(doubt_id = %doubt.id, subject = %doubt.subject, "Doubt available");
                }
                AvailabilityEvent::Withdrawn { id, reason } => {
                    tracing::info!(doubt_id = %id, reason = reason.as_str(), "Doubt withdrawn");
                }
            }
            self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn set_health(&self, update: impl FnOnce(&mut TransportHealth)) {
        self.health.send_if_modified(|health| {
            let before = health.clone();
            update(health);
            *health != before
        });
    }
}

async fn recv_push(push: &mut Option<mpsc::Receiver<PushEvent>>) -> Option<PushEvent> {
    match push {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn recv_refresh(
    refresh: &mut Option<broadcast::Receiver<DoubtCreated>>,
) -> Result<DoubtCreated, broadcast::error::RecvError> {
    match refresh {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
