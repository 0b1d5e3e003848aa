use edufoyer_types::{AcceptResult, AvailabilityEvent, AvailableDoubt, DoubtId, WithdrawReason};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{ReconcilerError, TransportHealth};

pub(crate) enum Command {
    Subscribe(mpsc::UnboundedSender<AvailabilityEvent>),
    Accept {
        id: DoubtId,
        reply: oneshot::Sender<Result<AcceptResult, ReconcilerError>>,
    },
    Refresh,
    Snapshot(oneshot::Sender<Vec<AvailableDoubt>>),
    Dispose(oneshot::Sender<()>),
}

/// Cloneable front door to a running reconciler.
///
/// The reconciler stops when [`dispose`](Self::dispose) is called or when
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    commands: mpsc::UnboundedSender<Command>,
    health: watch::Receiver<TransportHealth>,
}

impl ReconcilerHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        health: watch::Receiver<TransportHealth>,
    ) -> Self {
        Self { commands, health }
    }

    /// Receive every availability change from now on.
    ///
    /// A subscription created after the reconciler is disposed ends
    /// immediately.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Subscribe(tx));
        Subscription { rx }
    }

    /// Claim `id` for this solver.
    ///
    /// The remote call always runs to completion, even if the returned future
    /// is dropped; its effect on the available set is applied regardless.
    pub async fn accept_doubt(&self, id: DoubtId) -> Result<AcceptResult, ReconcilerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Accept { id, reply })
            .map_err(|_| ReconcilerError::Disposed)?;
        rx.await.map_err(|_| ReconcilerError::Disposed)?
    }

    /// Poll now instead of waiting for the next tick.
    pub fn refresh(&self) -> Result<(), ReconcilerError> {
        self.commands
            .send(Command::Refresh)
            .map_err(|_| ReconcilerError::Disposed)
    }

    /// Currently available doubts, in arrival order.
    pub async fn snapshot(&self) -> Result<Vec<AvailableDoubt>, ReconcilerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply))
            .map_err(|_| ReconcilerError::Disposed)?;
        rx.await.map_err(|_| ReconcilerError::Disposed)
    }

    #[must_use]
    pub fn health(&self) -> watch::Receiver<TransportHealth> {
        self.health.clone()
    }

    /// Stop polling, drop the push stream and end every subscription.
    ///
    /// Returns once the reconciler task has shut down. Calling it again is a
    /// no-op.
    pub async fn dispose(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Dispose(done)).is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Stream of [`AvailabilityEvent`]s for one subscriber.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<AvailabilityEvent>,
}

impl Subscription {
    /// `None` once the reconciler has stopped.
    pub async fn recv(&mut self) -> Option<AvailabilityEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AvailabilityEvent> {
        self.rx.try_recv().ok()
    }

    /// Drive a pair of callbacks from this subscription on a new task.
    ///
    /// The task ends when the reconciler stops.
    pub fn split_callbacks<A, W>(mut self, mut on_available: A, mut on_withdrawn: W) -> JoinHandle<()>
    where
        A: FnMut(AvailableDoubt) + Send + 'static,
        W: FnMut(DoubtId, WithdrawReason) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(event) = self.rx.recv().await {
                match event {
                    AvailabilityEvent::Available(doubt) => on_available(doubt),
                    AvailabilityEvent::Withdrawn { id, reason } => on_withdrawn(id, reason),
                }
            }
        })
    }
}
