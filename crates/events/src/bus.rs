//! Publish/subscribe abstraction (mechanics only).
//!
//! The bus distributes [`ClientNotice`](crate::ClientNotice)s to every attached
//! consumer. It is deliberately lightweight:
//!
//! - **Transport-agnostic**: in-memory channels today; anything with fan-out later
//! - **Best-effort**: a dead subscriber is dropped, a full one may lose messages
//! - **No persistence**: the job store and the ledger are the source of truth
//!
//! Publishing must never fail a primary operation. Callers log a publish error
//! and move on.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// Internal lock poisoned by a panicking publisher/subscriber.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// A subscription to the bus.
///
/// Each subscription receives a copy of every message published after it was
/// created (broadcast semantics). Consume it from one thread.
///
/// ```ignore
/// let sub = bus.subscribe();
/// loop {
///     match sub.recv_timeout(Duration::from_secs(1)) {
///         Ok(notice) => forward(notice),
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out channel for outbound messages.
///
/// Implementations must be `Send + Sync` so publishers on worker tasks and the
/// HTTP layer can share one instance.
pub trait EventBus<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
