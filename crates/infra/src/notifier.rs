//! Awaiting the terminal outcome of a dispatched job.
//!
//! The subscription, the timer and the optional cancel token race inside one
//! `select!`; whichever finishes first decides the outcome and the other
//! branches are dropped (which unsubscribes).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use creditgate_core::JobId;
use creditgate_ledger::{Job, JobStatus};

use crate::store::{CreditStore, JobUpdates, StoreError};

pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AwaitError {
    #[error("timed out waiting for job")]
    Timeout,

    #[error("job completed without content")]
    EmptyResult,

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("job no longer exists")]
    JobDeleted,

    #[error("job feed error: {0}")]
    Feed(String),

    #[error("wait cancelled")]
    Cancelled,
}

impl From<StoreError> for AwaitError {
    fn from(e: StoreError) -> Self {
        AwaitError::Feed(e.to_string())
    }
}

/// Cloneable cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot see a closed channel.
        let _ = rx.wait_for(|c| *c).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CompletionNotifier {
    store: Arc<dyn CreditStore>,
    default_timeout: Duration,
}

impl CompletionNotifier {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self {
            store,
            default_timeout: DEFAULT_AWAIT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Wait for `job_id` to reach a terminal state.
    ///
    /// Resolves with the completed job; every other ending is an `AwaitError`.
    pub async fn await_job(
        &self,
        job_id: JobId,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<Job, AwaitError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled => Err(AwaitError::Cancelled),
            outcome = self.follow(job_id) => outcome,
            _ = tokio::time::sleep(timeout) => Err(AwaitError::Timeout),
        };

        match &outcome {
            Ok(_) => debug!(job_id = %job_id, "await resolved"),
            Err(AwaitError::Timeout) => {
                warn!(job_id = %job_id, timeout_secs = timeout.as_secs(), "await timed out")
            }
            Err(AwaitError::Cancelled) => info!(job_id = %job_id, "await cancelled"),
            Err(e) => debug!(job_id = %job_id, error = %e, "await rejected"),
        }
        outcome
    }

    async fn follow(&self, job_id: JobId) -> Result<Job, AwaitError> {
        let mut updates: Box<dyn JobUpdates> = self.store.watch(job_id).await?;
        loop {
            let Some(job) = updates.next().await? else {
                return Err(AwaitError::JobDeleted);
            };
            match job.status {
                JobStatus::Pending => continue,
                JobStatus::Completed => {
                    return match job.result.as_deref() {
                        Some(text) if !text.is_empty() => Ok(job),
                        _ => Err(AwaitError::EmptyResult),
                    };
                }
                JobStatus::Failed => {
                    return Err(AwaitError::JobFailed(
                        job.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
            }
        }
    }
}
