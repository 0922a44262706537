//! In-process dispatch client: paced `request_job` plus awaiting the outcome.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use creditgate_core::JobId;
use creditgate_ledger::Job;

use crate::dispatcher::{DispatchError, DispatchReceipt, DispatchRequest, Dispatcher};
use crate::notifier::{AwaitError, CancelToken, CompletionNotifier};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("job {job_id}: {source}")]
    Await {
        job_id: JobId,
        #[source]
        source: AwaitError,
    },
}

/// Result of a full request-and-wait round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedJob {
    pub receipt: DispatchReceipt,
    pub job: Job,
}

impl CompletedJob {
    pub fn content(&self) -> &str {
        self.job.result.as_deref().unwrap_or_default()
    }
}

/// Owns its own rate limiter; share one client to share its pacing.
pub struct DispatchClient {
    limiter: RateLimiter,
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<CompletionNotifier>,
}

impl DispatchClient {
    pub fn new(limiter: RateLimiter, dispatcher: Arc<Dispatcher>, notifier: Arc<CompletionNotifier>) -> Self {
        Self {
            limiter,
            dispatcher,
            notifier,
        }
    }

    /// Wait for the limiter, then dispatch. Returns as soon as the job is queued.
    pub async fn submit(&self, request: DispatchRequest) -> Result<DispatchReceipt, ClientError> {
        let waited = self.limiter.acquire().await;
        if !waited.is_zero() {
            debug!(account_id = %request.account_id, waited_ms = waited.as_millis() as u64, "dispatch paced");
        }
        Ok(self.dispatcher.request_job(request).await?)
    }

    /// Submit and wait for the terminal outcome.
    pub async fn run(
        &self,
        request: DispatchRequest,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<CompletedJob, ClientError> {
        let receipt = self.submit(request).await?;
        let job = self
            .notifier
            .await_job(receipt.job_id, timeout, cancel)
            .await
            .map_err(|source| ClientError::Await {
                job_id: receipt.job_id,
                source,
            })?;
        Ok(CompletedJob { receipt, job })
    }
}
