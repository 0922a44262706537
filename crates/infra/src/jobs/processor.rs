//! Per-job processing: provider call plus the single terminal write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use creditgate_ai::{CompletionError, CompletionProvider, CompletionRequest, PromptPayload};
use creditgate_events::{ClientNotice, EventBus};
use creditgate_ledger::{Job, JobOutcome};

use crate::audit::{AuditOutcome, AuditRecord, AuditSink};
use crate::prompts::PromptSettingsSource;
use crate::store::{CreditStore, StoreError};

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Duplicate delivery: the job was already started or terminal.
    Skipped,
    Completed,
    Failed,
    /// Another writer settled the job first; our result was discarded.
    LostRace,
    /// The job was deleted while the provider was running.
    Vanished,
}

pub struct JobProcessor {
    store: Arc<dyn CreditStore>,
    provider: Arc<dyn CompletionProvider>,
    prompts: Arc<dyn PromptSettingsSource>,
    notices: Arc<dyn EventBus<ClientNotice>>,
    audit: Arc<dyn AuditSink>,
    request_timeout: Duration,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn CreditStore>,
        provider: Arc<dyn CompletionProvider>,
        prompts: Arc<dyn PromptSettingsSource>,
        notices: Arc<dyn EventBus<ClientNotice>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            provider,
            prompts,
            notices,
            audit,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Process one claimed job.
    ///
    /// Writes exactly one terminal state for a pending job. Only store errors
    /// on the terminal write surface as `Err`; provider failures become a
    /// `failed` job.
    pub async fn process(&self, job: Job) -> Result<ProcessOutcome, StoreError> {
        let job_id = job.id;
        if !job.is_pending() {
            debug!(job_id = %job_id, status = job.status.as_str(), "redelivered job is already settled; skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        // The start marker doubles as the claim on the provider call: a
        // delivery that cannot set it must not call the provider again.
        match self.store.mark_processing(job_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, "job already started or settled by another delivery; skipping");
                return Ok(ProcessOutcome::Skipped);
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "could not record processing start"),
        }

        let started = Instant::now();
        let outcome = match self.build_request(&job).await {
            Ok(request) => self.call_provider(request).await,
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(content) => JobOutcome::completed(content),
            Err(e) => JobOutcome::failed(e.to_string()),
        };

        let settled = match self.store.finish_job(job_id, outcome, Utc::now()).await {
            Ok(settled) => settled,
            Err(StoreError::AlreadyTerminal(_)) => {
                warn!(job_id = %job_id, "job settled by another writer; discarding result");
                return Ok(ProcessOutcome::LostRace);
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(job_id = %job_id, "job deleted while processing");
                return Ok(ProcessOutcome::Vanished);
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "terminal write failed");
                return Err(e);
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = settled.status.as_str();
        if settled.error.is_some() {
            warn!(job_id = %job_id, account_id = %settled.owner_id, elapsed_ms, error = settled.error.as_deref(), "job failed");
        } else {
            info!(job_id = %job_id, account_id = %settled.owner_id, elapsed_ms, "job completed");
        }

        self.audit.record(
            AuditRecord::new(
                settled.owner_id,
                "job.settled",
                if settled.error.is_some() {
                    AuditOutcome::Error
                } else {
                    AuditOutcome::Success
                },
                Utc::now(),
            )
            .with_metadata(serde_json::json!({ "jobId": job_id, "status": status, "elapsedMs": elapsed_ms })),
        );
        if let Err(e) = self.notices.publish(ClientNotice::JobSettled {
            account_id: settled.owner_id,
            job_id,
            status: status.to_string(),
            error: settled.error.clone(),
            at: Utc::now(),
        }) {
            warn!(job_id = %job_id, error = %e, "failed to publish settlement notice");
        }

        Ok(if settled.error.is_some() {
            ProcessOutcome::Failed
        } else {
            ProcessOutcome::Completed
        })
    }

    async fn build_request(&self, job: &Job) -> Result<CompletionRequest, CompletionError> {
        let payload = PromptPayload::from_json(&job.request)?;
        let defaults = self.prompts.prompt_defaults().await;
        Ok(CompletionRequest::from_payload(&payload, &defaults))
    }

    /// Runs the provider on its own task so a panic cannot take the worker down.
    async fn call_provider(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let provider = self.provider.clone();
        let handle = tokio::spawn(async move { provider.complete(&request).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.request_timeout, handle).await {
            Err(_) => {
                abort.abort();
                Err(CompletionError::Timeout)
            }
            Ok(Err(join)) if join.is_panic() => Err(CompletionError::Transport("provider panicked".to_string())),
            Ok(Err(join)) => Err(CompletionError::Transport(format!("provider task aborted: {join}"))),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(response))) => response
                .first_content()
                .map(str::to_string)
                .ok_or(CompletionError::EmptyContent),
        }
    }
}
