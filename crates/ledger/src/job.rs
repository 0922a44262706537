//! Dispatched job and its one-way state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{AccountId, BusinessId, DomainError, DomainResult, JobId};

/// Job execution status.
///
/// `Pending` is the only non-terminal state; a job leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and paid for, waiting for (or under) processing
    Pending,
    /// Provider returned usable content
    Completed,
    /// Provider failed, returned nothing usable, or the request was malformed
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Terminal result written by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { result: String },
    Failed { error: String },
}

impl JobOutcome {
    pub fn completed(result: impl Into<String>) -> Self {
        Self::Completed {
            result: result.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// One unit of paid, asynchronously processed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: AccountId,
    pub business_id: Option<BusinessId>,
    pub status: JobStatus,
    /// Opaque description of the work (prompt payload).
    pub request: serde_json::Value,
    /// Present iff `status == Completed`
    pub result: Option<String>,
    /// Present iff `status == Failed`
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Informational only (latency metrics)
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        owner_id: AccountId,
        business_id: Option<BusinessId>,
        request: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            owner_id,
            business_id,
            status: JobStatus::Pending,
            request,
            result: None,
            error: None,
            created_at: now,
            processing_started_at: None,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// Record the processing start. No-op once set or once terminal.
    pub fn mark_processing(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_pending() || self.processing_started_at.is_some() {
            return false;
        }
        self.processing_started_at = Some(at);
        true
    }

    /// Move the job into its terminal state.
    ///
    /// Fails with `AlreadySettled` if the job already settled; the first write wins.
    pub fn settle(&mut self, outcome: JobOutcome, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::AlreadySettled {
                job_id: self.id.to_string(),
                status: self.status.as_str(),
            });
        }

        match outcome {
            JobOutcome::Completed { result } => {
                self.status = JobStatus::Completed;
                self.result = Some(result);
            }
            JobOutcome::Failed { error } => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
            }
        }
        self.completed_at = Some(at);
        Ok(())
    }

    /// Wall time from creation to terminal write, if settled.
    pub fn latency_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(AccountId::new(), None, serde_json::json!({"prompt": "hi"}), Utc::now())
    }

    #[test]
    fn job_lifecycle() {
        let mut job = job();
        assert!(job.is_pending());

        assert!(job.mark_processing(Utc::now()));
        assert!(!job.mark_processing(Utc::now()));

        job.settle(JobOutcome::completed("hello"), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("hello"));
        assert!(job.error.is_none());
        assert!(job.latency_ms().is_some());
    }

    #[test]
    fn terminal_state_is_final() {
        let mut job = job();
        job.settle(JobOutcome::failed("upstream 500"), Utc::now()).unwrap();

        let err = job.settle(JobOutcome::completed("late"), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::AlreadySettled { status: "failed", .. }));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("upstream 500"));
        assert!(job.result.is_none());
    }

    #[test]
    fn processing_mark_ignored_after_settlement() {
        let mut job = job();
        job.settle(JobOutcome::failed("x"), Utc::now()).unwrap();
        assert!(!job.mark_processing(Utc::now()));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(JobOutcome::completed("ok")).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["result"], "ok");
    }
}
