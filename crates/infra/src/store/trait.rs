use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use creditgate_core::{AccountId, BusinessId, ExpectedVersion, JobId, Versioned};
use creditgate_ledger::{Account, DispatchPlan, Job, JobOutcome, LedgerEntry, TrialLock};

/// Storage operation error.
///
/// These are infrastructure errors. `Conflict` and `TrialLockExists` are the
/// two retryable outcomes of a dispatch commit; everything else is final.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("trial lock already held for business {0}")]
    TrialLockExists(BusinessId),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("job {0} already settled")]
    AlreadyTerminal(JobId),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::TrialLockExists(_))
    }

    pub(crate) fn account_not_found(id: AccountId) -> Self {
        StoreError::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }

    pub(crate) fn job_not_found(id: JobId) -> Self {
        StoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        }
    }
}

/// Work-queue entry written in the same commit as its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

/// Everything an accepted dispatch writes, applied all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCommit {
    /// Account write-back guarded by the version it was read at.
    pub account: Option<(Account, ExpectedVersion)>,
    /// Insert-if-absent.
    pub trial_lock: Option<TrialLock>,
    pub job: Job,
    pub entry: LedgerEntry,
    pub queue: QueueEntry,
}

impl DispatchCommit {
    pub fn from_plan(plan: DispatchPlan, read_version: ExpectedVersion, now: DateTime<Utc>) -> Self {
        let queue = QueueEntry {
            job_id: plan.job.id,
            enqueued_at: now,
        };
        Self {
            account: plan.account.map(|a| (a, read_version)),
            trial_lock: plan.trial_lock,
            job: plan.job,
            entry: plan.entry,
            queue,
        }
    }
}

/// Per-account job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    /// Mean creation-to-terminal latency over settled jobs.
    pub avg_latency_ms: Option<i64>,
}

/// Accounts, trial locks and the append-only ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_account(&self, id: AccountId) -> Result<Option<Versioned<Account>>, StoreError>;

    /// Insert a new account at version 1, optionally with its opening ledger entry.
    async fn create_account(
        &self,
        account: Account,
        opening: Option<LedgerEntry>,
    ) -> Result<Versioned<Account>, StoreError>;

    /// Version-checked account write, optionally appending one ledger entry in
    /// the same commit.
    async fn save_account(
        &self,
        account: Account,
        expected: ExpectedVersion,
        entry: Option<LedgerEntry>,
    ) -> Result<Versioned<Account>, StoreError>;

    async fn trial_lock(&self, business_id: &BusinessId) -> Result<Option<TrialLock>, StoreError>;

    /// Apply an accepted dispatch atomically.
    ///
    /// Fails with `Conflict` when the account moved past the read version and
    /// with `TrialLockExists` when the lock insert collides. Nothing is written
    /// in either case.
    async fn commit_dispatch(&self, commit: DispatchCommit) -> Result<(), StoreError>;

    /// Entries for one owner in timestamp order, optionally from `since` on.
    async fn ledger_entries(
        &self,
        owner: AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Owners with at least one consuming entry at or after `since`.
    async fn active_accounts(&self, since: DateTime<Utc>) -> Result<Vec<AccountId>, StoreError>;
}

/// Jobs and the work queue.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Remove the oldest queue entry and return its job.
    ///
    /// Each entry is handed to exactly one caller. The returned job may already
    /// be terminal (redelivery); entries whose job was deleted are skipped.
    async fn claim_next(&self) -> Result<Option<Job>, StoreError>;

    /// Best-effort `processing_started_at` write; `false` when nothing changed.
    async fn mark_processing(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Terminal write, conditional on the job still being pending.
    async fn finish_job(&self, id: JobId, outcome: JobOutcome, at: DateTime<Utc>) -> Result<Job, StoreError>;

    /// Newest first.
    async fn list_jobs(&self, owner: AccountId, limit: usize) -> Result<Vec<Job>, StoreError>;

    async fn job_stats(&self, owner: AccountId) -> Result<JobStats, StoreError>;

    /// Remove a job and any queue entry for it. Ledger entries are kept.
    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError>;

    async fn queue_depth(&self) -> Result<u64, StoreError>;
}

/// Stream of observed states for one job.
#[async_trait]
pub trait JobUpdates: Send {
    /// First call yields the current state; later calls wait for a change.
    /// `None` means the job does not exist (or was deleted).
    async fn next(&mut self) -> Result<Option<Job>, StoreError>;
}

/// Change notifications keyed by job id.
#[async_trait]
pub trait JobWatch: Send + Sync {
    async fn watch(&self, id: JobId) -> Result<Box<dyn JobUpdates>, StoreError>;
}

/// Everything the runtime needs from one backing store.
pub trait CreditStore: LedgerStore + JobStore + JobWatch {}

impl<T> CreditStore for T where T: LedgerStore + JobStore + JobWatch {}
