//! Read-only views over accounts, jobs and the ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use creditgate_core::{AccountId, BusinessId, JobId};
use creditgate_ledger::{Account, AccountRole, Job, JobStatus, LedgerEntry};

use crate::store::{CreditStore, JobStats, StoreError};

pub const DEFAULT_JOB_LIMIT: usize = 50;
pub const MAX_JOB_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("not allowed to read job {0}")]
    Forbidden(JobId),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView {
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// What a client sees about its own account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub account_id: AccountId,
    pub role: AccountRole,
    /// Reported balance; admins show the unlimited sentinel.
    pub available: i64,
    pub used: i64,
    pub unlimited: bool,
    pub low_credits: bool,
    /// Active block only; expired blocks are not reported.
    pub block: Option<BlockView>,
}

impl AccountStatus {
    pub fn from_account(account: &Account, low_credit_threshold: i64, now: DateTime<Utc>) -> Self {
        let unlimited = account.is_admin();
        Self {
            account_id: account.id,
            role: account.role,
            available: account.reported_balance(),
            used: account.credits.used,
            unlimited,
            low_credits: !unlimited && account.credits.available <= low_credit_threshold,
            block: account.active_block(now).map(|b| BlockView {
                reason: b.reason.clone(),
                blocked_at: b.blocked_at,
                blocked_until: b.blocked_until,
            }),
        }
    }
}

/// Job without its payload and result text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub business_id: Option<BusinessId>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            business_id: job.business_id.clone(),
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            latency_ms: job.latency_ms(),
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerExport {
    pub status: AccountStatus,
    pub stats: JobStats,
    pub entries: Vec<LedgerEntry>,
    pub jobs: Vec<JobSummary>,
    pub exported_at: DateTime<Utc>,
}

pub struct AccountQueries {
    store: Arc<dyn CreditStore>,
    low_credit_threshold: i64,
}

impl AccountQueries {
    pub fn new(store: Arc<dyn CreditStore>, low_credit_threshold: i64) -> Self {
        Self {
            store,
            low_credit_threshold,
        }
    }

    async fn load_account(&self, id: AccountId) -> Result<Account, QueryError> {
        self.store
            .load_account(id)
            .await?
            .map(|v| v.into_inner())
            .ok_or_else(|| QueryError::NotFound {
                entity: "account",
                id: id.to_string(),
            })
    }

    pub async fn status(&self, id: AccountId) -> Result<AccountStatus, QueryError> {
        let account = self.load_account(id).await?;
        Ok(AccountStatus::from_account(&account, self.low_credit_threshold, Utc::now()))
    }

    /// Job lookup for `viewer`. Only the owner or an admin may read a job.
    pub async fn job(&self, viewer: AccountId, job_id: JobId) -> Result<Job, QueryError> {
        let job = self.store.load_job(job_id).await?.ok_or_else(|| QueryError::NotFound {
            entity: "job",
            id: job_id.to_string(),
        })?;
        if job.owner_id == viewer {
            return Ok(job);
        }
        let viewer = self.load_account(viewer).await?;
        if viewer.is_admin() {
            Ok(job)
        } else {
            Err(QueryError::Forbidden(job_id))
        }
    }

    pub async fn jobs(&self, owner: AccountId, limit: Option<usize>) -> Result<Vec<JobSummary>, QueryError> {
        let limit = limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
        let jobs = self.store.list_jobs(owner, limit).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    pub async fn job_stats(&self, owner: AccountId) -> Result<JobStats, QueryError> {
        Ok(self.store.job_stats(owner).await?)
    }

    pub async fn ledger(&self, owner: AccountId, since: Option<DateTime<Utc>>) -> Result<Vec<LedgerEntry>, QueryError> {
        Ok(self.store.ledger_entries(owner, since).await?)
    }

    /// Status, statistics, full ledger and job summaries in one document.
    pub async fn export(&self, owner: AccountId) -> Result<LedgerExport, QueryError> {
        let status = self.status(owner).await?;
        Ok(LedgerExport {
            status,
            stats: self.store.job_stats(owner).await?,
            entries: self.store.ledger_entries(owner, None).await?,
            jobs: self.jobs(owner, Some(MAX_JOB_LIMIT)).await?,
            exported_at: Utc::now(),
        })
    }
}
