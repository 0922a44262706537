//! Operator-facing account administration.
//!
//! Every write is a version-checked store write retried on conflict, the same
//! loop the dispatcher runs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use creditgate_core::{AccountId, DomainError, JobId, Versioned};
use creditgate_events::{ClientNotice, EventBus};
use creditgate_ledger::{Account, AccountRole, CreditAdjustment, LedgerEntry, LedgerOperation, plan_adjustment};

use crate::abuse::{AbuseError, AbuseEvaluation, AbuseMonitor};
use crate::audit::{AuditOutcome, AuditRecord, AuditSink};
use crate::store::{CreditStore, StoreError};

const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error("account {0} is being modified concurrently")]
    Contention(AccountId),

    #[error(transparent)]
    Abuse(#[from] AbuseError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl From<DomainError> for AccountError {
    fn from(e: DomainError) -> Self {
        AccountError::InvalidArgument(e.to_string())
    }
}

pub struct AccountService {
    store: Arc<dyn CreditStore>,
    audit: Arc<dyn AuditSink>,
    notices: Arc<dyn EventBus<ClientNotice>>,
    monitor: Option<Arc<AbuseMonitor>>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn CreditStore>,
        audit: Arc<dyn AuditSink>,
        notices: Arc<dyn EventBus<ClientNotice>>,
    ) -> Self {
        Self {
            store,
            audit,
            notices,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<AbuseMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Provision an account. A positive opening balance is recorded as a grant.
    pub async fn create_account(&self, role: AccountRole, initial_credits: i64) -> Result<Account, AccountError> {
        let now = Utc::now();
        let account = Account::new(AccountId::new(), role, initial_credits, now)?;
        let opening = (initial_credits > 0).then(|| {
            LedgerEntry::adjustment(
                account.id,
                LedgerOperation::Grant,
                initial_credits,
                initial_credits,
                Some("initial allocation".to_string()),
                now,
            )
        });

        let created = self.store.create_account(account, opening).await?.into_inner();
        info!(account_id = %created.id, role = created.role.as_str(), initial_credits, "account created");
        self.audit.record(
            AuditRecord::new(created.id, "account.create", AuditOutcome::Success, now)
                .with_metadata(serde_json::json!({ "role": created.role.as_str(), "initialCredits": initial_credits })),
        );
        Ok(created)
    }

    pub async fn account(&self, id: AccountId) -> Result<Versioned<Account>, AccountError> {
        self.store.load_account(id).await?.ok_or(AccountError::NotFound(id))
    }

    /// Grant or reset credits, writing the matching ledger entry in the same commit.
    pub async fn adjust_credits(
        &self,
        id: AccountId,
        adjustment: CreditAdjustment,
        note: Option<String>,
    ) -> Result<Account, AccountError> {
        for _ in 0..MAX_ATTEMPTS {
            let current = self.account(id).await?;
            let now = Utc::now();
            let (next, entry) = plan_adjustment(&current.value, adjustment, note.clone(), now)?;
            let delta = entry.delta;

            match self.store.save_account(next, current.expected(), Some(entry)).await {
                Ok(saved) => {
                    let saved = saved.into_inner();
                    info!(account_id = %id, ?adjustment, delta, available = saved.credits.available, "credits adjusted");
                    self.audit.record(
                        AuditRecord::new(id, "credits.adjust", AuditOutcome::Success, now)
                            .with_metadata(serde_json::json!({ "adjustment": adjustment, "delta": delta, "note": note })),
                    );
                    return Ok(saved);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AccountError::Contention(id))
    }

    /// Block the dispatch path. `duration = None` blocks until `unblock`.
    pub async fn block(
        &self,
        id: AccountId,
        reason: impl Into<String>,
        duration: Option<Duration>,
    ) -> Result<Account, AccountError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(AccountError::InvalidArgument("block reason must not be empty".into()));
        }
        if duration.is_some_and(|d| d <= Duration::zero()) {
            return Err(AccountError::InvalidArgument("block duration must be positive".into()));
        }

        let saved = self
            .update(id, |account, now| {
                account.block_for(reason.clone(), duration, now);
                true
            })
            .await?;
        let until = saved.block.as_ref().and_then(|b| b.blocked_until);
        warn!(account_id = %id, reason = %reason, until = ?until, "account blocked by operator");

        self.audit.record(
            AuditRecord::new(id, "account.block", AuditOutcome::Success, Utc::now())
                .with_metadata(serde_json::json!({ "reason": reason, "automatic": false })),
        );
        if let Err(e) = self.notices.publish(ClientNotice::AccountBlocked {
            account_id: id,
            reason,
            until,
            at: Utc::now(),
        }) {
            warn!(account_id = %id, error = %e, "failed to publish block notice");
        }
        Ok(saved)
    }

    /// Lift any block. Unblocking an unblocked account is a no-op.
    pub async fn unblock(&self, id: AccountId) -> Result<Account, AccountError> {
        let saved = self.update(id, |account, now| account.unblock(now)).await?;
        info!(account_id = %id, "account unblocked");
        self.audit
            .record(AuditRecord::new(id, "account.unblock", AuditOutcome::Success, Utc::now()));
        Ok(saved)
    }

    /// Score the account now; may block it.
    pub async fn evaluate_risk(&self, id: AccountId) -> Result<AbuseEvaluation, AccountError> {
        let Some(monitor) = &self.monitor else {
            return Err(AccountError::InvalidArgument("abuse monitoring is not configured".into()));
        };
        Ok(monitor.evaluate(id, Utc::now()).await?)
    }

    /// Remove a job record. Pending waiters are rejected; the debit stays.
    pub async fn delete_job(&self, job_id: JobId) -> Result<bool, AccountError> {
        let Some(job) = self.store.load_job(job_id).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_job(job_id).await?;
        if deleted {
            info!(job_id = %job_id, account_id = %job.owner_id, status = job.status.as_str(), "job deleted");
            self.audit.record(
                AuditRecord::new(job.owner_id, "job.delete", AuditOutcome::Success, Utc::now())
                    .with_metadata(serde_json::json!({ "jobId": job_id })),
            );
        }
        Ok(deleted)
    }

    /// Version-checked read-modify-write. `apply` returns `false` for no change.
    async fn update<F>(&self, id: AccountId, apply: F) -> Result<Account, AccountError>
    where
        F: Fn(&mut Account, DateTime<Utc>) -> bool,
    {
        for _ in 0..MAX_ATTEMPTS {
            let current = self.account(id).await?;
            let mut next = current.value.clone();
            if !apply(&mut next, Utc::now()) {
                return Ok(current.into_inner());
            }
            match self.store.save_account(next, current.expected(), None).await {
                Ok(saved) => return Ok(saved.into_inner()),
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AccountError::Contention(id))
    }
}
