//! Pure decision logic for "debit + enqueue".
//!
//! `plan_dispatch` looks at an account snapshot (and whether the trial lock for
//! the supplied business already exists) and either rejects the request or
//! returns every record the store must write in one atomic commit. It never
//! performs IO; the optimistic-concurrency loop around it lives in infra.

use chrono::{DateTime, Utc};
use thiserror::Error;

use creditgate_core::BusinessId;

use crate::account::{Account, UNLIMITED_BALANCE};
use crate::entry::LedgerEntry;
use crate::job::Job;
use crate::trial::TrialLock;

/// Expected business outcomes that refuse a dispatch without mutating anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchRejection {
    #[error("account is blocked: {reason}")]
    Blocked {
        reason: String,
        until: Option<DateTime<Utc>>,
    },

    #[error("trial already used for business {0}")]
    TrialAlreadyUsed(BusinessId),

    #[error("insufficient credits (available: {available})")]
    InsufficientCredits { available: i64 },
}

/// Records to persist for an accepted dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    /// Account write-back, checked against the version the snapshot was read at.
    /// `None` when the account is untouched (admin usage without block cleanup).
    pub account: Option<Account>,
    /// Insert-if-absent trial lock.
    pub trial_lock: Option<TrialLock>,
    pub job: Job,
    pub entry: LedgerEntry,
    /// Balance reported to the caller.
    pub new_balance: i64,
    pub unlimited: bool,
}

/// Decide whether `account` may dispatch one job.
///
/// Order of checks: active block, admin bypass, trial lock, balance.
pub fn plan_dispatch(
    account: &Account,
    business_id: Option<&BusinessId>,
    trial_lock_taken: bool,
    request: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<DispatchPlan, DispatchRejection> {
    if let Some(block) = account.active_block(now) {
        return Err(DispatchRejection::Blocked {
            reason: block.reason.clone(),
            until: block.blocked_until,
        });
    }

    let mut next = account.clone();
    let block_cleared = next.clear_expired_block(now);

    if account.is_admin() {
        let job = Job::new(account.id, business_id.cloned(), request, now);
        let entry = LedgerEntry::admin_usage(account.id, account.credits.available, job.id, now);
        return Ok(DispatchPlan {
            account: block_cleared.then_some(next),
            trial_lock: None,
            job,
            entry,
            new_balance: UNLIMITED_BALANCE,
            unlimited: true,
        });
    }

    if let Some(business_id) = business_id {
        if trial_lock_taken {
            return Err(DispatchRejection::TrialAlreadyUsed(business_id.clone()));
        }
    }

    if account.credits.available <= 0 {
        return Err(DispatchRejection::InsufficientCredits {
            available: account.credits.available,
        });
    }

    let new_balance = next
        .debit_one(now)
        .map_err(|_| DispatchRejection::InsufficientCredits {
            available: account.credits.available,
        })?;

    let job = Job::new(account.id, business_id.cloned(), request, now);
    let entry = LedgerEntry::usage(account.id, new_balance, job.id, now);
    let trial_lock = business_id.map(|b| TrialLock::new(b.clone(), account.id, now));

    Ok(DispatchPlan {
        account: Some(next),
        trial_lock,
        job,
        entry,
        new_balance,
        unlimited: false,
    })
}
