//! Operator-initiated balance changes (grants and resets).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{DomainError, DomainResult};

use crate::account::Account;
use crate::entry::{LedgerEntry, LedgerOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "amount", rename_all = "snake_case")]
pub enum CreditAdjustment {
    /// Add a positive number of credits.
    Grant(i64),
    /// Set the available balance to an absolute, non-negative value.
    Reset(i64),
}

/// Compute the account write-back and ledger entry for an adjustment.
pub fn plan_adjustment(
    account: &Account,
    adjustment: CreditAdjustment,
    note: Option<String>,
    now: DateTime<Utc>,
) -> DomainResult<(Account, LedgerEntry)> {
    let (operation, target) = match adjustment {
        CreditAdjustment::Grant(amount) => {
            if amount <= 0 {
                return Err(DomainError::validation("grant amount must be positive"));
            }
            let target = account
                .credits
                .available
                .checked_add(amount)
                .ok_or_else(|| DomainError::validation("grant overflows balance"))?;
            (LedgerOperation::Grant, target)
        }
        CreditAdjustment::Reset(target) => {
            if target < 0 {
                return Err(DomainError::validation("reset target must not be negative"));
            }
            (LedgerOperation::Reset, target)
        }
    };

    let mut next = account.clone();
    let delta = target - account.credits.available;
    next.credits.available = target;
    next.updated_at = now;
    next.clear_expired_block(now);

    let entry = LedgerEntry::adjustment(account.id, operation, delta, target, note, now);
    Ok((next, entry))
}
