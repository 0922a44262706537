use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{AccountId, JobId, LedgerEntryId};

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOperation {
    /// One credit consumed by a dispatched job.
    Usage,
    /// Job dispatched by an admin; no balance change.
    AdminUsage,
    /// Credits added by an operator or a payment.
    Grant,
    /// Balance set to an absolute value (e.g. plan renewal).
    Reset,
}

impl LedgerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOperation::Usage => "usage",
            LedgerOperation::AdminUsage => "admin_usage",
            LedgerOperation::Grant => "grant",
            LedgerOperation::Reset => "reset",
        }
    }

    /// Entries that correspond to a dispatched job.
    pub fn is_consumption(&self) -> bool {
        matches!(self, LedgerOperation::Usage | LedgerOperation::AdminUsage)
    }
}

impl core::str::FromStr for LedgerOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usage" => Ok(Self::Usage),
            "admin_usage" => Ok(Self::AdminUsage),
            "grant" => Ok(Self::Grant),
            "reset" => Ok(Self::Reset),
            other => Err(format!("unknown ledger operation: {other}")),
        }
    }
}

/// Immutable record of a single balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub owner_id: AccountId,
    /// Negative for consumption, zero for admin usage, positive for grants.
    pub delta: i64,
    pub balance_after: i64,
    pub operation: LedgerOperation,
    pub related_job_id: Option<JobId>,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn usage(owner_id: AccountId, balance_after: i64, job_id: JobId, at: DateTime<Utc>) -> Self {
        Self {
            id: LedgerEntryId::new(),
            owner_id,
            delta: -1,
            balance_after,
            operation: LedgerOperation::Usage,
            related_job_id: Some(job_id),
            note: None,
            timestamp: at,
        }
    }

    pub fn admin_usage(owner_id: AccountId, balance: i64, job_id: JobId, at: DateTime<Utc>) -> Self {
        Self {
            id: LedgerEntryId::new(),
            owner_id,
            delta: 0,
            balance_after: balance,
            operation: LedgerOperation::AdminUsage,
            related_job_id: Some(job_id),
            note: None,
            timestamp: at,
        }
    }

    pub fn adjustment(
        owner_id: AccountId,
        operation: LedgerOperation,
        delta: i64,
        balance_after: i64,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            owner_id,
            delta,
            balance_after,
            operation,
            related_job_id: None,
            note,
            timestamp: at,
        }
    }
}
