use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{AccountId, JobId};

/// Message relayed outward to the client UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientNotice {
    /// A job reached its terminal state.
    JobSettled {
        account_id: AccountId,
        job_id: JobId,
        /// "completed" or "failed"
        status: String,
        error: Option<String>,
        at: DateTime<Utc>,
    },
    /// Balance dropped to or below the warning threshold.
    LowCredits {
        account_id: AccountId,
        available: i64,
        threshold: i64,
        at: DateTime<Utc>,
    },
    /// The dispatch path was closed for this account.
    AccountBlocked {
        account_id: AccountId,
        reason: String,
        until: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
}

impl ClientNotice {
    pub fn account_id(&self) -> AccountId {
        match self {
            ClientNotice::JobSettled { account_id, .. }
            | ClientNotice::LowCredits { account_id, .. }
            | ClientNotice::AccountBlocked { account_id, .. } => *account_id,
        }
    }

    /// Stable topic name (used as the SSE event name).
    pub fn topic(&self) -> &'static str {
        match self {
            ClientNotice::JobSettled { .. } => "job.settled",
            ClientNotice::LowCredits { .. } => "credits.low",
            ClientNotice::AccountBlocked { .. } => "account.blocked",
        }
    }
}
