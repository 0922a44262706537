use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{AccountId, BusinessId};

/// Marker that a business identity has consumed its free trial.
///
/// The record's existence is the lock: stores create it insert-if-absent and
/// never update or delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialLock {
    pub business_id: BusinessId,
    pub first_used_by: AccountId,
    pub first_used_at: DateTime<Utc>,
}

impl TrialLock {
    pub fn new(business_id: BusinessId, first_used_by: AccountId, first_used_at: DateTime<Utc>) -> Self {
        Self {
            business_id,
            first_used_by,
            first_used_at,
        }
    }
}
