//! Audit trail for dispatch-path activity.
//!
//! Recording is fire-and-forget: sinks never return errors and must not block
//! the caller for long. Retention is the sink's business.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use creditgate_core::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub account_id: AccountId,
    /// e.g. `dispatch`, `job.settled`, `credits.grant`, `account.block`
    pub action: String,
    pub outcome: AuditOutcome,
    pub ip: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(account_id: AccountId, action: impl Into<String>, outcome: AuditOutcome, at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            action: action.into(),
            outcome,
            ip: None,
            metadata: serde_json::Value::Null,
            at,
        }
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, record: AuditRecord);
}

/// Read side of an audit trail, used to build abuse snapshots.
pub trait ActivityLog: Send + Sync + 'static {
    /// Records for `account_id` at or after `since`, oldest first.
    fn recent(&self, account_id: AccountId, since: DateTime<Utc>) -> Vec<AuditRecord>;
}

/// Bounded in-memory trail; the oldest records are evicted first.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    capacity: usize,
    inner: Mutex<VecDeque<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn all(&self) -> Vec<AuditRecord> {
        self.inner.lock().map(|q| q.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut q) = self.inner.lock() {
            if q.len() == self.capacity {
                q.pop_front();
            }
            q.push_back(record);
        }
    }
}

impl ActivityLog for InMemoryAuditSink {
    fn recent(&self, account_id: AccountId, since: DateTime<Utc>) -> Vec<AuditRecord> {
        self.inner
            .lock()
            .map(|q| {
                q.iter()
                    .filter(|r| r.account_id == account_id && r.at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Emits every record as a structured log line, then forwards it.
#[derive(Default)]
pub struct TracingAuditSink {
    forward: Option<Arc<dyn AuditSink>>,
}

impl TracingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward_to(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.forward = Some(sink);
        self
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        info!(
            target: "creditgate::audit",
            account_id = %record.account_id,
            action = %record.action,
            outcome = record.outcome.as_str(),
            ip = record.ip.as_deref().unwrap_or("-"),
            metadata = %record.metadata,
            "audit"
        );
        if let Some(next) = &self.forward {
            next.record(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn in_memory_sink_is_bounded() {
        let sink = InMemoryAuditSink::with_capacity(2);
        let id = AccountId::new();
        for action in ["a", "b", "c"] {
            sink.record(AuditRecord::new(id, action, AuditOutcome::Success, Utc::now()));
        }

        let actions: Vec<String> = sink.all().into_iter().map(|r| r.action).collect();
        assert_eq!(actions, vec!["b", "c"]);
    }

    #[test]
    fn recent_filters_by_account_and_time() {
        let sink = InMemoryAuditSink::new();
        let me = AccountId::new();
        let now = Utc::now();

        sink.record(AuditRecord::new(me, "old", AuditOutcome::Success, now - Duration::hours(2)));
        sink.record(AuditRecord::new(AccountId::new(), "other", AuditOutcome::Success, now));
        sink.record(AuditRecord::new(me, "dispatch", AuditOutcome::Rejected, now).with_ip(Some("10.0.0.9".into())));

        let recent = sink.recent(me, now - Duration::hours(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn tracing_sink_forwards() {
        let store = Arc::new(InMemoryAuditSink::new());
        let sink = TracingAuditSink::new().forward_to(store.clone());

        sink.record(AuditRecord::new(AccountId::new(), "dispatch", AuditOutcome::Success, Utc::now()));
        assert_eq!(store.len(), 1);
    }
}
