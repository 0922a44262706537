use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use creditgate_ai::{AbuseDetector, ActivitySnapshot, RequestTrace, RiskAssessment, RiskVerdict};
use creditgate_core::AccountId;
use creditgate_events::{ClientNotice, EventBus};

use crate::audit::{ActivityLog, AuditOutcome, AuditRecord, AuditSink};
use crate::store::{CreditStore, StoreError};

const LOOKBACK_HOURS: i64 = 1;
const MAX_BLOCK_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum AbuseError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("could not apply block to account {0}: concurrent writes")]
    Contention(AccountId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbuseEvaluation {
    pub assessment: RiskAssessment,
    /// A block was written by this evaluation.
    pub blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Builds activity snapshots, scores them and applies automatic blocks.
pub struct AbuseMonitor {
    store: Arc<dyn CreditStore>,
    activity: Option<Arc<dyn ActivityLog>>,
    detector: AbuseDetector,
    audit: Arc<dyn AuditSink>,
    notices: Arc<dyn EventBus<ClientNotice>>,
}

impl AbuseMonitor {
    pub fn new(
        store: Arc<dyn CreditStore>,
        detector: AbuseDetector,
        audit: Arc<dyn AuditSink>,
        notices: Arc<dyn EventBus<ClientNotice>>,
    ) -> Self {
        Self {
            store,
            activity: None,
            detector,
            audit,
            notices,
        }
    }

    /// Use an audit trail as the source of request IPs.
    pub fn with_activity_log(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn detector(&self) -> &AbuseDetector {
        &self.detector
    }

    pub async fn snapshot(&self, account_id: AccountId, now: DateTime<Utc>) -> Result<ActivitySnapshot, AbuseError> {
        let since = now - Duration::hours(LOOKBACK_HOURS);
        let mut snapshot = ActivitySnapshot::new(account_id, now);

        snapshot.consumptions = self
            .store
            .ledger_entries(account_id, Some(since))
            .await?
            .into_iter()
            .filter(|e| e.operation.is_consumption())
            .map(|e| e.timestamp)
            .collect();

        if let Some(log) = &self.activity {
            snapshot.requests = log
                .recent(account_id, since)
                .into_iter()
                .filter(|r| r.action == "dispatch")
                .map(|r| RequestTrace { at: r.at, ip: r.ip })
                .collect();
        }
        Ok(snapshot)
    }

    /// Score one account and block it when the verdict says so.
    ///
    /// Admins are scored but never blocked automatically. An account that is
    /// already blocked keeps its existing block.
    pub async fn evaluate(&self, account_id: AccountId, now: DateTime<Utc>) -> Result<AbuseEvaluation, AbuseError> {
        if self.store.load_account(account_id).await?.is_none() {
            return Err(AbuseError::AccountNotFound(account_id));
        }

        let snapshot = self.snapshot(account_id, now).await?;
        let assessment = self.detector.assess(&snapshot);

        match assessment.verdict {
            RiskVerdict::Clear => {
                debug!(account_id = %account_id, score = assessment.score, "abuse check clear");
                return Ok(AbuseEvaluation {
                    assessment,
                    blocked: false,
                    blocked_until: None,
                });
            }
            RiskVerdict::Suspicious | RiskVerdict::Block => {
                warn!(
                    account_id = %account_id,
                    score = assessment.score,
                    verdict = ?assessment.verdict,
                    signals = ?assessment.signals,
                    "security event: suspicious dispatch activity"
                );
                self.audit.record(
                    AuditRecord::new(account_id, "security.suspicious", AuditOutcome::Success, now)
                        .with_metadata(serde_json::to_value(&assessment).unwrap_or_default()),
                );
            }
        }

        if assessment.verdict != RiskVerdict::Block {
            return Ok(AbuseEvaluation {
                assessment,
                blocked: false,
                blocked_until: None,
            });
        }

        let blocked_until = self.apply_block(account_id, &assessment, now).await?;
        Ok(AbuseEvaluation {
            blocked: blocked_until.is_some(),
            blocked_until,
            assessment,
        })
    }

    async fn apply_block(
        &self,
        account_id: AccountId,
        assessment: &RiskAssessment,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AbuseError> {
        let reason = assessment.reason();
        let duration = self.detector.block_duration();

        for _ in 0..MAX_BLOCK_ATTEMPTS {
            let Some(current) = self.store.load_account(account_id).await? else {
                return Err(AbuseError::AccountNotFound(account_id));
            };
            if current.value.is_admin() {
                info!(account_id = %account_id, "abuse verdict for admin account; not blocking");
                return Ok(None);
            }
            if current.value.active_block(now).is_some() {
                return Ok(None);
            }

            let mut next = current.value.clone();
            next.block_for(reason.clone(), Some(duration), now);
            let until = next.block.as_ref().and_then(|b| b.blocked_until);

            match self.store.save_account(next, current.expected(), None).await {
                Ok(_) => {
                    warn!(account_id = %account_id, score = assessment.score, until = ?until, "account blocked automatically");
                    self.audit.record(
                        AuditRecord::new(account_id, "account.block", AuditOutcome::Success, now)
                            .with_metadata(serde_json::json!({ "reason": reason, "automatic": true })),
                    );
                    if let Err(e) = self.notices.publish(ClientNotice::AccountBlocked {
                        account_id,
                        reason: reason.clone(),
                        until,
                        at: now,
                    }) {
                        warn!(account_id = %account_id, error = %e, "failed to publish block notice");
                    }
                    return Ok(until);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AbuseError::Contention(account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::store::{DispatchCommit, InMemoryStore, LedgerStore};
    use creditgate_ledger::{Account, AccountRole, plan_dispatch};
    use creditgate_events::InMemoryEventBus;

    /// Dispatch `n` jobs two seconds apart ending at `now`, straight through the store.
    async fn metronome(store: &InMemoryStore, id: AccountId, n: i64, now: DateTime<Utc>) {
        for i in (0..n).rev() {
            let at = now - Duration::seconds(2 * i);
            let current = store.load_account(id).await.unwrap().unwrap();
            let plan = plan_dispatch(&current.value, None, false, serde_json::json!({"prompt": "x"}), at).unwrap();
            store
                .commit_dispatch(DispatchCommit::from_plan(plan, current.expected(), at))
                .await
                .unwrap();
        }
    }

    fn monitor(store: Arc<InMemoryStore>, audit: Arc<InMemoryAuditSink>) -> (AbuseMonitor, Arc<InMemoryEventBus<ClientNotice>>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let m = AbuseMonitor::new(store, AbuseDetector::new(), audit.clone(), bus.clone()).with_activity_log(audit);
        (m, bus)
    }

    fn dispatch_from(audit: &InMemoryAuditSink, id: AccountId, ip: &str, at: DateTime<Utc>) {
        audit.record(AuditRecord::new(id, "dispatch", AuditOutcome::Success, at).with_ip(Some(ip.to_string())));
    }

    #[tokio::test]
    async fn scripted_usage_from_many_ips_gets_blocked() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let now = Utc::now();
        let id = store
            .create_account(Account::new(AccountId::new(), AccountRole::User, 50, now).unwrap(), None)
            .await
            .unwrap()
            .value
            .id;
        metronome(&store, id, 12, now).await;
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            dispatch_from(&audit, id, ip, now - Duration::minutes(1));
        }

        let (monitor, bus) = monitor(store.clone(), audit.clone());
        let sub = bus.subscribe();
        let eval = monitor.evaluate(id, now).await.unwrap();

        assert_eq!(eval.assessment.verdict, RiskVerdict::Block);
        assert!(eval.blocked);
        let account = store.load_account(id).await.unwrap().unwrap().value;
        assert!(account.active_block(now).is_some());
        assert!(matches!(sub.drain().as_slice(), [ClientNotice::AccountBlocked { .. }]));

        // A second evaluation keeps the existing block.
        let again = monitor.evaluate(id, now).await.unwrap();
        assert!(!again.blocked);
    }

    #[tokio::test]
    async fn suspicious_is_logged_but_not_blocked() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let now = Utc::now();
        let id = store
            .create_account(Account::new(AccountId::new(), AccountRole::User, 50, now).unwrap(), None)
            .await
            .unwrap()
            .value
            .id;
        metronome(&store, id, 12, now).await;

        let (monitor, _bus) = monitor(store.clone(), audit.clone());
        let eval = monitor.evaluate(id, now).await.unwrap();

        assert_eq!(eval.assessment.verdict, RiskVerdict::Suspicious);
        assert!(!eval.blocked);
        assert!(audit.all().iter().any(|r| r.action == "security.suspicious"));
        assert!(store.load_account(id).await.unwrap().unwrap().value.block.is_none());
    }

    #[tokio::test]
    async fn admins_are_never_blocked() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let now = Utc::now();
        let id = store
            .create_account(Account::new(AccountId::new(), AccountRole::Admin, 0, now).unwrap(), None)
            .await
            .unwrap()
            .value
            .id;
        metronome(&store, id, 12, now).await;
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            dispatch_from(&audit, id, ip, now);
        }

        let (monitor, _bus) = monitor(store.clone(), audit);
        let eval = monitor.evaluate(id, now).await.unwrap();
        assert_eq!(eval.assessment.verdict, RiskVerdict::Block);
        assert!(!eval.blocked);
    }

    #[tokio::test]
    async fn unknown_account_is_an_error() {
        let (monitor, _bus) = monitor(Arc::new(InMemoryStore::new()), Arc::new(InMemoryAuditSink::new()));
        assert!(matches!(
            monitor.evaluate(AccountId::new(), Utc::now()).await,
            Err(AbuseError::AccountNotFound(_))
        ));
    }
}
