//! Credit-gated job dispatch ("debit + enqueue").
//!
//! ## Flow
//!
//! ```text
//! RequestJob
//!   ↓
//! 1. Validate payload / business id
//!   ↓
//! 2. Read account (with version) + trial lock
//!   ↓
//! 3. plan_dispatch (pure: block → admin → trial → balance)
//!   ↓
//! 4. commit_dispatch (account write, trial lock, job, ledger entry, queue entry)
//!   ↓ Conflict / TrialLockExists → back to 2 (bounded, with backoff)
//! 5. Wake workers, audit, low-credit notice, abuse trigger
//! ```
//!
//! Steps 2-4 repeat as a unit, so a caller never observes a partial effect.
//! Nothing after step 4 can fail the request: audit and notice failures are
//! logged and dropped. The completion provider is never called from here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use creditgate_core::{AccountId, BusinessId, JobId};
use creditgate_events::{ClientNotice, EventBus};
use creditgate_ledger::{DispatchRejection, plan_dispatch};

use crate::abuse::AbuseTrigger;
use crate::audit::{AuditOutcome, AuditRecord, AuditSink};
use crate::store::{CreditStore, DispatchCommit, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub account_id: AccountId,
    /// Raw business identifier; trimmed and validated here.
    pub business_id: Option<String>,
    pub payload: serde_json::Value,
    /// Caller address, recorded for abuse scoring.
    pub client_ip: Option<String>,
}

impl DispatchRequest {
    pub fn new(account_id: AccountId, payload: serde_json::Value) -> Self {
        Self {
            account_id,
            business_id: None,
            payload,
            client_ip: None,
        }
    }

    pub fn with_business(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub job_id: JobId,
    pub new_balance: i64,
    pub unlimited: bool,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Expected business outcome; nothing was written.
    #[error(transparent)]
    Rejected(#[from] DispatchRejection),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("dispatch abandoned after {attempts} contended attempts")]
    Contention { attempts: u32 },

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Integrity faults are surfaced to callers as a generic internal error.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            DispatchError::AccountNotFound(_) | DispatchError::Contention { .. } | DispatchError::Store(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// `LowCredits` is published when a user balance lands at or below this.
    pub low_credit_threshold: i64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
            low_credit_threshold: 3,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn CreditStore>,
    wake: Arc<Notify>,
    audit: Arc<dyn AuditSink>,
    notices: Arc<dyn EventBus<ClientNotice>>,
    abuse: Option<AbuseTrigger>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CreditStore>,
        wake: Arc<Notify>,
        audit: Arc<dyn AuditSink>,
        notices: Arc<dyn EventBus<ClientNotice>>,
    ) -> Self {
        Self {
            store,
            wake,
            audit,
            notices,
            abuse: None,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_abuse_trigger(mut self, trigger: AbuseTrigger) -> Self {
        self.abuse = Some(trigger);
        self
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub async fn request_job(&self, request: DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let started = Instant::now();
        let account_id = request.account_id;

        if !request.payload.is_object() {
            return Err(DispatchError::InvalidArgument(
                "request payload must be a JSON object".to_string(),
            ));
        }
        let business_id = request
            .business_id
            .as_deref()
            .map(BusinessId::parse)
            .transpose()
            .map_err(|e| DispatchError::InvalidArgument(e.to_string()))?;

        let mut attempt = 0u32;
        let receipt = loop {
            attempt += 1;

            let Some(account) = self.store.load_account(account_id).await? else {
                error!(account_id = %account_id, "dispatch for unknown account");
                return Err(DispatchError::AccountNotFound(account_id));
            };

            let trial_taken = match (&business_id, account.value.is_admin()) {
                (Some(b), false) => self.store.trial_lock(b).await?.is_some(),
                _ => false,
            };

            let now = Utc::now();
            let plan = match plan_dispatch(
                &account.value,
                business_id.as_ref(),
                trial_taken,
                request.payload.clone(),
                now,
            ) {
                Ok(plan) => plan,
                Err(rejection) => {
                    debug!(
                        account_id = %account_id,
                        business_id = business_id.as_ref().map(|b| b.as_str()),
                        reason = %rejection,
                        "dispatch rejected"
                    );
                    self.audit.record(
                        AuditRecord::new(account_id, "dispatch", AuditOutcome::Rejected, now)
                            .with_ip(request.client_ip.clone())
                            .with_metadata(serde_json::json!({ "reason": rejection.to_string() })),
                    );
                    return Err(DispatchError::Rejected(rejection));
                }
            };

            let receipt = DispatchReceipt {
                job_id: plan.job.id,
                new_balance: plan.new_balance,
                unlimited: plan.unlimited,
            };

            match self
                .store
                .commit_dispatch(DispatchCommit::from_plan(plan, account.expected(), now))
                .await
            {
                Ok(()) => break receipt,
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    debug!(account_id = %account_id, attempt, error = %e, "dispatch commit contended; retrying");
                    tokio::time::sleep(self.policy.base_backoff * 2u32.saturating_pow(attempt - 1)).await;
                }
                Err(e) if e.is_retryable() => {
                    error!(account_id = %account_id, attempts = attempt, error = %e, "dispatch retries exhausted");
                    return Err(DispatchError::Contention { attempts: attempt });
                }
                Err(e) => {
                    error!(account_id = %account_id, error = %e, "dispatch commit failed");
                    return Err(DispatchError::Store(e));
                }
            }
        };

        self.wake.notify_one();
        self.after_commit(&request, business_id.as_ref(), receipt);

        info!(
            account_id = %account_id,
            job_id = %receipt.job_id,
            business_id = business_id.as_ref().map(|b| b.as_str()),
            new_balance = receipt.new_balance,
            unlimited = receipt.unlimited,
            attempts = attempt,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job dispatched"
        );
        Ok(receipt)
    }

    fn after_commit(&self, request: &DispatchRequest, business_id: Option<&BusinessId>, receipt: DispatchReceipt) {
        let now = Utc::now();
        self.audit.record(
            AuditRecord::new(request.account_id, "dispatch", AuditOutcome::Success, now)
                .with_ip(request.client_ip.clone())
                .with_metadata(serde_json::json!({
                    "jobId": receipt.job_id,
                    "businessId": business_id.map(|b| b.as_str()),
                    "newBalance": receipt.new_balance,
                })),
        );

        if !receipt.unlimited && receipt.new_balance <= self.policy.low_credit_threshold {
            let notice = ClientNotice::LowCredits {
                account_id: request.account_id,
                available: receipt.new_balance,
                threshold: self.policy.low_credit_threshold,
                at: now,
            };
            if let Err(e) = self.notices.publish(notice) {
                warn!(account_id = %request.account_id, error = %e, "failed to publish low-credit notice");
            }
        }

        if let Some(trigger) = &self.abuse {
            trigger.trigger(request.account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::store::{InMemoryStore, JobStore, LedgerStore};
    use chrono::Duration as ChronoDuration;
    use creditgate_events::InMemoryEventBus;
    use creditgate_ledger::{Account, AccountRole, LedgerOperation, UNLIMITED_BALANCE};

    struct Fixture {
        store: Arc<InMemoryStore>,
        audit: Arc<InMemoryAuditSink>,
        bus: Arc<InMemoryEventBus<ClientNotice>>,
        dispatcher: Arc<Dispatcher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(Notify::new()),
            audit.clone(),
            bus.clone(),
        ));
        Fixture {
            store,
            audit,
            bus,
            dispatcher,
        }
    }

    async fn account(store: &InMemoryStore, role: AccountRole, credits: i64) -> AccountId {
        let account = Account::new(AccountId::new(), role, credits, Utc::now()).unwrap();
        store.create_account(account, None).await.unwrap().value.id
    }

    fn payload() -> serde_json::Value {
        serde_json::json!({"prompt": "Write a reply"})
    }

    #[tokio::test]
    async fn one_credit_allows_exactly_one_job() {
        let f = fixture();
        let id = account(&f.store, AccountRole::User, 1).await;

        let receipt = f.dispatcher.request_job(DispatchRequest::new(id, payload())).await.unwrap();
        assert_eq!(receipt.new_balance, 0);
        assert!(!receipt.unlimited);

        let err = f.dispatcher.request_job(DispatchRequest::new(id, payload())).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Rejected(DispatchRejection::InsufficientCredits { available: 0 })
        ));

        let entries = f.store.ledger_entries(id, None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].delta, -1);
        assert_eq!(entries[0].balance_after, 0);
        assert_eq!(entries[0].related_job_id, Some(receipt.job_id));
        assert_eq!(f.store.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn admin_is_unlimited_with_zero_delta_entry() {
        let f = fixture();
        let id = account(&f.store, AccountRole::Admin, 0).await;

        let receipt = f
            .dispatcher
            .request_job(DispatchRequest::new(id, payload()).with_business("place-9"))
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, UNLIMITED_BALANCE);
        assert!(receipt.unlimited);

        let entries = f.store.ledger_entries(id, None).await.unwrap();
        assert_eq!(entries[0].delta, 0);
        assert_eq!(entries[0].operation, LedgerOperation::AdminUsage);
        assert!(f.store.trial_lock(&BusinessId::parse("place-9").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_overdraw() {
        let f = fixture();
        let id = account(&f.store, AccountRole::User, 5).await;
        // A conflict means another commit landed, and at most five can land,
        // so this attempt budget cannot run out.
        let dispatcher = Arc::new(
            Dispatcher::new(f.store.clone(), Arc::new(Notify::new()), f.audit.clone(), f.bus.clone()).with_policy(
                DispatchPolicy {
                    max_attempts: 10,
                    base_backoff: Duration::from_millis(1),
                    ..DispatchPolicy::default()
                },
            ),
        );

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let d = dispatcher.clone();
                tokio::spawn(async move { d.request_job(DispatchRequest::new(id, payload())).await })
            })
            .collect();

        let mut accepted = 0;
        let mut insufficient = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(DispatchError::Rejected(DispatchRejection::InsufficientCredits { available: 0 })) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted, 5);
        assert_eq!(insufficient, 15);
        let account = f.store.load_account(id).await.unwrap().unwrap().value;
        assert_eq!(account.credits.available, 0);
        assert_eq!(account.credits.used, 5);
        assert_eq!(f.store.ledger_entries(id, None).await.unwrap().len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_business_id_is_claimed_once() {
        let f = fixture();
        let a = account(&f.store, AccountRole::User, 3).await;
        let b = account(&f.store, AccountRole::User, 3).await;

        let da = f.dispatcher.clone();
        let db = f.dispatcher.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { da.request_job(DispatchRequest::new(a, payload()).with_business("biz-1")).await }),
            tokio::spawn(async move { db.request_job(DispatchRequest::new(b, payload()).with_business("biz-1")).await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let trial_used = results
            .iter()
            .filter(|r| matches!(r, Err(DispatchError::Rejected(DispatchRejection::TrialAlreadyUsed(_)))))
            .count();
        assert_eq!((ok, trial_used), (1, 1));
    }

    #[tokio::test]
    async fn active_block_rejects_and_expired_block_is_cleared() {
        let f = fixture();
        let id = account(&f.store, AccountRole::User, 3).await;

        let mut current = f.store.load_account(id).await.unwrap().unwrap();
        current.value.block_for("manual", Some(ChronoDuration::hours(1)), Utc::now());
        f.store.save_account(current.value.clone(), current.expected(), None).await.unwrap();

        let err = f.dispatcher.request_job(DispatchRequest::new(id, payload())).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(DispatchRejection::Blocked { .. })));

        let mut current = f.store.load_account(id).await.unwrap().unwrap();
        current.value.block_for("short", Some(ChronoDuration::seconds(-1)), Utc::now());
        f.store.save_account(current.value.clone(), current.expected(), None).await.unwrap();

        f.dispatcher.request_job(DispatchRequest::new(id, payload())).await.unwrap();
        assert!(f.store.load_account(id).await.unwrap().unwrap().value.block.is_none());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_reading_the_account() {
        let f = fixture();
        let id = AccountId::new();

        let err = f.dispatcher.request_job(DispatchRequest::new(id, serde_json::Value::Null)).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument(_)));

        let err = f
            .dispatcher
            .request_job(DispatchRequest::new(id, payload()).with_business("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument(_)));

        let err = f.dispatcher.request_job(DispatchRequest::new(id, payload())).await.unwrap_err();
        assert!(matches!(err, DispatchError::AccountNotFound(_)));
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn low_balance_publishes_notice_and_audits() {
        let f = fixture();
        let sub = f.bus.subscribe();
        let id = account(&f.store, AccountRole::User, 2).await;

        f.dispatcher
            .request_job(DispatchRequest::new(id, payload()).with_client_ip("10.1.1.1"))
            .await
            .unwrap();

        let notices = sub.drain();
        assert!(matches!(notices.as_slice(), [ClientNotice::LowCredits { available: 1, .. }]));

        let records = f.audit.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].ip.as_deref(), Some("10.1.1.1"));
    }
}
