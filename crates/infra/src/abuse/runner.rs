use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use creditgate_core::AccountId;

use super::monitor::AbuseMonitor;
use crate::store::CreditStore;

#[derive(Debug, Clone)]
pub struct AbuseRunnerConfig {
    /// Full sweep cadence.
    pub sweep_interval: Duration,
    /// Accounts with consumption inside this window are swept.
    pub lookback: chrono::Duration,
    /// Pending per-account triggers; extra triggers are dropped.
    pub trigger_capacity: usize,
}

impl Default for AbuseRunnerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            lookback: chrono::Duration::hours(1),
            trigger_capacity: 1024,
        }
    }
}

/// Cheap, cloneable hook for requesting an evaluation of one account.
#[derive(Debug, Clone)]
pub struct AbuseTrigger {
    tx: mpsc::Sender<AccountId>,
}

impl AbuseTrigger {
    /// Never blocks. Triggers are coalesced per account by the runner and
    /// dropped when the queue is full (the next sweep covers them).
    ///
    /// Returns whether the trigger was queued.
    pub fn trigger(&self, account_id: AccountId) -> bool {
        match self.tx.try_send(account_id) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(account_id = %account_id, "abuse trigger queue full; leaving account to the next sweep");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(account_id = %account_id, "abuse runner stopped; trigger dropped");
                false
            }
        }
    }
}

pub struct AbuseRunnerHandle {
    trigger: AbuseTrigger,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl AbuseRunnerHandle {
    pub fn trigger(&self) -> AbuseTrigger {
        self.trigger.clone()
    }

    /// Stop the runner and wait for the current evaluation to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Spawn the periodic sweep plus trigger loop on the current runtime.
pub fn spawn_abuse_runner(
    monitor: Arc<AbuseMonitor>,
    store: Arc<dyn CreditStore>,
    config: AbuseRunnerConfig,
) -> AbuseRunnerHandle {
    let (tx, rx) = mpsc::channel(config.trigger_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(runner_loop(monitor, store, config, rx, shutdown_rx));

    AbuseRunnerHandle {
        trigger: AbuseTrigger { tx },
        shutdown: shutdown_tx,
        join: Some(join),
    }
}

async fn runner_loop(
    monitor: Arc<AbuseMonitor>,
    store: Arc<dyn CreditStore>,
    config: AbuseRunnerConfig,
    mut triggers: mpsc::Receiver<AccountId>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = config.sweep_interval.as_secs(), "abuse runner started");

    let mut ticker = tokio::time::interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup does not sweep.
    ticker.tick().await;

    loop {
        let batch: BTreeSet<AccountId> = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            Some(first) = triggers.recv() => {
                let mut batch = BTreeSet::from([first]);
                while let Ok(more) = triggers.try_recv() {
                    batch.insert(more);
                }
                batch
            }
            _ = ticker.tick() => {
                match store.active_accounts(Utc::now() - config.lookback).await {
                    Ok(ids) => ids.into_iter().collect(),
                    Err(e) => {
                        warn!(error = %e, "abuse sweep could not list active accounts");
                        continue;
                    }
                }
            }
        };

        debug!(accounts = batch.len(), "abuse evaluation batch");
        for account_id in batch {
            if let Err(e) = monitor.evaluate(account_id, Utc::now()).await {
                warn!(account_id = %account_id, error = %e, "abuse evaluation failed");
            }
        }
    }

    info!("abuse runner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditOutcome, AuditRecord, AuditSink, InMemoryAuditSink};
    use crate::store::{DispatchCommit, InMemoryStore, LedgerStore};
    use chrono::DateTime;
    use creditgate_ai::AbuseDetector;
    use creditgate_events::{ClientNotice, EventBus, InMemoryEventBus};
    use creditgate_ledger::{Account, AccountRole, plan_dispatch};

    async fn scripted_account(store: &InMemoryStore, audit: &InMemoryAuditSink, now: DateTime<Utc>) -> AccountId {
        let id = store
            .create_account(Account::new(AccountId::new(), AccountRole::User, 50, now).unwrap(), None)
            .await
            .unwrap()
            .value
            .id;
        for i in (0..12).rev() {
            let at = now - chrono::Duration::seconds(2 * i);
            let current = store.load_account(id).await.unwrap().unwrap();
            let plan = plan_dispatch(&current.value, None, false, serde_json::json!({"prompt": "x"}), at).unwrap();
            store
                .commit_dispatch(DispatchCommit::from_plan(plan, current.expected(), at))
                .await
                .unwrap();
        }
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            audit.record(AuditRecord::new(id, "dispatch", AuditOutcome::Success, now).with_ip(Some(ip.into())));
        }
        id
    }

    #[tokio::test]
    async fn trigger_reports_full_and_closed_queues() {
        let (tx, mut rx) = mpsc::channel(1);
        let trigger = AbuseTrigger { tx };
        let id = AccountId::new();

        assert!(trigger.trigger(id));
        assert!(!trigger.trigger(id));
        assert_eq!(rx.recv().await, Some(id));
        assert!(trigger.trigger(id));

        drop(rx);
        assert!(!trigger.trigger(id));
    }

    #[tokio::test]
    async fn trigger_evaluates_and_blocks() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let bus: Arc<InMemoryEventBus<ClientNotice>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let id = scripted_account(&store, &audit, Utc::now()).await;

        let monitor = Arc::new(
            AbuseMonitor::new(store.clone(), AbuseDetector::new(), audit.clone(), bus.clone())
                .with_activity_log(audit.clone()),
        );
        let handle = spawn_abuse_runner(
            monitor,
            store.clone(),
            AbuseRunnerConfig {
                sweep_interval: Duration::from_secs(3600),
                ..AbuseRunnerConfig::default()
            },
        );

        let trigger = handle.trigger();
        trigger.trigger(id);
        trigger.trigger(id);

        let notice = tokio::task::spawn_blocking(move || sub.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(notice, ClientNotice::AccountBlocked { account_id, .. } if account_id == id));

        handle.shutdown().await;
        assert!(store.load_account(id).await.unwrap().unwrap().value.block.is_some());
    }

    #[tokio::test]
    async fn sweep_covers_recently_active_accounts() {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let bus: Arc<InMemoryEventBus<ClientNotice>> = Arc::new(InMemoryEventBus::new());
        let id = scripted_account(&store, &audit, Utc::now()).await;

        let monitor = Arc::new(
            AbuseMonitor::new(store.clone(), AbuseDetector::new(), audit.clone(), bus.clone())
                .with_activity_log(audit.clone()),
        );
        let handle = spawn_abuse_runner(
            monitor,
            store.clone(),
            AbuseRunnerConfig {
                sweep_interval: Duration::from_millis(20),
                ..AbuseRunnerConfig::default()
            },
        );

        let mut blocked = false;
        for _ in 0..100 {
            if store.load_account(id).await.unwrap().unwrap().value.block.is_some() {
                blocked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(blocked, "sweep did not block the scripted account");
    }
}
