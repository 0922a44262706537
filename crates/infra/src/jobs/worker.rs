//! Worker pool draining the job queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::processor::{JobProcessor, ProcessOutcome};
use crate::store::CreditStore;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Fallback poll when no wake-up arrives
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(500),
            name: "job-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub lost_races: u64,
    pub errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &Result<ProcessOutcome, crate::store::StoreError>) {
        match outcome {
            Ok(ProcessOutcome::Completed) => self.completed += 1,
            Ok(ProcessOutcome::Failed) => self.failed += 1,
            Ok(ProcessOutcome::Skipped) | Ok(ProcessOutcome::Vanished) => self.skipped += 1,
            Ok(ProcessOutcome::LostRace) => self.lost_races += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerPoolHandle {
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Stop claiming and wait for in-flight jobs to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }
}

/// Spawn `config.workers` tasks that claim and process queued jobs.
///
/// Workers sleep on `wake` (signalled by the dispatcher after each commit)
/// and fall back to polling every `poll_interval`.
pub fn spawn_worker_pool(
    store: Arc<dyn CreditStore>,
    processor: Arc<JobProcessor>,
    wake: Arc<Notify>,
    config: WorkerPoolConfig,
) -> WorkerPoolHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats = Arc::new(Mutex::new(WorkerStats::default()));
    let workers = config.workers.max(1);

    info!(pool = %config.name, workers, "starting worker pool");

    let joins = (0..workers)
        .map(|index| {
            tokio::spawn(worker_loop(
                index,
                config.clone(),
                store.clone(),
                processor.clone(),
                wake.clone(),
                shutdown_rx.clone(),
                stats.clone(),
            ))
        })
        .collect();

    WorkerPoolHandle {
        shutdown: shutdown_tx,
        joins,
        stats,
    }
}

async fn worker_loop(
    index: usize,
    config: WorkerPoolConfig,
    store: Arc<dyn CreditStore>,
    processor: Arc<JobProcessor>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    debug!(pool = %config.name, worker = index, "worker started");

    'outer: loop {
        // Drain the queue before sleeping.
        loop {
            if *shutdown.borrow() {
                break 'outer;
            }
            let job = match store.claim_next().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!(pool = %config.name, worker = index, error = %e, "claim failed");
                    if let Ok(mut s) = stats.lock() {
                        s.errors += 1;
                    }
                    break;
                }
            };
            // More work may be queued; let an idle sibling start on it.
            wake.notify_one();

            if let Ok(mut s) = stats.lock() {
                s.claimed += 1;
            }
            let job_id = job.id;
            let outcome = processor.process(job).await;
            if let Err(e) = &outcome {
                error!(pool = %config.name, worker = index, job_id = %job_id, error = %e, "job processing failed");
            }
            if let Ok(mut s) = stats.lock() {
                s.record(&outcome);
            }
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(config.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!(pool = %config.name, worker = index, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::jobs::processor::tests::{Script, ScriptedProvider};
    use crate::prompts::StaticPromptSettings;
    use crate::store::{DispatchCommit, InMemoryStore, JobStore, LedgerStore};
    use chrono::Utc;
    use creditgate_core::{AccountId, JobId};
    use creditgate_events::{ClientNotice, InMemoryEventBus};
    use creditgate_ledger::{Account, AccountRole, JobStatus, plan_dispatch};

    async fn enqueue(store: &InMemoryStore, account_id: AccountId) -> JobId {
        let now = Utc::now();
        let current = store.load_account(account_id).await.unwrap().unwrap();
        let plan = plan_dispatch(&current.value, None, false, serde_json::json!({"prompt": "x"}), now).unwrap();
        let id = plan.job.id;
        store
            .commit_dispatch(DispatchCommit::from_plan(plan, current.expected(), now))
            .await
            .unwrap();
        id
    }

    fn processor(store: Arc<InMemoryStore>, provider: Arc<ScriptedProvider>) -> Arc<JobProcessor> {
        Arc::new(JobProcessor::new(
            store,
            provider,
            Arc::new(StaticPromptSettings::default()),
            Arc::new(InMemoryEventBus::<ClientNotice>::new()),
            Arc::new(InMemoryAuditSink::new()),
        ))
    }

    async fn wait_until_settled(store: &InMemoryStore, ids: &[JobId]) {
        for _ in 0..200 {
            let mut all = true;
            for id in ids {
                if store.load_job(*id).await.unwrap().unwrap().status == JobStatus::Pending {
                    all = false;
                }
            }
            if all {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not settle");
    }

    #[tokio::test]
    async fn pool_drains_queue_exactly_once() {
        let store = Arc::new(InMemoryStore::new());
        let account_id = store
            .create_account(Account::new(AccountId::new(), AccountRole::User, 20, Utc::now()).unwrap(), None)
            .await
            .unwrap()
            .value
            .id;
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(enqueue(&store, account_id).await);
        }

        let provider = ScriptedProvider::new(Script::Reply("ok"));
        let wake = Arc::new(Notify::new());
        let pool = spawn_worker_pool(
            store.clone(),
            processor(store.clone(), provider.clone()),
            wake.clone(),
            WorkerPoolConfig::default().with_workers(3),
        );
        wake.notify_one();

        wait_until_settled(&store, &ids).await;
        for _ in 0..200 {
            if pool.stats().completed == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = pool.stats();
        pool.shutdown().await;

        assert_eq!(stats.claimed, 10);
        assert_eq!(stats.completed, 10);
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 10);
        assert_eq!(store.queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn redelivered_entry_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let account_id = store
            .create_account(Account::new(AccountId::new(), AccountRole::User, 5, Utc::now()).unwrap(), None)
            .await
            .unwrap()
            .value
            .id;
        let id = enqueue(&store, account_id).await;

        let provider = ScriptedProvider::new(Script::Reply("ok"));
        let wake = Arc::new(Notify::new());
        let pool = spawn_worker_pool(
            store.clone(),
            processor(store.clone(), provider.clone()),
            wake.clone(),
            WorkerPoolConfig::default()
                .with_workers(1)
                .with_poll_interval(Duration::from_millis(20)),
        );
        wake.notify_one();
        wait_until_settled(&store, &[id]).await;

        store.redeliver(id).unwrap();
        wake.notify_one();
        for _ in 0..200 {
            if pool.stats().skipped == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = pool.stats();
        pool.shutdown().await;

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let store = Arc::new(InMemoryStore::new());
        let pool = spawn_worker_pool(
            store.clone(),
            processor(store, ScriptedProvider::new(Script::Reply("ok"))),
            Arc::new(Notify::new()),
            WorkerPoolConfig::default().with_poll_interval(Duration::from_secs(3600)),
        );
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("pool shut down");
    }
}
