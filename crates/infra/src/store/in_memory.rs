//! In-memory store for tests and single-process deployments.
//!
//! One `RwLock` guards all state, so every commit is serialized and the
//! version check plus writes happen under the same guard. Job watchers are
//! `tokio::sync::watch` channels created lazily on first subscription.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use creditgate_core::{AccountId, BusinessId, ExpectedVersion, JobId, Versioned};
use creditgate_ledger::{Account, Job, JobOutcome, JobStatus, LedgerEntry, TrialLock};

use super::r#trait::{
    DispatchCommit, JobStats, JobStore, JobUpdates, JobWatch, LedgerStore, QueueEntry, StoreError,
};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Versioned<Account>>,
    trial_locks: HashMap<BusinessId, TrialLock>,
    jobs: HashMap<JobId, Job>,
    queue: VecDeque<QueueEntry>,
    entries: Vec<LedgerEntry>,
    watchers: HashMap<JobId, watch::Sender<Option<Job>>>,
}

impl State {
    fn publish(&mut self, id: JobId) {
        let current = self.jobs.get(&id).cloned();
        if let Some(tx) = self.watchers.get(&id) {
            tx.send_replace(current);
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a job back on the queue (simulates a duplicate trigger delivery).
    pub fn redeliver(&self, job_id: JobId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.queue.push_back(QueueEntry {
            job_id,
            enqueued_at: Utc::now(),
        });
        Ok(())
    }

    /// Number of ledger entries across all owners.
    pub fn entry_count(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }
}

fn check_version(id: AccountId, expected: ExpectedVersion, actual: u64) -> Result<(), StoreError> {
    expected
        .check(actual)
        .map_err(|e| StoreError::Conflict(format!("account {id}: {e}")))
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn load_account(&self, id: AccountId) -> Result<Option<Versioned<Account>>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn create_account(
        &self,
        account: Account,
        opening: Option<LedgerEntry>,
    ) -> Result<Versioned<Account>, StoreError> {
        let mut state = self.write()?;
        if state.accounts.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.id.to_string(),
            });
        }

        let versioned = Versioned::new(account, 1);
        state.accounts.insert(versioned.value.id, versioned.clone());
        state.entries.extend(opening);
        Ok(versioned)
    }

    async fn save_account(
        &self,
        account: Account,
        expected: ExpectedVersion,
        entry: Option<LedgerEntry>,
    ) -> Result<Versioned<Account>, StoreError> {
        let mut state = self.write()?;
        let current = state
            .accounts
            .get(&account.id)
            .ok_or_else(|| StoreError::account_not_found(account.id))?;
        check_version(account.id, expected, current.version)?;

        let versioned = Versioned::new(account, current.version + 1);
        state.accounts.insert(versioned.value.id, versioned.clone());
        state.entries.extend(entry);
        Ok(versioned)
    }

    async fn trial_lock(&self, business_id: &BusinessId) -> Result<Option<TrialLock>, StoreError> {
        Ok(self.read()?.trial_locks.get(business_id).cloned())
    }

    async fn commit_dispatch(&self, commit: DispatchCommit) -> Result<(), StoreError> {
        let mut state = self.write()?;

        // Validate everything before the first write.
        if let Some((account, expected)) = &commit.account {
            let current = state
                .accounts
                .get(&account.id)
                .ok_or_else(|| StoreError::account_not_found(account.id))?;
            check_version(account.id, *expected, current.version)?;
        } else if !state.accounts.contains_key(&commit.job.owner_id) {
            return Err(StoreError::account_not_found(commit.job.owner_id));
        }
        if let Some(lock) = &commit.trial_lock {
            if state.trial_locks.contains_key(&lock.business_id) {
                return Err(StoreError::TrialLockExists(lock.business_id.clone()));
            }
        }
        if state.jobs.contains_key(&commit.job.id) {
            return Err(StoreError::AlreadyExists {
                entity: "job",
                id: commit.job.id.to_string(),
            });
        }

        if let Some((account, _)) = commit.account {
            let next = state.accounts.get(&account.id).map(|v| v.version + 1).unwrap_or(1);
            state.accounts.insert(account.id, Versioned::new(account, next));
        }
        if let Some(lock) = commit.trial_lock {
            state.trial_locks.insert(lock.business_id.clone(), lock);
        }
        let job_id = commit.job.id;
        state.jobs.insert(job_id, commit.job);
        state.entries.push(commit.entry);
        state.queue.push_back(commit.queue);
        state.publish(job_id);
        Ok(())
    }

    async fn ledger_entries(
        &self,
        owner: AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner)
            .filter(|e| since.is_none_or(|s| e.timestamp >= s))
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.timestamp, e.id));
        Ok(out)
    }

    async fn active_accounts(&self, since: DateTime<Utc>) -> Result<Vec<AccountId>, StoreError> {
        let state = self.read()?;
        let owners: HashSet<AccountId> = state
            .entries
            .iter()
            .filter(|e| e.operation.is_consumption() && e.timestamp >= since)
            .map(|e| e.owner_id)
            .collect();
        let mut out: Vec<AccountId> = owners.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let mut state = self.write()?;
        while let Some(entry) = state.queue.pop_front() {
            if let Some(job) = state.jobs.get(&entry.job_id) {
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn mark_processing(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let job = state.jobs.get_mut(&id).ok_or_else(|| StoreError::job_not_found(id))?;
        let changed = job.mark_processing(at);
        if changed {
            state.publish(id);
        }
        Ok(changed)
    }

    async fn finish_job(&self, id: JobId, outcome: JobOutcome, at: DateTime<Utc>) -> Result<Job, StoreError> {
        let mut state = self.write()?;
        let job = state.jobs.get_mut(&id).ok_or_else(|| StoreError::job_not_found(id))?;
        job.settle(outcome, at).map_err(|_| StoreError::AlreadyTerminal(id))?;
        let settled = job.clone();
        state.publish(id);
        // Terminal states never change again.
        state.watchers.remove(&id);
        Ok(settled)
    }

    async fn list_jobs(&self, owner: AccountId, limit: usize) -> Result<Vec<Job>, StoreError> {
        let state = self.read()?;
        let mut jobs: Vec<Job> = state.jobs.values().filter(|j| j.owner_id == owner).cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn job_stats(&self, owner: AccountId) -> Result<JobStats, StoreError> {
        let state = self.read()?;
        let mut stats = JobStats::default();
        let mut latency_sum = 0i64;
        let mut settled = 0i64;

        for job in state.jobs.values().filter(|j| j.owner_id == owner) {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            if let Some(ms) = job.latency_ms() {
                latency_sum += ms;
                settled += 1;
            }
        }
        if settled > 0 {
            stats.avg_latency_ms = Some(latency_sum / settled);
        }
        Ok(stats)
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let removed = state.jobs.remove(&id).is_some();
        state.queue.retain(|q| q.job_id != id);
        if let Some(tx) = state.watchers.remove(&id) {
            tx.send_replace(None);
        }
        Ok(removed)
    }

    async fn queue_depth(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.queue.len() as u64)
    }
}

struct ChannelUpdates {
    rx: watch::Receiver<Option<Job>>,
    primed: bool,
}

#[async_trait]
impl JobUpdates for ChannelUpdates {
    async fn next(&mut self) -> Result<Option<Job>, StoreError> {
        if self.primed {
            if self.rx.changed().await.is_err() {
                // Sender dropped on deletion; the last value it sent is `None`.
                return Ok(self.rx.borrow_and_update().clone());
            }
        }
        self.primed = true;
        Ok(self.rx.borrow_and_update().clone())
    }
}

#[async_trait]
impl JobWatch for InMemoryStore {
    async fn watch(&self, id: JobId) -> Result<Box<dyn JobUpdates>, StoreError> {
        let mut state = self.write()?;
        let current = state.jobs.get(&id).cloned();

        let rx = match state.watchers.get(&id) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current.clone());
                if current.as_ref().is_some_and(Job::is_pending) {
                    state.watchers.insert(id, tx);
                }
                rx
            }
        };

        Ok(Box::new(ChannelUpdates { rx, primed: false }))
    }
}
