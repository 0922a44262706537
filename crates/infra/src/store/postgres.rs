//! Postgres-backed store.
//!
//! ## Atomicity
//!
//! `commit_dispatch` runs in one SERIALIZABLE transaction:
//! 1. `UPDATE accounts ... WHERE id = $1 AND version = $2` (0 rows → `Conflict`)
//! 2. `INSERT INTO trial_locks ... ON CONFLICT DO NOTHING` (0 rows → `TrialLockExists`)
//! 3. job, ledger entry and queue inserts
//!
//! Any early return drops the transaction, which rolls it back.
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | StoreError |
//! |---|---|
//! | `40001` serialization failure, `40P01` deadlock | `Conflict` |
//! | `23505` unique violation | `Conflict` |
//! | anything else | `Storage` |
//!
//! ## Queue
//!
//! `claim_next` deletes the oldest `job_queue` row picked with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never claim the same entry.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use creditgate_core::{AccountId, BusinessId, ExpectedVersion, JobId, LedgerEntryId, Versioned};
use creditgate_ledger::{
    Account, AccountRole, BlockState, Credits, Job, JobOutcome, JobStatus, LedgerEntry, LedgerOperation,
    TrialLock,
};

use super::r#trait::{
    DispatchCommit, JobStats, JobStore, JobUpdates, JobWatch, LedgerStore, StoreError,
};

const SCHEMA: &str = include_str!("../../migrations/0001_creditgate.sql");

const ACCOUNT_COLUMNS: &str = "id, role, credits_available, credits_used, blocked_reason, blocked_at, \
     blocked_until, version, created_at, updated_at";

const JOB_COLUMNS: &str = "id, owner_id, business_id, status, request, result, error, created_at, \
     processing_started_at, completed_at";

const ENTRY_COLUMNS: &str = "id, owner_id, delta, balance_after, operation, related_job_id, note, ts";

/// Polling cadence used by [`JobWatch`] (doubles up to the max while idle).
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    poll: PollBackoff,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            poll: PollBackoff::default(),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn with_poll_backoff(mut self, poll: PollBackoff) -> Self {
        self.poll = poll;
        self
    }

    /// Apply the bundled schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        Ok(tx)
    }
}

async fn insert_entry(tx: &mut Transaction<'static, Postgres>, entry: &LedgerEntry) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, owner_id, delta, balance_after, operation, related_job_id, note, ts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.owner_id.as_uuid())
    .bind(entry.delta)
    .bind(entry.balance_after)
    .bind(entry.operation.as_str())
    .bind(entry.related_job_id.map(|j| *j.as_uuid()))
    .bind(entry.note.as_deref())
    .bind(entry.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;
    Ok(())
}

/// Version-checked account update. Returns the new version.
async fn update_account(
    tx: &mut Transaction<'static, Postgres>,
    account: &Account,
    expected: ExpectedVersion,
) -> Result<u64, StoreError> {
    let block = account.block.as_ref();
    let expected_version = match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    };

    let row = sqlx::query(
        r#"
        UPDATE accounts
        SET role = $3,
            credits_available = $4,
            credits_used = $5,
            blocked_reason = $6,
            blocked_at = $7,
            blocked_until = $8,
            updated_at = $9,
            version = version + 1
        WHERE id = $1 AND ($2::BIGINT IS NULL OR version = $2)
        RETURNING version
        "#,
    )
    .bind(account.id.as_uuid())
    .bind(expected_version)
    .bind(account.role.as_str())
    .bind(account.credits.available)
    .bind(account.credits.used)
    .bind(block.map(|b| b.reason.as_str()))
    .bind(block.map(|b| b.blocked_at))
    .bind(block.and_then(|b| b.blocked_until))
    .bind(account.updated_at)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_account", e))?;

    match row {
        Some(row) => {
            let version: i64 = row.try_get("version").map_err(|e| map_sqlx_error("update_account", e))?;
            Ok(version as u64)
        }
        None => Err(StoreError::Conflict(format!(
            "account {}: expected {:?}, row missing or moved",
            account.id, expected
        ))),
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn load_account(&self, id: AccountId) -> Result<Option<Versioned<Account>>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_account", e))?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    #[instrument(skip(self, account, opening), fields(account_id = %account.id), err)]
    async fn create_account(
        &self,
        account: Account,
        opening: Option<LedgerEntry>,
    ) -> Result<Versioned<Account>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let block = account.block.as_ref();

        let inserted = sqlx::query(
            r#"
            INSERT INTO accounts (id, role, credits_available, credits_used, blocked_reason, blocked_at,
                                  blocked_until, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(account.role.as_str())
        .bind(account.credits.available)
        .bind(account.credits.used)
        .bind(block.map(|b| b.reason.as_str()))
        .bind(block.map(|b| b.blocked_at))
        .bind(block.and_then(|b| b.blocked_until))
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.id.to_string(),
            });
        }
        if let Some(entry) = &opening {
            insert_entry(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Versioned::new(account, 1))
    }

    #[instrument(skip(self, account, entry), fields(account_id = %account.id, expected = ?expected), err)]
    async fn save_account(
        &self,
        account: Account,
        expected: ExpectedVersion,
        entry: Option<LedgerEntry>,
    ) -> Result<Versioned<Account>, StoreError> {
        let mut tx = self.begin_serializable().await?;

        let exists: Option<PgRow> = sqlx::query("SELECT 1 FROM accounts WHERE id = $1")
            .bind(account.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_account", e))?;
        if exists.is_none() {
            return Err(StoreError::account_not_found(account.id));
        }

        let version = update_account(&mut tx, &account, expected).await?;
        if let Some(entry) = &entry {
            insert_entry(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Versioned::new(account, version))
    }

    #[instrument(skip(self), fields(business_id = %business_id), err)]
    async fn trial_lock(&self, business_id: &BusinessId) -> Result<Option<TrialLock>, StoreError> {
        let row = sqlx::query(
            "SELECT business_id, first_used_by, first_used_at FROM trial_locks WHERE business_id = $1",
        )
        .bind(business_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("trial_lock", e))?;

        row.map(|r| {
            let first_used_by: Uuid = r.try_get("first_used_by").map_err(|e| map_sqlx_error("trial_lock", e))?;
            let first_used_at: DateTime<Utc> =
                r.try_get("first_used_at").map_err(|e| map_sqlx_error("trial_lock", e))?;
            Ok(TrialLock::new(
                business_id.clone(),
                AccountId::from_uuid(first_used_by),
                first_used_at,
            ))
        })
        .transpose()
    }

    #[instrument(
        skip(self, commit),
        fields(job_id = %commit.job.id, account_id = %commit.job.owner_id),
        err
    )]
    async fn commit_dispatch(&self, commit: DispatchCommit) -> Result<(), StoreError> {
        let mut tx = self.begin_serializable().await?;

        if let Some((account, expected)) = &commit.account {
            update_account(&mut tx, account, *expected).await?;
        }

        if let Some(lock) = &commit.trial_lock {
            let inserted = sqlx::query(
                r#"
                INSERT INTO trial_locks (business_id, first_used_by, first_used_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (business_id) DO NOTHING
                "#,
            )
            .bind(lock.business_id.as_str())
            .bind(lock.first_used_by.as_uuid())
            .bind(lock.first_used_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_trial_lock", e))?;

            if inserted.rows_affected() == 0 {
                return Err(StoreError::TrialLockExists(lock.business_id.clone()));
            }
        }

        let job = &commit.job;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, owner_id, business_id, status, request, result, error, created_at,
                              processing_started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.owner_id.as_uuid())
        .bind(job.business_id.as_ref().map(BusinessId::as_str))
        .bind(job.status.as_str())
        .bind(&job.request)
        .bind(job.result.as_deref())
        .bind(job.error.as_deref())
        .bind(job.created_at)
        .bind(job.processing_started_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        insert_entry(&mut tx, &commit.entry).await?;

        sqlx::query("INSERT INTO job_queue (job_id, enqueued_at) VALUES ($1, $2)")
            .bind(commit.queue.job_id.as_uuid())
            .bind(commit.queue.enqueued_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("enqueue_job", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %owner), err)]
    async fn ledger_entries(
        &self,
        owner: AccountId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE owner_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR ts >= $2) \
             ORDER BY ts ASC, id ASC"
        ))
        .bind(owner.as_uuid())
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn active_accounts(&self, since: DateTime<Utc>) -> Result<Vec<AccountId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT owner_id FROM ledger_entries
            WHERE ts >= $1 AND operation IN ('usage', 'admin_usage')
            ORDER BY owner_id
            "#,
        )
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_accounts", e))?;

        rows.iter()
            .map(|r| {
                r.try_get::<Uuid, _>("owner_id")
                    .map(AccountId::from_uuid)
                    .map_err(|e| map_sqlx_error("active_accounts", e))
            })
            .collect()
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_job", e))?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            WITH claimed AS (
                DELETE FROM job_queue
                WHERE job_id = (
                    SELECT job_id FROM job_queue
                    ORDER BY enqueued_at ASC
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING job_id
            )
            SELECT {JOB_COLUMNS} FROM jobs WHERE id = (SELECT job_id FROM claimed)
            "#
        ))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn mark_processing(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs SET processing_started_at = $2
            WHERE id = $1 AND status = 'pending' AND processing_started_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processing", e))?;

        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(self, outcome), fields(job_id = %id, status = outcome.status().as_str()), err)]
    async fn finish_job(&self, id: JobId, outcome: JobOutcome, at: DateTime<Utc>) -> Result<Job, StoreError> {
        let (result, error) = match &outcome {
            JobOutcome::Completed { result } => (Some(result.as_str()), None),
            JobOutcome::Failed { error } => (None, Some(error.as_str())),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET status = $2, result = $3, error = $4, completed_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(outcome.status().as_str())
        .bind(result)
        .bind(error)
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_job", e))?;

        match row {
            Some(r) => job_from_row(&r),
            None => match self.load_job(id).await? {
                Some(_) => Err(StoreError::AlreadyTerminal(id)),
                None => Err(StoreError::job_not_found(id)),
            },
        }
    }

    #[instrument(skip(self), fields(account_id = %owner), err)]
    async fn list_jobs(&self, owner: AccountId, limit: usize) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(owner.as_uuid())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(account_id = %owner), err)]
    async fn job_stats(&self, owner: AccountId) -> Result<JobStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                (AVG(EXTRACT(EPOCH FROM (completed_at - created_at)) * 1000)
                    FILTER (WHERE completed_at IS NOT NULL))::BIGINT AS avg_latency_ms
            FROM jobs
            WHERE owner_id = $1
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_stats", e))?;

        let count = |col: &str| -> Result<u64, StoreError> {
            row.try_get::<i64, _>(col)
                .map(|v| v.max(0) as u64)
                .map_err(|e| map_sqlx_error("job_stats", e))
        };

        Ok(JobStats {
            total: count("total")?,
            pending: count("pending")?,
            completed: count("completed")?,
            failed: count("failed")?,
            avg_latency_ms: row
                .try_get("avg_latency_ms")
                .map_err(|e| map_sqlx_error("job_stats", e))?,
        })
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn queue_depth(&self) -> Result<u64, StoreError> {
        let depth: i64 = sqlx::query("SELECT COUNT(*) AS depth FROM job_queue")
            .fetch_one(&*self.pool)
            .await
            .and_then(|r| r.try_get("depth"))
            .map_err(|e| map_sqlx_error("queue_depth", e))?;
        Ok(depth.max(0) as u64)
    }
}

/// Polls the job row, backing off while nothing changes.
struct PollingUpdates {
    store: PostgresStore,
    id: JobId,
    last: Option<Option<Job>>,
}

#[async_trait]
impl JobUpdates for PollingUpdates {
    async fn next(&mut self) -> Result<Option<Job>, StoreError> {
        let Some(last) = &self.last else {
            let current = self.store.load_job(self.id).await?;
            self.last = Some(current.clone());
            return Ok(current);
        };
        let last = last.clone();

        let mut delay = self.store.poll.initial;
        loop {
            tokio::time::sleep(delay).await;
            let current = self.store.load_job(self.id).await?;
            if current != last {
                self.last = Some(current.clone());
                return Ok(current);
            }
            delay = (delay * 2).min(self.store.poll.max);
        }
    }
}

#[async_trait]
impl JobWatch for PostgresStore {
    async fn watch(&self, id: JobId) -> Result<Box<dyn JobUpdates>, StoreError> {
        Ok(Box::new(PollingUpdates {
            store: self.clone(),
            id,
            last: None,
        }))
    }
}

fn decode<T>(operation: &str, value: Result<T, sqlx::Error>) -> Result<T, StoreError> {
    value.map_err(|e| map_sqlx_error(operation, e))
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(format!("corrupt {what} row: {err}"))
}

fn account_from_row(row: &PgRow) -> Result<Versioned<Account>, StoreError> {
    let op = "decode_account";
    let role: String = decode(op, row.try_get("role"))?;
    let reason: Option<String> = decode(op, row.try_get("blocked_reason"))?;
    let blocked_at: Option<DateTime<Utc>> = decode(op, row.try_get("blocked_at"))?;
    let blocked_until: Option<DateTime<Utc>> = decode(op, row.try_get("blocked_until"))?;
    let version: i64 = decode(op, row.try_get("version"))?;

    let block = match (reason, blocked_at) {
        (Some(reason), Some(blocked_at)) => Some(BlockState {
            reason,
            blocked_at,
            blocked_until,
        }),
        _ => None,
    };

    let account = Account {
        id: AccountId::from_uuid(decode(op, row.try_get("id"))?),
        role: AccountRole::from_str(&role).map_err(|e| corrupt("account", e))?,
        credits: Credits {
            available: decode(op, row.try_get("credits_available"))?,
            used: decode(op, row.try_get("credits_used"))?,
        },
        block,
        created_at: decode(op, row.try_get("created_at"))?,
        updated_at: decode(op, row.try_get("updated_at"))?,
    };
    Ok(Versioned::new(account, version as u64))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let op = "decode_job";
    let status: String = decode(op, row.try_get("status"))?;
    let business_id: Option<String> = decode(op, row.try_get("business_id"))?;

    Ok(Job {
        id: JobId::from_uuid(decode(op, row.try_get("id"))?),
        owner_id: AccountId::from_uuid(decode(op, row.try_get("owner_id"))?),
        business_id: business_id
            .map(|b| BusinessId::parse(&b))
            .transpose()
            .map_err(|e| corrupt("job", e))?,
        status: JobStatus::from_str(&status).map_err(|e| corrupt("job", e))?,
        request: decode(op, row.try_get("request"))?,
        result: decode(op, row.try_get("result"))?,
        error: decode(op, row.try_get("error"))?,
        created_at: decode(op, row.try_get("created_at"))?,
        processing_started_at: decode(op, row.try_get("processing_started_at"))?,
        completed_at: decode(op, row.try_get("completed_at"))?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let op = "decode_ledger_entry";
    let operation: String = decode(op, row.try_get("operation"))?;
    let related: Option<Uuid> = decode(op, row.try_get("related_job_id"))?;

    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(decode(op, row.try_get("id"))?),
        owner_id: AccountId::from_uuid(decode(op, row.try_get("owner_id"))?),
        delta: decode(op, row.try_get("delta"))?,
        balance_after: decode(op, row.try_get("balance_after"))?,
        operation: LedgerOperation::from_str(&operation).map_err(|e| corrupt("ledger entry", e))?,
        related_job_id: related.map(JobId::from_uuid),
        note: decode(op, row.try_get("note"))?,
        timestamp: decode(op, row.try_get("ts"))?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_every_table() {
        for table in ["accounts", "trial_locks", "jobs", "ledger_entries", "job_queue"] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn pool_errors_map_to_storage() {
        assert!(matches!(
            map_sqlx_error("claim_next", sqlx::Error::PoolClosed),
            StoreError::Storage(_)
        ));
    }
}
