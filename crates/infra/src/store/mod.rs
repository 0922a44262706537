//! Persistence boundary for the credit ledger and the job queue.
//!
//! Two backends implement the same traits:
//! - [`InMemoryStore`]: single write lock per commit (tests, dev)
//! - [`PostgresStore`]: SERIALIZABLE transactions, version predicates and a
//!   primary key on trial locks

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::{PollBackoff, PostgresStore};
pub use r#trait::{
    CreditStore, DispatchCommit, JobStats, JobStore, JobUpdates, JobWatch, LedgerStore, QueueEntry,
    StoreError,
};
