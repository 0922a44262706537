//! Credit ledger domain (accounts, jobs, ledger entries, trial locks).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Stores in
//! `creditgate-infra` persist what the planning functions here decide.

pub mod account;
pub mod adjust;
pub mod dispatch;
pub mod entry;
pub mod job;
pub mod trial;

pub use account::{Account, AccountRole, BlockState, Credits, UNLIMITED_BALANCE};
pub use adjust::{CreditAdjustment, plan_adjustment};
pub use dispatch::{DispatchPlan, DispatchRejection, plan_dispatch};
pub use entry::{LedgerEntry, LedgerOperation};
pub use job::{Job, JobOutcome, JobStatus};
pub use trial::TrialLock;
