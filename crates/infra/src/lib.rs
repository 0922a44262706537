//! Infrastructure layer: stores, dispatch, workers, notification, abuse control.
//!
//! The ledger crate decides; this crate persists, schedules and observes.
//! [`runtime::Runtime`] wires every component for the API binary.

pub mod abuse;
pub mod accounts;
pub mod audit;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod jobs;
pub mod notifier;
pub mod prompts;
pub mod queries;
pub mod rate_limit;
pub mod runtime;
pub mod store;


pub use config::{ConfigError, Settings};
pub use runtime::{Runtime, RuntimeError, RuntimeOptions};
