//! Abuse monitoring: snapshot building, automatic blocks and the background
//! runner. Scoring itself lives in `creditgate_ai::abuse`.

pub mod monitor;
pub mod runner;

pub use monitor::{AbuseError, AbuseEvaluation, AbuseMonitor};
pub use runner::{AbuseRunnerConfig, AbuseRunnerHandle, AbuseTrigger, spawn_abuse_runner};
