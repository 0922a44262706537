//! Asynchronous job processing.
//!
//! ## Components
//!
//! - `JobProcessor`: one provider call and one conditional terminal write per job
//! - `spawn_worker_pool`: tokio tasks claiming queue entries, woken by the dispatcher
//!
//! Delivery is at-least-once. A redelivered entry whose job is already terminal
//! is skipped, and the conditional terminal write lets exactly one writer win.

pub mod processor;
pub mod worker;

pub use processor::{JobProcessor, ProcessOutcome};
pub use worker::{WorkerPoolConfig, WorkerPoolHandle, WorkerStats, spawn_worker_pool};
