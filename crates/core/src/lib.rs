//! `creditgate-core`: shared building blocks for the credit-gated dispatch system.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): strongly
//! typed identifiers, the domain error model and the optimistic-concurrency types
//! every store write is checked against.

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, BusinessId, JobId, LedgerEntryId};
pub use version::{ExpectedVersion, Versioned};
