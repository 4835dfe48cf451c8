//! Reconciliation of local records with the ReviewSync server.
//!
//! This crate provides:
//! - Candidate discovery (needs sync ∪ latest attempt failed)
//! - Dependency-ordered pushes: workspaces, files, reviews, review files, issues
//! - An append-only audit log of every push attempt
//! - Aggregated run results with first-failure-wins error reporting
//! - Bounded retry when the local store is busy
//!
//! # Design Principles
//! - One record's failure never stops the run
//! - Only candidate discovery is dependency ordered; push success is not
//! - A failed push is retried by the next run, never within the same one
//! - Cancellation stops new pushes; nothing already written is rolled back

pub mod engine;
pub mod error;
pub mod recorder;
pub mod result;
pub mod retry;
pub mod selector;

pub use engine::{SyncConfig, SyncEngine};
pub use error::SyncError;
pub use recorder::{StatusUpdater, SyncLogRecorder};
pub use result::{SyncResult, TypeStats};
pub use retry::{RetryConfig, RetryExecutor};
pub use selector::{EntitySelector, SyncPlan};
