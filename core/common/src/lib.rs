//! Common utilities and types shared across ReviewSync modules.
//!
//! This module provides the error type and the small vocabulary of enums
//! (entity types, sync triggers, failure classes) that every other crate
//! speaks.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntityType, SyncErrorType, SyncType};
