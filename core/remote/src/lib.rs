//! Sync server transport for ReviewSync.
//!
//! Encodes local records as wire DTOs, pushes them one per request to
//! `POST {server}/api/sync/{kind}` and classifies every failure as
//! network, auth, server, client or unknown.

pub mod auth;
pub mod client;
pub mod dto;
pub mod error;

pub use auth::Credentials;
pub use client::{HttpTransport, RemoteConfig, SyncTransport};
pub use dto::{SyncPayload, SyncResponse};
pub use error::RemoteError;
