//! Credential store for the auth service
//!
//! This module holds the persisted user records, the adapters that
//! read and write them, and the process-wide connection cache.

pub mod connection;
pub mod models;
pub mod operations;

pub use connection::{ConnectionCache, StoreConnector};
pub use models::{NewCredential, StoredCredential};
pub use operations::{
    connector_for, CredentialStore, MemoryConnector, MemoryCredentialStore, PgConnector,
    PgCredentialStore, StoreHandle,
};
