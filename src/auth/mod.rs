//! Authentication module for the auth service
//!
//! This module verifies credentials, carries verified identities across
//! requests (stateless or session based), and exposes the HTTP handlers
//! for register, login and logout.

pub mod handlers;
mod password;
mod principal;
mod session;
mod strategy;

pub use password::PasswordHasher;
pub use principal::{Principal, Store};
pub use session::{
    CookieConfig, IdentityManager, IdentityMode, InMemorySessionStore, SessionClaim, SessionRecord,
    SessionStore, TokenSigner,
};
pub use strategy::{normalize_identifier, Credentials, LocalStrategy, Strategy, StrategyKind, StrategyRegistry};
