//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the bearer token and endpoint
//!   (session file or OS keychain)
//! - `SessionState`: observable projection of the store (active/pending/error)
//! - `RouteGuard`: gates navigation on session validity

pub mod credentials;
pub mod guard;
pub mod session;

pub use credentials::{
    Credential, CredentialBackend, CredentialStore, FileBackend, KeyringBackend, MemoryBackend,
};
pub use guard::{GuardDecision, RouteGuard};
pub use session::{PendingGuard, SessionState, SessionStatus};
