//! Core library for ledgerdesk.
//!
//! Session lifecycle and authenticated request pipeline for a permissioned
//! ledger's CA and chaincode REST service:
//! - `auth`: credential store, observable session state, route guard
//! - `api`: session client with proactive and reactive token renewal
//! - `config`: on-disk configuration with environment overrides
//! - `history`: bounded, persisted log of ledger results
//! - `console`: composition root used by front ends

pub mod api;
pub mod auth;
pub mod config;
pub mod console;
pub mod history;

pub use api::{ApiError, CallKind, ChaincodeCall, ClientSettings, SessionClient};
pub use auth::{Credential, CredentialStore, GuardDecision, RouteGuard, SessionState, SessionStatus};
pub use config::Config;
pub use console::Console;
pub use history::{History, HistoryEntry};
