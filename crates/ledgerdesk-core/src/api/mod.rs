//! REST API client module for the CA and chaincode service.
//!
//! This module provides the `SessionClient` for enrolling against the CA,
//! renewing tokens and issuing authenticated chaincode calls.
//!
//! The service uses bearer token authentication obtained through
//! `/user/enroll` and refreshed through `/user/reenroll`.

pub mod client;
pub mod error;
pub mod ledger;
pub mod models;
pub mod retry;
pub mod transport;

pub use client::{ClientSettings, SessionClient};
pub use error::ApiError;
pub use models::{CallKind, ChaincodeCall, Identity, IdentityAttribute, IdentityInfo, TokenResponse};
pub use retry::{with_auth_retry, AuthSession};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, OutgoingRequest, Transport};
