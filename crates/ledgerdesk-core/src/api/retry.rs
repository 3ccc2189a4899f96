//! The authenticated-request decorator.
//!
//! [`with_auth_retry`] wraps one logical call:
//! proactive renewal check -> send -> (on 401) renew -> retry, strictly in
//! that order, renewing at most once and retrying at most once.

use std::future::Future;

use chrono::Duration;
use tracing::{debug, info, warn};

use super::transport::{ApiRequest, ApiResponse};
use super::ApiError;
use crate::auth::Credential;

/// What the decorator needs from a session.
pub trait AuthSession: Send + Sync {
    /// The current credential, if a session exists.
    fn credential(&self) -> Option<Credential>;

    /// How long before expiry a token is renewed proactively.
    fn renewal_window(&self) -> Duration;

    /// Replace `stale` with a fresh credential. Failures end the session and
    /// come back as [`ApiError::SessionEnded`].
    fn renew(&self, stale: &Credential)
        -> impl Future<Output = Result<Credential, ApiError>> + Send;

    /// Send `request` with `credential` as bearer. Non-success statuses are
    /// returned as responses, transport failures as errors.
    fn send(
        &self,
        credential: &Credential,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;

    /// End the session whose token was `rejected`.
    fn tear_down(&self, rejected: &Credential, reason: &str);
}

pub async fn with_auth_retry<S: AuthSession>(
    session: &S,
    request: &ApiRequest,
) -> Result<ApiResponse, ApiError> {
    let mut credential = session.credential().ok_or(ApiError::NoSession)?;
    let mut renewed = false;

    if credential.needs_renewal(session.renewal_window()) {
        debug!(path = %request.path, expires_at = ?credential.expires_at, "Token inside renewal window");
        credential = session.renew(&credential).await?;
        renewed = true;
    }

    let response = session.send(&credential, request).await?;
    if !response.is_unauthorized() {
        return into_result(response);
    }

    if renewed {
        warn!(path = %request.path, "Freshly renewed token was rejected");
        return Err(end_session(session, &credential, "renewed token was rejected"));
    }

    info!(path = %request.path, "Token rejected, renewing and retrying once");
    let credential = session.renew(&credential).await?;
    let retry = session.send(&credential, request).await?;
    if retry.is_unauthorized() {
        warn!(path = %request.path, "Token rejected again after renewal");
        return Err(end_session(session, &credential, "token rejected after renewal"));
    }
    into_result(retry)
}

fn end_session<S: AuthSession>(session: &S, rejected: &Credential, reason: &str) -> ApiError {
    session.tear_down(rejected, reason);
    ApiError::SessionEnded(reason.to_string())
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_status(response.status, &response.body))
    }
}
