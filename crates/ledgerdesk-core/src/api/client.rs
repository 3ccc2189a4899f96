//! Session client for the CA and chaincode REST API.
//!
//! This module provides the `SessionClient`, the single choke point for
//! every call to the remote service. It owns the enrollment/renewal
//! lifecycle and keeps the credential store and session state in step.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::models::{EnrollRequest, TokenResponse};
use super::retry::{with_auth_retry, AuthSession};
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Method, OutgoingRequest, Transport};
use super::ApiError;
use crate::auth::credentials::join_url;
use crate::auth::{Credential, CredentialStore, SessionState};

// ============================================================================
// Constants
// ============================================================================

pub const ENROLL_PATH: &str = "/user/enroll";
pub const RENEW_PATH: &str = "/user/reenroll";
pub const IDENTITIES_PATH: &str = "/user/identities";

/// Renew this long before a tracked expiry.
pub const DEFAULT_RENEWAL_WINDOW_SECS: i64 = 60;

/// HTTP request timeout in seconds.
/// Bounds every call so a hung service cannot leave the session pending.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub renewal_window: Duration,
    pub request_timeout: std::time::Duration,
    /// Lifetime assumed for tokens whose response carries no expiry.
    /// `None` means only reactive (post-401) renewal applies.
    pub token_ttl: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            renewal_window: Duration::seconds(DEFAULT_RENEWAL_WINDOW_SECS),
            request_timeout: std::time::Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            token_ttl: None,
        }
    }
}

type RenewalFuture = Shared<BoxFuture<'static, Result<Credential, Arc<ApiError>>>>;

struct InFlightRenewal {
    id: u64,
    future: RenewalFuture,
}

struct Inner<T> {
    transport: T,
    store: CredentialStore,
    state: SessionState,
    settings: ClientSettings,
    /// At most one renewal runs at a time; concurrent callers await this one.
    renewal: Mutex<Option<InFlightRenewal>>,
    next_renewal_id: AtomicU64,
}

/// Authenticated client for the ledger service.
/// Clone is cheap - all clones share one store, state and renewal slot.
pub struct SessionClient<T = HttpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SessionClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SessionClient<HttpTransport> {
    /// Create a client speaking HTTP through `reqwest`
    pub fn new(store: CredentialStore, settings: ClientSettings) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(settings.request_timeout)?;
        Ok(Self::with_transport(transport, store, settings))
    }
}

impl<T: Transport> SessionClient<T> {
    pub fn with_transport(transport: T, store: CredentialStore, settings: ClientSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                state: SessionState::new(),
                settings,
                renewal: Mutex::new(None),
                next_renewal_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.inner.state
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The credential currently on record, if any
    pub fn credential(&self) -> Option<Credential> {
        self.inner.store.load()
    }

    // ===== Session lifecycle =====

    /// Exchange long-term credentials for a bearer token. Never retried;
    /// the caller decides whether to persist the result.
    pub async fn enroll(&self, id: &str, secret: &str, endpoint: &str) -> Result<Credential, ApiError> {
        if id.trim().is_empty() || secret.is_empty() {
            return Err(ApiError::InvalidInput("id and secret are required".to_string()));
        }
        let endpoint = normalize_endpoint(endpoint)?;

        let body = serde_json::to_value(EnrollRequest { id, secret })
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        let request = OutgoingRequest {
            method: Method::POST,
            url: join_url(&endpoint, ENROLL_PATH),
            bearer: None,
            body: Some(body),
        };

        let response = self.dispatch(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_enroll_status(response.status, &response.body));
        }

        let issued: TokenResponse = response.json()?;
        self.credential_from(issued, endpoint)
    }

    /// Enroll, persist the credential and mark the session active.
    pub async fn login(&self, id: &str, secret: &str, endpoint: &str) -> Result<Credential, ApiError> {
        // A login before any restore settles the startup state too
        let _pending = self.inner.state.begin_startup();

        let credential = match self.enroll(id, secret, endpoint).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.inner.state.record_error(e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = self.inner.store.save(&credential) {
            error!(error = %e, "Failed to save credential");
            let err = ApiError::Storage(e);
            self.inner.state.record_error(err.to_string());
            return Err(err);
        }

        // A login over an existing session starts a new generation so that
        // results issued under the old one are discarded.
        if self.inner.state.is_active() {
            self.inner.state.deactivate(None);
        }
        self.inner.state.activate();
        info!(endpoint = %credential.endpoint, expires_at = ?credential.expires_at, "Login successful");
        Ok(credential)
    }

    /// Clear the stored credential and deactivate the session.
    pub fn logout(&self) -> Result<(), ApiError> {
        self.inner.state.deactivate(None);
        self.inner.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Rebuild the session state from the store at startup. Settles the
    /// initial pending state either way.
    pub async fn restore(&self) -> bool {
        let _startup = self.inner.state.begin_startup();

        match self.inner.store.load() {
            Some(credential) => {
                info!(endpoint = %credential.endpoint, "Verifying stored credential");
                self.verify_credential(credential).await
            }
            None => {
                debug!("No stored credential");
                false
            }
        }
    }

    /// Confirm the current token is still accepted by the service.
    pub async fn verify(&self) -> bool {
        let _pending = self.inner.state.begin();

        match self.inner.store.load() {
            Some(credential) => self.verify_credential(credential).await,
            None => {
                self.inner.state.deactivate(None);
                false
            }
        }
    }

    async fn verify_credential(&self, credential: Credential) -> bool {
        match self.call(Method::GET, IDENTITIES_PATH, None).await {
            Ok(_) => {
                self.inner.state.activate();
                true
            }
            Err(e) if e.is_session_ended() => {
                info!(error = %e, "Stored credential no longer accepted");
                false
            }
            Err(e) if e.is_transient() => {
                // The service was unreachable, not dismissive: keep the
                // credential for the next attempt.
                warn!(error = %e, "Could not verify stored credential");
                self.inner.state.record_error(e.to_string());
                false
            }
            Err(e) => {
                warn!(error = %e, "Stored credential rejected");
                // The call may have renewed the token before failing
                let rejected = self.inner.store.load().unwrap_or(credential);
                self.tear_down(&rejected, &format!("verification failed: {}", e));
                false
            }
        }
    }

    // ===== Authenticated calls =====

    /// Issue an authenticated request against the session's endpoint,
    /// renewing and retrying once if the token is about to expire or rejected.
    pub async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
        let request = ApiRequest::new(method, path, body);
        with_auth_retry(self, &request).await
    }

    /// Renew the current token.
    pub async fn renew(&self) -> Result<Credential, ApiError> {
        let current = self.inner.store.load().ok_or(ApiError::NoSession)?;
        self.renew_from(&current).await
    }

    /// Renew `stale`, joining a renewal that is already in flight.
    async fn renew_from(&self, stale: &Credential) -> Result<Credential, ApiError> {
        let future = {
            let mut slot = self.inner.renewal.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(renewal = in_flight.id, "Joining in-flight renewal");
                    in_flight.future.clone()
                }
                None => {
                    let current = self.inner.store.load().ok_or(ApiError::NoSession)?;
                    if current.token != stale.token {
                        debug!("Token already superseded, skipping renewal");
                        return Ok(current);
                    }

                    let id = self.inner.next_renewal_id.fetch_add(1, Ordering::SeqCst);
                    let future = self.renewal_task(id, current).boxed().shared();
                    *slot = Some(InFlightRenewal {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await.map_err(|e| match e.as_ref() {
            ApiError::NoSession => ApiError::NoSession,
            ApiError::SessionEnded(reason) => ApiError::SessionEnded(reason.clone()),
            other => ApiError::SessionEnded(other.to_string()),
        })
    }

    fn renewal_task(
        &self,
        id: u64,
        stale: Credential,
    ) -> impl Future<Output = Result<Credential, Arc<ApiError>>> + Send + 'static {
        let client = self.clone();
        async move {
            let outcome = client.reenroll(stale).await;

            let mut slot = client.inner.renewal.lock().await;
            if slot.as_ref().map(|r| r.id) == Some(id) {
                *slot = None;
            }
            drop(slot);

            outcome.map_err(Arc::new)
        }
    }

    async fn reenroll(&self, stale: Credential) -> Result<Credential, ApiError> {
        let _pending = self.inner.state.begin();
        debug!(expires_at = ?stale.expires_at, "Renewing token");

        let request = OutgoingRequest {
            method: Method::POST,
            url: stale.url(RENEW_PATH),
            bearer: Some(stale.token.clone()),
            body: Some(serde_json::json!({})),
        };
        let result = match self.dispatch(request).await {
            Ok(response) if response.is_success() => response
                .json::<TokenResponse>()
                .and_then(|issued| self.credential_from(issued, stale.endpoint.clone())),
            Ok(response) => Err(ApiError::from_status(response.status, &response.body)),
            Err(e) => Err(e),
        };

        // A logout or a new login while we waited makes this outcome stale
        let still_current = self
            .inner
            .store
            .load()
            .map(|c| c.token == stale.token)
            .unwrap_or(false);
        if !still_current {
            info!("Session changed during renewal, discarding result");
            return Err(ApiError::SessionEnded("session changed during renewal".to_string()));
        }

        let renewed = result.and_then(|credential| {
            self.inner.store.save(&credential)?;
            Ok(credential)
        });

        match renewed {
            Ok(credential) => {
                info!(expires_at = ?credential.expires_at, "Token renewed");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "Renewal failed, ending session");
                let reason = format!("renewal failed: {}", e);
                self.tear_down(&stale, &reason);
                Err(ApiError::SessionEnded(reason))
            }
        }
    }

    /// Clear the session whose token was rejected. A newer session that
    /// superseded it is left alone.
    fn tear_down(&self, rejected: &Credential, reason: &str) {
        if let Some(current) = self.inner.store.load() {
            if current.token != rejected.token {
                debug!("Rejected token already superseded, keeping current session");
                return;
            }
        }
        if let Err(e) = self.inner.store.clear() {
            error!(error = %e, "Failed to clear credential store");
        }
        self.inner.state.deactivate(Some(reason.to_string()));
        warn!(reason, "Session torn down");
    }

    // ===== Helpers =====

    async fn dispatch(&self, request: OutgoingRequest) -> Result<ApiResponse, ApiError> {
        let timeout = self.inner.settings.request_timeout;
        let url = request.url.clone();
        match tokio::time::timeout(timeout, self.inner.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url = %url, ?timeout, "Request timed out");
                Err(ApiError::Timeout(timeout))
            }
        }
    }

    fn credential_from(&self, issued: TokenResponse, endpoint: String) -> Result<Credential, ApiError> {
        if issued.token.trim().is_empty() {
            return Err(ApiError::InvalidResponse("Service returned an empty token".to_string()));
        }
        let issued_at = Utc::now();
        let expires_at = issued
            .expiry(issued_at)
            .or_else(|| {
                self.inner
                    .settings
                    .token_ttl
                    .and_then(|ttl| issued_at.checked_add_signed(ttl))
            });
        Ok(Credential {
            token: issued.token,
            endpoint,
            issued_at,
            expires_at,
        })
    }
}

impl<T: Transport> AuthSession for SessionClient<T> {
    fn credential(&self) -> Option<Credential> {
        self.inner.store.load()
    }

    fn renewal_window(&self) -> Duration {
        self.inner.settings.renewal_window
    }

    fn renew(&self, stale: &Credential) -> impl Future<Output = Result<Credential, ApiError>> + Send {
        self.renew_from(stale)
    }

    fn send(
        &self,
        credential: &Credential,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send {
        let outgoing = OutgoingRequest {
            method: request.method.clone(),
            url: credential.url(&request.path),
            bearer: Some(credential.token.clone()),
            body: request.body.clone(),
        };
        self.dispatch(outgoing)
    }

    fn tear_down(&self, rejected: &Credential, reason: &str) {
        SessionClient::tear_down(self, rejected, reason)
    }
}

/// Validate an endpoint URL and drop any trailing slash.
fn normalize_endpoint(endpoint: &str) -> Result<String, ApiError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let has_host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .map(|rest| !rest.is_empty())
        .unwrap_or(false);
    if !has_host {
        return Err(ApiError::InvalidInput(format!(
            "endpoint must be an http(s) URL, got '{}'",
            endpoint
        )));
    }
    Ok(trimmed.to_string())
}
