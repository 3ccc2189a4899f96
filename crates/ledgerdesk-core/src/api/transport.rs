//! HTTP transport seam.
//!
//! The session client never talks to `reqwest` directly; it hands fully
//! built requests to a [`Transport`]. Production code uses [`HttpTransport`],
//! tests substitute in-memory fakes.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

pub use reqwest::Method;

/// An authenticated call as issued by a screen: relative to the session's
/// endpoint, without credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None)
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self::new(Method::POST, path, body)
    }
}

/// A request ready for the wire.
#[derive(Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("body", &self.body)
            .finish()
    }
}

/// Status and raw body of a completed exchange. Non-success statuses are
/// not errors at this layer; the session client interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The service rejected the bearer credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Parse the body as arbitrary JSON; an empty body is `null`.
    pub fn value(&self) -> Result<Value, ApiError> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        self.json()
    }
}

pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: OutgoingRequest,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;
}

/// `reqwest`-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: OutgoingRequest,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send {
        let client = self.client.clone();
        let timeout = self.timeout;

        async move {
            let mut builder = client
                .request(request.method, &request.url)
                .header(header::ACCEPT, "application/json");
            if let Some(ref token) = request.bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| transport_error(e, timeout))?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| transport_error(e, timeout))?;
            Ok(ApiResponse { status, body })
        }
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(timeout)
    } else {
        ApiError::from(err)
    }
}
