//! Request and response shapes of the CA and chaincode endpoints.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct EnrollRequest<'a> {
    pub id: &'a str,
    pub secret: &'a str,
}

/// Body of a successful enroll or reenroll.
///
/// Only `token` is guaranteed; some deployments also report when it expires.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(default, rename = "expiresAt", alias = "expires_at")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "expiresIn", alias = "expires_in")]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Expiry reported by the service, relative to `issued_at` when given as
    /// a lifetime. A lifetime too large to represent is treated as untracked.
    pub fn expiry(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| {
            self.expires_in
                .filter(|secs| *secs > 0)
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        })
    }
}

/// The `{response: ...}` wrapper most endpoints answer with.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub response: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub caname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub affiliation: String,
    #[serde(default)]
    pub attrs: Vec<IdentityAttribute>,
    #[serde(default)]
    pub max_enrollments: i64,
}

impl Identity {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAttribute {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub ecert: bool,
}

/// Whether a chaincode call commits a transaction or only evaluates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Invoke,
    Query,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Invoke => "invoke",
            CallKind::Query => "query",
        }
    }
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chaincode function and its string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeCall {
    pub method: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ChaincodeCall {
    pub fn new(method: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Pull the `response` field out of a chaincode reply, keeping the whole
/// body when a service omits the wrapper.
pub(crate) fn unwrap_response(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("response") => {
            map.remove("response").unwrap_or(Value::Null)
        }
        other => other,
    }
}
