//! Typed calls against the ledger endpoints.
//!
//! Every method here goes through [`SessionClient::call`], so renewal and the
//! single 401 retry apply uniformly.

use serde_json::Value;
use tracing::debug;

use super::client::{SessionClient, IDENTITIES_PATH};
use super::models::{unwrap_response, CallKind, ChaincodeCall, Envelope, IdentityInfo};
use super::transport::{Method, Transport};
use super::ApiError;

impl<T: Transport> SessionClient<T> {
    /// Identities registered with the CA, as seen by the current token.
    pub async fn identities(&self) -> Result<IdentityInfo, ApiError> {
        let response = self.call(Method::GET, IDENTITIES_PATH, None).await?;
        let parsed: Envelope<IdentityInfo> = response.json()?;
        Ok(parsed.response)
    }

    /// Peers, orderers and chaincodes known on `channel`.
    pub async fn discover(&self, channel: &str) -> Result<Value, ApiError> {
        let channel = validate_segment("channel", channel)?;
        let path = format!("/discover/{}", channel);
        debug!(channel, "Discovering channel");

        let response = self.call(Method::POST, &path, None).await?;
        Ok(unwrap_response(response.value()?))
    }

    /// Submit a transaction that updates the ledger.
    pub async fn invoke(&self, channel: &str, chaincode: &str, call: &ChaincodeCall) -> Result<Value, ApiError> {
        self.execute(CallKind::Invoke, channel, chaincode, call).await
    }

    /// Evaluate a chaincode function without committing anything.
    pub async fn query(&self, channel: &str, chaincode: &str, call: &ChaincodeCall) -> Result<Value, ApiError> {
        self.execute(CallKind::Query, channel, chaincode, call).await
    }

    pub async fn execute(
        &self,
        kind: CallKind,
        channel: &str,
        chaincode: &str,
        call: &ChaincodeCall,
    ) -> Result<Value, ApiError> {
        let channel = validate_segment("channel", channel)?;
        let chaincode = validate_segment("chaincode", chaincode)?;
        if call.method.trim().is_empty() {
            return Err(ApiError::InvalidInput("method is required".to_string()));
        }

        let path = format!("/{}/{}/{}", kind, channel, chaincode);
        let body = serde_json::to_value(call).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        debug!(%kind, channel, chaincode, method = %call.method, "Calling chaincode");

        let response = self.call(Method::POST, &path, Some(body)).await?;
        Ok(unwrap_response(response.value()?))
    }
}

/// Channel and chaincode ids become path segments.
pub fn validate_segment<'a>(what: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::InvalidInput(format!("{} id is required", what)));
    }
    if value.contains(['/', '?', '#']) {
        return Err(ApiError::InvalidInput(format!(
            "{} id '{}' may not contain '/', '?' or '#'",
            what, value
        )));
    }
    Ok(value)
}
