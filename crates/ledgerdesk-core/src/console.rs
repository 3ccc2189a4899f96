//! The console ties one session client, one route guard and one result
//! history together for a presentation layer.
//!
//! Results are recorded only while the session that issued them is still
//! current. A call that completes after a logout or a fresh login is
//! discarded.

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiError, CallKind, ChaincodeCall, HttpTransport, IdentityInfo, SessionClient, Transport};
use crate::auth::{GuardDecision, RouteGuard, SessionState, SessionStatus};
use crate::config::Config;
use crate::history::{EntryKind, History, HistoryEntry, Outcome, Page};

pub struct Console<T = HttpTransport> {
    client: SessionClient<T>,
    guard: RouteGuard,
    history: Mutex<History>,
}

impl Console<HttpTransport> {
    /// Build the production console: configured store, HTTP transport and
    /// the history kept in the data directory.
    pub fn from_config(config: &Config, guard: RouteGuard) -> anyhow::Result<Self> {
        let store = config.build_store()?;
        let client = SessionClient::new(store, config.client_settings())?;
        let history = History::open(&config.data_dir()?, config.history_limit)?;
        Ok(Self::new(client, guard, history))
    }
}

impl<T: Transport> Console<T> {
    pub fn new(client: SessionClient<T>, guard: RouteGuard, history: History) -> Self {
        Self {
            client,
            guard,
            history: Mutex::new(history),
        }
    }

    pub fn client(&self) -> &SessionClient<T> {
        &self.client
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn state(&self) -> &SessionState {
        self.client.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.client.state().snapshot()
    }

    /// Startup: verify whatever credential survived the last run.
    pub async fn start(&self) -> bool {
        self.client.restore().await
    }

    /// Ask the guard about `destination`, waiting out any verification.
    pub async fn navigate(&self, destination: &str) -> GuardDecision {
        self.guard.resolve(destination, self.client.state()).await
    }

    /// Log in and return where to go next.
    pub async fn login(&self, id: &str, secret: &str, endpoint: &str) -> Result<String, ApiError> {
        self.client.login(id, secret, endpoint).await?;
        Ok(self.guard.after_login())
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.client.logout()
    }

    pub async fn whoami(&self) -> Result<IdentityInfo, ApiError> {
        let generation = self.client.state().generation();
        let result = self.client.identities().await;

        let outcome = match &result {
            Ok(info) => Outcome::Success(serde_json::to_value(info).unwrap_or(Value::Null)),
            Err(e) => Outcome::Failure(e.to_string()),
        };
        self.settle(generation, HistoryEntry::new(EntryKind::Identities, outcome), result)
            .await
    }

    pub async fn discover(&self, channel: &str) -> Result<Value, ApiError> {
        let generation = self.client.state().generation();
        let result = self.client.discover(channel).await;

        let entry = HistoryEntry::new(EntryKind::Discover, outcome_of(&result)).on_channel(channel);
        self.settle(generation, entry, result).await
    }

    /// Run an invoke or query and record its outcome.
    pub async fn submit(
        &self,
        kind: CallKind,
        channel: &str,
        chaincode: &str,
        call: ChaincodeCall,
    ) -> Result<Value, ApiError> {
        let generation = self.client.state().generation();
        let result = self.client.execute(kind, channel, chaincode, &call).await;

        let entry = HistoryEntry::new(kind.into(), outcome_of(&result))
            .on_channel(channel)
            .on_chaincode(chaincode, call.method, call.args);
        self.settle(generation, entry, result).await
    }

    pub async fn history_page(&self, number: usize) -> Page {
        self.history.lock().await.page(number)
    }

    pub async fn clear_history(&self) -> anyhow::Result<()> {
        self.history.lock().await.clear()
    }

    /// Record `entry` and hand back `result`, unless the session that issued
    /// the call has since ended.
    async fn settle<R>(&self, generation: u64, entry: HistoryEntry, result: Result<R, ApiError>) -> Result<R, ApiError> {
        if !self.client.state().is_current(generation) {
            info!(kind = entry.kind.as_str(), "Discarding result from an ended session");
            return Err(ApiError::SessionEnded(
                "session changed while the request was in flight".to_string(),
            ));
        }

        // Nothing was attempted
        let skip = matches!(result, Err(ApiError::NoSession) | Err(ApiError::InvalidInput(_)));
        if !skip {
            let mut history = self.history.lock().await;
            match history.record(entry) {
                Ok(id) => debug!(id, "Recorded result"),
                Err(e) => warn!(error = %e, "Failed to record result"),
            }
        }
        result
    }
}

fn outcome_of(result: &Result<Value, ApiError>) -> Outcome {
    match result {
        Ok(value) => Outcome::Success(value.clone()),
        Err(e) => Outcome::Failure(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::client::tests::{client_with, seed, FakeTransport, ENDPOINT};
    use crate::api::client::{ENROLL_PATH, IDENTITIES_PATH};

    fn console_with(transport: FakeTransport) -> Console<FakeTransport> {
        Console::new(client_with(transport), RouteGuard::new(), History::in_memory(10))
    }

    #[tokio::test]
    async fn test_guarded_navigation_then_login_returns_to_destination() {
        let transport = FakeTransport::new();
        transport.reply(ENROLL_PATH, 200, r#"{"token":"t"}"#);
        let console = console_with(transport);

        assert!(!console.start().await);
        assert_eq!(
            console.navigate("/query").await,
            GuardDecision::Redirect {
                to: "/login".to_string(),
                next: "/query".to_string()
            }
        );

        let next = console.login("admin", "adminpw", ENDPOINT).await.expect("login");
        assert_eq!(next, "/query");
        assert_eq!(
            console.navigate("/query").await,
            GuardDecision::Render {
                destination: "/query".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_records_history() {
        let transport = FakeTransport::new();
        transport.reply("/query/mychannel/basic", 200, r#"{"response":{"ID":"asset1"}}"#);
        transport.reply("/invoke/mychannel/basic", 500, "endorsement failure");
        let console = console_with(transport);
        seed(console.client(), "t", None);
        assert!(console.start().await);

        let call = ChaincodeCall::new("ReadAsset", vec!["asset1".to_string()]);
        console
            .submit(CallKind::Query, "mychannel", "basic", call)
            .await
            .expect("query");
        let call = ChaincodeCall::new("CreateAsset", vec!["asset2".to_string()]);
        assert!(console
            .submit(CallKind::Invoke, "mychannel", "basic", call)
            .await
            .is_err());

        let page = console.history_page(1).await;
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].kind, EntryKind::Invoke);
        assert!(!page.entries[0].outcome.is_success());
        assert_eq!(page.entries[1].summary(), "query mychannel/basic ReadAsset(asset1)");
        assert_eq!(
            page.entries[1].outcome,
            Outcome::Success(serde_json::json!({"ID": "asset1"}))
        );
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_recorded() {
        let console = console_with(FakeTransport::new());
        seed(console.client(), "t", None);
        console.state().activate();

        let err = console.discover("a/b").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(console.history_page(1).await.entries.is_empty());
        assert!(console.client().transport().requests().is_empty());
    }

    #[tokio::test]
    async fn test_result_after_logout_is_discarded() {
        let console = Arc::new(console_with(FakeTransport::new().with_call_delay(20)));
        seed(console.client(), "t", None);
        console.state().activate();

        let pending = {
            let console = Arc::clone(&console);
            tokio::spawn(async move { console.discover("mychannel").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        console.logout().expect("logout");

        let result = pending.await.expect("join");
        assert!(result.unwrap_err().is_session_ended());
        assert!(console.history_page(1).await.entries.is_empty());
    }

    #[tokio::test]
    async fn test_whoami_records_identity_lookup() {
        let transport = FakeTransport::new();
        transport.reply(
            IDENTITIES_PATH,
            200,
            r#"{"response":{"identities":[{"id":"admin"}],"caname":"ca-org1"}}"#,
        );
        let console = console_with(transport);
        seed(console.client(), "t", None);
        console.state().activate();

        let info = console.whoami().await.expect("whoami");
        assert_eq!(info.caname, "ca-org1");
        let page = console.history_page(1).await;
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].kind, EntryKind::Identities);
        assert!(page.entries[0].outcome.is_success());
    }
}
