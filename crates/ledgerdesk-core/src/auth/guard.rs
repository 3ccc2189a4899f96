//! Navigation gating on session validity.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::session::{SessionState, SessionStatus};

pub const LOGIN_ROUTE: &str = "/login";
pub const DEFAULT_ROUTE: &str = "/dashboard";

/// What the presentation layer should show for a requested destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GuardDecision {
    Render { destination: String },
    /// Startup verification or a login is still in flight
    Loading,
    Redirect { to: String, next: String },
}

pub struct RouteGuard {
    login_route: String,
    default_route: String,
    public_routes: Vec<String>,
    /// Destination to land on after the next successful login
    remembered: Mutex<Option<String>>,
}

impl RouteGuard {
    pub fn new() -> Self {
        Self::with_routes(LOGIN_ROUTE, DEFAULT_ROUTE)
    }

    pub fn with_routes(login_route: impl Into<String>, default_route: impl Into<String>) -> Self {
        let login_route = login_route.into();
        Self {
            public_routes: vec![login_route.clone()],
            login_route,
            default_route: default_route.into(),
            remembered: Mutex::new(None),
        }
    }

    /// Mark an additional destination as reachable without a session.
    pub fn allow_public(mut self, route: impl Into<String>) -> Self {
        self.public_routes.push(route.into());
        self
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn default_route(&self) -> &str {
        &self.default_route
    }

    fn normalize<'a>(&'a self, destination: &'a str) -> &'a str {
        if destination.is_empty() || destination == "/" {
            &self.default_route
        } else {
            destination
        }
    }

    fn is_public(&self, destination: &str) -> bool {
        self.public_routes.iter().any(|r| r == destination)
    }

    /// Decide from a status snapshot. Never admits a protected destination
    /// unless the session is active.
    pub fn decide(&self, destination: &str, status: &SessionStatus) -> GuardDecision {
        let destination = self.normalize(destination);

        if self.is_public(destination) || status.active {
            return GuardDecision::Render {
                destination: destination.to_string(),
            };
        }
        if status.pending {
            return GuardDecision::Loading;
        }

        self.remember(destination);
        debug!(destination, "Redirecting to login");
        GuardDecision::Redirect {
            to: self.login_route.clone(),
            next: destination.to_string(),
        }
    }

    /// Wait for any in-flight verification to settle, then decide.
    /// Never returns `Loading`.
    pub async fn resolve(&self, destination: &str, state: &SessionState) -> GuardDecision {
        let status = state.settled().await;
        self.decide(destination, &status)
    }

    /// Where to go after a successful login: the destination that triggered
    /// the redirect, once, otherwise the default.
    pub fn after_login(&self) -> String {
        self.take_remembered()
            .unwrap_or_else(|| self.default_route.clone())
    }

    pub fn remembered(&self) -> Option<String> {
        self.remembered.lock().ok().and_then(|r| r.clone())
    }

    fn remember(&self, destination: &str) {
        if let Ok(mut slot) = self.remembered.lock() {
            *slot = Some(destination.to_string());
        }
    }

    fn take_remembered(&self) -> Option<String> {
        self.remembered.lock().ok().and_then(|mut r| r.take())
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled_state(active: bool) -> SessionState {
        let state = SessionState::new();
        drop(state.begin_startup());
        if active {
            state.activate();
        }
        state
    }

    #[test]
    fn test_idle_redirects_and_remembers() {
        let guard = RouteGuard::new();
        let state = settled_state(false);

        let decision = guard.decide("/dashboard/discovery", &state.snapshot());
        assert_eq!(
            decision,
            GuardDecision::Redirect {
                to: "/login".to_string(),
                next: "/dashboard/discovery".to_string(),
            }
        );
        assert_eq!(guard.remembered().as_deref(), Some("/dashboard/discovery"));
    }

    #[test]
    fn test_pending_shows_loading() {
        let guard = RouteGuard::new();
        let state = SessionState::new();
        assert_eq!(guard.decide("/dashboard", &state.snapshot()), GuardDecision::Loading);
        assert!(guard.remembered().is_none());
    }

    #[test]
    fn test_active_renders() {
        let guard = RouteGuard::new();
        let state = settled_state(true);
        assert_eq!(
            guard.decide("/dashboard/details", &state.snapshot()),
            GuardDecision::Render {
                destination: "/dashboard/details".to_string()
            }
        );
    }

    #[test]
    fn test_login_route_is_public() {
        let guard = RouteGuard::new();
        let state = settled_state(false);
        assert!(matches!(
            guard.decide("/login", &state.snapshot()),
            GuardDecision::Render { .. }
        ));
    }

    #[test]
    fn test_root_maps_to_default_route() {
        let guard = RouteGuard::new();
        let state = settled_state(false);
        assert_eq!(
            guard.decide("/", &state.snapshot()),
            GuardDecision::Redirect {
                to: "/login".to_string(),
                next: "/dashboard".to_string(),
            }
        );
    }

    #[test]
    fn test_after_login_returns_remembered_once() {
        let guard = RouteGuard::new();
        let state = settled_state(false);
        guard.decide("/history", &state.snapshot());

        assert_eq!(guard.after_login(), "/history");
        assert_eq!(guard.after_login(), "/dashboard");
    }

    #[test]
    fn test_custom_public_route() {
        let guard = RouteGuard::with_routes("login", "status").allow_public("help");
        let state = settled_state(false);
        assert!(matches!(
            guard.decide("help", &state.snapshot()),
            GuardDecision::Render { .. }
        ));
        assert!(matches!(
            guard.decide("whoami", &state.snapshot()),
            GuardDecision::Redirect { .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_waits_for_startup() {
        let guard = RouteGuard::new();
        let state = SessionState::new();
        let startup = state.begin_startup();

        let pending = {
            let state = state.clone();
            tokio::spawn(async move {
                let guard = RouteGuard::new();
                guard.resolve("/dashboard", &state).await
            })
        };
        tokio::task::yield_now().await;
        drop(startup);

        let decision = pending.await.expect("join");
        assert!(matches!(decision, GuardDecision::Redirect { .. }));
        // Resolving after settling never yields Loading
        assert_ne!(guard.resolve("/dashboard", &state).await, GuardDecision::Loading);
    }
}
