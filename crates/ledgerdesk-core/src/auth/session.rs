use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Snapshot of the session as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub active: bool,
    /// True while a login, verification or renewal is in flight
    pub pending: bool,
    pub last_error: Option<String>,
    /// Bumped whenever a session starts or ends. Results that were issued
    /// under an older generation must be discarded.
    pub generation: u64,
    #[serde(skip)]
    #[cfg_attr(feature = "ts", ts(skip))]
    in_flight: u32,
}

impl SessionStatus {
    fn starting() -> Self {
        Self {
            active: false,
            pending: true,
            last_error: None,
            generation: 0,
            // Startup verification counts as in flight until it settles
            in_flight: 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.active && !self.pending
    }
}

struct Shared {
    tx: watch::Sender<SessionStatus>,
    startup_claimed: AtomicBool,
}

/// Process-wide projection of the credential store.
///
/// Starts out pending: nothing is active until a startup verification or a
/// login succeeds. Clone is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct SessionState {
    shared: Arc<Shared>,
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionStatus::starting());
        Self {
            shared: Arc::new(Shared {
                tx,
                startup_claimed: AtomicBool::new(false),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionStatus {
        self.shared.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.shared.tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.shared.tx.borrow().active
    }

    pub fn generation(&self) -> u64 {
        self.shared.tx.borrow().generation
    }

    /// Whether the session that existed at `generation` is still the active one.
    pub fn is_current(&self, generation: u64) -> bool {
        let status = self.shared.tx.borrow();
        status.active && status.generation == generation
    }

    /// Mark an operation in flight until the returned guard is dropped.
    pub fn begin(&self) -> PendingGuard {
        self.shared.tx.send_modify(|s| {
            s.in_flight += 1;
            s.pending = true;
        });
        PendingGuard {
            state: self.clone(),
        }
    }

    /// Take over the startup pending mark. The first caller inherits the
    /// in-flight slot the state was created with; later callers get a
    /// fresh one.
    pub fn begin_startup(&self) -> PendingGuard {
        if self.shared.startup_claimed.swap(true, Ordering::SeqCst) {
            return self.begin();
        }
        PendingGuard {
            state: self.clone(),
        }
    }

    /// A session was established (login or successful verification).
    pub fn activate(&self) {
        self.shared.tx.send_modify(|s| {
            if !s.active {
                s.generation += 1;
            }
            s.active = true;
            s.last_error = None;
        });
        info!("Session active");
    }

    /// Tear the projection down. `reason` is surfaced to the UI.
    pub fn deactivate(&self, reason: Option<String>) {
        self.shared.tx.send_modify(|s| {
            if s.active {
                s.generation += 1;
            }
            s.active = false;
            s.last_error = reason;
        });
        info!("Session inactive");
    }

    /// Record a failure that did not change whether a session is active.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.shared.tx.send_modify(|s| s.last_error = Some(message));
    }

    pub fn clear_error(&self) {
        self.shared.tx.send_if_modified(|s| s.last_error.take().is_some());
    }

    /// Wait until nothing is pending and return the settled status.
    pub async fn settled(&self) -> SessionStatus {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        // Clone out before `rx` drops; the borrow must not outlive it.
        let status = match rx.wait_for(|s| !s.pending).await {
            Ok(status) => status.clone(),
            Err(_) => self.snapshot(),
        };
        status
    }

    fn finish(&self) {
        self.shared.tx.send_modify(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            s.pending = s.in_flight > 0;
        });
        debug!("Session operation settled");
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the session pending for as long as it is alive.
#[must_use = "the session stops being pending when the guard is dropped"]
pub struct PendingGuard {
    state: SessionState,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.state.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_pending_and_inactive() {
        let state = SessionState::new();
        let status = state.snapshot();
        assert!(status.pending);
        assert!(!status.active);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_startup_guard_settles_initial_pending() {
        let state = SessionState::new();
        {
            let _guard = state.begin_startup();
            assert!(state.snapshot().pending);
        }
        assert!(!state.snapshot().pending);
        assert!(state.snapshot().is_idle());
    }

    #[test]
    fn test_second_startup_claim_gets_fresh_slot() {
        let state = SessionState::new();
        drop(state.begin_startup());
        let guard = state.begin_startup();
        assert!(state.snapshot().pending);
        drop(guard);
        assert!(!state.snapshot().pending);
    }

    #[test]
    fn test_overlapping_operations_keep_pending() {
        let state = SessionState::new();
        drop(state.begin_startup());

        let first = state.begin();
        let second = state.begin();
        drop(first);
        assert!(state.snapshot().pending);
        drop(second);
        assert!(!state.snapshot().pending);
    }

    #[test]
    fn test_activate_and_deactivate_bump_generation() {
        let state = SessionState::new();
        let start = state.generation();

        state.activate();
        let active_gen = state.generation();
        assert_eq!(active_gen, start + 1);
        assert!(state.is_current(active_gen));

        // Re-activating an active session does not start a new generation
        state.activate();
        assert_eq!(state.generation(), active_gen);

        state.deactivate(Some("revoked".to_string()));
        assert!(!state.is_active());
        assert!(!state.is_current(active_gen));
        assert_eq!(state.snapshot().last_error.as_deref(), Some("revoked"));
    }

    #[test]
    fn test_record_error_keeps_active() {
        let state = SessionState::new();
        state.activate();
        state.record_error("relogin failed");
        assert!(state.is_active());
        state.clear_error();
        assert!(state.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn test_settled_waits_for_pending_to_clear() {
        let state = SessionState::new();
        let guard = state.begin_startup();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.settled().await })
        };
        tokio::task::yield_now().await;
        state.activate();
        drop(guard);

        let status = waiter.await.expect("join");
        assert!(status.active);
        assert!(!status.pending);
    }
}
