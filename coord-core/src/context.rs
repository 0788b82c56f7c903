//! `ActionContext` (spec.md §3/§4.5): process-wide state shared between
//! action execution and the RPC surface -- pause gates for API servers and
//! controllers, plus the "ongoing read" interlock `PauseController` uses
//! when `avoidOngoingRead` is set.
//!
//! Pause scope semantics: a caller is blocked at `(owner, scope)` iff
//! `locked[owner][scope]` or `locked[owner]["all"]` is true. We model each
//! `(owner, scope)` pair as a `tokio::sync::watch<bool>` gate: `wait_until_open`
//! re-checks both the narrow and the `"all"` gate in a loop, so a resume of
//! one without the other (scenario S6) correctly leaves the caller blocked.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// The scope token meaning "every resource", per spec.md §4.5.
pub const ALL_SCOPE: &str = "all";

#[derive(Default)]
struct Gates {
    senders: HashMap<(String, String), watch::Sender<bool>>,
}

impl Gates {
    fn sender(&mut self, owner: &str, scope: &str) -> watch::Sender<bool> {
        self.senders
            .entry((owner.to_string(), scope.to_string()))
            .or_insert_with(|| watch::channel(false).0)
            .clone()
    }

    fn receiver(&mut self, owner: &str, scope: &str) -> watch::Receiver<bool> {
        self.sender(owner, scope).subscribe()
    }

    fn set(&mut self, owner: &str, scope: &str, locked: bool) {
        let _ = self.sender(owner, scope).send(locked);
    }

    fn is_locked(&mut self, owner: &str, scope: &str) -> bool {
        *self.receiver(owner, scope).borrow()
    }
}

/// Process-wide pause/resume and async-completion state, shared between every
/// action execution and every RPC handler.
pub struct ActionContext {
    /// Namespace the coordinated controller(s) run in.
    pub namespace: String,
    /// Hostname of the API server instrumented requests are currently routed to.
    pub leading_api_server: String,
    /// Hostname of the standby API server `RedirectController`-style actions reconnect to.
    pub following_api_server: String,
    apiserver_gates: Mutex<Gates>,
    controller_gates: Mutex<Gates>,
    controller_ongoing_read: tokio::sync::RwLock<()>,
    async_done_tx: mpsc::Sender<()>,
}

impl ActionContext {
    pub fn new(
        namespace: impl Into<String>,
        leading_api_server: impl Into<String>,
        following_api_server: impl Into<String>,
        async_done_tx: mpsc::Sender<()>,
    ) -> Self {
        ActionContext {
            namespace: namespace.into(),
            leading_api_server: leading_api_server.into(),
            following_api_server: following_api_server.into(),
            apiserver_gates: Mutex::new(Gates::default()),
            controller_gates: Mutex::new(Gates::default()),
            controller_ongoing_read: tokio::sync::RwLock::new(()),
            async_done_tx,
        }
    }

    /// Locks `(host, scope)`: any caller waiting on that scope, or on `"all"`,
    /// blocks until a matching resume.
    pub fn pause_api_server(&self, host: &str, scope: &str) {
        self.apiserver_gates.lock().set(host, scope, true);
    }

    /// Unlocks `(host, scope)`. A caller blocked on a different still-locked
    /// scope (including `"all"`) stays blocked.
    pub fn resume_api_server(&self, host: &str, scope: &str) {
        self.apiserver_gates.lock().set(host, scope, false);
    }

    /// Same as [`pause_api_server`](Self::pause_api_server) for the
    /// controller-side pause points.
    pub fn pause_controller(&self, pause_at: &str, scope: &str) {
        self.controller_gates.lock().set(pause_at, scope, true);
    }

    /// Same as [`resume_api_server`](Self::resume_api_server) for the
    /// controller-side pause points.
    pub fn resume_controller(&self, pause_at: &str, scope: &str) {
        self.controller_gates.lock().set(pause_at, scope, false);
    }

    /// Blocks the caller until neither `(owner, scope)` nor `(owner, "all")`
    /// is locked (property P6). Used identically for API-server and
    /// controller pause-points by passing the right gate map and owner key.
    async fn wait_until_open(gates: &Mutex<Gates>, owner: &str, scope: &str) {
        loop {
            let (mut scope_rx, mut all_rx) = {
                let mut guard = gates.lock();
                (guard.receiver(owner, scope), guard.receiver(owner, ALL_SCOPE))
            };
            let scope_locked = *scope_rx.borrow();
            let all_locked = *all_rx.borrow();
            if !scope_locked && !all_locked {
                return;
            }
            tokio::select! {
                _ = scope_rx.changed() => {}
                _ = all_rx.changed() => {}
            }
        }
    }

    /// Blocks the caller while `(host, scope)` or `(host, "all")` is locked.
    pub async fn wait_if_api_server_locked(&self, host: &str, scope: &str) {
        Self::wait_until_open(&self.apiserver_gates, host, scope).await;
    }

    /// Controller-side counterpart of
    /// [`wait_if_api_server_locked`](Self::wait_if_api_server_locked).
    pub async fn wait_if_controller_locked(&self, pause_at: &str, scope: &str) {
        Self::wait_until_open(&self.controller_gates, pause_at, scope).await;
    }

    /// `true` if `(host, scope)` or `(host, "all")` is currently paused.
    pub fn is_api_server_locked(&self, host: &str, scope: &str) -> bool {
        let mut guard = self.apiserver_gates.lock();
        guard.is_locked(host, scope) || guard.is_locked(host, ALL_SCOPE)
    }

    /// Controller-side counterpart of
    /// [`is_api_server_locked`](Self::is_api_server_locked).
    pub fn is_controller_locked(&self, pause_at: &str, scope: &str) -> bool {
        let mut guard = self.controller_gates.lock();
        guard.is_locked(pause_at, scope) || guard.is_locked(pause_at, ALL_SCOPE)
    }

    /// Held (briefly, read-only) around an in-flight controller read so that
    /// `PauseController{avoidOngoingRead: true}` can take the write side to
    /// guarantee no such read outlives the pause taking effect.
    pub async fn ongoing_read_guard(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.controller_ongoing_read.read().await
    }

    /// Waits for every guard returned by
    /// [`ongoing_read_guard`](Self::ongoing_read_guard) to drop, then
    /// returns. Gives `PauseController{avoidOngoingRead: true}` a point past
    /// which no controller read can still be in flight.
    pub async fn drain_ongoing_reads(&self) {
        let _ = self.controller_ongoing_read.write().await;
    }

    /// A clone of the channel an async action's background task sends on
    /// when it completes, waking the state machine's `AsyncDone` handling.
    pub fn async_done_sender(&self) -> mpsc::Sender<()> {
        self.async_done_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn p6_pause_containment_and_resume() {
        let (tx, _rx) = mpsc::channel(1);
        let ctx = ActionContext::new("default", "api-A", "api-B", tx);
        ctx.pause_api_server("api-A", "pods/default/x");
        assert!(ctx.is_api_server_locked("api-A", "pods/default/x"));

        let ctx2 = std::sync::Arc::new(ctx);
        let waiter_ctx = ctx2.clone();
        let waiter = tokio::spawn(async move {
            waiter_ctx.wait_if_api_server_locked("api-A", "pods/default/x").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        ctx2.resume_api_server("api-A", "pods/default/x");
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("resume must unblock the waiter within one tick")
            .unwrap();
    }

    #[tokio::test]
    async fn s6_scope_precedence_over_all() {
        let (tx, _rx) = mpsc::channel(1);
        let ctx = std::sync::Arc::new(ActionContext::new("default", "api-A", "api-B", tx));
        ctx.resume_api_server("api-A", "k1");
        ctx.pause_api_server("api-A", ALL_SCOPE);
        assert!(ctx.is_api_server_locked("api-A", "k1"));

        let waiter_ctx = ctx.clone();
        let waiter = tokio::spawn(async move {
            waiter_ctx.wait_if_api_server_locked("api-A", "k1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Resuming the narrow scope (already unlocked) must not release it.
        ctx.resume_api_server("api-A", "k1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ctx.resume_api_server("api-A", ALL_SCOPE);
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("resuming all must release the waiter")
            .unwrap();
    }
}
