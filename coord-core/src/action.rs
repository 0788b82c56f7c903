//! Action variants (C6): the effects a satisfied trigger DAG fires
//! (spec.md §4.5).
//!
//! Restart/reconnect delegate to [`OperatorControlPlane`], an external
//! collaborator (spec.md §1, §6) -- this crate only describes its contract;
//! `coord-server` supplies the real Kubernetes-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::{ActionContext, ALL_SCOPE};
use crate::error::OperatorError;

/// The orchestrator-facing contract `RestartController`/`ReconnectController`
/// run against: locate the operator's pod by label, find its owning
/// workload (a ReplicaSet's owning Deployment, or a StatefulSet directly),
/// delete and recreate it, optionally rewriting the API-server endpoint
/// environment variable, and wait for the new pod to reach `Running`.
#[async_trait]
pub trait OperatorControlPlane: Send + Sync {
    async fn restart(
        &self,
        namespace: &str,
        controller_label: &str,
        leading_api_server: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), OperatorError>;
}

#[derive(Clone, Debug)]
pub struct PauseApiServer {
    pub api_server_name: String,
    pub pause_scope: String,
}

#[derive(Clone, Debug)]
pub struct ResumeApiServer {
    pub api_server_name: String,
    pub pause_scope: String,
}

#[derive(Clone, Debug)]
pub struct PauseController {
    pub pause_scope: String,
    pub pause_at: String,
    pub avoid_ongoing_read: bool,
}

#[derive(Clone, Debug)]
pub struct ResumeController {
    pub pause_scope: String,
    pub pause_at: String,
}

#[derive(Clone, Debug)]
pub struct RestartController {
    pub controller_label: String,
}

#[derive(Clone, Debug)]
pub struct ReconnectController {
    pub controller_label: String,
    pub reconnect_api_server: String,
}

#[derive(Clone, Debug)]
pub enum ActionKind {
    PauseApiServer(PauseApiServer),
    ResumeApiServer(ResumeApiServer),
    PauseController(PauseController),
    ResumeController(ResumeController),
    RestartController(RestartController),
    ReconnectController(ReconnectController),
}

/// An action: its effect plus the shared `waitBefore`/`waitAfter` prologue
/// and epilogue (spec.md §4.5). `async_run` marks it as running on a
/// background task, completion reported via `AsyncDoneNotification`.
#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub is_async: bool,
    pub wait_before: Duration,
    pub wait_after: Duration,
}

impl Action {
    /// Runs the action's effect against shared coordinator state. Callers
    /// (the state machine, spec.md §4.6) are responsible for the sync/async
    /// dispatch decision; this only executes the prologue/effect/epilogue.
    pub async fn run(&self, ctx: &ActionContext, control_plane: &dyn OperatorControlPlane) {
        if !self.wait_before.is_zero() {
            tokio::time::sleep(self.wait_before).await;
        }
        self.run_effect(ctx, control_plane).await;
        if !self.wait_after.is_zero() {
            tokio::time::sleep(self.wait_after).await;
        }
    }

    async fn run_effect(&self, ctx: &ActionContext, control_plane: &dyn OperatorControlPlane) {
        match &self.kind {
            ActionKind::PauseApiServer(a) => {
                ctx.pause_api_server(&a.api_server_name, &a.pause_scope);
            }
            ActionKind::ResumeApiServer(a) => {
                ctx.resume_api_server(&a.api_server_name, &a.pause_scope);
            }
            ActionKind::PauseController(a) => {
                ctx.pause_controller(&a.pause_at, &a.pause_scope);
                if a.avoid_ongoing_read {
                    ctx.drain_ongoing_reads().await;
                }
            }
            ActionKind::ResumeController(a) => {
                ctx.resume_controller(&a.pause_at, &a.pause_scope);
            }
            ActionKind::RestartController(a) => {
                if let Err(err) = control_plane
                    .restart(&ctx.namespace, &a.controller_label, &ctx.leading_api_server, None)
                    .await
                {
                    warn!(action = %self.name, error = %err, "restart controller failed");
                }
            }
            ActionKind::ReconnectController(a) => {
                if let Err(err) = control_plane
                    .restart(
                        &ctx.namespace,
                        &a.controller_label,
                        &ctx.leading_api_server,
                        Some(&a.reconnect_api_server),
                    )
                    .await
                {
                    warn!(action = %self.name, error = %err, "reconnect controller failed");
                }
            }
        }
        info!(action = %self.name, "action fired");
    }
}

/// A control plane that performs no real orchestration, for use in tests and
/// dry-run coordinator instances (there is no Kubernetes cluster to point it
/// at). Always succeeds immediately.
#[derive(Default)]
pub struct NoopOperatorControlPlane;

#[async_trait]
impl OperatorControlPlane for NoopOperatorControlPlane {
    async fn restart(
        &self,
        _namespace: &str,
        _controller_label: &str,
        _leading_api_server: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), OperatorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn ctx() -> ActionContext {
        let (tx, _rx) = mpsc::channel(1);
        ActionContext::new("default", "api-A", "api-B", tx)
    }

    #[tokio::test]
    async fn pause_then_resume_api_server_round_trips() {
        let ctx = ctx();
        let cp = NoopOperatorControlPlane;
        let pause = Action {
            name: "pause".into(),
            kind: ActionKind::PauseApiServer(PauseApiServer {
                api_server_name: "api-A".into(),
                pause_scope: ALL_SCOPE.into(),
            }),
            is_async: false,
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
        };
        pause.run(&ctx, &cp).await;
        assert!(ctx.is_api_server_locked("api-A", ALL_SCOPE));

        let resume = Action {
            name: "resume".into(),
            kind: ActionKind::ResumeApiServer(ResumeApiServer {
                api_server_name: "api-A".into(),
                pause_scope: ALL_SCOPE.into(),
            }),
            is_async: false,
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
        };
        resume.run(&ctx, &cp).await;
        assert!(!ctx.is_api_server_locked("api-A", ALL_SCOPE));
    }

    #[tokio::test]
    async fn restart_failure_is_swallowed_as_transient() {
        struct AlwaysFails;
        #[async_trait]
        impl OperatorControlPlane for AlwaysFails {
            async fn restart(
                &self,
                _namespace: &str,
                _controller_label: &str,
                _leading_api_server: &str,
                _redirect_to: Option<&str>,
            ) -> Result<(), OperatorError> {
                Err(OperatorError::TimedOut)
            }
        }
        let ctx = ctx();
        let action = Action {
            name: "restart".into(),
            kind: ActionKind::RestartController(RestartController {
                controller_label: "my-operator".into(),
            }),
            is_async: true,
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
        };
        // Must return normally rather than panicking/propagating.
        action.run(&ctx, &AlwaysFails).await;
    }
}
