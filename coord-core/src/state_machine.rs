//! The state machine (C7): the single task that owns every action's trigger
//! DAG and dispatches actions as their roots become satisfied (spec.md
//! §4.6).
//!
//! Nothing outside this task ever mutates a [`TriggerGraph`] or a
//! [`TriggerDefinition`]'s occurrence counters -- the "single task owns the
//! DAGs" discipline in spec.md §5 is what makes `Cell`-based interior
//! mutability safe without further synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::action::{Action, OperatorControlPlane};
use crate::context::ActionContext;
use crate::graph::TriggerGraph;
use crate::notification::Notification;
use crate::trigger::TriggerDefinition;

/// One planned action: its effect, its trigger DAG, and the DAG's leaf
/// definitions. Lives for the whole run; `fired` latches once the action has
/// been dispatched (invariant I4: an action runs exactly once).
pub struct ActionSlot {
    pub action: Action,
    pub graph: TriggerGraph,
    pub definitions: HashMap<String, TriggerDefinition>,
    fired: std::cell::Cell<bool>,
}

impl ActionSlot {
    pub fn new(action: Action, graph: TriggerGraph, definitions: HashMap<String, TriggerDefinition>) -> Self {
        ActionSlot {
            action,
            graph,
            definitions,
            fired: std::cell::Cell::new(false),
        }
    }
}

/// Spawns one timer task per `TimeoutTrigger` across every slot, each of
/// which sleeps its configured duration and then pushes a
/// `TimeoutNotification` onto `state_tx` (spec.md §4.6).
pub fn spawn_timeout_triggers(slots: &[ActionSlot], state_tx: mpsc::Sender<Notification>) {
    for slot in slots {
        for def in slot.definitions.values() {
            if let TriggerDefinition::Timeout(t) = def {
                let condition_name = t.condition_name.clone();
                let timeout = t.timeout;
                let tx = state_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(Notification::Timeout { condition_name }).await;
                });
            }
        }
    }
}

pub struct StateMachine {
    slots: Vec<ActionSlot>,
    ctx: Arc<ActionContext>,
    control_plane: Arc<dyn OperatorControlPlane>,
    async_done_tx: mpsc::Sender<()>,
}

impl StateMachine {
    pub fn new(
        slots: Vec<ActionSlot>,
        ctx: Arc<ActionContext>,
        control_plane: Arc<dyn OperatorControlPlane>,
        async_done_tx: mpsc::Sender<()>,
    ) -> Self {
        StateMachine {
            slots,
            ctx,
            control_plane,
            async_done_tx,
        }
    }

    /// Runs the select loop until both channels close. `state_rx` carries
    /// caller notifications (FIFO per spec.md §5); `async_done_rx` carries
    /// completion signals from async actions, purely for observability here
    /// since the async task itself already ran the action to completion.
    pub async fn run(self, mut state_rx: mpsc::Receiver<Notification>, mut async_done_rx: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                maybe_notification = state_rx.recv() => {
                    match maybe_notification {
                        Some(notification) => self.handle_notification(notification).await,
                        None => break,
                    }
                }
                maybe_done = async_done_rx.recv() => {
                    if maybe_done.is_none() {
                        break;
                    }
                    debug!("async action completed");
                }
            }
        }
    }

    /// Fans `notification` out to every not-yet-fired action's DAG,
    /// dispatches any action whose root newly satisfies, then releases the
    /// caller. This ordering is the ordering guarantee of spec.md §4.6 step
    /// 3: the action that N triggers is complete (sync) or initiated
    /// (async) before N's blocking channel is released.
    async fn handle_notification(&self, notification: Notification) {
        let mut to_dispatch = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.fired.get() {
                continue;
            }
            if slot.graph.notify(&slot.definitions, &notification) {
                to_dispatch.push(i);
            }
        }
        for i in to_dispatch {
            self.dispatch(i).await;
        }
        if let Some(handle) = notification.into_blocking_handle() {
            handle.release();
        }
    }

    async fn dispatch(&self, i: usize) {
        let slot = &self.slots[i];
        slot.fired.set(true);
        info!(action = %slot.action.name, "action's trigger DAG satisfied");
        if slot.action.is_async {
            let action = slot.action.clone();
            let ctx = self.ctx.clone();
            let control_plane = self.control_plane.clone();
            let done_tx = self.async_done_tx.clone();
            tokio::spawn(async move {
                action.run(ctx.as_ref(), control_plane.as_ref()).await;
                let _ = done_tx.send(()).await;
            });
        } else {
            slot.action.run(self.ctx.as_ref(), self.control_plane.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, NoopOperatorControlPlane, PauseApiServer, RestartController};
    use crate::expr::parse_expression;
    use crate::notification::{BlockingHandle, ObjectEvent};
    use crate::resource::{ObservationPoint, ObservedWhen, ResourceKey};
    use crate::trigger::ObjectPresenceTrigger;
    use std::time::Duration;

    fn point() -> ObservationPoint {
        ObservationPoint::new(ObservedWhen::AfterApiServerRecv, "api-A")
    }

    fn ctx() -> Arc<ActionContext> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(ActionContext::new("default", "api-A", "api-B", tx))
    }

    fn one_shot_create_slot(name: &str, key: ResourceKey, action: Action) -> ActionSlot {
        let graph = TriggerGraph::build(&parse_expression(name).unwrap());
        let mut defs = HashMap::new();
        defs.insert(
            name.to_string(),
            TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new(name, key, point(), 1)),
        );
        ActionSlot::new(action, graph, defs)
    }

    #[tokio::test]
    async fn i4_action_fires_exactly_once() {
        let key = ResourceKey::new("pods", "default", "x");
        let action = Action {
            name: "pause".into(),
            kind: ActionKind::PauseApiServer(PauseApiServer {
                api_server_name: "api-A".into(),
                pause_scope: "all".into(),
            }),
            is_async: false,
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
        };
        let slot = one_shot_create_slot("c", key.clone(), action);
        let shared_ctx = ctx();
        let sm = StateMachine::new(
            vec![slot],
            shared_ctx.clone(),
            Arc::new(NoopOperatorControlPlane),
            mpsc::channel(1).0,
        );
        let (state_tx, state_rx) = mpsc::channel(8);
        let (_done_tx, done_rx) = mpsc::channel(1);

        let (h1, _rx1) = BlockingHandle::pair();
        state_tx
            .send(Notification::ObjectCreate(
                ObjectEvent {
                    resource_key: key.clone(),
                    point: point(),
                },
                h1,
            ))
            .await
            .unwrap();
        let (h2, _rx2) = BlockingHandle::pair();
        state_tx
            .send(Notification::ObjectCreate(
                ObjectEvent {
                    resource_key: key,
                    point: point(),
                },
                h2,
            ))
            .await
            .unwrap();
        drop(state_tx);

        sm.run(state_rx, done_rx).await;
        // The second create must not re-dispatch the action; resuming once
        // should be enough to prove it only ran a single time.
        shared_ctx.resume_api_server("api-A", "all");
        assert!(!shared_ctx.is_api_server_locked("api-A", "all"));
    }

    #[tokio::test]
    async fn p1_blocking_channel_released_after_dispatch() {
        let key = ResourceKey::new("pods", "default", "x");
        let action = Action {
            name: "pause".into(),
            kind: ActionKind::PauseApiServer(PauseApiServer {
                api_server_name: "api-A".into(),
                pause_scope: "all".into(),
            }),
            is_async: false,
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
        };
        let slot = one_shot_create_slot("c", key.clone(), action);
        let shared_ctx = ctx();
        let sm = StateMachine::new(
            vec![slot],
            shared_ctx.clone(),
            Arc::new(NoopOperatorControlPlane),
            mpsc::channel(1).0,
        );
        let (state_tx, state_rx) = mpsc::channel(8);
        let (_done_tx, done_rx) = mpsc::channel(1);

        let (handle, caller_rx) = BlockingHandle::pair();
        state_tx
            .send(Notification::ObjectCreate(
                ObjectEvent {
                    resource_key: key,
                    point: point(),
                },
                handle,
            ))
            .await
            .unwrap();
        drop(state_tx);

        let run = tokio::spawn(sm.run(state_rx, done_rx));
        tokio::time::timeout(Duration::from_millis(200), caller_rx)
            .await
            .expect("caller must be released once its action has run")
            .ok();
        run.await.unwrap();
        assert!(shared_ctx.is_api_server_locked("api-A", "all"));
    }

    #[tokio::test]
    async fn s4_async_action_does_not_stall_other_notifications() {
        let key_a = ResourceKey::new("pods", "default", "a");
        let key_b = ResourceKey::new("pods", "default", "b");
        let async_action = Action {
            name: "restart".into(),
            kind: ActionKind::RestartController(RestartController {
                controller_label: "operator".into(),
            }),
            is_async: true,
            wait_before: Duration::from_millis(50),
            wait_after: Duration::ZERO,
        };
        let sync_action = Action {
            name: "pause-b".into(),
            kind: ActionKind::PauseApiServer(PauseApiServer {
                api_server_name: "api-A".into(),
                pause_scope: "all".into(),
            }),
            is_async: false,
            wait_before: Duration::ZERO,
            wait_after: Duration::ZERO,
        };
        let slot_a = one_shot_create_slot("a", key_a.clone(), async_action);
        let slot_b = one_shot_create_slot("b", key_b.clone(), sync_action);
        let shared_ctx = ctx();
        let (async_done_tx, async_done_rx) = mpsc::channel(4);
        let sm = StateMachine::new(
            vec![slot_a, slot_b],
            shared_ctx.clone(),
            Arc::new(NoopOperatorControlPlane),
            async_done_tx,
        );
        let (state_tx, state_rx) = mpsc::channel(8);

        let (ha, _rxa) = BlockingHandle::pair();
        state_tx
            .send(Notification::ObjectCreate(
                ObjectEvent {
                    resource_key: key_a,
                    point: point(),
                },
                ha,
            ))
            .await
            .unwrap();
        let (hb, _rxb) = BlockingHandle::pair();
        state_tx
            .send(Notification::ObjectCreate(
                ObjectEvent {
                    resource_key: key_b,
                    point: point(),
                },
                hb,
            ))
            .await
            .unwrap();
        drop(state_tx);

        tokio::time::timeout(Duration::from_millis(500), sm.run(state_rx, async_done_rx))
            .await
            .expect("the sync action must not be stalled by the async action's wait_before");
        assert!(shared_ctx.is_api_server_locked("api-A", "all"));
    }
}
