//! Notification types (C1): tagged variants carrying event payload plus a
//! per-call blocking channel (spec.md §3/§9).
//!
//! Every caller-originated notification carries a blocking channel uniquely
//! allocated per RPC call; it is closed exactly once, by the state machine,
//! after it has fanned the notification out to every pending action's DAG
//! (invariant I1, tested as property P1).

use tokio::sync::oneshot;

use crate::mask::FieldMask;
use crate::resource::{ObservationPoint, ResourceKey};
use crate::value::Value;

/// The sending half of a notification's blocking channel.
///
/// The source always sends a value and then drops (closes) the sender on
/// release; a receiver that only cares "has the coordinator let me go" can
/// treat a plain drop identically to a send, so `release` does both in one
/// call. Wrapped in `Option` so a second `release` is a silent no-op rather
/// than a double-close panic -- this is what makes invariant I1 ("a blocking
/// channel is closed at most once") hold by construction.
pub struct BlockingHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl BlockingHandle {
    pub fn pair() -> (BlockingHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (BlockingHandle { tx: Some(tx) }, rx)
    }

    /// Releases the caller blocked on the paired receiver. Idempotent.
    pub fn release(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for BlockingHandle {
    fn drop(&mut self) {
        // A notification that is dropped without an explicit `release` (e.g.
        // on coordinator shutdown) still unblocks its caller rather than
        // hanging it forever.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// An annotated-function-call event, matched against `onAnnotatedAPICall`
/// triggers.
pub struct AnnotatedApiCall {
    pub module: String,
    pub file_path: String,
    pub receiver_type: String,
    pub fun_name: String,
    pub point: ObservationPoint,
}

/// An object create/delete event.
pub struct ObjectEvent {
    pub resource_key: ResourceKey,
    pub point: ObservationPoint,
}

/// An object update event, carrying both states and the masks needed to
/// evaluate `onObjectUpdate`/`onAnyFieldModification` triggers against it.
pub struct ObjectUpdate {
    pub resource_key: ResourceKey,
    pub point: ObservationPoint,
    pub prev_state: Value,
    pub cur_state: Value,
    pub mask: FieldMask,
}

/// The tagged union of everything that can flow through `stateNotificationCh`.
pub enum Notification {
    Timeout {
        condition_name: String,
    },
    AnnotatedApiCall(AnnotatedApiCall, BlockingHandle),
    ObjectCreate(ObjectEvent, BlockingHandle),
    ObjectDelete(ObjectEvent, BlockingHandle),
    ObjectUpdate(ObjectUpdate, BlockingHandle),
    /// Internal; carries no blocking channel. Emitted by an async action's
    /// background task when it completes.
    AsyncDone,
}

impl Notification {
    /// Consumes the notification, returning its blocking channel if it has
    /// one. Called exactly once by the state machine after the notification
    /// has been fanned out to every pending action (spec.md §4.6 step 3).
    pub fn into_blocking_handle(self) -> Option<BlockingHandle> {
        match self {
            Notification::AnnotatedApiCall(_, h)
            | Notification::ObjectCreate(_, h)
            | Notification::ObjectDelete(_, h)
            | Notification::ObjectUpdate(_, h) => Some(h),
            Notification::Timeout { .. } | Notification::AsyncDone => None,
        }
    }
}
