//! Error handling in [`coord_core`][crate].

use thiserror::Error;

/// Possible errors when compiling or running the trigger/action engine.
///
/// Maps onto the three error classes of the coordinator (fatal / unsupported-
/// but-continuable / transient): parse errors are always fatal, the
/// `Unsupported*` variants are continuable by the caller, and
/// `OperatorControlPlane` failures are transient and are expected to be
/// logged and folded into an `AsyncDone` notification rather than propagated.
#[derive(Error, Debug)]
pub enum Error {
    /// A trigger expression (`"A and (B or C)"`, `"seq(A,B)"`) failed to parse.
    #[error("invalid trigger expression: {0}")]
    Expr(#[from] crate::expr::ExprError),

    /// An action referenced a trigger name with no matching definition.
    #[error("action {action:?} references unknown trigger name {trigger:?}")]
    UnknownTriggerName { action: String, trigger: String },

    /// The plan named an action kind this engine does not implement.
    #[error("unknown action kind {0:?}")]
    UnknownActionKind(String),

    /// The plan named a trigger condition kind this engine does not implement.
    #[error("unknown trigger condition kind {0:?}")]
    UnknownTriggerKind(String),

    /// A trigger/action in the plan was missing a field required for its kind.
    #[error("{action_or_trigger:?} is missing required field {field:?}")]
    MissingField {
        action_or_trigger: String,
        field: String,
    },

    /// An RPC delivered an operation type the engine does not recognize.
    /// Unsupported-but-continuable: the caller logs this and still releases
    /// the RPC caller rather than hanging it.
    #[error("unsupported operation type {0:?}")]
    UnsupportedOperationType(String),

    /// Decoding a notification's JSON object payload failed.
    #[error("malformed object payload: {0}")]
    MalformedObject(#[from] serde_json::Error),

    /// The operator control plane (restart/reconnect) failed. Transient: the
    /// async action path logs this and still emits its completion signal.
    #[error("operator control plane error: {0}")]
    OperatorControlPlane(#[from] OperatorError),
}

/// Errors surfaced by the out-of-crate [`crate::action::OperatorControlPlane`]
/// collaborator (spec.md §6: restart/reconnect delegate to the orchestrator).
#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("no pod found with label {0:?}")]
    PodNotFound(String),

    #[error("pod owner is neither a ReplicaSet nor a StatefulSet")]
    UnsupportedOwnerKind,

    #[error("timed out waiting for pod lifecycle transition")]
    TimedOut,

    #[error("control plane request failed: {0}")]
    Request(String),
}
