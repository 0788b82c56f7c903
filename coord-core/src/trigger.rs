//! Trigger predicates (C4): the leaves of a [`TriggerGraph`][crate::graph::TriggerGraph].
//!
//! Each variant owns a `desiredOccurrence`/`actualOccurrence` pair (spec.md
//! §4.3, invariant I3): a structural match increments the counter, and the
//! leaf reports satisfied the instant the counter reaches its target. The
//! counter is monotone and never reset (property P2, single-fire).

use std::cell::Cell;

use crate::diff::{is_any_field_modified, is_desired_update};
use crate::mask::FieldMask;
use crate::notification::Notification;
use crate::resource::{ObservationPoint, ResourceKey};
use crate::value::Value;

pub struct TimeoutTrigger {
    pub name: String,
    pub condition_name: String,
    /// How long the spawned timer waits before emitting this trigger's
    /// `TimeoutNotification` (spec.md §4.6). Not consulted by `satisfy`
    /// itself; the state machine reads it once at start-up to schedule the
    /// timer task.
    pub timeout: std::time::Duration,
    fired: Cell<bool>,
}

impl TimeoutTrigger {
    pub fn new(name: impl Into<String>, condition_name: impl Into<String>, timeout: std::time::Duration) -> Self {
        TimeoutTrigger {
            name: name.into(),
            condition_name: condition_name.into(),
            timeout,
            fired: Cell::new(false),
        }
    }
}

pub struct AnnotatedApiCallTrigger {
    pub name: String,
    pub module: String,
    pub file_path: String,
    pub receiver_type: String,
    pub fun_name: String,
    pub point: ObservationPoint,
    pub desired_occurrence: u32,
    actual_occurrence: Cell<u32>,
}

impl AnnotatedApiCallTrigger {
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        file_path: impl Into<String>,
        receiver_type: impl Into<String>,
        fun_name: impl Into<String>,
        point: ObservationPoint,
        desired_occurrence: u32,
    ) -> Self {
        AnnotatedApiCallTrigger {
            name: name.into(),
            module: module.into(),
            file_path: file_path.into(),
            receiver_type: receiver_type.into(),
            fun_name: fun_name.into(),
            point,
            desired_occurrence,
            actual_occurrence: Cell::new(0),
        }
    }
}

/// Shared by `ObjectCreateTrigger` and `ObjectDeleteTrigger`, which differ
/// only in which `Notification` variant they match against.
pub struct ObjectPresenceTrigger {
    pub name: String,
    pub resource_key: ResourceKey,
    pub point: ObservationPoint,
    pub desired_occurrence: u32,
    actual_occurrence: Cell<u32>,
}

impl ObjectPresenceTrigger {
    pub fn new(
        name: impl Into<String>,
        resource_key: ResourceKey,
        point: ObservationPoint,
        desired_occurrence: u32,
    ) -> Self {
        ObjectPresenceTrigger {
            name: name.into(),
            resource_key,
            point,
            desired_occurrence,
            actual_occurrence: Cell::new(0),
        }
    }
}

pub struct ObjectUpdateTrigger {
    pub name: String,
    pub resource_key: ResourceKey,
    pub point: ObservationPoint,
    /// `None` on both sides means "any update counts", per spec.md §4.3.
    pub want_prev: Option<Value>,
    pub want_cur: Option<Value>,
    pub mask: FieldMask,
    pub convert_to_api_form: bool,
    pub exact_match: bool,
    pub desired_occurrence: u32,
    actual_occurrence: Cell<u32>,
}

impl ObjectUpdateTrigger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        resource_key: ResourceKey,
        point: ObservationPoint,
        want_prev: Option<Value>,
        want_cur: Option<Value>,
        mask: FieldMask,
        convert_to_api_form: bool,
        exact_match: bool,
        desired_occurrence: u32,
    ) -> Self {
        ObjectUpdateTrigger {
            name: name.into(),
            resource_key,
            point,
            want_prev,
            want_cur,
            mask,
            convert_to_api_form,
            exact_match,
            desired_occurrence,
            actual_occurrence: Cell::new(0),
        }
    }
}

pub struct AnyFieldModificationTrigger {
    pub name: String,
    pub resource_key: ResourceKey,
    pub point: ObservationPoint,
    pub want_prev: Value,
    pub mask: FieldMask,
    pub convert_to_api_form: bool,
    pub desired_occurrence: u32,
    actual_occurrence: Cell<u32>,
}

impl AnyFieldModificationTrigger {
    pub fn new(
        name: impl Into<String>,
        resource_key: ResourceKey,
        point: ObservationPoint,
        want_prev: Value,
        mask: FieldMask,
        convert_to_api_form: bool,
        desired_occurrence: u32,
    ) -> Self {
        AnyFieldModificationTrigger {
            name: name.into(),
            resource_key,
            point,
            want_prev,
            mask,
            convert_to_api_form,
            desired_occurrence,
            actual_occurrence: Cell::new(0),
        }
    }
}

pub enum TriggerDefinition {
    Timeout(TimeoutTrigger),
    AnnotatedApiCall(AnnotatedApiCallTrigger),
    ObjectCreate(ObjectPresenceTrigger),
    ObjectDelete(ObjectPresenceTrigger),
    ObjectUpdate(ObjectUpdateTrigger),
    AnyFieldModification(AnyFieldModificationTrigger),
}

impl TriggerDefinition {
    pub fn name(&self) -> &str {
        match self {
            TriggerDefinition::Timeout(t) => &t.name,
            TriggerDefinition::AnnotatedApiCall(t) => &t.name,
            TriggerDefinition::ObjectCreate(t) => &t.name,
            TriggerDefinition::ObjectDelete(t) => &t.name,
            TriggerDefinition::ObjectUpdate(t) => &t.name,
            TriggerDefinition::AnyFieldModification(t) => &t.name,
        }
    }

    /// Consumes `notification`, updating occurrence counters on a structural
    /// match. Returns `true` iff this exact notification pushed the counter
    /// to its desired occurrence -- i.e. iff the leaf newly became satisfied.
    pub fn satisfy(&self, notification: &Notification) -> bool {
        match self {
            TriggerDefinition::Timeout(t) => {
                if let Notification::Timeout { condition_name } = notification {
                    if condition_name == &t.condition_name && !t.fired.get() {
                        t.fired.set(true);
                        return true;
                    }
                }
                false
            }
            TriggerDefinition::AnnotatedApiCall(t) => {
                if let Notification::AnnotatedApiCall(call, _) = notification {
                    if call.module == t.module
                        && call.file_path == t.file_path
                        && call.receiver_type == t.receiver_type
                        && call.fun_name == t.fun_name
                        && call.point == t.point
                    {
                        return bump(&t.actual_occurrence, t.desired_occurrence);
                    }
                }
                false
            }
            TriggerDefinition::ObjectCreate(t) => {
                if let Notification::ObjectCreate(ev, _) = notification {
                    if ev.resource_key == t.resource_key && ev.point == t.point {
                        return bump(&t.actual_occurrence, t.desired_occurrence);
                    }
                }
                false
            }
            TriggerDefinition::ObjectDelete(t) => {
                if let Notification::ObjectDelete(ev, _) = notification {
                    if ev.resource_key == t.resource_key && ev.point == t.point {
                        return bump(&t.actual_occurrence, t.desired_occurrence);
                    }
                }
                false
            }
            TriggerDefinition::ObjectUpdate(t) => {
                if let Notification::ObjectUpdate(up, _) = notification {
                    if up.resource_key == t.resource_key && up.point == t.point {
                        let matched = match (&t.want_prev, &t.want_cur) {
                            (None, None) => true,
                            _ => {
                                let want_prev = t.want_prev.clone().unwrap_or_default();
                                let want_cur = t.want_cur.clone().unwrap_or_default();
                                let exact = t.exact_match && !up.point.when.is_api_server_point();
                                is_desired_update(
                                    &up.prev_state,
                                    &up.cur_state,
                                    &want_prev,
                                    &want_cur,
                                    &t.mask,
                                    t.convert_to_api_form,
                                    exact,
                                )
                            }
                        };
                        if matched {
                            return bump(&t.actual_occurrence, t.desired_occurrence);
                        }
                    }
                }
                false
            }
            TriggerDefinition::AnyFieldModification(t) => {
                if let Notification::ObjectUpdate(up, _) = notification {
                    if up.resource_key == t.resource_key
                        && up.point == t.point
                        && is_any_field_modified(&up.cur_state, &t.want_prev, &t.mask, t.convert_to_api_form)
                    {
                        return bump(&t.actual_occurrence, t.desired_occurrence);
                    }
                }
                false
            }
        }
    }
}

fn bump(counter: &Cell<u32>, desired: u32) -> bool {
    let next = counter.get() + 1;
    counter.set(next);
    next == desired
}
