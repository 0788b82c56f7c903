//! Test plan parsing and compilation (spec.md §6).
//!
//! This module only knows the plan's *shape* (a `serde`-deserializable tree)
//! and how to compile that shape into the engine's runtime types
//! ([`TriggerGraph`], [`TriggerDefinition`], [`Action`]). Reading the plan
//! file off disk, and deciding whether it's YAML or JSON, is `coord-server`'s
//! job (spec.md §1 lists plan loading as an external collaborator) -- keeping
//! this crate free of a `serde_yaml` dependency.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::action::{
    Action, ActionKind, PauseApiServer, PauseController, ReconnectController, ResumeApiServer,
    ResumeController, RestartController,
};
use crate::error::Error;
use crate::expr::parse_expression;
use crate::graph::TriggerGraph;
use crate::mask::FieldMask;
use crate::resource::{ObservationPoint, ObservedWhen, ResourceKey};
use crate::state_machine::ActionSlot;
use crate::trigger::{
    AnnotatedApiCallTrigger, AnyFieldModificationTrigger, ObjectUpdateTrigger, ObjectPresenceTrigger,
    TimeoutTrigger, TriggerDefinition,
};
use crate::value::Value;

#[derive(Debug, Deserialize)]
pub struct RawPlan {
    pub actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
pub struct RawAction {
    #[serde(rename = "actionType")]
    pub action_type: String,
    pub trigger: RawTrigger,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default, rename = "waitBefore")]
    pub wait_before: f64,
    #[serde(default, rename = "waitAfter")]
    pub wait_after: f64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Json>,
}

#[derive(Debug, Deserialize)]
pub struct RawTrigger {
    pub expression: String,
    pub definitions: Vec<RawTriggerDef>,
}

#[derive(Debug, Deserialize)]
pub struct RawTriggerDef {
    #[serde(rename = "triggerName")]
    pub trigger_name: String,
    pub condition: RawCondition,
    #[serde(default, rename = "observationPoint")]
    pub observation_point: Option<RawObservationPoint>,
}

#[derive(Debug, Deserialize)]
pub struct RawCondition {
    #[serde(rename = "conditionType")]
    pub condition_type: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Json>,
}

#[derive(Debug, Deserialize)]
pub struct RawObservationPoint {
    pub when: ObservedWhen,
    #[serde(default, rename = "by")]
    pub observed_by: String,
}

/// Resolves the merged field mask for a resource; `coord-server` supplies
/// this from the loaded `learned-mask.json`/`configured-mask.json` pair
/// (spec.md §4.2/§6).
pub trait MaskResolver {
    fn resolve(&self, resource_key: &ResourceKey) -> FieldMask;
}

impl<F: Fn(&ResourceKey) -> FieldMask> MaskResolver for F {
    fn resolve(&self, resource_key: &ResourceKey) -> FieldMask {
        self(resource_key)
    }
}

fn field<'a>(fields: &'a BTreeMap<String, Json>, owner: &str, key: &str) -> Result<&'a Json, Error> {
    fields.get(key).ok_or_else(|| Error::MissingField {
        action_or_trigger: owner.to_string(),
        field: key.to_string(),
    })
}

fn field_str(fields: &BTreeMap<String, Json>, owner: &str, key: &str) -> Result<String, Error> {
    field(fields, owner, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField {
            action_or_trigger: owner.to_string(),
            field: key.to_string(),
        })
}

fn field_u32(fields: &BTreeMap<String, Json>, key: &str, default: u32) -> u32 {
    fields.get(key).and_then(Json::as_u64).map(|v| v as u32).unwrap_or(default)
}

fn field_bool(fields: &BTreeMap<String, Json>, key: &str, default: bool) -> bool {
    fields.get(key).and_then(Json::as_bool).unwrap_or(default)
}

fn field_value(fields: &BTreeMap<String, Json>, key: &str) -> Option<Value> {
    fields.get(key).cloned().map(Value::from)
}

fn point_of(def: &RawTriggerDef, owner: &str) -> Result<ObservationPoint, Error> {
    def.observation_point
        .as_ref()
        .map(|p| ObservationPoint::new(p.when, p.observed_by.clone()))
        .ok_or_else(|| Error::MissingField {
            action_or_trigger: owner.to_string(),
            field: "observationPoint".to_string(),
        })
}

fn compile_trigger_def(
    def: RawTriggerDef,
    masks: &dyn MaskResolver,
) -> Result<TriggerDefinition, Error> {
    let name = def.trigger_name.clone();
    let cond = &def.condition;
    match cond.condition_type.as_str() {
        "timeout" => {
            let condition_name = field_str(&cond.fields, &name, "conditionName")?;
            let timeout_secs = field(&cond.fields, &name, "timeout")?
                .as_f64()
                .ok_or_else(|| Error::MissingField {
                    action_or_trigger: name.clone(),
                    field: "timeout".to_string(),
                })?;
            Ok(TriggerDefinition::Timeout(TimeoutTrigger::new(
                name,
                condition_name,
                Duration::from_secs_f64(timeout_secs),
            )))
        }
        "annotatedAPICall" => {
            let point = point_of(&def, &name)?;
            Ok(TriggerDefinition::AnnotatedApiCall(AnnotatedApiCallTrigger::new(
                name.clone(),
                field_str(&cond.fields, &name, "module")?,
                field_str(&cond.fields, &name, "filePath")?,
                field_str(&cond.fields, &name, "receiverType")?,
                field_str(&cond.fields, &name, "funName")?,
                point,
                field_u32(&cond.fields, "desiredOccurrence", 1),
            )))
        }
        "objectCreate" => {
            let point = point_of(&def, &name)?;
            let key = ResourceKey::from_raw(field_str(&cond.fields, &name, "resourceKey")?);
            Ok(TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new(
                name.clone(),
                key,
                point,
                field_u32(&cond.fields, "desiredOccurrence", 1),
            )))
        }
        "objectDelete" => {
            let point = point_of(&def, &name)?;
            let key = ResourceKey::from_raw(field_str(&cond.fields, &name, "resourceKey")?);
            Ok(TriggerDefinition::ObjectDelete(ObjectPresenceTrigger::new(
                name.clone(),
                key,
                point,
                field_u32(&cond.fields, "desiredOccurrence", 1),
            )))
        }
        "objectUpdate" => {
            let point = point_of(&def, &name)?;
            let key = ResourceKey::from_raw(field_str(&cond.fields, &name, "resourceKey")?);
            let mask = masks.resolve(&key);
            Ok(TriggerDefinition::ObjectUpdate(ObjectUpdateTrigger::new(
                name.clone(),
                key,
                point,
                field_value(&cond.fields, "prevStateDiff"),
                field_value(&cond.fields, "curStateDiff"),
                mask,
                field_bool(&cond.fields, "convertStateToAPIForm", false),
                // Exact matching is always on; `ObjectUpdateTrigger`'s point
                // check forces it off at the two API-server observation
                // points, where the object carries ambient fields no plan
                // can enumerate. The plan format has no field for this.
                true,
                field_u32(&cond.fields, "desiredOccurrence", 1),
            )))
        }
        "anyFieldModification" => {
            let point = point_of(&def, &name)?;
            let key = ResourceKey::from_raw(field_str(&cond.fields, &name, "resourceKey")?);
            let mask = masks.resolve(&key);
            let want_prev = field_value(&cond.fields, "prevStateDiff").unwrap_or_default();
            Ok(TriggerDefinition::AnyFieldModification(AnyFieldModificationTrigger::new(
                name.clone(),
                key,
                point,
                want_prev,
                mask,
                field_bool(&cond.fields, "convertStateToAPIForm", false),
                field_u32(&cond.fields, "desiredOccurrence", 1),
            )))
        }
        other => Err(Error::UnknownTriggerKind(other.to_string())),
    }
}

fn compile_action_kind(action_type: &str, fields: &BTreeMap<String, Json>) -> Result<ActionKind, Error> {
    match action_type {
        "pauseAPIServer" => Ok(ActionKind::PauseApiServer(PauseApiServer {
            api_server_name: field_str(fields, action_type, "apiServerName")?,
            pause_scope: field_str(fields, action_type, "pauseScope")?,
        })),
        "resumeAPIServer" => Ok(ActionKind::ResumeApiServer(ResumeApiServer {
            api_server_name: field_str(fields, action_type, "apiServerName")?,
            pause_scope: field_str(fields, action_type, "pauseScope")?,
        })),
        "pauseController" => Ok(ActionKind::PauseController(PauseController {
            pause_scope: field_str(fields, action_type, "pauseScope")?,
            pause_at: field_str(fields, action_type, "pauseAt")?,
            avoid_ongoing_read: field_bool(fields, "avoidOngoingRead", false),
        })),
        "resumeController" => Ok(ActionKind::ResumeController(ResumeController {
            pause_scope: field_str(fields, action_type, "pauseScope")?,
            pause_at: field_str(fields, action_type, "pauseAt")?,
        })),
        "restartController" => Ok(ActionKind::RestartController(RestartController {
            controller_label: field_str(fields, action_type, "controllerLabel")?,
        })),
        "reconnectController" => Ok(ActionKind::ReconnectController(ReconnectController {
            controller_label: field_str(fields, action_type, "controllerLabel")?,
            reconnect_api_server: field_str(fields, action_type, "reconnectAPIServer")?,
        })),
        other => Err(Error::UnknownActionKind(other.to_string())),
    }
}

/// Compiles a deserialized plan into the runtime action list the state
/// machine consumes. Validates that every trigger name the expression
/// references has a matching definition (fatal per spec.md §7 if not).
pub fn compile(raw: RawPlan, masks: &dyn MaskResolver) -> Result<Vec<ActionSlot>, Error> {
    let mut slots = Vec::with_capacity(raw.actions.len());
    for raw_action in raw.actions {
        let graph = TriggerGraph::build(&parse_expression(&raw_action.trigger.expression)?);
        let mut definitions = std::collections::HashMap::new();
        for raw_def in raw_action.trigger.definitions {
            let name = raw_def.trigger_name.clone();
            definitions.insert(name, compile_trigger_def(raw_def, masks)?);
        }
        for leaf in graph.leaf_names() {
            if !definitions.contains_key(leaf) {
                return Err(Error::UnknownTriggerName {
                    action: raw_action.action_type.clone(),
                    trigger: leaf.to_string(),
                });
            }
        }
        let kind = compile_action_kind(&raw_action.action_type, &raw_action.fields)?;
        let action = Action {
            name: raw_action.action_type.clone(),
            kind,
            is_async: raw_action.is_async,
            wait_before: Duration::from_secs_f64(raw_action.wait_before),
            wait_after: Duration::from_secs_f64(raw_action.wait_after),
        };
        slots.push(ActionSlot::new(action, graph, definitions));
    }
    Ok(slots)
}
