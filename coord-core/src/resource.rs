//! Canonical object identity and observation-point types (spec.md §3).

use std::fmt;

/// Canonical identity of an object across the whole system: `kind/namespace/name`.
///
/// Kept as a typed newtype rather than a bare `String` so that a caller
/// cannot accidentally pass an un-keyed string where a `ResourceKey` is
/// expected, mirroring the typed-identity discipline of
/// `kube_runtime::reflector::ObjectRef` even though this system's identity
/// space is a flat string rather than a `(group, version, kind)` triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        ResourceKey(format!("{kind}/{namespace}/{name}"))
    }

    /// Wraps an already-formatted `kind/namespace/name` string as received
    /// over the RPC surface.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        ResourceKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceKey {
    fn from(raw: String) -> Self {
        ResourceKey(raw)
    }
}

impl From<&str> for ResourceKey {
    fn from(raw: &str) -> Self {
        ResourceKey(raw.to_string())
    }
}

/// The five points in the event pipeline at which an object can be observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ObservedWhen {
    #[serde(rename = "beforeAPIServerRecv")]
    BeforeApiServerRecv,
    #[serde(rename = "afterAPIServerRecv")]
    AfterApiServerRecv,
    #[serde(rename = "beforeControllerRecv")]
    BeforeControllerRecv,
    #[serde(rename = "afterControllerRecv")]
    AfterControllerRecv,
    #[serde(rename = "afterControllerWrite")]
    AfterControllerWrite,
}

impl ObservedWhen {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservedWhen::BeforeApiServerRecv => "beforeAPIServerRecv",
            ObservedWhen::AfterApiServerRecv => "afterAPIServerRecv",
            ObservedWhen::BeforeControllerRecv => "beforeControllerRecv",
            ObservedWhen::AfterControllerRecv => "afterControllerRecv",
            ObservedWhen::AfterControllerWrite => "afterControllerWrite",
        }
    }

    /// `true` for the two points delivered straight off the API server wire,
    /// where masked-diff matching is forced to partial (non-exact) mode
    /// because the object carries ambient fields no plan can enumerate.
    pub fn is_api_server_point(&self) -> bool {
        matches!(self, ObservedWhen::BeforeApiServerRecv | ObservedWhen::AfterApiServerRecv)
    }
}

impl fmt::Display for ObservedWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `(observedWhen, observedBy)`. `observedBy` is the API-server hostname,
/// the reconciler identifier, or empty for the `*ControllerRecv` points
/// (the observer there is the shared informer, not a specific reconciler).
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObservationPoint {
    pub when: ObservedWhen,
    #[serde(rename = "by")]
    pub observed_by: String,
}

impl ObservationPoint {
    pub fn new(when: ObservedWhen, observed_by: impl Into<String>) -> Self {
        ObservationPoint {
            when,
            observed_by: observed_by.into(),
        }
    }
}

impl fmt::Display for ObservationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.when, self.observed_by)
    }
}
