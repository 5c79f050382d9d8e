//! The opaque JSON-shaped document model.
//!
//! Grounded on `kube-core::DynamicObject`, which carries `spec`/`status` as
//! untyped `serde_json::Value` so unrecognized fields round-trip losslessly.
//! Here the whole object, not just spec/status, is kept untyped: the engine
//! never needs a typed view of a kind it only reconciles by JSON shape.

use serde_json::Value;

/// An opaque Kubernetes object as returned by the API server.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject(pub Value);

impl RawObject {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    fn meta_field(&self, field: &str) -> Option<&Value> {
        self.0.get("metadata")?.get(field)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta_field("namespace").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.meta_field("name").and_then(Value::as_str)
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta_field("uid").and_then(Value::as_str)
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta_field("resourceVersion").and_then(Value::as_str)
    }

    pub fn labels(&self) -> Option<&serde_json::Map<String, Value>> {
        self.meta_field("labels").and_then(Value::as_object)
    }

    pub fn annotations(&self) -> Option<&serde_json::Map<String, Value>> {
        self.meta_field("annotations").and_then(Value::as_object)
    }

    pub fn finalizers(&self) -> Vec<&str> {
        self.meta_field("finalizers")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn deletion_timestamp(&self) -> Option<&str> {
        self.meta_field("deletionTimestamp").and_then(Value::as_str)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp().is_some()
    }

    pub fn spec(&self) -> Value {
        self.0.get("spec").cloned().unwrap_or(Value::Null)
    }

    pub fn status(&self) -> Value {
        self.0.get("status").cloned().unwrap_or(Value::Null)
    }

    /// The identity triple used as the Queue Multiplexer key.
    ///
    /// Returns `None` if the object lacks `metadata.uid`, which should never
    /// happen for an object returned by a real API server.
    pub fn id(&self) -> Option<ObjectId> {
        Some(ObjectId {
            namespace: self.namespace().map(str::to_owned),
            name: self.name()?.to_owned(),
            uid: self.uid()?.to_owned(),
        })
    }
}

/// Typed view over the subset of `metadata` the engine touches.
///
/// Unlike [`RawObject`], which keeps the full document, `ObjectMeta` is a
/// convenience snapshot returned by accessors that want an owned copy (e.g.
/// for logging or for the `old`/`new` pair attached to update [`Cause`](crate::Cause)s).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMeta {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub labels: serde_json::Map<String, Value>,
    pub annotations: serde_json::Map<String, Value>,
    pub finalizers: Vec<String>,
    pub deletion_timestamp: Option<String>,
}

impl From<&RawObject> for ObjectMeta {
    fn from(obj: &RawObject) -> Self {
        Self {
            namespace: obj.namespace().map(str::to_owned),
            name: obj.name().map(str::to_owned),
            uid: obj.uid().map(str::to_owned),
            resource_version: obj.resource_version().map(str::to_owned),
            labels: obj.labels().cloned().unwrap_or_default(),
            annotations: obj.annotations().cloned().unwrap_or_default(),
            finalizers: obj.finalizers().into_iter().map(str::to_owned).collect(),
            deletion_timestamp: obj.deletion_timestamp().map(str::to_owned),
        }
    }
}

/// The stable per-object key the Queue Multiplexer serializes work on.
///
/// Keyed by `uid` (stable across renames/resourceVersion churn), with
/// `namespace`/`name` carried along for logging and requeue lookups.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ObjectId {
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
