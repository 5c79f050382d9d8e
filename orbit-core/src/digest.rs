//! Hash of an object's "essential" state (spec.md §3 Digest, §4.8 Causation).
//!
//! Compared on every cycle re-entry: if the live essential hash differs from
//! the digest stored in progress, all in-flight progress is invalidated and
//! causation starts a fresh cycle (P5).

use serde_json::Value;
use sha2::{Digest as _, Sha256};

/// The fields selected as "essential" for digest purposes: `spec`, plus the
/// metadata an operator cares about for causation (labels/annotations
/// change what handlers match, so they're essential; `resourceVersion`
/// and `managedFields` are not, since those churn on every status write
/// without semantic change).
fn essential_state(spec: &Value, labels: &Value, annotations: &Value) -> Value {
    serde_json::json!({
        "spec": spec,
        "labels": labels,
        "annotations": annotations,
    })
}

/// Compute the hex-encoded SHA-256 digest of an object's essential state.
pub fn compute(spec: &Value, labels: &Value, annotations: &Value) -> String {
    let essential = essential_state(spec, labels, annotations);
    // serde_json's `Map` is backed by a `BTreeMap` by default, so this
    // serialization is key-order-stable across calls.
    let canonical = serde_json::to_vec(&essential).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}
