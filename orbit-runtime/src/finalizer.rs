//! Finalizer management: add before any delete-handler can run, remove
//! after all of them succeed (spec.md §6 "Finalizer").
//!
//! Grounded directly on `kube_runtime::finalizer`'s `FinalizerState`
//! (presence check + `is_deleting`), generalized from a single `Event::{
//! Apply,Cleanup}` reconcile step into a patch-staging helper the Handler
//! Runner calls directly.

use orbit_core::diff::{patch_set, FieldPath};
use orbit_core::object::RawObject;
use serde_json::Value;

fn finalizers_path() -> FieldPath {
    FieldPath::from(vec!["metadata", "finalizers"])
}

/// Whether `finalizer` needs to be added: a delete-handler is registered
/// for this resource, the object isn't already being deleted, and it
/// doesn't already carry the finalizer.
pub fn needs_finalizer(body: &RawObject, finalizer: &str, has_delete_handlers: bool) -> bool {
    has_delete_handlers && !body.is_being_deleted() && !body.finalizers().iter().any(|f| *f == finalizer)
}

pub fn add_finalizer(body: &RawObject, patch: &mut Value, finalizer: &str) {
    let mut current: Vec<Value> = body.finalizers().into_iter().map(|f| Value::String(f.to_owned())).collect();
    current.push(Value::String(finalizer.to_owned()));
    patch_set(patch, &finalizers_path(), Value::Array(current));
}

pub fn remove_finalizer(body: &RawObject, patch: &mut Value, finalizer: &str) {
    let remaining: Vec<Value> = body
        .finalizers()
        .into_iter()
        .filter(|f| *f != finalizer)
        .map(|f| Value::String(f.to_owned()))
        .collect();
    patch_set(patch, &finalizers_path(), Value::Array(remaining));
}
