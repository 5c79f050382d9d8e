//! Classify a raw event into a semantic [`Cause`] (spec.md §4.8).
//!
//! No direct teacher analog — plain `kube_runtime::Controller` only exposes
//! raw create/update/delete via its reflector store diffing, with no
//! persisted-progress-aware causation. Identity comes from
//! `kube_runtime::reflector::ObjectRef`'s shape; the delete/finalizer
//! detection mirrors `kube_runtime::finalizer::FinalizerState`.

use orbit_core::cause::{Cause, Reason};
use orbit_core::diff;
use orbit_core::event::{RawEvent, WatchEventKind};
use orbit_core::object::RawObject;
use serde_json::Value;

/// Everything the caller already knows from Progress/prior state that
/// `classify` needs to pick a [`Reason`] (spec.md §4.8's decision table).
/// The caller is expected to have already invalidated progress on a digest
/// mismatch (P5) before computing `create_succeeded`.
pub struct CausationInput<'a> {
    pub finalizer: &'a str,
    /// True when the live essential digest differs from the one stored at
    /// the start of the in-flight (or most recent) cycle.
    pub digest_changed: bool,
    /// True when the `create` handler(s) for this object have already
    /// recorded success.
    pub create_succeeded: bool,
    /// True once, right after the operator starts and before it has seen
    /// this object's first event of the run.
    pub just_started: bool,
    pub previous: Option<&'a RawObject>,
}

/// Derive a [`Cause`] from one watch event, or `None` if the event carries
/// no actionable reason (bookmarks, errors, a no-op update).
pub fn classify(event: &RawEvent, input: &CausationInput<'_>) -> Option<Cause> {
    if matches!(event.kind, WatchEventKind::Bookmark | WatchEventKind::Error) {
        return None;
    }

    let body = event.object.clone();
    let has_finalizer = body.finalizers().iter().any(|f| *f == input.finalizer);

    let reason = if body.is_being_deleted() && has_finalizer {
        Reason::Delete
    } else if input.digest_changed && !input.create_succeeded {
        Reason::Create
    } else if input.create_succeeded {
        let old_spec = input.previous.map(RawObject::spec).unwrap_or(Value::Null);
        if old_spec != body.spec() {
            Reason::Update
        } else {
            return None;
        }
    } else if input.just_started {
        Reason::Resume
    } else {
        return None;
    };

    let mut cause = Cause::new(reason, body.clone())?;
    if reason == Reason::Update {
        if let Some(prev) = input.previous {
            let d = diff::diff(&prev.spec(), &body.spec());
            cause = cause.with_diff(d, prev.clone(), body);
        }
    }
    Some(cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> RawObject {
        RawObject::new(value)
    }

    fn base(spec: Value) -> Value {
        json!({"metadata": {"namespace": "default", "name": "w", "uid": "u1"}, "spec": spec})
    }

    #[test]
    fn deleting_with_finalizer_is_delete() {
        let mut v = base(json!({"a": 1}));
        v["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
        v["metadata"]["finalizers"] = json!(["orbit.dev/finalizer"]);
        let event = RawEvent::seeded(obj(v));
        let input = CausationInput {
            finalizer: "orbit.dev/finalizer",
            digest_changed: false,
            create_succeeded: true,
            just_started: false,
            previous: None,
        };
        let cause = classify(&event, &input).unwrap();
        assert_eq!(cause.reason, Reason::Delete);
    }

    #[test]
    fn fresh_digest_without_prior_success_is_create() {
        let event = RawEvent::seeded(obj(base(json!({"a": 1}))));
        let input = CausationInput {
            finalizer: "orbit.dev/finalizer",
            digest_changed: true,
            create_succeeded: false,
            just_started: false,
            previous: None,
        };
        let cause = classify(&event, &input).unwrap();
        assert_eq!(cause.reason, Reason::Create);
    }

    #[test]
    fn spec_change_after_create_is_update_with_diff() {
        let prev = obj(base(json!({"a": 1})));
        let event = RawEvent::seeded(obj(base(json!({"a": 1, "b": 2}))));
        let input = CausationInput {
            finalizer: "orbit.dev/finalizer",
            digest_changed: false,
            create_succeeded: true,
            just_started: false,
            previous: Some(&prev),
        };
        let cause = classify(&event, &input).unwrap();
        assert_eq!(cause.reason, Reason::Update);
        assert_eq!(cause.diff.unwrap().len(), 1);
    }

    #[test]
    fn no_op_update_after_create_yields_no_cause() {
        let prev = obj(base(json!({"a": 1})));
        let event = RawEvent::seeded(obj(base(json!({"a": 1}))));
        let input = CausationInput {
            finalizer: "orbit.dev/finalizer",
            digest_changed: false,
            create_succeeded: true,
            just_started: false,
            previous: Some(&prev),
        };
        assert!(classify(&event, &input).is_none());
    }

    #[test]
    fn fresh_start_with_no_create_record_is_resume() {
        let event = RawEvent::seeded(obj(base(json!({"a": 1}))));
        let input = CausationInput {
            finalizer: "orbit.dev/finalizer",
            digest_changed: false,
            create_succeeded: false,
            just_started: true,
            previous: None,
        };
        let cause = classify(&event, &input).unwrap();
        assert_eq!(cause.reason, Reason::Resume);
    }

    #[test]
    fn bookmark_yields_no_cause() {
        let event = RawEvent::new(WatchEventKind::Bookmark, obj(base(Value::Null)));
        let input = CausationInput {
            finalizer: "orbit.dev/finalizer",
            digest_changed: true,
            create_succeeded: false,
            just_started: false,
            previous: None,
        };
        assert!(classify(&event, &input).is_none());
    }
}
