//! The per-handler state machine executed once a [`Cause`] has been
//! classified (spec.md §4.10).
//!
//! No single teacher analog: `kube_runtime::Controller`'s reconcile loop
//! calls one user `reconcile` fn and interprets its `Result<Action, Error>`
//! wholesale, whereas this runs an ordered list of independently-retried
//! handlers per cycle, each with its own [`orbit_core::progress::ProgressStore`]
//! slot. The per-handler retry/backoff bookkeeping is grounded on
//! `kube_runtime::controller::runner::Runner`'s `RECONCILE_LIMIT`/backoff
//! plumbing, generalized to one slot per handler id rather than one per
//! object.

use crate::error::HandlerError;
use crate::events::{EventRecorder, EventType, HandlerEvent};
use crate::finalizer;
use crate::registry::{ErrorsMode, Registry};
use chrono::Utc;
use orbit_client::Transport;
use orbit_core::cause::{Cause, Reason};
use orbit_core::digest;
use orbit_core::progress::{self, ProgressStore};
use orbit_core::resource::Resource;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::context::HandlerContext;

/// What a completed cycle leaves behind: the accumulated patch to apply,
/// and the soonest a handler asked to be woken for a retry/sleep.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub patch: Value,
    pub next_wakeup: Option<Duration>,
}

/// Run every handler matching `cause` once, in registration order, updating
/// `cause.patch` in place and returning the wakeup delay if any handler is
/// still pending (spec.md §4.10 steps 1-8).
pub async fn run_cycle<M>(
    registry: &Registry<M>,
    resource: &Resource,
    cause: &mut Cause,
    finalizer_name: &str,
    default_backoff: Duration,
    default_retry_limit: Option<u32>,
    memo: Arc<M>,
) -> CycleOutcome {
    let now = Utc::now();

    if finalizer::needs_finalizer(&cause.body, finalizer_name, registry.has_delete_handlers(resource)) {
        finalizer::add_finalizer(&cause.body, &mut cause.patch, finalizer_name);
    }

    let declarations = registry.iter_handlers(resource, cause);
    let mut pending_wakeups: Vec<Duration> = Vec::new();
    let mut all_finished = true;
    let mut any_failed = false;

    for decl in declarations {
        let mut store = ProgressStore::new(&cause.body.0, &mut cause.patch, decl.id.as_str());

        if store.is_finished() {
            continue;
        }
        if store.is_sleeping(now) {
            all_finished = false;
            continue;
        }

        if !store.is_started() {
            store.set_start_time(now);
        }
        let retry = store.retry_count();
        drop(store);

        let mut hctx = HandlerContext::from_cause(cause, Arc::clone(&memo), retry);
        hctx.patch = cause.patch.clone();
        let outcome = (decl.handler)(&mut hctx).await;
        // Fold whatever the handler staged directly into the patch back in.
        merge_into(&mut cause.patch, &hctx.patch);

        let mut store = ProgressStore::new(&cause.body.0, &mut cause.patch, decl.id.as_str());
        match outcome {
            Ok(result) => {
                store.store_success(now, result);
            }
            Err(HandlerError::Permanent { message }) => {
                store.store_failure(now, message);
                any_failed = true;
                all_finished = false;
            }
            Err(HandlerError::Temporary { delay, message }) => {
                store.set_retry_time(now, delay);
                pending_wakeups.push(delay);
                all_finished = false;
            }
            Err(HandlerError::Unexpected(message)) => {
                let limit = decl.options.retries.or(default_retry_limit);
                let retries_used = store.retry_count() + 1;
                let exhausted = limit.is_some_and(|limit| retries_used >= limit);
                match decl.options.errors {
                    ErrorsMode::Permanent => {
                        store.store_failure(now, message);
                        any_failed = true;
                        all_finished = false;
                    }
                    ErrorsMode::Temporary if exhausted => {
                        store.store_failure(now, format!("retries exhausted: {message}"));
                        any_failed = true;
                        all_finished = false;
                    }
                    ErrorsMode::Temporary => {
                        let backoff = if decl.options.backoff.is_zero() { default_backoff } else { decl.options.backoff };
                        store.set_retry_time(now, backoff);
                        pending_wakeups.push(backoff);
                        all_finished = false;
                    }
                }
            }
        }
    }

    if all_finished && !any_failed {
        let digest = digest::compute(&cause.body.spec(), &meta_value(&cause.body, "labels"), &meta_value(&cause.body, "annotations"));
        progress::purge_progress(&mut cause.patch, Some(digest));
        if cause.reason == Reason::Delete && registry.has_delete_handlers(resource) {
            finalizer::remove_finalizer(&cause.body, &mut cause.patch, finalizer_name);
        }
    }

    CycleOutcome {
        patch: cause.patch.clone(),
        next_wakeup: pending_wakeups.into_iter().min(),
    }
}

fn meta_value(body: &orbit_core::object::RawObject, field: &str) -> Value {
    body.0
        .get("metadata")
        .and_then(|m| m.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Shallow merge `from` into `into`, matching the same "last patch write
/// wins" semantics [`orbit_core::progress`] relies on.
fn merge_into(into: &mut Value, from: &Value) {
    let (Some(into_map), Some(from_map)) = (into.as_object_mut(), from.as_object()) else {
        return;
    };
    for (k, v) in from_map {
        match (into_map.get_mut(k), v.is_object()) {
            (Some(existing), true) if existing.is_object() => merge_into(existing, v),
            _ => {
                into_map.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Publish a notable transition for one handler outcome, for operators that
/// want it visible via `kubectl get events` (spec.md §4.10).
pub async fn announce<T: Transport>(
    recorder: &EventRecorder<T>,
    cause: &Cause,
    handler_id: &str,
    succeeded: bool,
    message: Option<String>,
) {
    let event = HandlerEvent {
        action: format!("{:?}", cause.reason),
        reason: handler_id.to_owned(),
        note: message,
        event_type: if succeeded { EventType::Normal } else { EventType::Warning },
    };
    let _ = recorder.publish(&cause.id, &event).await;
}
