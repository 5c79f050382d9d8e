//! End-to-end cycle scenarios driving classification and the handler
//! runner together, the way a live watch event flows through the
//! orchestrator (spec.md §8).

use orbit_core::cause::{Cause, Reason};
use orbit_core::event::{RawEvent, WatchEventKind};
use orbit_core::object::RawObject;
use orbit_core::resource::{Resource, ResourceGlob};
use orbit_runtime::error::HandlerError;
use orbit_runtime::registry::{HandlerKind, HandlerOptions, Registry};
use orbit_runtime::{causation, run_cycle, CausationInput, HandlerContext};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::util::SubscriberInitExt;

fn merge(base: &mut Value, patch: &Value) {
    let (Some(b), Some(p)) = (base.as_object_mut(), patch.as_object()) else {
        return;
    };
    for (k, v) in p {
        match (b.get_mut(k), v.is_object()) {
            (Some(existing), true) if existing.is_object() => merge(existing, v),
            _ => {
                b.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Route `tracing` output to the test harness's captured stdout, the same
/// helper `kube_runtime::utils::delayed_init`'s tests use to see what a
/// handler logged when a scenario assertion fails.
fn setup_tracing() -> tracing::dispatcher::DefaultGuard {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish()
        .set_default()
}

fn widgets() -> Resource {
    Resource::new("", "v1", "widgets")
}

fn widget_body(status_patch: &Value) -> Value {
    let mut body = json!({
        "metadata": {"namespace": "default", "name": "widget", "uid": "u1"},
        "spec": {"replicas": 3},
    });
    merge(&mut body, status_patch);
    body
}

/// Scenario 1: a create handler fails twice with a temporary error, then
/// succeeds on the third dispatch. Each iteration re-reads the prior
/// iteration's persisted patch the way the orchestrator re-reads the
/// patched object before the next cycle.
#[tokio::test]
async fn create_retries_twice_then_succeeds() {
    let _tracing = setup_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_handler = Arc::clone(&calls);
    let mut reg: Registry<()> = Registry::new();
    reg.register(
        HandlerKind::Create,
        ResourceGlob::any(),
        HandlerOptions { id: Some("provision".into()), ..Default::default() },
        Arc::new(move |_ctx: &mut HandlerContext<()>| {
            let calls = Arc::clone(&calls_in_handler);
            Box::pin(async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(HandlerError::temporary(Duration::from_millis(1), "not ready yet"))
                } else {
                    Ok(Some(json!({"ok": true})))
                }
            })
        }),
    );

    let mut persisted = json!({});

    // Cycle 1: first temporary failure.
    let body = RawObject::new(widget_body(&persisted));
    let mut cause = Cause::new(Reason::Create, body).unwrap();
    let outcome = run_cycle(&reg, &widgets(), &mut cause, "orbit.dev/finalizer", Duration::from_secs(1), None, Arc::new(())).await;
    assert_eq!(outcome.next_wakeup, Some(Duration::from_millis(1)));
    merge(&mut persisted, &outcome.patch);
    assert_eq!(persisted["status"]["orbit"]["progress"]["provision"]["retries"], json!(1));

    // Cycle 2: second temporary failure.
    let body = RawObject::new(widget_body(&persisted));
    let mut cause = Cause::new(Reason::Create, body).unwrap();
    let outcome = run_cycle(&reg, &widgets(), &mut cause, "orbit.dev/finalizer", Duration::from_secs(1), None, Arc::new(())).await;
    assert_eq!(outcome.next_wakeup, Some(Duration::from_millis(1)));
    merge(&mut persisted, &outcome.patch);
    assert_eq!(persisted["status"]["orbit"]["progress"]["provision"]["retries"], json!(2));

    // Cycle 3: success, progress purged, result stored under status.<id>.
    let body = RawObject::new(widget_body(&persisted));
    let mut cause = Cause::new(Reason::Create, body).unwrap();
    let outcome = run_cycle(&reg, &widgets(), &mut cause, "orbit.dev/finalizer", Duration::from_secs(1), None, Arc::new(())).await;
    assert!(outcome.next_wakeup.is_none());
    merge(&mut persisted, &outcome.patch);

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(persisted["status"]["orbit"]["progress"], Value::Null);
    assert_eq!(persisted["status"]["provision"], json!({"ok": true}));
}

/// Scenario 4: a spec change after a recorded create is classified as an
/// Update, and the registered update handler sees exactly the diff
/// `classify` computed, invoked exactly once.
#[tokio::test]
async fn spec_change_dispatches_update_handler_with_diff() {
    let _tracing = setup_tracing();
    let seen_diffs = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_handler = Arc::clone(&seen_diffs);
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_handler = Arc::clone(&calls);

    let mut reg: Registry<()> = Registry::new();
    reg.register(
        HandlerKind::Update,
        ResourceGlob::any(),
        HandlerOptions { id: Some("reconfigure".into()), ..Default::default() },
        Arc::new(move |ctx: &mut HandlerContext<()>| {
            calls_in_handler.fetch_add(1, Ordering::SeqCst);
            seen_in_handler.lock().unwrap().push(ctx.diff.clone());
            Box::pin(async { Ok(None) })
        }),
    );

    let previous = RawObject::new(widget_body(&json!({})));
    let updated = RawObject::new(json!({
        "metadata": {"namespace": "default", "name": "widget", "uid": "u1"},
        "spec": {"replicas": 5},
    }));
    let event = RawEvent::new(WatchEventKind::Modified, updated);
    let input = CausationInput {
        finalizer: "orbit.dev/finalizer",
        digest_changed: false,
        create_succeeded: true,
        just_started: false,
        previous: Some(&previous),
    };
    let mut cause = causation::classify(&event, &input).expect("spec change yields a cause");
    assert_eq!(cause.reason, Reason::Update);

    let outcome = run_cycle(&reg, &widgets(), &mut cause, "orbit.dev/finalizer", Duration::from_secs(1), None, Arc::new(())).await;

    assert!(outcome.next_wakeup.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let diffs = seen_diffs.lock().unwrap();
    assert_eq!(diffs.len(), 1);
    let diff = diffs[0].clone().expect("update handler receives a diff");
    assert_eq!(diff.len(), 1);
    assert_eq!(diff.0[0].path, orbit_core::diff::FieldPath::from(vec!["replicas"]));
}
