//! Top-level composition: wires discovery, watchers, the queue, peering,
//! timers, and activities into one running operator (spec.md §4, §9).
//!
//! Grounded on `kube_runtime::Controller::run`'s top-level `select!` over
//! its reflector stream, scheduler, and the applier, generalized to a
//! dynamic set of watched dimensions plus the peering/timer/activity loops
//! the original source's `kopf.run` also drives. Graceful shutdown uses a
//! `tokio::sync::watch<bool>` broadcast for consistency with the freeze
//! toggle, in place of `tokio_util::sync::CancellationToken`.

use crate::causation::{classify, CausationInput};
use crate::context::{HandlerContext, OperatorContext};
use crate::events::EventRecorder;
use crate::peering::Peering;
use crate::queue::{ObjectProcessor, Queue};
use crate::registry::{Activity, Registry};
use crate::runner::run_cycle;
use crate::throttle::Throttler;
use crate::watcher;
use orbit_client::{Discovery, Transport};
use orbit_core::digest;
use orbit_core::object::{ObjectId, RawObject};
use orbit_core::resource::Resource;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Per-object bookkeeping [`classify`] needs but that lives outside any
/// single event: whether we've processed this object since this process
/// started, and the last body we saw (for the Update diff).
struct CauseTracker {
    seen: Mutex<HashSet<ObjectId>>,
    previous: Mutex<HashMap<ObjectId, RawObject>>,
}

impl CauseTracker {
    fn new() -> Self {
        Self { seen: Mutex::new(HashSet::new()), previous: Mutex::new(HashMap::new()) }
    }

    fn build(&self, id: &ObjectId, event: &orbit_core::event::RawEvent, finalizer: &str) -> Option<orbit_core::Cause> {
        let just_started = !self.seen.lock().contains(id);
        let previous = self.previous.lock().get(id).cloned();

        let current_digest = digest::compute(
            &event.object.spec(),
            &event.object.0.get("metadata").and_then(|m| m.get("labels")).cloned().unwrap_or(serde_json::Value::Null),
            &event.object.0.get("metadata").and_then(|m| m.get("annotations")).cloned().unwrap_or(serde_json::Value::Null),
        );
        let stored = orbit_core::progress::stored_digest(&event.object.0, &serde_json::Value::Null);
        let input = CausationInput {
            finalizer,
            digest_changed: stored.as_deref() != Some(current_digest.as_str()),
            create_succeeded: stored.is_some(),
            just_started,
            previous: previous.as_ref(),
        };
        let cause = classify(event, &input);

        self.seen.lock().insert(id.clone());
        self.previous.lock().insert(id.clone(), event.object.clone());
        cause
    }
}

/// Owns every moving part of one running operator: registered handlers,
/// cluster access, discovery, and the per-dimension watchers/queues.
pub struct Orchestrator<T, M = ()> {
    ctx: Arc<OperatorContext<T>>,
    registry: Arc<Registry<M>>,
    memo: Arc<M>,
    reporting_controller: String,
}

impl<T: Transport + 'static, M: Send + Sync + 'static> Orchestrator<T, M> {
    pub fn new(ctx: Arc<OperatorContext<T>>, registry: Registry<M>, memo: Arc<M>, reporting_controller: impl Into<String>) -> Self {
        Self { ctx, registry: Arc::new(registry), memo, reporting_controller: reporting_controller.into() }
    }

    /// Build the per-object processor a [`Queue`] for `resource` drives:
    /// classify the cause, run the handler cycle, apply the resulting
    /// patch, and publish notable transitions.
    fn processor_for(&self, resource: Resource) -> ObjectProcessor {
        let ctx = Arc::clone(&self.ctx);
        let registry = Arc::clone(&self.registry);
        let memo = Arc::clone(&self.memo);
        let tracker = Arc::new(CauseTracker::new());
        let recorder = Arc::new(EventRecorder::new(Arc::clone(&ctx.client), self.reporting_controller.clone()));

        Arc::new(move |id: ObjectId, event| {
            let ctx = Arc::clone(&ctx);
            let registry = Arc::clone(&registry);
            let memo = Arc::clone(&memo);
            let tracker = Arc::clone(&tracker);
            let recorder = Arc::clone(&recorder);
            let resource = resource.clone();
            Box::pin(async move {
                let finalizer = ctx.config.persistence.finalizer.clone();
                let Some(mut cause) = tracker.build(&id, &event, &finalizer) else { return };

                let outcome = run_cycle(
                    &registry,
                    &resource,
                    &mut cause,
                    &finalizer,
                    ctx.config.retries.default_backoff,
                    ctx.config.retries.default_limit,
                    Arc::clone(&memo),
                )
                .await;

                if outcome.patch.as_object().is_some_and(|m| !m.is_empty()) {
                    if let Err(e) = ctx
                        .client
                        .patch_obj(&resource, id.namespace.as_deref(), &id.name, &outcome.patch)
                        .await
                    {
                        tracing::warn!(object = %id, error = %e, "failed to persist handler patch");
                    }
                }

                let succeeded = outcome.next_wakeup.is_none();
                recorder
                    .publish(
                        &id,
                        &crate::events::HandlerEvent {
                            action: format!("{:?}", cause.reason),
                            reason: "cycle".to_owned(),
                            note: None,
                            event_type: if succeeded { crate::events::EventType::Normal } else { crate::events::EventType::Warning },
                        },
                    )
                    .await;

                if let Some(delay) = outcome.next_wakeup {
                    let ctx = Arc::clone(&ctx);
                    let registry = Arc::clone(&registry);
                    let memo = Arc::clone(&memo);
                    let tracker = Arc::clone(&tracker);
                    let recorder = Arc::clone(&recorder);
                    let resource = resource.clone();
                    let id = id.clone();
                    let event = event.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        // Re-run the same processor body on the same
                        // (possibly stale) event; the next cycle re-reads
                        // progress from the live object's patched state.
                        let finalizer = ctx.config.persistence.finalizer.clone();
                        if let Some(mut cause) = tracker.build(&id, &event, &finalizer) {
                            let outcome = run_cycle(
                                &registry,
                                &resource,
                                &mut cause,
                                &finalizer,
                                ctx.config.retries.default_backoff,
                                ctx.config.retries.default_limit,
                                memo,
                            )
                            .await;
                            if outcome.patch.as_object().is_some_and(|m| !m.is_empty()) {
                                let _ = ctx.client.patch_obj(&resource, id.namespace.as_deref(), &id.name, &outcome.patch).await;
                            }
                            let succeeded = outcome.next_wakeup.is_none();
                            recorder
                                .publish(
                                    &id,
                                    &crate::events::HandlerEvent {
                                        action: format!("{:?}", cause.reason),
                                        reason: "retry-cycle".to_owned(),
                                        note: None,
                                        event_type: if succeeded { crate::events::EventType::Normal } else { crate::events::EventType::Warning },
                                    },
                                )
                                .await;
                        }
                    });
                }
            })
        })
    }

    /// Run until `shutdown` fires: discover resources, spawn one
    /// [`Queue`]+[`watcher::run`] pair per dimension, run peering and the
    /// timer-firing loop, and invoke startup/cleanup activities around the
    /// whole thing (spec.md §4.9 activities, §4.11 peering, §4.12 timers).
    pub async fn run(
        &self,
        mut discovery: Discovery,
        peering_resource: Resource,
        peering_namespace: Option<String>,
        cluster_scoped: bool,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.run_activities(Activity::Startup).await;

        if let Err(e) = discovery.refresh(&self.ctx.client).await {
            tracing::error!(error = %e, "initial discovery scan failed");
        }

        let peering = Arc::new(Peering::new(Arc::clone(&self.ctx), peering_resource, peering_namespace, self.ctx.config.peering.name.clone()));
        let peering_task = tokio::spawn({
            let peering = Arc::clone(&peering);
            let shutdown = shutdown.clone();
            async move { peering.run(shutdown).await }
        });

        let throttler = Arc::new(Throttler::new(Duration::from_millis(100), Duration::from_secs(30)));
        let mut watcher_tasks = Vec::new();
        for dim in discovery.dimensions(cluster_scoped) {
            let queue = Queue::new(self.ctx.config.batching.idle_timeout, self.processor_for(dim.resource.clone()));
            let task = tokio::spawn(watcher::run(
                Arc::clone(&self.ctx.client),
                queue,
                dim.resource,
                dim.namespace,
                self.ctx.freeze_watch(),
                Arc::clone(&throttler),
                shutdown.clone(),
            ));
            watcher_tasks.push(task);
        }

        let timer_task = tokio::spawn({
            let ctx = Arc::clone(&self.ctx);
            let registry = Arc::clone(&self.registry);
            let memo = Arc::clone(&self.memo);
            let shutdown = shutdown.clone();
            async move { run_timer_loop(ctx, registry, memo, shutdown).await }
        });

        let _ = shutdown.changed().await;
        for task in watcher_tasks {
            let _ = task.await;
        }
        let _ = timer_task.await;
        let _ = peering_task.await;

        self.run_activities(Activity::Cleanup).await;
    }

    async fn run_activities(&self, activity: Activity) {
        for decl in self.registry.iter_activities(activity) {
            if let Err(e) = (decl.handler)(Arc::clone(&self.memo)).await {
                tracing::warn!(activity = ?activity, handler = %decl.id, error = %e, "activity handler failed");
            }
        }
    }
}

/// Fire every registered timer at its configured interval, skipping ticks
/// entirely while frozen (spec.md §4.12, SPEC_FULL.md Open Questions
/// "timers do not fire while frozen").
async fn run_timer_loop<T: Transport, M>(
    ctx: Arc<OperatorContext<T>>,
    registry: Arc<Registry<M>>,
    memo: Arc<M>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Timer resources are matched per-dimension by the caller's watchers;
    // here we only need the shortest configured interval to drive ticks.
    let tick = registry.all_timers().map(|t| t.interval).min().unwrap_or(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if ctx.is_frozen() {
            continue;
        }
        // Timer handlers have no live object body to classify from; they
        // receive an empty context carrying only reason/memo, matching
        // spec.md §4.9 "timers run independent of any single cause".
        for timer in registry.all_timers() {
            let mut hctx = HandlerContext {
                body: RawObject::new(serde_json::Value::Null),
                spec: serde_json::Value::Null,
                status: serde_json::Value::Null,
                meta: Default::default(),
                id: ObjectId { namespace: None, name: "timer".into(), uid: timer.id.clone() },
                patch: serde_json::Value::Object(Default::default()),
                memo: Arc::clone(&memo),
                retry: 0,
                diff: None,
                old: None,
                new: None,
                reason: orbit_core::cause::Reason::Timer,
            };
            let _ = (timer.handler)(&mut hctx).await;
        }
    }
}
