//! Registration sugar over [`orbit_runtime::Registry`] (spec.md Design
//! Notes §9: "a registration API, not a language feature").
//!
//! Grounded on the root `kube` facade crate's builder-style wrappers around
//! `kube_client::Api`/`kube_runtime::Controller`, adapted to wrap
//! `Registry::register*` calls behind terse `on_*` methods instead of a
//! `#[derive(CustomResource)]` decorator.

use orbit_client::{ApiClient, ConnectionInfo, Discovery, Transport, Vault};
use orbit_core::resource::ResourceGlob;
use orbit_runtime::registry::{ActivityFn, HandlerFn};
use orbit_runtime::{
    Activity, HandlerContext, HandlerError, HandlerKind, HandlerOptions, OperatorConfig, OperatorContext,
    Orchestrator, Registry,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// The `Result` a handler closure returns: `Ok(Some(patch))` merges into the
/// object's progress record, `Ok(None)` succeeds without staging a patch.
pub type HandlerBuilderResult = Result<Option<serde_json::Value>, HandlerError>;

fn boxed<M, F, Fut>(f: F) -> HandlerFn<M>
where
    F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Accumulates handler declarations and runs the engine once started.
///
/// `M` is the shared "memo" value every handler and activity receives,
/// filling the role the original source's module-level globals played
/// (spec.md Design Notes §9). Defaults to `()` for operators with no shared
/// state.
pub struct Operator<M = ()> {
    registry: Registry<M>,
    config: OperatorConfig,
    namespace_globs: Vec<String>,
    resource_globs: Vec<ResourceGlob>,
    cluster_scoped: bool,
    peering_resource: Option<ResourceGlob>,
}

impl<M> Default for Operator<M> {
    fn default() -> Self {
        Self {
            registry: Registry::new(),
            config: OperatorConfig::default(),
            namespace_globs: vec!["*".to_owned()],
            resource_globs: Vec::new(),
            cluster_scoped: false,
            peering_resource: None,
        }
    }
}

impl<M: Send + Sync + 'static> Operator<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Restrict watched namespaces to those matching one of `globs`
    /// (`"*"` watches every namespace; the default).
    pub fn namespaces(mut self, globs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.namespace_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Watch every served resource group/version/plural matching `glob`,
    /// e.g. `ResourceGlob::new("", "v1", "pods")`.
    pub fn watch(mut self, glob: ResourceGlob) -> Self {
        self.resource_globs.push(glob);
        self
    }

    /// Watch cluster-scoped resources (no namespace dimension at all).
    pub fn cluster_scoped(mut self) -> Self {
        self.cluster_scoped = true;
        self
    }

    fn register(
        &mut self,
        kind: HandlerKind,
        resource: ResourceGlob,
        options: HandlerOptions,
        handler: HandlerFn<M>,
    ) -> &mut Self {
        self.registry.register(kind, resource, options, handler);
        self
    }

    /// Register a create handler, invoked once per object the first time it
    /// is observed without a stored progress digest (spec.md §4.2 Create).
    pub fn on_create<F, Fut>(&mut self, resource: ResourceGlob, options: HandlerOptions, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.register(HandlerKind::Create, resource, options, boxed(f))
    }

    /// Register an update handler, invoked when an object's essential state
    /// digest changes after a successful create (spec.md §4.2 Update).
    pub fn on_update<F, Fut>(&mut self, resource: ResourceGlob, options: HandlerOptions, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.register(HandlerKind::Update, resource, options, boxed(f))
    }

    /// Register a delete handler. Registering at least one delete handler
    /// for a resource causes the finalizer to be added on create/resume
    /// (spec.md §4.3 Finalizers).
    pub fn on_delete<F, Fut>(&mut self, resource: ResourceGlob, options: HandlerOptions, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.register(HandlerKind::Delete, resource, options, boxed(f))
    }

    /// Register a resume handler, invoked once per object on operator
    /// startup for objects that already existed (spec.md §4.2 Resume).
    pub fn on_resume<F, Fut>(&mut self, resource: ResourceGlob, options: HandlerOptions, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.register(HandlerKind::Resume, resource, options, boxed(f))
    }

    /// Register a field/annotation/label-change event handler
    /// (spec.md §4.2 Event), typically paired with a [`orbit_runtime::Filter`].
    pub fn on_event<F, Fut>(&mut self, resource: ResourceGlob, options: HandlerOptions, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.register(HandlerKind::Event, resource, options, boxed(f))
    }

    /// Register a daemon handler, started on `DaemonStart` and expected to
    /// run until cancelled on `DaemonStop` (spec.md §4.2 Daemon).
    pub fn on_daemon<F, Fut>(&mut self, resource: ResourceGlob, options: HandlerOptions, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.register(HandlerKind::Daemon, resource, options, boxed(f))
    }

    /// Register a timer, fired at `interval` independent of any single
    /// watched object (spec.md §4.12).
    pub fn on_timer<F, Fut>(
        &mut self,
        resource: ResourceGlob,
        interval: std::time::Duration,
        options: HandlerOptions,
        f: F,
    ) -> &mut Self
    where
        F: for<'a> Fn(&'a mut HandlerContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerBuilderResult> + Send + 'static,
    {
        self.registry.register_timer(resource, interval, options, boxed(f));
        self
    }

    fn register_activity(&mut self, activity: Activity, handler: ActivityFn<M>) -> &mut Self {
        self.registry.register_activity(activity, handler);
        self
    }

    /// Register a startup activity, run once before any watcher starts
    /// (spec.md §4.9 activities).
    pub fn on_startup<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_activity(Activity::Startup, Arc::new(move |memo| Box::pin(f(memo))))
    }

    /// Register a cleanup activity, run once after every watcher has
    /// stopped during graceful shutdown (spec.md §4.9 activities).
    pub fn on_cleanup<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_activity(Activity::Cleanup, Arc::new(move |memo| Box::pin(f(memo))))
    }

    /// Register a login handler, tried in registration order to populate
    /// the credentials vault before any watcher starts (spec.md §9 "Login
    /// handler as a pluggable credentials source").
    pub fn on_login<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConnectionInfo, HandlerError>> + Send + 'static,
    {
        self.registry.register_login(Arc::new(move |memo| Box::pin(f(memo))));
        self
    }

    /// Register a liveness probe activity (spec.md §4.9 activities).
    pub fn on_probe<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_activity(Activity::Probe, Arc::new(move |memo| Box::pin(f(memo))))
    }

    /// The resource the peering heartbeat object lives on, defaulting to a
    /// `ConfigMap` the way the original source's `kopf` peering defaults do.
    pub fn peering_resource(mut self, glob: ResourceGlob) -> Self {
        self.peering_resource = Some(glob);
        self
    }

    /// Assemble the transport/vault/discovery plumbing and run until
    /// `shutdown` fires, invoking startup/cleanup activities around the run
    /// (spec.md §4, §9).
    ///
    /// `fallback` seeds the vault directly when no registered login handler
    /// succeeds (or none are registered) — the static-`ConnectionInfo`
    /// path spec.md §6 describes, generalized by on_login per spec.md §9.
    pub async fn run<T: Transport + 'static>(
        self,
        transport: Arc<T>,
        fallback: ConnectionInfo,
        memo: M,
        reporting_controller: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) {
        let vault = Arc::new(Vault::new());
        let memo = Arc::new(memo);

        let mut logged_in = false;
        for login in self.registry.iter_logins() {
            match (login.handler)(Arc::clone(&memo)).await {
                Ok(info) => {
                    vault.set(0, info);
                    logged_in = true;
                    break;
                }
                Err(e) => tracing::warn!(handler = %login.id, error = %e, "login handler failed"),
            }
        }
        if !logged_in {
            vault.set(0, fallback);
        }

        let client = Arc::new(ApiClient::new(transport, Arc::clone(&vault), self.config.networking.request_timeout));
        let ctx = Arc::new(OperatorContext::new(Arc::clone(&client), vault, self.config.clone()));

        let discovery = Discovery::new(self.namespace_globs, self.resource_globs);
        let peering_resource = self.peering_resource.unwrap_or_else(|| ResourceGlob::new("", "v1", "configmaps"));
        let peering_resource = orbit_core::resource::Resource::new(peering_resource.group, peering_resource.version, peering_resource.plural);

        let orchestrator = Orchestrator::new(ctx, self.registry, memo, reporting_controller.into());
        orchestrator
            .run(discovery, peering_resource, None, self.cluster_scoped, shutdown)
            .await;
    }
}
