//! Handler declarations grouped by sub-registry, matched against Causes in
//! deterministic registration order (spec.md §4.9).
//!
//! Grounded on the registration ergonomics discussed in spec.md Design
//! Notes §9 ("decorator-style registration... is a registration API, not a
//! language feature") — explicit `register*` calls replace the original
//! source's attribute-decorator syntax, and the activity sub-registry
//! (startup/cleanup/probe) plus the separate login sub-registry are
//! grounded in `examples/original_source/kopf`'s `on.startup`/`on.login`
//! handlers (SPEC_FULL.md §9).

use crate::context::HandlerContext;
use crate::error::HandlerError;
use futures::future::BoxFuture;
use orbit_core::cause::{Cause, Reason};
use orbit_core::diff::{self, FieldPath};
use orbit_core::resource::{Resource, ResourceGlob};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type HandlerResult = std::result::Result<Option<Value>, HandlerError>;
pub type HandlerFuture<'a> = BoxFuture<'a, HandlerResult>;
pub type HandlerFn<M> = Arc<dyn for<'a> Fn(&'a mut HandlerContext<M>) -> HandlerFuture<'a> + Send + Sync>;

pub type ActivityResult = std::result::Result<(), HandlerError>;
pub type ActivityFn<M> = Arc<dyn Fn(Arc<M>) -> BoxFuture<'static, ActivityResult> + Send + Sync>;

/// A login handler produces fresh credentials rather than just signalling
/// success/failure, so it gets its own function shape (spec.md §9
/// "Login handler as a pluggable credentials source").
pub type LoginResult = std::result::Result<orbit_client::ConnectionInfo, HandlerError>;
pub type LoginFn<M> = Arc<dyn Fn(Arc<M>) -> BoxFuture<'static, LoginResult> + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum HandlerKind {
    Create,
    Update,
    Delete,
    Resume,
    Event,
    Daemon,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Activity {
    Startup,
    Cleanup,
    Probe,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorsMode {
    Temporary,
    Permanent,
}

/// A label/annotation/field match predicate (spec.md §4.9 "optional
/// label/annotation/field filters").
#[derive(Debug, Clone)]
pub enum Filter {
    Label { key: String, value: Option<String> },
    Annotation { key: String, value: Option<String> },
    /// Matches when `path` resolves against the body and, if `value` is
    /// given, the resolved value equals it; a bare `path` just checks
    /// presence.
    Field { path: FieldPath, value: Option<Value> },
}

impl Filter {
    fn matches(&self, cause: &Cause) -> bool {
        match self {
            Filter::Label { key, value } => Self::map_matches(cause.body.labels(), key, value),
            Filter::Annotation { key, value } => Self::map_matches(cause.body.annotations(), key, value),
            Filter::Field { path, value } => match diff::resolve(&cause.body.0, path) {
                None => false,
                Some(found) => match value {
                    None => true,
                    Some(want) => &found == want,
                },
            },
        }
    }

    fn map_matches(map: Option<&serde_json::Map<String, Value>>, key: &str, want: &Option<String>) -> bool {
        match map.and_then(|m| m.get(key)) {
            None => false,
            Some(v) => match want {
                None => true,
                Some(want) => v.as_str() == Some(want.as_str()),
            },
        }
    }
}

/// A predicate over the whole cause, for filters that don't fit the
/// label/annotation/field shape (spec.md §4.9 "optional when-predicate").
pub type WhenFn = Arc<dyn Fn(&Cause) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct HandlerOptions {
    /// User-supplied stable id; auto-generated from registration order when
    /// absent (spec.md Design Notes §9 "a handler's identity is a stable
    /// string").
    pub id: Option<String>,
    pub retries: Option<u32>,
    pub backoff: Duration,
    pub errors: ErrorsMode,
    pub filters: Vec<Filter>,
    /// Extra predicate evaluated alongside `filters`; arbitrary conditions
    /// the `Filter` enum doesn't cover (spec.md §4.9).
    pub when: Option<WhenFn>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            id: None,
            retries: None,
            backoff: Duration::from_secs(1),
            errors: ErrorsMode::Temporary,
            filters: Vec::new(),
            when: None,
        }
    }
}

pub struct Declaration<M> {
    pub id: String,
    pub kind: HandlerKind,
    pub resource: ResourceGlob,
    pub options: HandlerOptions,
    pub handler: HandlerFn<M>,
}

impl<M> Declaration<M> {
    fn reason_matches(&self, reason: Reason) -> bool {
        matches!(
            (self.kind, reason),
            (HandlerKind::Create, Reason::Create)
                | (HandlerKind::Update, Reason::Update)
                | (HandlerKind::Delete, Reason::Delete)
                | (HandlerKind::Resume, Reason::Resume)
                | (HandlerKind::Event, Reason::Event)
                | (HandlerKind::Daemon, Reason::DaemonStart)
                | (HandlerKind::Daemon, Reason::DaemonStop)
        )
    }

    fn matches(&self, resource: &Resource, cause: &Cause) -> bool {
        self.reason_matches(cause.reason)
            && self.resource.check(resource)
            && self.options.filters.iter().all(|f| f.matches(cause))
            && match &self.options.when {
                None => true,
                Some(w) => w(cause),
            }
    }
}

pub struct TimerDeclaration<M> {
    pub id: String,
    pub resource: ResourceGlob,
    pub interval: Duration,
    pub options: HandlerOptions,
    pub handler: HandlerFn<M>,
}

pub struct ActivityDeclaration<M> {
    pub id: String,
    pub activity: Activity,
    pub handler: ActivityFn<M>,
}

pub struct LoginDeclaration<M> {
    pub id: String,
    pub handler: LoginFn<M>,
}

/// Every registered declaration, grouped into spec.md §4.9's sub-registries
/// and preserved in registration order for deterministic dispatch.
pub struct Registry<M> {
    activities: Vec<ActivityDeclaration<M>>,
    logins: Vec<LoginDeclaration<M>>,
    changing: Vec<Declaration<M>>,
    timers: Vec<TimerDeclaration<M>>,
    anon_counter: AtomicU64,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            activities: Vec::new(),
            logins: Vec::new(),
            changing: Vec::new(),
            timers: Vec::new(),
            anon_counter: AtomicU64::new(0),
        }
    }
}

fn kind_prefix(kind: HandlerKind) -> &'static str {
    match kind {
        HandlerKind::Create => "create",
        HandlerKind::Update => "update",
        HandlerKind::Delete => "delete",
        HandlerKind::Resume => "resume",
        HandlerKind::Event => "event",
        HandlerKind::Daemon => "daemon",
    }
}

fn activity_prefix(activity: Activity) -> &'static str {
    match activity {
        Activity::Startup => "startup",
        Activity::Cleanup => "cleanup",
        Activity::Probe => "probe",
    }
}

impl<M> Registry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.anon_counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    /// Register a resource-watching/resource-changing/daemon handler.
    /// Returns the id it was stored under.
    pub fn register(
        &mut self,
        kind: HandlerKind,
        resource: ResourceGlob,
        options: HandlerOptions,
        handler: HandlerFn<M>,
    ) -> String {
        let id = options.id.clone().unwrap_or_else(|| self.next_id(kind_prefix(kind)));
        self.changing.push(Declaration { id: id.clone(), kind, resource, options, handler });
        id
    }

    pub fn register_timer(
        &mut self,
        resource: ResourceGlob,
        interval: Duration,
        options: HandlerOptions,
        handler: HandlerFn<M>,
    ) -> String {
        let id = options.id.clone().unwrap_or_else(|| self.next_id("timer"));
        self.timers.push(TimerDeclaration { id: id.clone(), resource, interval, options, handler });
        id
    }

    pub fn register_activity(&mut self, activity: Activity, handler: ActivityFn<M>) -> String {
        let id = self.next_id(activity_prefix(activity));
        self.activities.push(ActivityDeclaration { id: id.clone(), activity, handler });
        id
    }

    /// Register a login handler (spec.md §9 "Login handler as a pluggable
    /// credentials source"), tried in registration order during initial
    /// vault population and credential rotation.
    pub fn register_login(&mut self, handler: LoginFn<M>) -> String {
        let id = self.next_id("login");
        self.logins.push(LoginDeclaration { id: id.clone(), handler });
        id
    }

    pub fn iter_logins(&self) -> impl Iterator<Item = &LoginDeclaration<M>> {
        self.logins.iter()
    }

    /// Matching declarations for `cause`, in registration order.
    pub fn iter_handlers(&self, resource: &Resource, cause: &Cause) -> Vec<&Declaration<M>> {
        self.changing.iter().filter(|d| d.matches(resource, cause)).collect()
    }

    pub fn iter_timers(&self, resource: &Resource) -> impl Iterator<Item = &TimerDeclaration<M>> {
        self.timers.iter().filter(move |t| t.resource.check(resource))
    }

    /// Every registered timer regardless of resource, for the process-wide
    /// tick loop that has no single object to scope against.
    pub fn all_timers(&self) -> impl Iterator<Item = &TimerDeclaration<M>> {
        self.timers.iter()
    }

    pub fn iter_activities(&self, activity: Activity) -> impl Iterator<Item = &ActivityDeclaration<M>> {
        self.activities.iter().filter(move |a| a.activity == activity)
    }

    pub fn has_delete_handlers(&self, resource: &Resource) -> bool {
        self.changing.iter().any(|d| d.kind == HandlerKind::Delete && d.resource.check(resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::object::RawObject;
    use serde_json::json;

    fn noop_handler() -> HandlerFn<()> {
        Arc::new(|_ctx: &mut HandlerContext<()>| Box::pin(async { Ok(None) }))
    }

    fn cause(reason: Reason, labels: Value) -> Cause {
        let body = RawObject::new(json!({
            "metadata": {"namespace": "default", "name": "w", "uid": "u1", "labels": labels},
            "spec": {},
        }));
        Cause::new(reason, body).unwrap()
    }

    fn pods() -> Resource {
        Resource::new("", "v1", "pods")
    }

    #[test]
    fn registration_order_is_dispatch_order() {
        let mut reg: Registry<()> = Registry::new();
        reg.register(HandlerKind::Create, ResourceGlob::any(), HandlerOptions { id: Some("first".into()), ..Default::default() }, noop_handler());
        reg.register(HandlerKind::Create, ResourceGlob::any(), HandlerOptions { id: Some("second".into()), ..Default::default() }, noop_handler());
        let matched = reg.iter_handlers(&pods(), &cause(Reason::Create, json!({})));
        assert_eq!(matched.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[test]
    fn only_matching_reason_and_resource_are_returned() {
        let mut reg: Registry<()> = Registry::new();
        reg.register(HandlerKind::Create, ResourceGlob::new("", "v1", "pods"), Default::default(), noop_handler());
        reg.register(HandlerKind::Update, ResourceGlob::new("", "v1", "pods"), Default::default(), noop_handler());
        reg.register(HandlerKind::Create, ResourceGlob::new("apps", "v1", "deployments"), Default::default(), noop_handler());

        let matched = reg.iter_handlers(&pods(), &cause(Reason::Create, json!({})));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].kind, HandlerKind::Create);
    }

    #[test]
    fn label_filter_restricts_matches() {
        let mut reg: Registry<()> = Registry::new();
        reg.register(
            HandlerKind::Create,
            ResourceGlob::any(),
            HandlerOptions {
                filters: vec![Filter::Label { key: "tier".into(), value: Some("prod".into()) }],
                ..Default::default()
            },
            noop_handler(),
        );
        assert!(reg.iter_handlers(&pods(), &cause(Reason::Create, json!({"tier": "prod"}))).len() == 1);
        assert!(reg.iter_handlers(&pods(), &cause(Reason::Create, json!({"tier": "dev"}))).is_empty());
        assert!(reg.iter_handlers(&pods(), &cause(Reason::Create, json!({}))).is_empty());
    }

    #[test]
    fn field_filter_restricts_matches() {
        let mut reg: Registry<()> = Registry::new();
        reg.register(
            HandlerKind::Create,
            ResourceGlob::any(),
            HandlerOptions {
                filters: vec![Filter::Field { path: FieldPath::from(vec!["spec", "tier"]), value: Some(json!("prod")) }],
                ..Default::default()
            },
            noop_handler(),
        );

        let body = |tier: &str| RawObject::new(json!({
            "metadata": {"namespace": "default", "name": "w", "uid": "u1"},
            "spec": {"tier": tier},
        }));
        let prod = Cause::new(Reason::Create, body("prod")).unwrap();
        let dev = Cause::new(Reason::Create, body("dev")).unwrap();
        assert_eq!(reg.iter_handlers(&pods(), &prod).len(), 1);
        assert!(reg.iter_handlers(&pods(), &dev).is_empty());
    }

    #[test]
    fn when_predicate_restricts_matches() {
        let mut reg: Registry<()> = Registry::new();
        reg.register(
            HandlerKind::Create,
            ResourceGlob::any(),
            HandlerOptions { when: Some(Arc::new(|cause: &Cause| cause.id.name == "allowed")), ..Default::default() },
            noop_handler(),
        );

        let allowed = RawObject::new(json!({"metadata": {"namespace": "default", "name": "allowed", "uid": "u1"}, "spec": {}}));
        let blocked = RawObject::new(json!({"metadata": {"namespace": "default", "name": "blocked", "uid": "u2"}, "spec": {}}));
        assert_eq!(reg.iter_handlers(&pods(), &Cause::new(Reason::Create, allowed).unwrap()).len(), 1);
        assert!(reg.iter_handlers(&pods(), &Cause::new(Reason::Create, blocked).unwrap()).is_empty());
    }

    #[test]
    fn has_delete_handlers_checks_resource_glob() {
        let mut reg: Registry<()> = Registry::new();
        reg.register(HandlerKind::Delete, ResourceGlob::new("", "v1", "pods"), Default::default(), noop_handler());
        assert!(reg.has_delete_handlers(&pods()));
        assert!(!reg.has_delete_handlers(&Resource::new("apps", "v1", "deployments")));
    }

    #[test]
    fn anonymous_ids_are_stable_and_unique() {
        let mut reg: Registry<()> = Registry::new();
        let a = reg.register(HandlerKind::Create, ResourceGlob::any(), Default::default(), noop_handler());
        let b = reg.register(HandlerKind::Create, ResourceGlob::any(), Default::default(), noop_handler());
        assert_ne!(a, b);
    }
}
