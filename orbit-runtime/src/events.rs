//! Notable state transitions, always surfaced via `tracing` and optionally
//! published as a Kubernetes `Event` object — the same split
//! `kube_runtime::events::EventRecorder` draws between its typed
//! `NewEvent`/`EventType` and the actual `Api::create` call.

use orbit_client::{ApiClient, Transport};
use orbit_core::object::ObjectId;
use orbit_core::resource::Resource;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EventType {
    Normal,
    Warning,
}

/// One handler-runner state transition worth surfacing (spec.md §4.10
/// "emit cluster events for notable state transitions").
#[derive(Debug, Clone)]
pub struct HandlerEvent {
    pub action: String,
    pub reason: String,
    pub note: Option<String>,
    pub event_type: EventType,
}

/// Always-on structured log line for one transition.
pub fn record(id: &ObjectId, event: &HandlerEvent) {
    match event.event_type {
        EventType::Normal => {
            tracing::info!(object = %id, action = %event.action, reason = %event.reason, note = ?event.note, "handler transition")
        }
        EventType::Warning => {
            tracing::warn!(object = %id, action = %event.action, reason = %event.reason, note = ?event.note, "handler transition")
        }
    }
}

/// Publishes the same transitions as `events.k8s.io/v1` `Event` objects,
/// for operators that want them visible via `kubectl describe`/`get events`.
pub struct EventRecorder<T> {
    client: Arc<ApiClient<T>>,
    events_resource: Resource,
    reporting_controller: String,
}

impl<T: Transport> EventRecorder<T> {
    pub fn new(client: Arc<ApiClient<T>>, reporting_controller: impl Into<String>) -> Self {
        Self {
            client,
            events_resource: Resource::new("events.k8s.io", "v1", "events"),
            reporting_controller: reporting_controller.into(),
        }
    }

    pub async fn publish(&self, id: &ObjectId, event: &HandlerEvent) -> orbit_client::Result<()> {
        record(id, event);
        let event_type = match event.event_type {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        };
        let body: Value = json!({
            "apiVersion": "events.k8s.io/v1",
            "kind": "Event",
            "metadata": {"generateName": format!("{}-", id.name)},
            "regarding": {"namespace": id.namespace, "name": id.name, "uid": id.uid},
            "reason": event.reason,
            "note": event.note,
            "type": event_type,
            "action": event.action,
            "reportingController": self.reporting_controller,
            "reportingInstance": self.reporting_controller,
            "eventTime": chrono::Utc::now().to_rfc3339(),
        });
        self.client.create_obj(&self.events_resource, id.namespace.as_deref(), &body).await?;
        Ok(())
    }
}
