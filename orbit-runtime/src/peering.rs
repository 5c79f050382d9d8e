//! Priority-ordered multi-peer freeze (spec.md §4.11).
//!
//! Grounded on `kube_runtime::lease::Elector`'s acquire/renew/release loop
//! against a shared object, generalized from single-leader election to
//! "freeze while any live peer outranks us" — every instance keeps running
//! its own watches, they just stop dispatching work while frozen.

use crate::context::OperatorContext;
use orbit_client::Transport;
use orbit_core::diff::{patch_set, FieldPath};
use orbit_core::peer::PeerRecord;
use orbit_core::resource::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn peers_path() -> FieldPath {
    FieldPath::from(vec!["status", "peers"])
}

fn peer_record_json(peer: &PeerRecord) -> serde_json::Value {
    serde_json::json!({
        "id": peer.id,
        "name": peer.name,
        "namespace": peer.namespace,
        "priority": peer.priority,
        "lifetimeSeconds": peer.lifetime.as_secs(),
        "lastSeen": peer.last_seen.to_rfc3339(),
    })
}

fn peer_record_from_json(id: &str, v: &serde_json::Value) -> Option<PeerRecord> {
    Some(PeerRecord {
        id: id.to_owned(),
        name: v.get("name")?.as_str()?.to_owned(),
        namespace: v.get("namespace").and_then(|n| n.as_str()).map(str::to_owned),
        priority: v.get("priority")?.as_i64()?,
        lifetime: Duration::from_secs(v.get("lifetimeSeconds")?.as_u64()?),
        last_seen: chrono::DateTime::parse_from_rfc3339(v.get("lastSeen")?.as_str()?).ok()?.with_timezone(&chrono::Utc),
    })
}

/// Decode every peer record stored on the shared peering object's body.
pub fn decode_peers(body: &serde_json::Value) -> BTreeMap<String, PeerRecord> {
    body.get("status")
        .and_then(|s| s.get("peers"))
        .and_then(serde_json::Value::as_object)
        .map(|obj| obj.iter().filter_map(|(id, v)| peer_record_from_json(id, v).map(|p| (id.clone(), p))).collect())
        .unwrap_or_default()
}

/// Whether any peer in `peers` outranks us right now (spec.md §4.11 "the
/// instance with the highest priority active peer wins, all others
/// freeze").
pub fn should_freeze(peers: &BTreeMap<String, PeerRecord>, self_priority: i64, now: chrono::DateTime<chrono::Utc>) -> bool {
    peers.values().any(|p| p.outranks(self_priority, now))
}

fn generate_self_id() -> String {
    let suffix: u64 = rand::random();
    format!("{suffix:016x}")
}

/// Runs the heartbeat loop against a shared peering object, keeping
/// `ctx`'s freeze broadcast in sync with whether a higher-priority peer is
/// currently alive.
pub struct Peering<T> {
    ctx: Arc<OperatorContext<T>>,
    resource: Resource,
    namespace: Option<String>,
    name: String,
    self_id: String,
}

impl<T: Transport> Peering<T> {
    pub fn new(ctx: Arc<OperatorContext<T>>, resource: Resource, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self { ctx, resource, namespace, name: name.into(), self_id: generate_self_id() }
    }

    fn self_record(&self, now: chrono::DateTime<chrono::Utc>) -> PeerRecord {
        PeerRecord {
            id: self.self_id.clone(),
            name: self.ctx.config.peering.name.clone(),
            namespace: self.namespace.clone(),
            priority: self.ctx.config.peering.priority,
            lifetime: self.ctx.config.peering.lifetime,
            last_seen: now,
        }
    }

    /// Refresh our heartbeat, decode the live peer set, and update the
    /// shared freeze broadcast. Returns the decoded peer set for logging.
    pub async fn heartbeat(&self) -> orbit_client::Result<BTreeMap<String, PeerRecord>> {
        let now = chrono::Utc::now();
        let existing = self.ctx.client.read_obj(&self.resource, self.namespace.as_deref(), &self.name).await?;
        let body = existing.map(|o| o.0).unwrap_or_default();
        let mut peers = decode_peers(&body);
        peers.insert(self.self_id.clone(), self.self_record(now));

        let mut patch = serde_json::json!({});
        let encoded: serde_json::Map<String, serde_json::Value> =
            peers.iter().map(|(id, p)| (id.clone(), peer_record_json(p))).collect();
        patch_set(&mut patch, &peers_path(), serde_json::Value::Object(encoded));
        self.ctx.client.patch_obj(&self.resource, self.namespace.as_deref(), &self.name, &patch).await?;

        self.ctx.set_frozen(should_freeze(&peers, self.ctx.config.peering.priority, now));
        Ok(peers)
    }

    /// Remove our own record from the shared object, so other instances
    /// stop counting us as alive immediately rather than waiting out our
    /// lifetime (spec.md §4.11 "a clean shutdown disappears immediately").
    pub async fn disappear(&self) -> orbit_client::Result<()> {
        let existing = self.ctx.client.read_obj(&self.resource, self.namespace.as_deref(), &self.name).await?;
        let Some(existing) = existing else { return Ok(()) };
        let mut peers = decode_peers(&existing.0);
        peers.remove(&self.self_id);
        let mut patch = serde_json::json!({});
        let encoded: serde_json::Map<String, serde_json::Value> =
            peers.iter().map(|(id, p)| (id.clone(), peer_record_json(p))).collect();
        patch_set(&mut patch, &peers_path(), serde_json::Value::Object(encoded));
        self.ctx.client.patch_obj(&self.resource, self.namespace.as_deref(), &self.name, &patch).await?;
        Ok(())
    }

    /// Heartbeat every `lifetime / 2` until `shutdown` fires, then call
    /// [`Self::disappear`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.ctx.config.peering.lifetime / 2;
        loop {
            if let Err(e) = self.heartbeat().await {
                tracing::warn!(error = %e, "peering heartbeat failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        if let Err(e) = self.disappear().await {
            tracing::warn!(error = %e, "peering disappear failed");
        }
    }
}
