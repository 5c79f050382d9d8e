//! Per-handler progress persisted on the object (spec.md §3, §4.3, §6).
//!
//! Operates on two documents: the live `body` (read-only input) and an
//! accumulating `patch` (write-only output), the same read-body/write-patch
//! split `kube-runtime::finalizer` uses around a single [`Action`]-style
//! mutation before one `PATCH` call.
//!
//! On-object layout:
//! ```text
//! status.orbit.digest: <hex string>
//! status.orbit.progress.<handler_id>:
//!   started: <RFC3339 | null>
//!   stopped: <RFC3339 | null>
//!   retries: <int>
//!   success: <bool | absent>
//!   failure: <bool | absent>
//!   delayed: <RFC3339 | null>
//!   message: <string | null>
//! ```

use crate::diff::{self, FieldPath};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

fn progress_path(handler_id: &str) -> FieldPath {
    FieldPath::from(vec!["status", "orbit", "progress", handler_id])
}

fn digest_path() -> FieldPath {
    FieldPath::from(vec!["status", "orbit", "digest"])
}

/// One handler's recorded attempts, delays, and outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressRecord {
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub retries: u32,
    pub success: Option<bool>,
    pub failure: Option<bool>,
    pub delayed: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl ProgressRecord {
    fn from_value(v: &Value) -> Self {
        let get_time = |key: &str| {
            v.get(key)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        Self {
            started: get_time("started"),
            stopped: get_time("stopped"),
            retries: v.get("retries").and_then(Value::as_u64).unwrap_or(0) as u32,
            success: v.get("success").and_then(Value::as_bool),
            failure: v.get("failure").and_then(Value::as_bool),
            delayed: get_time("delayed"),
            message: v.get("message").and_then(Value::as_str).map(str::to_owned),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.success == Some(true) || self.failure == Some(true)
    }

    pub fn is_sleeping(&self, now: DateTime<Utc>) -> bool {
        self.delayed.is_some_and(|d| d > now)
    }

    pub fn is_awakened(&self, now: DateTime<Utc>) -> bool {
        !self.is_finished() && !self.is_sleeping(now)
    }
}

/// Shallow JSON-merge-patch overlay: `patch`'s keys win over `base`'s.
fn shallow_merge(base: Option<&Value>, patch: Option<&Value>) -> Value {
    let mut merged = base
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(p) = patch.and_then(Value::as_object) {
        for (k, v) in p {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

/// Read/write access to a single handler's [`ProgressRecord`].
///
/// Reads prefer `patch` over `body` so that, within one cycle, a store built
/// on the same `patch` sees its own pending writes.
pub struct ProgressStore<'a> {
    body: &'a Value,
    patch: &'a mut Value,
    handler_id: String,
}

impl<'a> ProgressStore<'a> {
    pub fn new(body: &'a Value, patch: &'a mut Value, handler_id: impl Into<String>) -> Self {
        Self {
            body,
            patch,
            handler_id: handler_id.into(),
        }
    }

    fn path(&self) -> FieldPath {
        progress_path(&self.handler_id)
    }

    fn record(&self) -> ProgressRecord {
        let path = self.path();
        let from_body = diff::resolve(self.body, &path);
        let from_patch = diff::resolve(self.patch, &path);
        ProgressRecord::from_value(&shallow_merge(from_body.as_ref(), from_patch.as_ref()))
    }

    pub fn is_started(&self) -> bool {
        self.record().is_started()
    }

    pub fn is_finished(&self) -> bool {
        self.record().is_finished()
    }

    pub fn is_sleeping(&self, now: DateTime<Utc>) -> bool {
        self.record().is_sleeping(now)
    }

    pub fn is_awakened(&self, now: DateTime<Utc>) -> bool {
        self.record().is_awakened(now)
    }

    pub fn retry_count(&self) -> u32 {
        self.record().retries
    }

    fn write_field(&mut self, field: &str, value: Value) {
        let path = self.path().push(field);
        diff::set_at(self.patch, &path, value);
    }

    pub fn set_start_time(&mut self, now: DateTime<Utc>) {
        self.write_field("started", Value::String(now.to_rfc3339()));
    }

    pub fn set_awake_time(&mut self, now: DateTime<Utc>, delay: Duration) {
        let wake_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        self.write_field("delayed", Value::String(wake_at.to_rfc3339()));
    }

    /// Increments `retries` and sets `delayed` to `now + delay`.
    pub fn set_retry_time(&mut self, now: DateTime<Utc>, delay: Duration) {
        let retries = self.record().retries + 1;
        self.write_field("retries", Value::from(retries));
        self.set_awake_time(now, delay);
    }

    /// Records a terminal success, bumping `retries` and optionally merging
    /// `result` into `status.<handler_id>`.
    pub fn store_success(&mut self, now: DateTime<Utc>, result: Option<Value>) {
        let retries = self.record().retries + 1;
        self.write_field("stopped", Value::String(now.to_rfc3339()));
        self.write_field("success", Value::Bool(true));
        self.write_field("retries", Value::from(retries));
        if let Some(result) = result {
            let path = FieldPath::from(vec!["status", self.handler_id.as_str()]);
            diff::set_at(self.patch, &path, result);
        }
    }

    pub fn store_failure(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        self.write_field("stopped", Value::String(now.to_rfc3339()));
        self.write_field("failure", Value::Bool(true));
        self.write_field("message", Value::String(message.into()));
    }
}

/// Read the digest stored from the last completed cycle, preferring `patch`.
pub fn stored_digest(body: &Value, patch: &Value) -> Option<String> {
    diff::resolve(patch, &digest_path())
        .or_else(|| diff::resolve(body, &digest_path()))
        .and_then(|v| v.as_str().map(str::to_owned))
}

pub fn set_stored_digest(patch: &mut Value, digest: impl Into<String>) {
    diff::set_at(patch, &digest_path(), Value::String(digest.into()));
}

/// Null out the whole progress map, optionally recording a new digest for
/// the cycle that is about to start. Called at the end of a successful
/// cycle, and whenever the digest mismatch invalidates in-flight progress
/// (P5).
pub fn purge_progress(patch: &mut Value, new_digest: Option<String>) {
    diff::set_at(patch, &FieldPath::from(vec!["status", "orbit", "progress"]), Value::Null);
    if let Some(digest) = new_digest {
        set_stored_digest(patch, digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_prefer_patch_over_body_within_one_cycle() {
        let body = json!({"status": {"orbit": {"progress": {"h1": {"retries": 1}}}}});
        let mut patch = json!({});
        {
            let mut store = ProgressStore::new(&body, &mut patch, "h1");
            assert_eq!(store.retry_count(), 1);
            store.set_retry_time(Utc::now(), Duration::from_secs(5));
        }
        let store = ProgressStore::new(&body, &mut patch, "h1");
        assert_eq!(store.retry_count(), 2);
        assert!(store.is_sleeping(Utc::now()));
    }

    #[test]
    fn store_success_sets_terminal_fields_and_merges_result() {
        let body = json!({});
        let mut patch = json!({});
        let now = Utc::now();
        {
            let mut store = ProgressStore::new(&body, &mut patch, "h1");
            store.store_success(now, Some(json!({"ok": true})));
        }
        let store = ProgressStore::new(&body, &mut patch, "h1");
        assert!(store.is_finished());
        assert_eq!(patch["status"]["h1"], json!({"ok": true}));
    }

    #[test]
    fn purge_nulls_progress_and_sets_digest() {
        let body = json!({"status": {"orbit": {"progress": {"h1": {"success": true}}}}});
        let mut patch = json!({});
        purge_progress(&mut patch, Some("abc123".into()));
        assert_eq!(patch["status"]["orbit"]["progress"], Value::Null);
        assert_eq!(stored_digest(&body, &patch).as_deref(), Some("abc123"));
    }
}
