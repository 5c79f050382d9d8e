//! Authenticated GET/LIST/WATCH/PATCH over the Kubernetes API (spec.md §4.4,
//! §6 wire shape).
//!
//! Grounded on `kube_client::Client`, which wraps an arbitrary
//! `tower::Service<http::Request<Body>>`; here the seam is a plain
//! [`Transport`] trait so a hyper/rustls backend (or a test double) can be
//! plugged in without this crate depending on a TLS stack directly. Watch
//! framing mirrors `kube_client::Client`'s use of `tokio_util::codec::LinesCodec`
//! over the chunked response body (Kubernetes streams one JSON object per
//! line).

use crate::error::{Error, Result};
use crate::vault::Vault;
use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use futures::stream::BoxStream;
use orbit_core::event::{RawEvent, WatchEventKind};
use orbit_core::object::RawObject;
use orbit_core::resource::Resource;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The pluggable transport seam. A concrete implementation sends a fully
/// formed `http::Request` and returns either a buffered response body (for
/// GET/LIST/PATCH) or a line-framed byte stream (for WATCH).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, req: http::Request<Vec<u8>>) -> std::result::Result<http::Response<Vec<u8>>, String>;

    async fn watch(
        &self,
        req: http::Request<Vec<u8>>,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<Vec<u8>, String>>, String>;
}

/// Authenticated client for one API server, backed by a [`Vault`] for
/// credentials and an exponential backoff for request retries.
pub struct ApiClient<T> {
    transport: Arc<T>,
    vault: Arc<Vault>,
    request_timeout: Duration,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: Arc<T>, vault: Arc<Vault>, request_timeout: Duration) -> Self {
        Self {
            transport,
            vault,
            request_timeout,
        }
    }

    fn server(&self) -> Result<String> {
        self.vault
            .current()
            .map(|c| c.server)
            .ok_or_else(|| Error::Login("vault has no valid credentials".into()))
    }

    fn authorize(&self, mut builder: http::request::Builder) -> Result<http::request::Builder> {
        if let Some(info) = self.vault.current() {
            if let Some(token) = info.token {
                builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
            }
        }
        Ok(builder)
    }

    /// Send one request, retrying on 429/503/504 with exponential backoff
    /// (spec.md §4.4, grounded on `kube_client::client::retry::RetryPolicy`'s
    /// default 500ms-5s/3-attempt policy). The request is rebuilt from its
    /// parts on each attempt since a body may only be sent once.
    async fn send(&self, req: http::Request<Vec<u8>>) -> Result<http::Response<Vec<u8>>> {
        let (parts, body) = req.into_parts();
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(3)
            .build();

        loop {
            let req = rebuild_request(&parts, &body)?;
            // A vault generation bump mid-request means our credentials may be
            // stale; the caller sees a transport error and retries, which
            // re-reads `self.vault.current()` and gets fresh creds.
            let generation_before = self.vault.generation();
            let result = self.transport.request(req).await.map_err(Error::Transport).and_then(|resp| {
                if self.vault.generation() != generation_before {
                    tracing::debug!("vault rotated mid-request, response may be stale");
                }
                match resp.status().as_u16() {
                    200..=299 => Ok(resp),
                    401 => Err(Error::Unauthorized),
                    status => Err(Error::from_status(status, String::from_utf8_lossy(resp.body()))),
                }
            });

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(error = %e, delay = ?delay, "retrying request");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// GET a single object. Returns `Ok(None)` for 403/404 instead of
    /// erroring, per spec.md §4.4 "may be swallowed when a default is
    /// supplied".
    pub async fn read_obj(&self, resource: &Resource, namespace: Option<&str>, name: &str) -> Result<Option<RawObject>> {
        let url = format!("{}{}", self.server()?, resource.get_url(namespace, Some(name), None, &[])?);
        let req = self.authorize(http::Request::get(url))?.body(Vec::new()).map_err(|e| Error::Transport(e.to_string()))?;
        match self.send(req).await {
            Ok(resp) => Ok(Some(RawObject::new(serde_json::from_slice(resp.body())?))),
            Err(e) if e.is_not_found_or_forbidden() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn read_crd(&self, name: &str) -> Result<Option<RawObject>> {
        let crds = Resource::new("apiextensions.k8s.io", "v1", "customresourcedefinitions");
        self.read_obj(&crds, None, name).await
    }

    /// LIST objects of `resource`, returning the items plus the list's
    /// `resourceVersion` for a subsequent WATCH.
    pub async fn list_objs(&self, resource: &Resource, namespace: Option<&str>) -> Result<(Vec<RawObject>, String)> {
        let url = format!("{}{}", self.server()?, resource.get_url(namespace, None, None, &[])?);
        let req = self.authorize(http::Request::get(url))?.body(Vec::new()).map_err(|e| Error::Transport(e.to_string()))?;
        let resp = self.send(req).await?;
        let body: Value = serde_json::from_slice(resp.body())?;
        let resource_version = body
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(Value::as_str)
            .unwrap_or("0")
            .to_owned();
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(RawObject::new)
            .collect();
        Ok((items, resource_version))
    }

    /// WATCH `resource` from `resource_version`, yielding one [`RawEvent`]
    /// per line of the chunked response.
    pub async fn watch_objs(
        &self,
        resource: &Resource,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<RawEvent>>> {
        let url = format!(
            "{}{}",
            self.server()?,
            resource.get_url(
                namespace,
                None,
                None,
                &[("watch", "true"), ("allowBookmarks", "true"), ("resourceVersion", resource_version)],
            )?
        );
        let req = self.authorize(http::Request::get(url))?.body(Vec::new()).map_err(|e| Error::Transport(e.to_string()))?;
        let lines = self.transport.watch(req).await.map_err(Error::Transport)?;
        Ok(Box::pin(futures::StreamExt::map(lines, |line| {
            let line = line.map_err(Error::Transport)?;
            decode_watch_line(&line)
        })))
    }

    /// POST a new object, e.g. a cluster `Event` (spec.md §4.10 "emit
    /// cluster events for notable state transitions").
    pub async fn create_obj(&self, resource: &Resource, namespace: Option<&str>, body: &Value) -> Result<RawObject> {
        let url = format!("{}{}", self.server()?, resource.get_url(namespace, None, None, &[])?);
        let payload = serde_json::to_vec(body)?;
        let req = self
            .authorize(http::Request::post(url).header(http::header::CONTENT_TYPE, "application/json"))?
            .body(payload)
            .map_err(|e| Error::Transport(e.to_string()))?;
        let resp = self.send(req).await?;
        Ok(RawObject::new(serde_json::from_slice(resp.body())?))
    }

    /// PATCH an object using `application/merge-patch+json` (spec.md §6).
    pub async fn patch_obj(&self, resource: &Resource, namespace: Option<&str>, name: &str, patch: &Value) -> Result<RawObject> {
        let url = format!("{}{}", self.server()?, resource.get_url(namespace, Some(name), None, &[])?);
        let body = serde_json::to_vec(patch)?;
        let req = self
            .authorize(
                http::Request::patch(url).header(http::header::CONTENT_TYPE, "application/merge-patch+json"),
            )?
            .body(body)
            .map_err(|e| Error::Transport(e.to_string()))?;
        let resp = self.send(req).await?;
        Ok(RawObject::new(serde_json::from_slice(resp.body())?))
    }

    /// Walk `/api` and `/apis` to enumerate every served `(group, version,
    /// plural)` — used by Discovery. Per SPEC_FULL.md Open Questions, every
    /// served version is walked, not only the first.
    pub async fn scan_resources(&self) -> Result<Vec<Resource>> {
        let mut out = Vec::new();
        out.extend(self.scan_group_version("", "v1", "/api/v1").await?);
        let groups_url = format!("{}/apis", self.server()?);
        let req = self.authorize(http::Request::get(groups_url))?.body(Vec::new()).map_err(|e| Error::Transport(e.to_string()))?;
        let resp = self.send(req).await?;
        let groups: Value = serde_json::from_slice(resp.body())?;
        for group in groups.get("groups").and_then(Value::as_array).into_iter().flatten() {
            let group_name = group.get("name").and_then(Value::as_str).unwrap_or_default();
            for version in group.get("versions").and_then(Value::as_array).into_iter().flatten() {
                let gv = version.get("groupVersion").and_then(Value::as_str).unwrap_or_default();
                let version_name = version.get("version").and_then(Value::as_str).unwrap_or_default();
                let path = format!("/apis/{gv}");
                out.extend(self.scan_group_version(group_name, version_name, &path).await?);
            }
        }
        Ok(out)
    }

    async fn scan_group_version(&self, group: &str, version: &str, path: &str) -> Result<Vec<Resource>> {
        let url = format!("{}{}", self.server()?, path);
        let req = self.authorize(http::Request::get(url))?.body(Vec::new()).map_err(|e| Error::Transport(e.to_string()))?;
        let resp = match self.send(req).await {
            Ok(r) => r,
            Err(e) if e.is_not_found_or_forbidden() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let body: Value = serde_json::from_slice(resp.body())?;
        let resources = body
            .get("resources")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|r| !r.get("name").and_then(Value::as_str).unwrap_or_default().contains('/')) // skip subresources
            .map(|r| Resource::new(group, version, r.get("name").and_then(Value::as_str).unwrap_or_default()))
            .collect();
        Ok(resources)
    }
}

/// Rebuild a request from its parts for a retry attempt, the way
/// `kube_client::client::retry::RetryPolicy::clone_request` re-derives a
/// fresh `http::Request` rather than reusing one whose body was consumed.
fn rebuild_request(parts: &http::request::Parts, body: &[u8]) -> Result<http::Request<Vec<u8>>> {
    let mut builder = http::Request::builder().method(parts.method.clone()).uri(parts.uri.clone()).version(parts.version);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(parts.headers.clone());
    }
    builder.body(body.to_vec()).map_err(|e| Error::Transport(e.to_string()))
}

fn decode_watch_line(line: &[u8]) -> Result<RawEvent> {
    let parsed: Value = serde_json::from_slice(line)?;
    let kind = match parsed.get("type").and_then(Value::as_str) {
        Some("ADDED") => WatchEventKind::Added,
        Some("MODIFIED") => WatchEventKind::Modified,
        Some("DELETED") => WatchEventKind::Deleted,
        Some("BOOKMARK") => WatchEventKind::Bookmark,
        _ => WatchEventKind::Error,
    };
    let object = parsed.get("object").cloned().unwrap_or(Value::Null);
    Ok(RawEvent::new(kind, RawObject::new(object)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::ConnectionInfo;
    use futures::stream;
    use std::sync::Mutex;

    struct MockTransport {
        responses: Mutex<Vec<(u16, Vec<u8>)>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn request(&self, _req: http::Request<Vec<u8>>) -> std::result::Result<http::Response<Vec<u8>>, String> {
            let (status, body) = self.responses.lock().unwrap().remove(0);
            Ok(http::Response::builder().status(status).body(body).unwrap())
        }

        async fn watch(
            &self,
            _req: http::Request<Vec<u8>>,
        ) -> std::result::Result<BoxStream<'static, std::result::Result<Vec<u8>, String>>, String> {
            Ok(Box::pin(stream::empty()))
        }
    }

    fn client_with(responses: Vec<(u16, Vec<u8>)>) -> ApiClient<MockTransport> {
        let vault = Arc::new(Vault::new());
        vault.set(0, ConnectionInfo::with_server("https://cluster.example"));
        ApiClient::new(Arc::new(MockTransport { responses: Mutex::new(responses) }), vault, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn read_obj_returns_none_on_404() {
        let client = client_with(vec![(404, b"not found".to_vec())]);
        let pods = Resource::new("", "v1", "pods");
        let result = client.read_obj(&pods, Some("default"), "missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_objs_parses_items_and_resource_version() {
        let body = serde_json::json!({
            "metadata": {"resourceVersion": "123"},
            "items": [{"metadata": {"name": "a"}}, {"metadata": {"name": "b"}}],
        });
        let client = client_with(vec![(200, serde_json::to_vec(&body).unwrap())]);
        let pods = Resource::new("", "v1", "pods");
        let (items, rv) = client.list_objs(&pods, None).await.unwrap();
        assert_eq!(rv, "123");
        assert_eq!(items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_status_is_retried_until_success() {
        let client = client_with(vec![(503, Vec::new()), (503, Vec::new()), (200, b"{}".to_vec())]);
        let pods = Resource::new("", "v1", "pods");
        let result = client.read_obj(&pods, Some("default"), "widget").await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_give_up_once_the_backoff_is_exhausted() {
        let client = client_with(vec![(503, Vec::new()); 5]);
        let pods = Resource::new("", "v1", "pods");
        let err = client.read_obj(&pods, Some("default"), "widget").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_login_retry_signal() {
        let client = client_with(vec![(401, Vec::new())]);
        let pods = Resource::new("", "v1", "pods");
        let err = client.list_objs(&pods, None).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[test]
    fn decode_watch_line_parses_event_kind() {
        let line = br#"{"type":"MODIFIED","object":{"metadata":{"name":"x"}}}"#;
        let ev = decode_watch_line(line).unwrap();
        assert!(matches!(ev.kind, WatchEventKind::Modified));
        assert_eq!(ev.object.name(), Some("x"));
    }
}
