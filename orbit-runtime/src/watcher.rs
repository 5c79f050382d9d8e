//! LIST-then-WATCH with reconnect-on-410 and freeze/shutdown awareness
//! (spec.md §4.6).
//!
//! Grounded on `kube_runtime::watcher`'s state machine (`Init` → `InitListed`
//! → `Watching`, restarting from `Init` on a `410 Gone`), adapted to push
//! raw events into the [`crate::queue::Queue`] rather than yielding a
//! `Stream` of `Event<K>` — the coalescing/backpressure behavior lives in
//! the queue, not the watcher.

use crate::queue::Queue;
use crate::throttle::Throttler;
use futures::StreamExt;
use orbit_client::{ApiClient, Error as ClientError, Transport};
use orbit_core::event::RawEvent;
use orbit_core::resource::Resource;
use std::sync::Arc;
use tokio::sync::watch;

/// Watch one resource/namespace pair until `shutdown` fires, restarting the
/// LIST+WATCH cycle through `throttler` after every error and skipping
/// cycles entirely while `freeze` reads `true` (spec.md §5 "a frozen
/// instance stops dispatching new events").
pub async fn run<T: Transport>(
    client: Arc<ApiClient<T>>,
    queue: Arc<Queue>,
    resource: Resource,
    namespace: Option<String>,
    mut freeze: watch::Receiver<bool>,
    throttler: Arc<Throttler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut resource_version: Option<String> = None;
    loop {
        if *shutdown.borrow() {
            return;
        }
        if *freeze.borrow() {
            tokio::select! {
                _ = freeze.changed() => continue,
                _ = shutdown.changed() => continue,
            }
        }

        let result = throttler
            .guard(|| {
                run_one_cycle(&client, &queue, &resource, namespace.as_deref(), &mut resource_version, &mut freeze, &mut shutdown)
            })
            .await;

        match result {
            Ok(None) => return, // shutdown observed mid-cycle
            Ok(Some(())) => continue,
            Err(ClientError::Gone) => {
                tracing::info!(resource = %resource, "resource version expired, re-listing");
                resource_version = None;
            }
            Err(e) => {
                tracing::warn!(resource = %resource, error = %e, "watch cycle failed, backing off");
            }
        }
    }
}

/// One LIST-if-needed-then-WATCH pass. Returns `Ok(None)` if shutdown fired
/// mid-stream, `Ok(Some(()))` if the watch ended normally (server closed
/// the connection; caller reconnects with the updated resource version).
async fn run_one_cycle<T: Transport>(
    client: &Arc<ApiClient<T>>,
    queue: &Arc<Queue>,
    resource: &Resource,
    namespace: Option<&str>,
    resource_version: &mut Option<String>,
    freeze: &mut watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> orbit_client::Result<Option<()>> {
    if resource_version.is_none() {
        let (items, rv) = client.list_objs(resource, namespace).await?;
        for item in items {
            if let Some(id) = item.id() {
                queue.dispatch(id, RawEvent::seeded(item));
            } else {
                tracing::warn!(resource = %resource, "list returned an object with no uid, skipping");
            }
        }
        *resource_version = Some(rv);
    }

    let rv = resource_version.clone().unwrap_or_else(|| "0".to_owned());
    let mut stream = client.watch_objs(resource, namespace, &rv).await?;

    loop {
        tokio::select! {
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        if let Some(new_rv) = event.object.resource_version() {
                            *resource_version = Some(new_rv.to_owned());
                        }
                        if let Some(id) = event.object.id() {
                            queue.dispatch(id, event);
                        } else if !event.is_bookmark() {
                            tracing::warn!(resource = %resource, "watch event with no uid, skipping");
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(Some(())),
                }
            }
            _ = freeze.changed() => {
                if *freeze.borrow() {
                    return Ok(Some(()));
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use orbit_client::Vault;
    use orbit_client::vault::ConnectionInfo;
    use orbit_core::object::RawObject;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedTransport {
        list_response: (u16, Vec<u8>),
        watch_lines: Mutex<Option<Vec<std::result::Result<Vec<u8>, String>>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn request(&self, _req: http::Request<Vec<u8>>) -> std::result::Result<http::Response<Vec<u8>>, String> {
            let (status, body) = self.list_response.clone();
            Ok(http::Response::builder().status(status).body(body).unwrap())
        }

        async fn watch(
            &self,
            _req: http::Request<Vec<u8>>,
        ) -> std::result::Result<BoxStream<'static, std::result::Result<Vec<u8>, String>>, String> {
            match self.watch_lines.lock().unwrap().take() {
                Some(lines) => Ok(Box::pin(stream::iter(lines))),
                // No scripted lines: the watch just hangs, as a real
                // long-poll connection would, so tests can race it against
                // freeze/shutdown deterministically.
                None => Ok(Box::pin(stream::pending())),
            }
        }
    }

    fn pods() -> Resource {
        Resource::new("", "v1", "pods")
    }

    #[tokio::test]
    async fn list_seeds_added_events_into_the_queue() {
        let list_body = json!({
            "metadata": {"resourceVersion": "10"},
            "items": [{"metadata": {"name": "a", "uid": "u-a"}}],
        });
        let transport = ScriptedTransport {
            list_response: (200, serde_json::to_vec(&list_body).unwrap()),
            watch_lines: Mutex::new(Some(vec![])),
        };
        let vault = Arc::new(Vault::new());
        vault.set(0, ConnectionInfo::with_server("https://cluster.example"));
        let client = Arc::new(ApiClient::new(Arc::new(transport), vault, Duration::from_secs(30)));

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let dispatched2 = Arc::clone(&dispatched);
        let queue = Queue::new(
            Duration::from_millis(50),
            Arc::new(move |id, _ev| {
                dispatched2.lock().unwrap().push(id);
                Box::pin(async {})
            }),
        );

        let mut rv = None;
        let (_ftx, mut frx) = watch::channel(false);
        let (_stx, mut srx) = watch::channel(false);
        let result = run_one_cycle(&client, &queue, &pods(), None, &mut rv, &mut frx, &mut srx).await;
        assert!(result.is_ok());
        assert_eq!(rv.as_deref(), Some("10"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dispatched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_mid_watch_returns_none() {
        let list_body = json!({"metadata": {"resourceVersion": "1"}, "items": []});
        // `watch_lines: None` makes the scripted transport hang forever on
        // WATCH, like a real long-poll connection, so the only way this
        // cycle ends is via the shutdown signal raised below.
        let transport = ScriptedTransport {
            list_response: (200, serde_json::to_vec(&list_body).unwrap()),
            watch_lines: Mutex::new(None),
        };
        let vault = Arc::new(Vault::new());
        vault.set(0, ConnectionInfo::with_server("https://cluster.example"));
        let client = Arc::new(ApiClient::new(Arc::new(transport), vault, Duration::from_secs(30)));
        let queue = Queue::new(Duration::from_millis(50), Arc::new(|_id, _ev| Box::pin(async {})));

        let mut rv = None;
        let (_ftx, mut frx) = watch::channel(false);
        let (stx, mut srx) = watch::channel(false);
        let cycle = run_one_cycle(&client, &queue, &pods(), None, &mut rv, &mut frx, &mut srx);
        tokio::pin!(cycle);
        tokio::select! {
            _ = &mut cycle => panic!("cycle should not finish before shutdown is signaled"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        stx.send(true).unwrap();
        let result = cycle.await.unwrap();
        assert!(result.is_none());
    }
}
