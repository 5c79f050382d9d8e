//! Operator configuration knobs (spec.md §6 "Configuration knobs"),
//! assembled as a plain struct with `Default` the way `kube_client::Config`
//! is assembled and defaulted.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProgressStorage {
    Status,
    Annotations,
}

#[derive(Debug, Clone)]
pub struct WatchingConfig {
    /// `watching.server_timeout`: how long the API server is asked to keep
    /// a WATCH stream open before it closes it on its own.
    pub server_timeout: Duration,
    /// `watching.client_timeout`: how long we wait for a line on the stream
    /// before treating it as dead and restarting.
    pub client_timeout: Duration,
}

impl Default for WatchingConfig {
    fn default() -> Self {
        Self {
            server_timeout: Duration::from_secs(10 * 60),
            client_timeout: Duration::from_secs(10 * 60 + 10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// `batching.idle_timeout`: how long a per-object worker waits with no
    /// new events before the Queue Multiplexer evicts it.
    pub idle_timeout: Duration,
    /// `batching.batch_window`: coalescing window before processing the
    /// latest known state of a rapidly-changing object.
    pub batch_window: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            batch_window: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// `persistence.finalizer`: the string added to `metadata.finalizers`.
    pub finalizer: String,
    /// `persistence.progress_storage`: where Progress Records live.
    pub progress_storage: ProgressStorage,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            finalizer: "orbit.dev/finalizer".to_owned(),
            progress_storage: ProgressStorage::Status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeeringConfig {
    /// `peering.name`: the shared object all instances coordinate through.
    pub name: String,
    /// `peering.priority`: this instance's priority in freeze arbitration.
    pub priority: i64,
    /// `peering.lifetime`: how long a heartbeat stays valid; refreshed at
    /// `lifetime / 2` (spec.md §4.11).
    pub lifetime: Duration,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            priority: 0,
            lifetime: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkingConfig {
    pub request_timeout: Duration,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone)]
pub struct RetriesConfig {
    pub default_backoff: Duration,
    /// `retries.default_limit`: `None` means unlimited, matching the
    /// original source's default of retrying forever absent an explicit cap.
    pub default_limit: Option<u32>,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self { default_backoff: Duration::from_secs(1), default_limit: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    pub watching: WatchingConfig,
    pub batching: BatchingConfig,
    pub persistence: PersistenceConfig,
    pub peering: PeeringConfig,
    pub networking: NetworkingConfig,
    pub retries: RetriesConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OperatorConfig::default();
        assert!(cfg.watching.client_timeout > cfg.watching.server_timeout);
        assert_eq!(cfg.retries.default_limit, None);
        assert_eq!(cfg.persistence.progress_storage, ProgressStorage::Status);
    }
}
