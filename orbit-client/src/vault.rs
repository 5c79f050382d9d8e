//! Credentials Vault: priority-ordered connection info with change
//! notification (spec.md §4, §6 "Credentials contract").
//!
//! Grounded on `kube_client::Config` holding the active auth state, with
//! the watch/broadcast shape of `kube_runtime::utils::broadcast` used for
//! "notify dependents on change" — every API session mid-request closes
//! and re-acquires credentials transparently when the generation bumps.

use parking_lot::RwLock;
use tokio::sync::watch;

/// Connection info for one credentials entry (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub server: String,
    pub ca_data: Option<Vec<u8>>,
    pub insecure: bool,
    pub token: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_namespace: Option<String>,
}

impl ConnectionInfo {
    pub fn with_server(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Default::default()
        }
    }
}

struct Entry {
    priority: i64,
    info: ConnectionInfo,
}

struct State {
    entries: Vec<Entry>,
    generation: u64,
}

/// Holds and rotates connection info, notifying dependents on change.
pub struct Vault {
    state: RwLock<State>,
    notify_tx: watch::Sender<u64>,
}

impl Vault {
    pub fn new() -> Self {
        let (notify_tx, _) = watch::channel(0);
        Self {
            state: RwLock::new(State {
                entries: Vec::new(),
                generation: 0,
            }),
            notify_tx,
        }
    }

    /// Insert or replace the entry at `priority`, bumping the generation and
    /// notifying subscribers.
    pub fn set(&self, priority: i64, info: ConnectionInfo) {
        let mut state = self.state.write();
        match state.entries.iter_mut().find(|e| e.priority == priority) {
            Some(e) => e.info = info,
            None => {
                state.entries.push(Entry { priority, info });
                state.entries.sort_by(|a, b| b.priority.cmp(&a.priority));
            }
        }
        state.generation += 1;
        let _ = self.notify_tx.send(state.generation);
    }

    /// Demote (remove) the entry at `priority`: an in-flight session using
    /// it must re-acquire credentials.
    pub fn invalidate(&self, priority: i64) {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|e| e.priority != priority);
        if state.entries.len() != before {
            state.generation += 1;
            let _ = self.notify_tx.send(state.generation);
        }
    }

    /// Invalidate every entry, forcing full re-login on next use.
    pub fn invalidate_all(&self) {
        let mut state = self.state.write();
        if !state.entries.is_empty() {
            state.entries.clear();
            state.generation += 1;
            let _ = self.notify_tx.send(state.generation);
        }
    }

    /// The highest-priority valid entry, if any.
    pub fn current(&self) -> Option<ConnectionInfo> {
        self.state.read().entries.first().map(|e| e.info.clone())
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Subscribe to generation bumps; callers compare against the value
    /// they last observed to detect "the vault changed under me".
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify_tx.subscribe()
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}
