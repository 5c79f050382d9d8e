//! The record each operator instance writes to coordinate via peering
//! (spec.md §3, §4.11).

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One operator instance's heartbeat, as stored in the shared peering object.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub priority: i64,
    pub lifetime: Duration,
    pub last_seen: DateTime<Utc>,
}

impl PeerRecord {
    /// Whether this peer's heartbeat is still considered live at `now`.
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_seen);
        match chrono::Duration::from_std(self.lifetime) {
            Ok(lifetime) => age < lifetime,
            Err(_) => false,
        }
    }

    /// A peer with strictly higher priority that is still alive freezes us.
    pub fn outranks(&self, our_priority: i64, now: DateTime<Utc>) -> bool {
        self.priority > our_priority && self.is_alive(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(priority: i64, age: Duration, lifetime: Duration) -> PeerRecord {
        PeerRecord {
            id: "p".into(),
            name: "p".into(),
            namespace: None,
            priority,
            lifetime,
            last_seen: Utc::now() - chrono::Duration::from_std(age).unwrap(),
        }
    }

    #[test]
    fn higher_priority_live_peer_outranks() {
        let p = peer(200, Duration::from_secs(1), Duration::from_secs(30));
        assert!(p.outranks(100, Utc::now()));
    }

    #[test]
    fn expired_peer_does_not_outrank() {
        let p = peer(200, Duration::from_secs(60), Duration::from_secs(30));
        assert!(!p.outranks(100, Utc::now()));
    }

    #[test]
    fn lower_priority_never_outranks() {
        let p = peer(50, Duration::from_secs(1), Duration::from_secs(30));
        assert!(!p.outranks(100, Utc::now()));
    }
}
