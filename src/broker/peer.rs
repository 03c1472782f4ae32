//! Peer-broker bookkeeping: the discovery/sync state machine (spec
//! §4.3.6). Transitions are driven only by probe/sync outcomes; the main
//! job-dispatch path never touches this table.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unknown,
    Probing,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub node_id: String,
    pub endpoint: String,
    pub state: PeerState,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub unhealthy_since: Option<DateTime<Utc>>,
}

/// Grace period after which a dropped-past-grace peer is removed
/// entirely from the table rather than retried forever.
const DROP_GRACE_SECONDS: i64 = 600;

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<String, PeerEntry>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly discovered peer endpoint if not already known
    /// (spec §4.3.5 discovery loop: "insert or refresh the peer").
    pub fn discovered(&self, node_id: &str, endpoint: &str) {
        let mut guard = self.peers.lock().unwrap();
        guard
            .entry(node_id.to_string())
            .and_modify(|entry| entry.endpoint = endpoint.to_string())
            .or_insert(PeerEntry {
                node_id: node_id.to_string(),
                endpoint: endpoint.to_string(),
                state: PeerState::Unknown,
                last_sync_at: None,
                unhealthy_since: None,
            });
    }

    pub fn mark_probing(&self, node_id: &str) {
        self.transition(node_id, PeerState::Probing);
    }

    pub fn mark_healthy(&self, node_id: &str) {
        let mut guard = self.peers.lock().unwrap();
        if let Some(entry) = guard.get_mut(node_id) {
            entry.state = PeerState::Healthy;
            entry.unhealthy_since = None;
            entry.last_sync_at = Some(Utc::now());
        }
    }

    pub fn mark_unhealthy(&self, node_id: &str) {
        let mut guard = self.peers.lock().unwrap();
        if let Some(entry) = guard.get_mut(node_id) {
            if entry.state != PeerState::Unhealthy {
                entry.unhealthy_since = Some(Utc::now());
            }
            entry.state = PeerState::Unhealthy;
        }
    }

    fn transition(&self, node_id: &str, state: PeerState) {
        if let Some(entry) = self.peers.lock().unwrap().get_mut(node_id) {
            entry.state = state;
        }
    }

    /// Drop peers that have been unhealthy past the grace window.
    pub fn drop_expired(&self) {
        let mut guard = self.peers.lock().unwrap();
        let now = Utc::now();
        guard.retain(|_, entry| match entry.unhealthy_since {
            Some(since) => (now - since).num_seconds() < DROP_GRACE_SECONDS,
            None => true,
        });
    }

    pub fn healthy_peers(&self) -> Vec<PeerEntry> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.state == PeerState::Healthy)
            .cloned()
            .collect()
    }

    /// Union with another broker's peer table entries, as exchanged
    /// during sync (spec §4.3.5 step 4).
    pub fn union_with(&self, others: &[PeerEntry]) {
        for other in others {
            self.discovered(&other.node_id, &other.endpoint);
        }
    }

    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.peers.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
