//! Broker metadata sync: the periodic peer-to-peer reconciliation that
//! keeps the fleet's view of executors, peers, and the fleet emergency
//! context from diverging under churn (spec §4.3.5). Idempotent and
//! convergent per spec §8 invariants 4-5.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::broker::registry::ExecutorRecord;
use crate::clock::{ClockSnapshot, NodeId};
use crate::emergency::{reconcile, EmergencyContext, ReconcileOutcome};

/// The payload exchanged by `POST /broker/sync-metadata` (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMetadata {
    pub broker_id: NodeId,
    pub clock: ClockSnapshot,
    pub executors: Vec<ExecutorRecord>,
    pub peers: Vec<PeerAdvertisement>,
    pub emergency: Option<EmergencyContext>,
    pub job_counts: std::collections::HashMap<String, u64>,
    pub sync_sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAdvertisement {
    pub node_id: NodeId,
    pub endpoint: String,
}

/// Monotonic counter a broker stamps on every `BrokerMetadata` it builds,
/// purely informational (helps diagnostics tell sync attempts apart).
#[derive(Debug, Default)]
pub struct SyncSequence(Mutex<u64>);

impl SyncSequence {
    pub fn next(&self) -> u64 {
        let mut guard = self.0.lock().unwrap();
        *guard += 1;
        *guard
    }
}

/// The fleet emergency context, held behind a single lock, reconciled
/// during sync (spec §4.3.5 step 3).
#[derive(Debug, Default)]
pub struct EmergencySlot(Mutex<Option<EmergencyContext>>);

impl EmergencySlot {
    pub fn get(&self) -> Option<EmergencyContext> {
        self.0.lock().unwrap().clone()
    }

    pub fn set(&self, context: Option<EmergencyContext>) {
        *self.0.lock().unwrap() = context;
    }

    /// Reconcile against a peer's view; returns whether the local slot
    /// changed (i.e. the peer's context replaced ours).
    pub fn reconcile_with_peer(&self, peer: Option<&EmergencyContext>) -> bool {
        let mut guard = self.0.lock().unwrap();
        match reconcile(guard.as_ref(), peer) {
            ReconcileOutcome::NoChange => false,
            ReconcileOutcome::TakeRemote => {
                *guard = peer.cloned();
                true
            }
        }
    }
}
