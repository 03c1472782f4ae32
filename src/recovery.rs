//! Failure detection and fleet emergency declaration (spec §4.5). Runs
//! entirely inside the broker: an executor's silence past its threshold
//! never surfaces as a transport error to a client, it becomes an
//! internal `FAILED` transition plus a batch of orphaned jobs for the
//! broker to redispatch through its normal selection path.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::broker::registry::ExecutorRegistry;
use crate::broker::sync::EmergencySlot;
use crate::clock::VectorClock;
use crate::emergency::{EmergencyContext, EmergencyLevel};
use crate::job::ExecutorHealth;

/// Tracks the last time each executor was heard from, independent of the
/// registry's own `last_heartbeat` field so that declaring an executor
/// FAILED doesn't require holding the registry's lock across the whole
/// sweep.
#[derive(Debug, Default)]
struct HeartbeatLog {
    last_seen: HashMap<String, chrono::DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RecoveryManager {
    registry: Arc<ExecutorRegistry>,
    emergency: Arc<EmergencySlot>,
    clock: VectorClock,
    log: Mutex<HeartbeatLog>,
    failed: Mutex<HashSet<String>>,
}

impl RecoveryManager {
    pub fn new(registry: Arc<ExecutorRegistry>, emergency: Arc<EmergencySlot>, clock: VectorClock) -> Self {
        Self {
            registry,
            emergency,
            clock,
            log: Mutex::new(HeartbeatLog::default()),
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// First contact with an executor (spec §4.5 "register"): start its
    /// heartbeat clock and clear any stale FAILED marker.
    pub fn register(&self, executor_id: &str) {
        self.log
            .lock()
            .unwrap()
            .last_seen
            .insert(executor_id.to_string(), Utc::now());
        self.failed.lock().unwrap().remove(executor_id);
    }

    /// Record a heartbeat. An executor that rejoins after being declared
    /// FAILED is un-failed here — the registry's health flips back to
    /// `Healthy` on the next `upsert_heartbeat` call, this just clears
    /// recovery's own bookkeeping so it can be declared FAILED again.
    pub fn heartbeat(&self, executor_id: &str) {
        self.log
            .lock()
            .unwrap()
            .last_seen
            .insert(executor_id.to_string(), Utc::now());
        self.failed.lock().unwrap().remove(executor_id);
    }

    /// Sweep for executors silent past `threshold`. Returns the ids newly
    /// declared FAILED this call (already-failed executors are not
    /// repeated). Marks the registry health and leaves in-flight-job
    /// draining to the caller, which holds the `InFlightJobs` table.
    pub fn check_timeouts(&self, threshold: Duration) -> Vec<String> {
        let now = Utc::now();
        let silent: Vec<String> = {
            let log = self.log.lock().unwrap();
            log.last_seen
                .iter()
                .filter(|(_, last)| {
                    now.signed_duration_since(**last)
                        .to_std()
                        .map(|gap| gap > threshold)
                        .unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        self.declare_failed_batch(&silent)
    }

    /// Force a failure declaration outside the heartbeat sweep (e.g. a
    /// probe came back refused). Idempotent.
    pub fn mark_failed(&self, executor_id: &str) -> bool {
        self.declare_failed_batch(std::slice::from_ref(&executor_id.to_string()))
            .into_iter()
            .next()
            .is_some()
    }

    fn declare_failed_batch(&self, candidates: &[String]) -> Vec<String> {
        let mut failed = self.failed.lock().unwrap();
        let mut newly = Vec::new();
        for id in candidates {
            if failed.insert(id.clone()) {
                self.registry.mark_health(id, ExecutorHealth::Failed);
                newly.push(id.clone());
            }
        }
        newly
    }

    /// Declare a fleet-wide emergency (spec §4.5 "declare_fleet_emergency"):
    /// ticks the broker's clock, stamps the declaration with the resulting
    /// snapshot, and installs it locally. Propagation to peers happens via
    /// the next metadata sync.
    pub fn declare_fleet_emergency(
        &self,
        kind: impl Into<String>,
        level: EmergencyLevel,
        location: Option<String>,
    ) -> EmergencyContext {
        self.clock.tick();
        let mut context = EmergencyContext::new(kind, level, self.clock.snapshot());
        if let Some(location) = location {
            context = context.with_location(location);
        }
        self.emergency.set(Some(context.clone()));
        context
    }

    /// Clear the local fleet emergency (spec §4.5 "clear_fleet_emergency").
    /// Like declaration, this is local until the next sync propagates it;
    /// a peer with a causally-later declaration will simply win
    /// reconciliation and the clear will be overwritten, which is correct.
    pub fn clear_fleet_emergency(&self) {
        self.clock.tick();
        self.emergency.set(None);
    }
}
