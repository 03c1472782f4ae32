//! The broker's view of the executor fleet (spec §3 "ExecutorRecord").
//! Brokers hold only id + endpoint + last-reported state, never a back
//! pointer to the executor itself (spec §9: cyclic references collapse
//! into one-way references; executors call back by endpoint).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::ClockSnapshot;
use crate::job::ExecutorHealth;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRecord {
    pub executor_id: String,
    pub endpoint: String,
    pub capabilities: HashSet<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_clock: ClockSnapshot,
    pub emergency_mode: bool,
    pub health: ExecutorHealth,
    pub running_job_count: usize,
}

/// All brokers' knowledge of the executor fleet, guarded by a single
/// lock (spec §5: "mutated only by the broker's own threads under a
/// single lock per structure").
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    records: Mutex<HashMap<String, ExecutorRecord>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_heartbeat(
        &self,
        executor_id: &str,
        endpoint: &str,
        capabilities: HashSet<String>,
        clock: ClockSnapshot,
        emergency_mode: bool,
    ) {
        let mut guard = self.records.lock().unwrap();
        let record = guard
            .entry(executor_id.to_string())
            .or_insert_with(|| ExecutorRecord {
                executor_id: executor_id.to_string(),
                endpoint: endpoint.to_string(),
                capabilities: HashSet::new(),
                last_heartbeat: Utc::now(),
                last_clock: ClockSnapshot::new(),
                emergency_mode: false,
                health: ExecutorHealth::Healthy,
                running_job_count: 0,
            });
        record.endpoint = endpoint.to_string();
        record.capabilities = capabilities;
        record.last_heartbeat = Utc::now();
        record.last_clock = clock;
        record.emergency_mode = emergency_mode;
        record.health = ExecutorHealth::Healthy;
    }

    pub fn get(&self, executor_id: &str) -> Option<ExecutorRecord> {
        self.records.lock().unwrap().get(executor_id).cloned()
    }

    pub fn mark_health(&self, executor_id: &str, health: ExecutorHealth) {
        if let Some(record) = self.records.lock().unwrap().get_mut(executor_id) {
            record.health = health;
        }
    }

    pub fn set_running_count(&self, executor_id: &str, count: usize) {
        if let Some(record) = self.records.lock().unwrap().get_mut(executor_id) {
            record.running_job_count = count;
        }
    }

    /// Candidates satisfying `required`, healthy, ranked by spec §4.3.3:
    /// (a) not in emergency mode unless the job is emergency, (b) lowest
    /// load, (c) lexicographically smallest id.
    pub fn select_candidate(
        &self,
        required: &crate::job::CapabilitiesRequired,
        job_is_emergency: bool,
        excluded: &HashSet<String>,
    ) -> Option<ExecutorRecord> {
        let guard = self.records.lock().unwrap();
        guard
            .values()
            .filter(|record| {
                record.health == ExecutorHealth::Healthy
                    && !excluded.contains(&record.executor_id)
                    && required.satisfied_by(&record.capabilities)
            })
            .min_by(|a, b| {
                let a_key = (
                    a.emergency_mode && !job_is_emergency,
                    a.running_job_count,
                    a.executor_id.clone(),
                );
                let b_key = (
                    b.emergency_mode && !job_is_emergency,
                    b.running_job_count,
                    b.executor_id.clone(),
                );
                a_key.cmp(&b_key)
            })
            .cloned()
    }

    /// Insert-or-reconcile against a peer's view of one executor (spec
    /// §4.3.5 step 2): unknown locally → insert; known → keep whichever
    /// is causally later, or — if concurrent — the fresher heartbeat,
    /// final tie-break by executor id (which is moot, same id).
    pub fn reconcile_with_peer(&self, peer_record: &ExecutorRecord) {
        use crate::clock::{compare_snapshots, CausalOrder};
        let mut guard = self.records.lock().unwrap();
        match guard.get(&peer_record.executor_id) {
            None => {
                guard.insert(peer_record.executor_id.clone(), peer_record.clone());
            }
            Some(local) => {
                let take_peer = match compare_snapshots(&local.last_clock, &peer_record.last_clock)
                {
                    CausalOrder::Before => true,
                    CausalOrder::After | CausalOrder::Equal => false,
                    CausalOrder::Concurrent => peer_record.last_heartbeat > local.last_heartbeat,
                };
                if take_peer {
                    guard.insert(peer_record.executor_id.clone(), peer_record.clone());
                }
            }
        }
    }

    pub fn snapshot(&self) -> Vec<ExecutorRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CapabilitiesRequired;

    fn record(id: &str, health: ExecutorHealth, load: usize, emergency: bool) -> ExecutorRecord {
        ExecutorRecord {
            executor_id: id.to_string(),
            endpoint: format!("http://{id}"),
            capabilities: HashSet::new(),
            last_heartbeat: Utc::now(),
            last_clock: ClockSnapshot::new(),
            emergency_mode: emergency,
            health,
            running_job_count: load,
        }
    }

    #[test]
    fn selection_prefers_lowest_load_among_healthy() {
        let registry = ExecutorRegistry::new();
        registry.upsert_heartbeat("e1", "http://e1", HashSet::new(), ClockSnapshot::new(), false);
        registry.upsert_heartbeat("e2", "http://e2", HashSet::new(), ClockSnapshot::new(), false);
        registry.set_running_count("e1", 3);
        registry.set_running_count("e2", 1);
        let chosen = registry
            .select_candidate(&CapabilitiesRequired::default(), false, &HashSet::new())
            .unwrap();
        assert_eq!(chosen.executor_id, "e2");
    }

    #[test]
    fn selection_skips_unhealthy_and_excluded() {
        let registry = ExecutorRegistry::new();
        registry.upsert_heartbeat("e1", "http://e1", HashSet::new(), ClockSnapshot::new(), false);
        registry.mark_health("e1", ExecutorHealth::Failed);
        registry.upsert_heartbeat("e2", "http://e2", HashSet::new(), ClockSnapshot::new(), false);
        let mut excluded = HashSet::new();
        excluded.insert("e2".to_string());
        let chosen = registry.select_candidate(&CapabilitiesRequired::default(), false, &excluded);
        assert!(chosen.is_none());
    }

    #[test]
    fn normal_jobs_avoid_executors_already_in_emergency_mode() {
        let registry = ExecutorRegistry::new();
        registry.upsert_heartbeat("e1", "http://e1", HashSet::new(), ClockSnapshot::new(), true);
        registry.upsert_heartbeat("e2", "http://e2", HashSet::new(), ClockSnapshot::new(), false);
        let chosen = registry
            .select_candidate(&CapabilitiesRequired::default(), false, &HashSet::new())
            .unwrap();
        assert_eq!(chosen.executor_id, "e2");
    }

    #[test]
    fn reconcile_inserts_unknown_executor() {
        let registry = ExecutorRegistry::new();
        registry.reconcile_with_peer(&record("x", ExecutorHealth::Healthy, 0, false));
        assert!(registry.get("x").is_some());
    }
}
