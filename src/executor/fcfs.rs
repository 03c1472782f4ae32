//! First-come-first-served result acceptance: the key externally mandated
//! rule (spec §4.4.2, invariant 3 in §8). For any job id, at most one
//! [`ResultRecord`] is ever stored at a given executor.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{ClockSnapshot, NodeId, VectorClock};
use crate::error::FabricError;
use crate::job::JobId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub result: Vec<u8>,
    pub producing_executor: NodeId,
    pub completed_at: DateTime<Utc>,
    pub completion_clock: ClockSnapshot,
}

/// The executor's result table. A single lock guards all mutation (spec
/// §5: "same discipline" as the broker's shared structures); this is
/// exactly the serialization point the FCFS guarantee depends on —
/// whichever `submit_result` call acquires the lock first and finds no
/// existing record wins.
#[derive(Debug, Default)]
pub struct ResultTable {
    records: Mutex<HashMap<JobId, ResultRecord>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to accept a result for `job_id`. `clock` must already have
    /// merged the sender's clock and ticked (the caller does this via
    /// [`crate::message::CausalMessage::receive`] before calling in).
    /// Returns `Ok(())` on accept, `Err(AlreadyAccepted)` if a record
    /// already exists — the FCFS rule.
    pub fn submit(
        &self,
        job_id: JobId,
        result: Vec<u8>,
        producing_executor: NodeId,
        clock: &VectorClock,
    ) -> Result<(), FabricError> {
        let mut guard = self.records.lock().unwrap();
        if guard.contains_key(&job_id) {
            return Err(FabricError::AlreadyAccepted(job_id.to_string()));
        }
        guard.insert(
            job_id,
            ResultRecord {
                job_id,
                result,
                producing_executor,
                completed_at: Utc::now(),
                completion_clock: clock.snapshot(),
            },
        );
        Ok(())
    }

    pub fn get(&self, job_id: &JobId) -> Option<ResultRecord> {
        self.records.lock().unwrap().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.records.lock().unwrap().contains_key(job_id)
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
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_submission_accepted_second_rejected() {
        let table = ResultTable::new();
        let clock = VectorClock::new("e1");
        let job_id = JobId::new_v4();
        assert!(table
            .submit(job_id, b"r1".to_vec(), "e1".into(), &clock)
            .is_ok());
        let err = table
            .submit(job_id, b"r2".to_vec(), "e1".into(), &clock)
            .unwrap_err();
        assert_eq!(err, FabricError::AlreadyAccepted(job_id.to_string()));
        assert_eq!(table.get(&job_id).unwrap().result, b"r1".to_vec());
    }

    #[test]
    fn concurrent_submissions_yield_exactly_one_winner() {
        let table = Arc::new(ResultTable::new());
        let job_id = JobId::new_v4();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                thread::spawn(move || {
                    let clock = VectorClock::new(format!("e{i}"));
                    table.submit(job_id, vec![i as u8], format!("e{i}"), &clock)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 7);
        assert_eq!(table.len(), 1);
    }
}
