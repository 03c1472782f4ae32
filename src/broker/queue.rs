//! The broker's job queue: a conceptually ordered sequence whose head is
//! always the next job to dispatch (spec §4.3.2). Backed by a `Vec`
//! behind a single lock and re-sorted on insert — queues are bounded by
//! `queue_capacity` (default 10,000), so a linear re-sort is cheap enough
//! and keeps the ordering rule in one obviously-correct place.

use std::sync::Mutex;

use crate::clock::{compare_snapshots, CausalOrder};
use crate::emergency::EmergencyLevel;
use crate::error::FabricError;
use crate::job::{JobId, JobSubmission};

fn ordering_key(job: &JobSubmission) -> (i32, f64) {
    let emergency_tier = match job.emergency_level {
        Some(EmergencyLevel::High) | Some(EmergencyLevel::Critical) => 0,
        _ => 1,
    };
    (emergency_tier, -job.priority_score)
}

fn total_order(a: &JobSubmission, b: &JobSubmission) -> std::cmp::Ordering {
    let (a_tier, a_neg_score) = ordering_key(a);
    let (b_tier, b_neg_score) = ordering_key(b);
    a_tier
        .cmp(&b_tier)
        .then_with(|| a_neg_score.partial_cmp(&b_neg_score).unwrap_or(std::cmp::Ordering::Equal))
        .then_with(|| {
            match compare_snapshots(&a.submission_clock, &b.submission_clock) {
                CausalOrder::Before => std::cmp::Ordering::Less,
                CausalOrder::After => std::cmp::Ordering::Greater,
                CausalOrder::Equal | CausalOrder::Concurrent => std::cmp::Ordering::Equal,
            }
        })
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.job_id.cmp(&b.job_id))
}

#[derive(Debug, Default)]
pub struct JobQueue {
    entries: Mutex<Vec<JobSubmission>>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Push a job, maintaining total order (spec §4.3.2). Rejects with
    /// `QueueSaturated` at capacity without mutating the queue.
    pub fn push(&self, job: JobSubmission) -> Result<(), FabricError> {
        let mut guard = self.entries.lock().unwrap();
        if guard.len() >= self.capacity {
            return Err(FabricError::QueueSaturated);
        }
        guard.push(job);
        guard.sort_by(total_order);
        Ok(())
    }

    pub fn peek_head(&self) -> Option<JobSubmission> {
        self.entries.lock().unwrap().first().cloned()
    }

    pub fn remove(&self, job_id: &JobId) -> Option<JobSubmission> {
        let mut guard = self.entries.lock().unwrap();
        let idx = guard.iter().position(|j| &j.job_id == job_id)?;
        Some(guard.remove(idx))
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.entries.lock().unwrap().iter().any(|j| &j.job_id == job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<JobSubmission> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CapabilitiesRequired, JobInfo};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn job(id_seed: u128, priority: f64, emergency: Option<EmergencyLevel>, clock: &[(&str, u64)]) -> JobSubmission {
        JobSubmission {
            job_id: JobId::from_u128(id_seed),
            job_info: JobInfo {
                payload: vec![],
                capabilities_required: CapabilitiesRequired::default(),
                dependencies: vec![],
                user_priority: 0,
                deadline_urgency: 0.0,
                computational_weight: 0.0,
                deadline: None,
            },
            submitted_at: Utc::now(),
            submission_clock: clock.iter().map(|(k, v)| (k.to_string(), *v)).collect::<BTreeMap<_, _>>(),
            is_emergency: emergency.is_some(),
            emergency_kind: emergency.map(|_| "fire".to_string()),
            emergency_level: emergency,
            priority_score: priority,
            assigned_executor: None,
        }
    }

    #[test]
    fn emergency_high_precedes_normal_regardless_of_score() {
        let queue = JobQueue::new(10);
        queue.push(job(1, 100.0, None, &[("b", 1)])).unwrap();
        queue.push(job(2, 1.0, Some(EmergencyLevel::High), &[("b", 2)])).unwrap();
        assert_eq!(queue.peek_head().unwrap().job_id, JobId::from_u128(2));
    }

    #[test]
    fn equal_tier_orders_by_priority_score_descending() {
        let queue = JobQueue::new(10);
        queue.push(job(1, 1.0, None, &[("b", 1)])).unwrap();
        queue.push(job(2, 9.0, None, &[("b", 2)])).unwrap();
        assert_eq!(queue.peek_head().unwrap().job_id, JobId::from_u128(2));
    }

    #[test]
    fn ties_break_by_causal_order_then_job_id() {
        let queue = JobQueue::new(10);
        queue.push(job(2, 5.0, None, &[("b", 2)])).unwrap();
        queue.push(job(1, 5.0, None, &[("b", 1)])).unwrap();
        // job 1's clock causally precedes job 2's clock (same key, smaller)
        assert_eq!(queue.peek_head().unwrap().job_id, JobId::from_u128(1));
    }

    #[test]
    fn saturated_queue_rejects_without_mutation() {
        let queue = JobQueue::new(1);
        queue.push(job(1, 1.0, None, &[("b", 1)])).unwrap();
        let err = queue.push(job(2, 1.0, None, &[("b", 2)])).unwrap_err();
        assert_eq!(err, FabricError::QueueSaturated);
        assert_eq!(queue.len(), 1);
    }
}
