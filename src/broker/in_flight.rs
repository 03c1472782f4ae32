//! Jobs the broker has dispatched but not yet seen a result for,
//! indexed by the executor they were sent to. This is what the recovery
//! manager drains when an executor is declared FAILED (spec §4.5 step 3:
//! "pulls the executor's in-flight job list... marks them orphaned").

use std::collections::HashMap;
use std::sync::Mutex;

use crate::job::{JobId, JobSubmission};

#[derive(Debug, Default)]
pub struct InFlightJobs {
    by_executor: Mutex<HashMap<String, Vec<JobSubmission>>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, executor_id: &str, job: JobSubmission) {
        self.by_executor
            .lock()
            .unwrap()
            .entry(executor_id.to_string())
            .or_default()
            .push(job);
    }

    /// Remove and return a job once its result has been accepted
    /// (or it was otherwise resolved), regardless of which executor it
    /// was recorded under.
    pub fn resolve(&self, job_id: &JobId) -> Option<JobSubmission> {
        let mut guard = self.by_executor.lock().unwrap();
        for jobs in guard.values_mut() {
            if let Some(idx) = jobs.iter().position(|j| &j.job_id == job_id) {
                return Some(jobs.remove(idx));
            }
        }
        None
    }

    /// Look up which executor (if any) currently holds `job_id`, without
    /// removing it.
    pub fn locate(&self, job_id: &JobId) -> Option<String> {
        let guard = self.by_executor.lock().unwrap();
        guard
            .iter()
            .find(|(_, jobs)| jobs.iter().any(|j| &j.job_id == job_id))
            .map(|(executor_id, _)| executor_id.clone())
    }

    /// Drain all jobs in flight on `executor_id` — used when that
    /// executor is declared FAILED.
    pub fn drain_executor(&self, executor_id: &str) -> Vec<JobSubmission> {
        self.by_executor
            .lock()
            .unwrap()
            .remove(executor_id)
            .unwrap_or_default()
    }

    pub fn count_for(&self, executor_id: &str) -> usize {
        self.by_executor
            .lock()
            .unwrap()
            .get(executor_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CapabilitiesRequired, JobInfo};
    use chrono::Utc;

    fn job(id: JobId) -> JobSubmission {
        JobSubmission {
            job_id: id,
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
            submission_clock: Default::default(),
            is_emergency: false,
            emergency_kind: None,
            emergency_level: None,
            priority_score: 0.0,
            assigned_executor: Some("e1".to_string()),
        }
    }

    #[test]
    fn draining_a_failed_executor_returns_its_jobs_only() {
        let table = InFlightJobs::new();
        let j1 = JobId::new_v4();
        let j2 = JobId::new_v4();
        table.record("e1", job(j1));
        table.record("e2", job(j2));
        let orphaned = table.drain_executor("e1");
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].job_id, j1);
        assert_eq!(table.count_for("e2"), 1);
    }

    #[test]
    fn resolve_removes_regardless_of_executor() {
        let table = InFlightJobs::new();
        let id = JobId::new_v4();
        table.record("e1", job(id));
        assert!(table.resolve(&id).is_some());
        assert_eq!(table.count_for("e1"), 0);
    }
}
