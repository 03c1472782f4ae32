//! The executor: job admission, the conflict-resolution dispatch pump,
//! and FCFS result acceptance (spec §4.4). One executor, one configured
//! [`scheduler::ConflictStrategy`] — the spec's earlier "Simple" vs.
//! "Enhanced" executor split collapses into this single type (spec §9).

pub mod fcfs;
pub mod scheduler;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::VectorClock;
use crate::config::NodeConfig;
use crate::emergency::{reconcile, EmergencyContext, EmergencyLevel, ReconcileOutcome};
use crate::error::FabricError;
use crate::job::{JobId, JobInfo, JobSubmission};
use crate::sandbox::{Sandbox, SandboxOutcome};

use fcfs::ResultTable;
use scheduler::{JobSets, ResourceVector};

pub struct Executor {
    pub node_id: String,
    pub config: Arc<NodeConfig>,
    pub clock: VectorClock,
    pub capabilities: HashSet<String>,
    pub results: Arc<ResultTable>,
    pending: Mutex<Vec<JobSubmission>>,
    sets: Mutex<JobSets>,
    failure_counts: Mutex<HashMap<JobId, u32>>,
    sandbox: Arc<dyn Sandbox>,
    emergency: Mutex<Option<EmergencyContext>>,
}

impl Executor {
    pub fn new(
        node_id: impl Into<String>,
        config: Arc<NodeConfig>,
        capabilities: HashSet<String>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            clock: VectorClock::new(node_id.clone()),
            node_id,
            config,
            capabilities,
            results: Arc::new(ResultTable::new()),
            pending: Mutex::new(Vec::new()),
            sets: Mutex::new(JobSets::default()),
            failure_counts: Mutex::new(HashMap::new()),
            sandbox,
            emergency: Mutex::new(None),
        }
    }

    /// Install a fleet emergency context if it's causally later (or wins
    /// the concurrent tie-break) than whatever this executor already
    /// holds (spec §4.5: "every broker... instructs every local executor
    /// to enter emergency mode with the same kind/level"; reconciliation
    /// follows the same cascade as the broker's own `EmergencySlot`).
    /// Returns whether the local mode changed.
    pub fn enter_emergency(&self, context: EmergencyContext) -> bool {
        let mut guard = self.emergency.lock().unwrap();
        match reconcile(guard.as_ref(), Some(&context)) {
            ReconcileOutcome::NoChange => false,
            ReconcileOutcome::TakeRemote => {
                *guard = Some(context);
                true
            }
        }
    }

    /// Clear local emergency mode unconditionally (a broker's
    /// `clear_fleet_emergency` propagates here the same way a
    /// declaration does).
    pub fn clear_emergency(&self) {
        *self.emergency.lock().unwrap() = None;
    }

    /// The active emergency level, if this executor currently holds a
    /// fleet emergency context.
    pub fn emergency_level(&self) -> Option<EmergencyLevel> {
        self.emergency.lock().unwrap().as_ref().map(|ctx| ctx.level)
    }

    /// Whether fleet emergency state currently suppresses admission of
    /// non-emergency work (spec §3, invariant 6 in §8).
    pub fn is_suppressing_normal_work(&self) -> bool {
        self.emergency_level()
            .is_some_and(EmergencyLevel::suppresses_normal_work)
    }

    /// Job admission (spec §4.4.1): reject a job id already known in any
    /// state, otherwise enqueue it for the dispatch pump. The caller is
    /// expected to have already merged the sender's clock via
    /// [`crate::message::CausalMessage::receive`]; admission itself ticks
    /// once more to record the local event.
    pub fn receive_job(
        &self,
        job_id: JobId,
        job_info: JobInfo,
        is_emergency: bool,
        emergency_kind: Option<String>,
        emergency_level: Option<crate::emergency::EmergencyLevel>,
        priority_score: f64,
    ) -> Result<(), FabricError> {
        if self.results.contains(&job_id) || self.known(job_id) {
            return Err(FabricError::DuplicateSubmission(job_id.to_string()));
        }
        if let (Some(kind), Some(level)) = (&emergency_kind, emergency_level) {
            self.enter_emergency(EmergencyContext::new(kind.clone(), level, self.clock.snapshot()));
        }
        self.clock.tick();
        let submission = JobSubmission {
            job_id,
            job_info,
            submitted_at: chrono::Utc::now(),
            submission_clock: self.clock.snapshot(),
            is_emergency,
            emergency_kind,
            emergency_level,
            priority_score,
            assigned_executor: Some(self.node_id.clone()),
        };
        self.pending.lock().unwrap().push(submission);
        Ok(())
    }

    fn known(&self, job_id: JobId) -> bool {
        let sets = self.sets.lock().unwrap();
        sets.running.contains(&job_id)
            || sets.completed.contains(&job_id)
            || sets.rejected.contains(&job_id)
            || self.pending.lock().unwrap().iter().any(|j| j.job_id == job_id)
    }

    fn free_resources(&self) -> ResourceVector {
        let running = self.sets.lock().unwrap().running.len();
        let slots = self.config.max_concurrent_jobs.saturating_sub(running) as f64;
        ResourceVector {
            cpu: slots,
            memory: f64::MAX,
            io: f64::MAX,
        }
    }

    fn job_requirement(job: &JobSubmission) -> ResourceVector {
        ResourceVector {
            cpu: job.job_info.computational_weight.max(0.1),
            memory: 0.0,
            io: 0.0,
        }
    }

    /// One dispatch-pump step (spec §4.4.3): select a job per the
    /// configured strategy and reserve a running slot for it, or `None`
    /// if nothing is eligible (empty queue or no free capacity).
    pub fn try_dispatch_one(&self) -> Option<JobSubmission> {
        let running_count = self.sets.lock().unwrap().running.len();
        if running_count >= self.config.max_concurrent_jobs {
            return None;
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return None;
        }
        let free = self.free_resources();
        // Emergency preemption (spec §3, invariant 6 in §8): once this
        // executor's fleet emergency level is HIGH/CRITICAL, no
        // non-emergency job may start until the context clears. Select
        // only among the emergency-flagged jobs in that state; if there
        // are none, nothing may run this tick even with free capacity.
        let idx = if self.is_suppressing_normal_work() {
            let emergency: Vec<JobSubmission> =
                pending.iter().filter(|j| j.is_emergency).cloned().collect();
            let local_idx =
                scheduler::select(self.config.conflict_strategy, &emergency, free, Self::job_requirement)?;
            let winner_id = emergency[local_idx].job_id;
            pending.iter().position(|j| j.job_id == winner_id)?
        } else {
            scheduler::select(self.config.conflict_strategy, &pending, free, Self::job_requirement)?
        };
        let job = pending.remove(idx);
        self.sets.lock().unwrap().running.insert(job.job_id);
        Some(job)
    }

    /// Run one job to completion against the sandbox and route the
    /// outcome (spec §4.4.4): completion accepts a result via FCFS,
    /// failure retries up to `max_job_failed_redispatches` then gives up,
    /// cancellation returns the job to the pending queue untouched.
    pub async fn run_job(&self, job: JobSubmission, cancel: CancellationToken) {
        let job_id = job.job_id;
        let outcome = self.sandbox.run(&job.job_info, cancel).await;
        self.sets.lock().unwrap().running.remove(&job_id);
        match outcome {
            SandboxOutcome::Completed(bytes) => {
                if let Err(error) = self.submit_result(job_id, bytes) {
                    warn!(%job_id, %error, "local result submission rejected");
                }
                self.sets.lock().unwrap().completed.insert(job_id);
            }
            SandboxOutcome::Failed(reason) => {
                let attempts = {
                    let mut counts = self.failure_counts.lock().unwrap();
                    let entry = counts.entry(job_id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if attempts < self.config.max_job_failed_redispatches {
                    warn!(%job_id, reason, attempts, "job failed, retrying");
                    self.pending.lock().unwrap().push(job);
                } else {
                    warn!(%job_id, reason, attempts, "job failed, giving up");
                    self.sets.lock().unwrap().rejected.insert(job_id);
                }
            }
            SandboxOutcome::Cancelled => {
                self.pending.lock().unwrap().push(job);
            }
        }
    }

    /// FCFS result submission (spec §4.4.2): delegates to [`ResultTable`],
    /// ticking the clock first so the stored completion clock reflects
    /// this event.
    pub fn submit_result(&self, job_id: JobId, result: Vec<u8>) -> Result<(), FabricError> {
        self.clock.tick();
        self.results.submit(job_id, result, self.node_id.clone(), &self.clock)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn running_len(&self) -> usize {
        self.sets.lock().unwrap().running.len()
    }

    /// Drive the dispatch pump until `cancel` fires (spec §5: "per-
    /// executor dispatch pump", cancellable). Every eligible job is
    /// spawned onto its own task so a slow job never blocks the poll.
    pub async fn run_dispatch_pump(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    while let Some(job) = self.try_dispatch_one() {
                        let executor = self.clone();
                        let job_id = job.job_id;
                        let job_cancel = cancel.child_token();
                        info!(%job_id, "starting job");
                        tokio::spawn(async move { executor.run_job(job, job_cancel).await; });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CapabilitiesRequired;
    use crate::sandbox::MockSandbox;

    fn job_info(weight: f64) -> JobInfo {
        JobInfo {
            payload: b"hello".to_vec(),
            capabilities_required: CapabilitiesRequired::default(),
            dependencies: vec![],
            user_priority: 0,
            deadline_urgency: 0.0,
            computational_weight: weight,
            deadline: None,
        }
    }

    fn executor() -> Executor {
        Executor::new(
            "e1",
            Arc::new(NodeConfig::default()),
            HashSet::new(),
            Arc::new(MockSandbox::echo()),
        )
    }

    #[test]
    fn receive_job_rejects_duplicate_ids() {
        let executor = executor();
        let job_id = JobId::new_v4();
        executor
            .receive_job(job_id, job_info(1.0), false, None, None, 0.0)
            .unwrap();
        let err = executor
            .receive_job(job_id, job_info(1.0), false, None, None, 0.0)
            .unwrap_err();
        assert_eq!(err, FabricError::DuplicateSubmission(job_id.to_string()));
    }

    #[test]
    fn try_dispatch_one_respects_max_concurrent_jobs() {
        let config = Arc::new(NodeConfig {
            max_concurrent_jobs: 1,
            ..Default::default()
        });
        let executor = Executor::new("e1", config, HashSet::new(), Arc::new(MockSandbox::echo()));
        executor
            .receive_job(JobId::new_v4(), job_info(1.0), false, None, None, 0.0)
            .unwrap();
        executor
            .receive_job(JobId::new_v4(), job_info(1.0), false, None, None, 0.0)
            .unwrap();
        assert!(executor.try_dispatch_one().is_some());
        assert_eq!(executor.running_len(), 1);
        assert!(executor.try_dispatch_one().is_none());
    }

    #[tokio::test]
    async fn completed_job_is_recorded_as_a_result() {
        let executor = executor();
        let job_id = JobId::new_v4();
        executor
            .receive_job(job_id, job_info(1.0), false, None, None, 0.0)
            .unwrap();
        let job = executor.try_dispatch_one().unwrap();
        executor.run_job(job, CancellationToken::new()).await;
        assert!(executor.results.contains(&job_id));
    }

    #[tokio::test]
    async fn failed_job_retries_until_the_redispatch_limit() {
        let config = Arc::new(NodeConfig {
            max_job_failed_redispatches: 2,
            ..Default::default()
        });
        let sandbox = Arc::new(MockSandbox::new(|_| Err("boom".to_string())));
        let executor = Executor::new("e1", config, HashSet::new(), sandbox);
        let job_id = JobId::new_v4();
        executor
            .receive_job(job_id, job_info(1.0), false, None, None, 0.0)
            .unwrap();
        for _ in 0..2 {
            let job = executor.try_dispatch_one().unwrap();
            executor.run_job(job, CancellationToken::new()).await;
        }
        assert!(!executor.results.contains(&job_id));
        assert!(executor.sets.lock().unwrap().rejected.contains(&job_id));
    }

    #[test]
    fn active_high_emergency_blocks_normal_jobs_from_starting() {
        let executor = executor();
        let normal_id = JobId::new_v4();
        executor
            .receive_job(normal_id, job_info(1.0), false, None, None, 0.0)
            .unwrap();
        executor.enter_emergency(EmergencyContext::new(
            "fire",
            EmergencyLevel::High,
            executor.clock.snapshot(),
        ));

        assert!(executor.try_dispatch_one().is_none());
        assert_eq!(executor.pending_len(), 1);

        let emergency_id = JobId::new_v4();
        executor
            .receive_job(
                emergency_id,
                job_info(1.0),
                true,
                Some("fire".to_string()),
                Some(EmergencyLevel::High),
                10.0,
            )
            .unwrap();
        let dispatched = executor.try_dispatch_one().expect("emergency job should dispatch");
        assert_eq!(dispatched.job_id, emergency_id);

        executor.clear_emergency();
        let dispatched = executor.try_dispatch_one().expect("normal job dispatches once cleared");
        assert_eq!(dispatched.job_id, normal_id);
    }
}
