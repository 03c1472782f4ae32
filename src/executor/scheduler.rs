//! Conflict-resolution strategies the dispatch pump chooses among (spec
//! §4.4.3). Earlier "Simple" vs. "Enhanced" executor variants in the
//! source collapse into one executor with this strategy setter (spec §9).

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::clock::{compare_snapshots, CausalOrder, ClockSnapshot};
use crate::job::JobSubmission;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    Causal,
    Priority,
    EmergencyFirst,
    ResourceOptimal,
    Fcfs,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::Causal
    }
}

/// A free-resource vector an executor currently has available, used by
/// the `RESOURCE_OPTIMAL` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub io: f64,
}

impl ResourceVector {
    pub fn fits(&self, required: &ResourceVector) -> bool {
        self.cpu >= required.cpu && self.memory >= required.memory && self.io >= required.io
    }

    /// Smaller is a tighter fit; used only to rank jobs that already fit.
    fn slack(&self, required: &ResourceVector) -> f64 {
        (self.cpu - required.cpu) + (self.memory - required.memory) + (self.io - required.io)
    }
}

/// Jobs whose submission clock is not causally preceded by any other
/// pending job's submission clock — the minimal elements of the causal
/// order (spec §4.4.3 CAUSAL strategy).
fn causal_minima(pending: &[JobSubmission]) -> Vec<&JobSubmission> {
    pending
        .iter()
        .filter(|candidate| {
            !pending.iter().any(|other| {
                other.job_id != candidate.job_id
                    && matches!(
                        compare_snapshots(&other.submission_clock, &candidate.submission_clock),
                        CausalOrder::Before
                    )
            })
        })
        .collect()
}

fn causal_tiebreak(a: &JobSubmission, b: &JobSubmission) -> std::cmp::Ordering {
    b.emergency_level
        .cmp(&a.emergency_level)
        .then(
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
        .then(a.submitted_at.cmp(&b.submitted_at))
        .then(a.job_id.cmp(&b.job_id))
}

fn pick_causal(pending: &[JobSubmission]) -> Option<usize> {
    let minima = causal_minima(pending);
    let winner = minima
        .into_iter()
        .min_by(|a, b| causal_tiebreak(a, b))?;
    pending.iter().position(|j| j.job_id == winner.job_id)
}

/// Select one job to dispatch from `pending` per the configured strategy.
/// Returns the index within `pending`, or `None` if nothing is eligible
/// (only possible for `RESOURCE_OPTIMAL` when no job fits).
pub fn select(
    strategy: ConflictStrategy,
    pending: &[JobSubmission],
    free_resources: ResourceVector,
    job_resource_requirement: impl Fn(&JobSubmission) -> ResourceVector,
) -> Option<usize> {
    if pending.is_empty() {
        return None;
    }
    match strategy {
        ConflictStrategy::Causal => pick_causal(pending),
        ConflictStrategy::Priority => pending
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.priority_score
                    .partial_cmp(&b.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .or_else(|| pick_causal(pending)),
        ConflictStrategy::EmergencyFirst => {
            let emergency: Vec<JobSubmission> =
                pending.iter().filter(|j| j.is_emergency).cloned().collect();
            if !emergency.is_empty() {
                let winner_idx = pick_causal(&emergency)?;
                let winner_id = emergency[winner_idx].job_id;
                pending.iter().position(|j| j.job_id == winner_id)
            } else {
                pick_causal(pending)
            }
        }
        ConflictStrategy::ResourceOptimal => {
            let fitting: Vec<(usize, f64)> = pending
                .iter()
                .enumerate()
                .filter_map(|(i, job)| {
                    let required = job_resource_requirement(job);
                    free_resources
                        .fits(&required)
                        .then(|| (i, free_resources.slack(&required)))
                })
                .collect();
            fitting
                .into_iter()
                .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
        }
        ConflictStrategy::Fcfs => pending
            .iter()
            .enumerate()
            .min_by_key(|(_, j)| j.submitted_at)
            .map(|(i, _)| i),
    }
}

/// Jobs currently known to an executor, partitioned by lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct JobSets {
    pub running: HashSet<crate::job::JobId>,
    pub completed: HashSet<crate::job::JobId>,
    pub rejected: HashSet<crate::job::JobId>,
}
