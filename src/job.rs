//! Job descriptors and the broker-side submission record (spec §3).
//! `JobInfo` is deliberately opaque: a capability requirement record plus
//! a payload blob, never inspected beyond the keyword classifier (spec
//! §9: "dynamic typing of job payloads... becomes an opaque bytes blob").

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::ClockSnapshot;
use crate::emergency::{level_multiplier, EmergencyLevel, KindBonusTable};

pub type JobId = Uuid;

/// Capabilities an executor must report to be eligible for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesRequired(pub HashSet<String>);

impl CapabilitiesRequired {
    pub fn satisfied_by(&self, offered: &HashSet<String>) -> bool {
        self.0.is_subset(offered)
    }
}

/// Opaque-to-core job descriptor: payload bytes, capability requirement,
/// optional dependency list (other job ids this job waits on — core
/// treats this as data, scheduling on dependencies is a collaborator
/// concern, not enforced here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub payload: Vec<u8>,
    pub capabilities_required: CapabilitiesRequired,
    pub dependencies: Vec<JobId>,
    pub user_priority: u8,
    pub deadline_urgency: f64,
    pub computational_weight: f64,
    pub deadline: Option<DateTime<Utc>>,
}

/// Configurable keyword → kind mapping used to classify a job as
/// emergency or not (spec §4.3.1 step 2). Defaults cover the tokens the
/// spec names explicitly; deserializable so a deployment can override the
/// table from `NodeConfig`'s TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyKeywordTable {
    keywords: BTreeMap<String, (String, EmergencyLevel)>,
}

impl Default for EmergencyKeywordTable {
    fn default() -> Self {
        let mut keywords = BTreeMap::new();
        for (word, kind, level) in [
            ("fire", "fire", EmergencyLevel::High),
            ("medical", "medical", EmergencyLevel::High),
            ("critical", "critical", EmergencyLevel::Critical),
            ("urgent", "urgent", EmergencyLevel::Medium),
            ("emergency", "general", EmergencyLevel::High),
        ] {
            keywords.insert(word.to_string(), (kind.to_string(), level));
        }
        Self { keywords }
    }
}

impl EmergencyKeywordTable {
    /// Scan `haystack` (typically a job's textual description/tags —
    /// here, the UTF-8-lossy decode of the payload's leading bytes, kept
    /// deliberately cheap) for a configured keyword. Returns the first
    /// match's kind and level, case-insensitively.
    pub fn classify(&self, haystack: &str) -> Option<(String, EmergencyLevel)> {
        let lower = haystack.to_lowercase();
        self.keywords
            .iter()
            .find(|(word, _)| lower.contains(word.as_str()))
            .map(|(_, (kind, level))| (kind.clone(), *level))
    }
}

/// Weights used by [`priority_score`] (spec §4.3.4). The structure of
/// scoring is fixed by the spec; the constants are configurable, and this
/// table is deserializable so a deployment can override them from
/// `NodeConfig`'s TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub baseline: f64,
    pub user_priority_weight: f64,
    pub deadline_urgency_weight: f64,
    pub computational_weight_weight: f64,
    pub kind_bonuses: KindBonusTable,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            baseline: 10.0,
            user_priority_weight: 1.0,
            deadline_urgency_weight: 5.0,
            computational_weight_weight: 0.5,
            kind_bonuses: KindBonusTable::default(),
        }
    }
}

/// Deterministic composite priority score: emergency multiplier × user
/// priority + kind bonus + deadline urgency (spec §4.3.4). `emergency`
/// is `None` for non-emergency jobs.
pub fn priority_score(
    job: &JobInfo,
    emergency: Option<(&str, EmergencyLevel)>,
    weights: &PriorityWeights,
) -> f64 {
    let base = weights.baseline
        + weights.user_priority_weight * job.user_priority as f64
        + weights.deadline_urgency_weight * job.deadline_urgency
        + weights.computational_weight_weight * job.computational_weight;
    match emergency {
        None => base,
        Some((kind, level)) => {
            base * level_multiplier(level) + weights.kind_bonuses.bonus_for(kind)
        }
    }
}

/// The health status of a broker's view of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorHealth {
    Healthy,
    Suspect,
    Failed,
}

/// Broker-side job queue entry (spec §3 "JobSubmission").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: JobId,
    pub job_info: JobInfo,
    pub submitted_at: DateTime<Utc>,
    pub submission_clock: ClockSnapshot,
    pub is_emergency: bool,
    pub emergency_kind: Option<String>,
    pub emergency_level: Option<EmergencyLevel>,
    pub priority_score: f64,
    pub assigned_executor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> JobInfo {
        JobInfo {
            payload: b"run a simulation".to_vec(),
            capabilities_required: CapabilitiesRequired::default(),
            dependencies: vec![],
            user_priority: 5,
            deadline_urgency: 0.0,
            computational_weight: 0.0,
            deadline: None,
        }
    }

    #[test]
    fn classifier_finds_configured_keyword_case_insensitively() {
        let table = EmergencyKeywordTable::default();
        let (kind, level) = table.classify("FIRE in sector 9").unwrap();
        assert_eq!(kind, "fire");
        assert_eq!(level, EmergencyLevel::High);
    }

    #[test]
    fn classifier_returns_none_for_unmatched_text() {
        let table = EmergencyKeywordTable::default();
        assert!(table.classify("routine batch job").is_none());
    }

    #[test]
    fn emergency_jobs_score_higher_than_identical_normal_job() {
        let weights = PriorityWeights::default();
        let job = sample_job();
        let normal = priority_score(&job, None, &weights);
        let emergency = priority_score(&job, Some(("fire", EmergencyLevel::High)), &weights);
        assert!(emergency > normal);
    }

    #[test]
    fn critical_kind_scores_higher_than_fire_at_same_level() {
        let weights = PriorityWeights::default();
        let job = sample_job();
        let fire = priority_score(&job, Some(("fire", EmergencyLevel::High)), &weights);
        let critical = priority_score(&job, Some(("critical", EmergencyLevel::High)), &weights);
        assert!(critical > fire);
    }

    #[test]
    fn capability_subset_is_satisfied() {
        let mut required = HashSet::new();
        required.insert("gpu".to_string());
        let req = CapabilitiesRequired(required);
        let mut offered = HashSet::new();
        offered.insert("gpu".to_string());
        offered.insert("wasm".to_string());
        assert!(req.satisfied_by(&offered));
        assert!(!req.satisfied_by(&HashSet::new()));
    }
}
