//! Startup configuration (spec §6, §9 "explicit `NodeContext`"). Every
//! subsystem receives the pieces it needs from here; nothing is read from
//! a global or a singleton.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::scheduler::ConflictStrategy;
use crate::job::{EmergencyKeywordTable, PriorityWeights};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,

    pub sync_period_seconds: u64,
    pub discovery_period_seconds: u64,
    pub heartbeat_period_seconds: u64,
    pub heartbeat_failure_multiplier: u32,

    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub conflict_strategy: ConflictStrategy,

    pub sync_timeout_seconds: u64,
    pub heartbeat_probe_timeout_seconds: u64,

    pub no_capable_executor_deadline_seconds: u64,
    pub max_job_failed_redispatches: u32,
    pub failed_executor_exclusion_seconds: u64,

    pub priority_weights: PriorityWeights,
    pub emergency_keywords: EmergencyKeywordTable,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            bind_addr: "127.0.0.1:7000".to_string(),
            sync_period_seconds: 60,
            discovery_period_seconds: 30,
            heartbeat_period_seconds: 5,
            heartbeat_failure_multiplier: 5,
            max_concurrent_jobs: 8,
            queue_capacity: 10_000,
            conflict_strategy: ConflictStrategy::Causal,
            sync_timeout_seconds: 10,
            heartbeat_probe_timeout_seconds: 5,
            no_capable_executor_deadline_seconds: 30,
            max_job_failed_redispatches: 3,
            failed_executor_exclusion_seconds: 60,
            priority_weights: PriorityWeights::default(),
            emergency_keywords: EmergencyKeywordTable::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_seconds)
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_secs(self.discovery_period_seconds)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_seconds)
    }

    /// Gap past which a silent executor is declared FAILED (spec §4.5
    /// default: 5x expected heartbeat period).
    pub fn heartbeat_failure_threshold(&self) -> Duration {
        self.heartbeat_period() * self.heartbeat_failure_multiplier
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }

    pub fn heartbeat_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_probe_timeout_seconds)
    }

    /// Wait deadline past which a head-of-queue job with no capable
    /// executor is failed with `no-capable-executor` (spec §4.3.3).
    pub fn no_capable_executor_deadline(&self) -> Duration {
        Duration::from_secs(self.no_capable_executor_deadline_seconds)
    }

    /// Grace window a failed executor is excluded from redispatch
    /// candidacy after its in-flight jobs are orphaned (spec §4.5).
    pub fn failed_executor_exclusion(&self) -> Duration {
        Duration::from_secs(self.failed_executor_exclusion_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.sync_period_seconds, 60);
        assert_eq!(cfg.discovery_period_seconds, 30);
        assert_eq!(cfg.heartbeat_period_seconds, 5);
        assert_eq!(cfg.heartbeat_failure_threshold().as_secs(), 25);
        assert_eq!(cfg.queue_capacity, 10_000);
    }

    #[test]
    fn parses_from_toml() {
        let cfg: NodeConfig = NodeConfig::from_toml_str(
            r#"
            node_id = "broker-a"
            bind_addr = "0.0.0.0:8080"
            sync_period_seconds = 60
            discovery_period_seconds = 30
            heartbeat_period_seconds = 5
            heartbeat_failure_multiplier = 5
            max_concurrent_jobs = 16
            queue_capacity = 1000
            conflict_strategy = "priority"
            sync_timeout_seconds = 10
            heartbeat_probe_timeout_seconds = 5
            no_capable_executor_deadline_seconds = 30
            max_job_failed_redispatches = 3
            failed_executor_exclusion_seconds = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.node_id, "broker-a");
        assert_eq!(cfg.max_concurrent_jobs, 16);
        assert_eq!(cfg.conflict_strategy, ConflictStrategy::Priority);
    }

    #[test]
    fn priority_weights_are_overridable_from_toml() {
        let cfg: NodeConfig = NodeConfig::from_toml_str(
            r#"
            node_id = "broker-a"
            bind_addr = "0.0.0.0:8080"

            [priority_weights]
            baseline = 1.0
            user_priority_weight = 1.0
            deadline_urgency_weight = 1.0
            computational_weight_weight = 1.0

            [priority_weights.kind_bonuses]
            default_bonus = 0.0

            [priority_weights.kind_bonuses.bonuses]
            critical = 99.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.priority_weights.baseline, 1.0);
        assert_eq!(cfg.priority_weights.kind_bonuses.bonus_for("critical"), 99.0);
        assert_eq!(cfg.priority_weights.kind_bonuses.bonus_for("fire"), 0.0);
    }
}
