//! Emergency-context propagation (spec §3, §4.5). A declaration is
//! stamped with the declaring node's clock and flows through the same
//! metadata-sync channel as everything else; no separate control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{compare_snapshots, CausalOrder, ClockSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl EmergencyLevel {
    /// HIGH and CRITICAL suppress admission of non-emergency work (spec
    /// §3, invariant 6 in §8).
    pub fn suppresses_normal_work(self) -> bool {
        matches!(self, EmergencyLevel::High | EmergencyLevel::Critical)
    }
}

/// A tagged emergency declaration. `kind` is a free-form short string
/// (e.g. "fire", "medical"); `location` and `detected_at` are
/// informational only and never participate in reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyContext {
    pub kind: String,
    pub level: EmergencyLevel,
    pub location: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub declaring_clock: ClockSnapshot,
}

impl EmergencyContext {
    pub fn new(kind: impl Into<String>, level: EmergencyLevel, declaring_clock: ClockSnapshot) -> Self {
        Self {
            kind: kind.into(),
            level,
            location: None,
            detected_at: Utc::now(),
            declaring_clock,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Reconcile two views of the fleet emergency context during sync (spec
/// §4.3.5 step 3): later vector clock wins; if concurrent, higher level
/// wins; if still tied, most recent `detected_at` wins. `local`/`remote`
/// may each be absent (no declared emergency).
pub fn reconcile(
    local: Option<&EmergencyContext>,
    remote: Option<&EmergencyContext>,
) -> ReconcileOutcome {
    match (local, remote) {
        (None, None) => ReconcileOutcome::NoChange,
        (None, Some(_)) => ReconcileOutcome::TakeRemote,
        (Some(_), None) => ReconcileOutcome::NoChange,
        (Some(l), Some(r)) => match compare_snapshots(&l.declaring_clock, &r.declaring_clock) {
            CausalOrder::Before => ReconcileOutcome::TakeRemote,
            CausalOrder::After | CausalOrder::Equal => ReconcileOutcome::NoChange,
            CausalOrder::Concurrent => {
                if r.level > l.level {
                    ReconcileOutcome::TakeRemote
                } else if r.level < l.level {
                    ReconcileOutcome::NoChange
                } else if r.detected_at > l.detected_at {
                    ReconcileOutcome::TakeRemote
                } else {
                    ReconcileOutcome::NoChange
                }
            }
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NoChange,
    TakeRemote,
}

/// Kind-specific additive priority bonuses (spec §4.3.4: "critical >
/// medical > fire > other"). Configurable; these are the documented
/// defaults. Deserializable so a deployment can override the table from
/// `NodeConfig`'s TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KindBonusTable {
    bonuses: std::collections::HashMap<String, f64>,
    default_bonus: f64,
}

impl Default for KindBonusTable {
    fn default() -> Self {
        let mut bonuses = std::collections::HashMap::new();
        bonuses.insert("critical".to_string(), 30.0);
        bonuses.insert("medical".to_string(), 20.0);
        bonuses.insert("fire".to_string(), 10.0);
        Self {
            bonuses,
            default_bonus: 5.0,
        }
    }
}

impl KindBonusTable {
    pub fn bonus_for(&self, kind: &str) -> f64 {
        self.bonuses
            .get(kind)
            .copied()
            .unwrap_or(self.default_bonus)
    }
}

/// Multiplicative boost per emergency level, relative to a non-emergency
/// baseline of 1x (spec §4.3.4 defaults).
pub fn level_multiplier(level: EmergencyLevel) -> f64 {
    match level {
        EmergencyLevel::Low => 2.0,
        EmergencyLevel::Medium => 3.0,
        EmergencyLevel::High => 5.0,
        EmergencyLevel::Critical => 10.0,
    }
}
