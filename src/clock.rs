//! Vector-clock algebra: the logical-time mechanism every other subsystem
//! builds on (spec §4.1). A clock is a per-node map of node id to counter,
//! always containing at least its own owner's entry.

use std::cmp::Ordering as StdOrdering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Opaque node identifier. Brokers and executors alike are addressed this
/// way; the core never interprets the string.
pub type NodeId = String;

/// Immutable point-in-time value of a [`VectorClock`], safe to embed in a
/// [`crate::message::CausalMessage`] or any other wire payload.
pub type ClockSnapshot = BTreeMap<NodeId, u64>;

/// The causal relation between two clocks, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Before,
    After,
    Equal,
    Concurrent,
}

/// Compare two clock snapshots over the union of their keys (absent = 0).
pub fn compare_snapshots(a: &ClockSnapshot, b: &ClockSnapshot) -> CausalOrder {
    let mut a_less = false;
    let mut b_less = false;
    for key in a.keys().chain(b.keys()) {
        let av = a.get(key).copied().unwrap_or(0);
        let bv = b.get(key).copied().unwrap_or(0);
        match av.cmp(&bv) {
            StdOrdering::Less => a_less = true,
            StdOrdering::Greater => b_less = true,
            StdOrdering::Equal => {}
        }
    }
    match (a_less, b_less) {
        (false, false) => CausalOrder::Equal,
        (true, false) => CausalOrder::Before,
        (false, true) => CausalOrder::After,
        (true, true) => CausalOrder::Concurrent,
    }
}

/// Merge `other` into `target`, raising each key to the component-wise max.
fn merge_into(target: &mut ClockSnapshot, other: &ClockSnapshot) {
    for (node, &count) in other {
        let entry = target.entry(node.clone()).or_insert(0);
        if count > *entry {
            *entry = count;
        }
    }
}

/// Per-node logical clock. Every operation is serialized through an
/// internal lock (spec §4.1: "a clock is an actively contended structure
/// on every node"); callers never observe a torn state. A cloned handle
/// shares the same underlying clock, so `VectorClock` is the unit other
/// subsystems hold a field of, not a value type to copy around.
#[derive(Debug, Clone)]
pub struct VectorClock {
    owner: NodeId,
    inner: Arc<Mutex<ClockSnapshot>>,
}

impl VectorClock {
    /// A fresh clock for `owner`, starting at zero.
    pub fn new(owner: impl Into<NodeId>) -> Self {
        let owner = owner.into();
        let mut snapshot = BTreeMap::new();
        snapshot.insert(owner.clone(), 0);
        Self {
            owner,
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Advance the owner's counter by one. Strictly increases the owner's
    /// entry relative to any value previously observed at this node.
    pub fn tick(&self) -> u64 {
        let mut guard = self.inner.lock().unwrap();
        let entry = guard.entry(self.owner.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Merge `other` into this clock, then tick. Per spec, the result is
    /// strictly greater than both `other` and the pre-merge self.
    pub fn merge(&self, other: &ClockSnapshot) {
        let mut guard = self.inner.lock().unwrap();
        merge_into(&mut guard, other);
        let entry = guard.entry(self.owner.clone()).or_insert(0);
        *entry += 1;
    }

    /// A value-copy snapshot, safe to embed in a message.
    pub fn snapshot(&self) -> ClockSnapshot {
        self.inner.lock().unwrap().clone()
    }

    /// Compare this clock's current snapshot against another.
    pub fn compare(&self, other: &ClockSnapshot) -> CausalOrder {
        compare_snapshots(&self.snapshot(), other)
    }

    /// Value at `node`, or 0 if never observed.
    pub fn get(&self, node: &str) -> u64 {
        self.inner.lock().unwrap().get(node).copied().unwrap_or(0)
    }
}
