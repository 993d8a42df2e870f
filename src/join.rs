//! Parallel-gateway join reconciliation.
//!
//! A join step declares more than one input event; its handler must not run
//! until every declared branch has arrived for the same correlation id. The
//! [`JoinCoordinator`] buffers arrived branch names per (correlation id,
//! step key) and releases exactly once, with the triggering arrival's
//! payload, when the arrived set exactly equals the required set.
//!
//! Slots live in memory only. A restart loses in-flight join state; that is
//! a documented limitation of the runtime, which keeps no local persistence.
//!
//! # Duplicate safety
//!
//! Delivery is at-least-once, so the coordinator must tolerate replays:
//! recording the same branch twice is a no-op, and a fired slot is replaced
//! by a tombstone so late or duplicate arrivals after release are ignored
//! rather than re-arming the join.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::StepDescriptor;
use crate::context::RecordContext;

/// Per-slot state: waiting with a growing arrived set, or already fired.
enum JoinEntry {
    Waiting {
        required: FxHashSet<String>,
        arrived: FxHashSet<String>,
    },
    Fired,
}

/// Handed back when the final branch of a join arrives. Carries the
/// triggering arrival's payload and context; earlier branch payloads are
/// dropped by design of the wire protocol.
#[derive(Clone, Debug)]
pub struct JoinRelease {
    pub payload: Value,
    pub context: RecordContext,
}

/// Buffers branch arrivals per (correlation id, join step) and releases the
/// continuation exactly once per slot.
#[derive(Default)]
pub struct JoinCoordinator {
    states: Mutex<FxHashMap<(String, String), JoinEntry>>,
}

impl JoinCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `branch` arrived for the join step `descriptor` under the
    /// context's correlation id.
    ///
    /// Returns the release when this arrival completes the required set.
    /// Everything else returns `None`: earlier arrivals, duplicates,
    /// branches the step never declared, and arrivals after the slot fired.
    /// The whole transition happens under one lock so concurrent arrivals
    /// for a single correlation id cannot both observe "unsatisfied" and
    /// both release.
    pub fn record_arrival(
        &self,
        descriptor: &StepDescriptor,
        branch: &str,
        payload: Value,
        ctx: RecordContext,
    ) -> Option<JoinRelease> {
        let slot = (ctx.correlation_id.clone(), descriptor.key.clone());
        let mut states = self.states.lock();

        let entry = states.entry(slot).or_insert_with(|| {
            let required: FxHashSet<String> =
                descriptor.inputs.iter().map(|i| i.name.clone()).collect();
            JoinEntry::Waiting {
                required,
                arrived: FxHashSet::default(),
            }
        });

        match entry {
            JoinEntry::Fired => {
                debug!(
                    correlation_id = %ctx.correlation_id,
                    step = %descriptor.key,
                    branch,
                    "arrival for already-fired join ignored"
                );
                None
            }
            JoinEntry::Waiting { required, arrived } => {
                if !required.contains(branch) {
                    warn!(
                        correlation_id = %ctx.correlation_id,
                        step = %descriptor.key,
                        branch,
                        "arrival names a branch the join never declared; ignored"
                    );
                    return None;
                }
                arrived.insert(branch.to_string());
                debug!(
                    correlation_id = %ctx.correlation_id,
                    step = %descriptor.key,
                    branch,
                    arrived = arrived.len(),
                    required = required.len(),
                    "join arrival recorded"
                );
                if is_satisfied(arrived, required) {
                    *entry = JoinEntry::Fired;
                    Some(JoinRelease {
                        payload,
                        context: ctx,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Number of slots currently waiting (fired tombstones excluded).
    pub fn pending(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|e| matches!(e, JoinEntry::Waiting { .. }))
            .count()
    }
}

/// The join predicate: arrived set exactly equals required set. A superset
/// never satisfies; arrival order is irrelevant.
pub fn is_satisfied(arrived: &FxHashSet<String>, required: &FxHashSet<String>) -> bool {
    arrived == required
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> FxHashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_is_required() {
        let required = set(&["left", "right"]);
        assert!(!is_satisfied(&set(&["left"]), &required));
        assert!(is_satisfied(&set(&["left", "right"]), &required));
        assert!(is_satisfied(&set(&["right", "left"]), &required));
        assert!(!is_satisfied(&set(&["left", "right", "extra"]), &required));
    }
}
