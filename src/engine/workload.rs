//! Workload tracker — cumulative weight per agent for one generation pass.
//!
//! Pass-scoped by construction: one tracker is created at the start of a
//! pass, passed by reference through the orchestrator, and dropped with it.
//! It must never be shared across concurrent passes.

use std::collections::HashMap;

use uuid::Uuid;

use crate::catalog::Agent;

/// Cumulative assigned weight per agent, zero-initialized for the whole
/// active pool before the pass starts.
#[derive(Debug)]
pub struct WorkloadTracker {
    weights: HashMap<Uuid, u32>,
}

impl WorkloadTracker {
    /// Create a tracker covering `pool`, everyone at zero.
    pub fn new<'a>(pool: impl IntoIterator<Item = &'a Agent>) -> Self {
        Self {
            weights: pool.into_iter().map(|a| (a.id, 0)).collect(),
        }
    }

    /// The only mutator: add assigned weight to an agent.
    pub fn add(&mut self, agent_id: Uuid, weight: u32) {
        *self.weights.entry(agent_id).or_insert(0) += weight;
    }

    /// Current cumulative weight for an agent (zero if untracked).
    pub fn weight_for(&self, agent_id: Uuid) -> u32 {
        self.weights.get(&agent_id).copied().unwrap_or(0)
    }

    /// Minimum cumulative weight among a candidate set, or `None` when the
    /// set is empty.
    pub fn minimum_among<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a Agent>,
    ) -> Option<u32> {
        candidates
            .into_iter()
            .map(|a| self.weight_for(a.id))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            domain_id: Uuid::new_v4(),
            name: name.into(),
            birth_date: None,
            active: true,
        }
    }

    #[test]
    fn pool_starts_at_zero() {
        let a = agent("a");
        let b = agent("b");
        let tracker = WorkloadTracker::new([&a, &b]);
        assert_eq!(tracker.weight_for(a.id), 0);
        assert_eq!(tracker.minimum_among([&a, &b]), Some(0));
    }

    #[test]
    fn add_accumulates() {
        let a = agent("a");
        let b = agent("b");
        let mut tracker = WorkloadTracker::new([&a, &b]);
        tracker.add(a.id, 3);
        tracker.add(a.id, 1);
        tracker.add(b.id, 2);
        assert_eq!(tracker.weight_for(a.id), 4);
        assert_eq!(tracker.weight_for(b.id), 2);
        assert_eq!(tracker.minimum_among(vec![&a, &b]), Some(2));
    }

    #[test]
    fn empty_candidate_set_has_no_minimum() {
        let tracker = WorkloadTracker::new(std::iter::empty());
        assert_eq!(tracker.minimum_among(std::iter::empty()), None);
    }
}
