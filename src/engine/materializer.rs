//! List materializer — turns a generation plan into persisted daily lists.
//!
//! Regeneration policy is clear-and-rebuild: the (domain, date)'s previous
//! lists, entries, and rotation records are wiped and rewritten in one
//! transaction, so rerunning a date always yields a single consistent
//! state, never a superset.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::catalog::Agent;
use crate::engine::orchestrator::GenerationPlan;
use crate::error::{DatabaseError, GenerationError};
use crate::store::{Database, ListPlan, ListWrite};

/// Outcome of one (domain, date) generation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub domain_id: Uuid,
    pub date: NaiveDate,
    /// Number of agents that received a daily list (every active agent,
    /// including those with no tasks today).
    pub agents_covered: usize,
    /// Total (agent, task) entries written.
    pub tasks_assigned: usize,
    /// Rotating tasks that had no eligible agent this run.
    pub tasks_unresolved: Vec<Uuid>,
}

/// Serializes generation per (domain, date) and commits plans.
pub struct Materializer {
    /// In-flight passes. Two concurrent runs for the same (domain, date)
    /// must not interleave; the loser gets a retryable conflict.
    in_flight: Arc<Mutex<HashSet<(Uuid, NaiveDate)>>>,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Materializer {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Persist `plan` for `(domain_id, date)` as a single atomic unit.
    ///
    /// Every active agent gets exactly one list for the date; unresolved
    /// tasks are reported in the summary, not treated as failures.
    pub async fn materialize(
        &self,
        store: &dyn Database,
        domain_id: Uuid,
        date: NaiveDate,
        agents: &[Agent],
        plan: &GenerationPlan,
    ) -> Result<RunSummary, GenerationError> {
        let _guard = PassGuard::acquire(&self.in_flight, domain_id, date)?;

        let lists: Vec<ListWrite> = agents
            .iter()
            .filter(|a| a.active)
            .map(|a| ListWrite {
                agent_id: a.id,
                task_ids: plan.assignments.get(&a.id).cloned().unwrap_or_default(),
            })
            .collect();

        let write = ListPlan {
            lists,
            rotations: plan.rotations.clone(),
        };

        store
            .replace_daily_lists(domain_id, date, &write)
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(_) => GenerationError::Conflict { domain_id, date },
                other => GenerationError::Storage(other),
            })?;

        let summary = RunSummary {
            domain_id,
            date,
            agents_covered: write.lists.len(),
            tasks_assigned: plan.assigned_count(),
            tasks_unresolved: plan.unresolved.clone(),
        };
        info!(
            domain_id = %domain_id,
            %date,
            agents = summary.agents_covered,
            assigned = summary.tasks_assigned,
            unresolved = summary.tasks_unresolved.len(),
            "Daily lists materialized"
        );
        Ok(summary)
    }
}

/// Holds the (domain, date) slot for the duration of a materialization.
struct PassGuard {
    in_flight: Arc<Mutex<HashSet<(Uuid, NaiveDate)>>>,
    key: (Uuid, NaiveDate),
}

impl PassGuard {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<(Uuid, NaiveDate)>>>,
        domain_id: Uuid,
        date: NaiveDate,
    ) -> Result<Self, GenerationError> {
        let key = (domain_id, date);
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key) {
            return Err(GenerationError::Conflict { domain_id, date });
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            key,
        })
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}
