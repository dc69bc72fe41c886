//! Assignment orchestrator — one generation pass for a (domain, date).
//!
//! Fixed tasks go straight to their bound agents; rotating tasks are
//! processed heaviest-first, each to a currently-least-loaded eligible
//! agent, with the rotation resolver breaking ties against history.
//! Processing heaviest-first is what bounds the final pairwise weight
//! spread by the heaviest assigned task's weight.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{Agent, Task, TaskKind};
use crate::config::EngineConfig;
use crate::engine::eligibility::eligible;
use crate::engine::resolver::RotationResolver;
use crate::engine::workload::WorkloadTracker;
use crate::error::GenerationError;
use crate::store::Database;

/// Transient output of one generation pass. Consumed by the materializer
/// and discarded.
#[derive(Debug, Default)]
pub struct GenerationPlan {
    /// Agent → task ids for the date (fixed and rotating together).
    pub assignments: BTreeMap<Uuid, Vec<Uuid>>,
    /// (task, agent) pairs for rotating assignments only; these become
    /// rotation history records.
    pub rotations: Vec<(Uuid, Uuid)>,
    /// Rotating tasks with zero eligible agents this run.
    pub unresolved: Vec<Uuid>,
}

impl GenerationPlan {
    fn assign(&mut self, agent_id: Uuid, task_id: Uuid) {
        self.assignments.entry(agent_id).or_default().push(task_id);
    }

    /// Total number of (agent, task) assignments.
    pub fn assigned_count(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}

/// Drives a single pass over the catalog.
pub struct Orchestrator<'a> {
    store: &'a dyn Database,
    config: &'a EngineConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a dyn Database, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Produce the assignment plan for `as_of`.
    ///
    /// `agents` is the domain's full catalog (the active pool is derived
    /// here); `tasks` are the active tasks in catalog order.
    pub async fn generate(
        &self,
        domain_id: Uuid,
        agents: &[Agent],
        tasks: &[Task],
        as_of: NaiveDate,
    ) -> Result<GenerationPlan, GenerationError> {
        validate_catalog(domain_id, agents, tasks)?;

        let pool: Vec<Agent> = agents.iter().filter(|a| a.active).cloned().collect();
        let mut plan = GenerationPlan::default();

        if pool.is_empty() {
            plan.unresolved = tasks
                .iter()
                .filter(|t| t.kind == TaskKind::Rotating)
                .map(|t| t.id)
                .collect();
            return Ok(plan);
        }

        // Fixed tasks: every bound agent that is currently active and
        // eligible. No tracker, no history.
        for task in tasks.iter().filter(|t| t.kind == TaskKind::Fixed) {
            for agent in pool.iter().filter(|a| task.fixed_assignees.contains(&a.id)) {
                if crate::engine::eligibility::is_eligible(task, agent, as_of) {
                    plan.assign(agent.id, task.id);
                }
            }
        }

        // Rotating tasks, heaviest first; the sort is stable, so equal
        // weights keep their catalog order.
        let mut rotating: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Rotating)
            .collect();
        rotating.sort_by_key(|t| std::cmp::Reverse(t.weight()));

        let mut tracker = WorkloadTracker::new(pool.iter());
        let resolver = RotationResolver::new(self.store, self.config.lookback_days);

        for task in rotating {
            let candidates = eligible(task, &pool, as_of);
            if candidates.is_empty() {
                debug!(task_id = %task.id, title = %task.title, "No eligible agent, task unresolved");
                plan.unresolved.push(task.id);
                continue;
            }

            // minimum_among is Some: candidates is non-empty
            let min_weight = tracker.minimum_among(candidates.iter().copied()).unwrap_or(0);
            let least_loaded: Vec<Uuid> = candidates
                .iter()
                .filter(|a| tracker.weight_for(a.id) == min_weight)
                .map(|a| a.id)
                .collect();

            let chosen = match least_loaded[..] {
                [only] => only,
                _ => resolver
                    .resolve(task, &least_loaded, as_of)
                    .await
                    .map_err(GenerationError::Storage)?,
            };

            plan.assign(chosen, task.id);
            plan.rotations.push((task.id, chosen));
            tracker.add(chosen, task.weight());
        }

        Ok(plan)
    }
}

/// Reject malformed catalogs before touching any state.
fn validate_catalog(
    domain_id: Uuid,
    agents: &[Agent],
    tasks: &[Task],
) -> Result<(), GenerationError> {
    let known: HashSet<Uuid> = agents.iter().map(|a| a.id).collect();

    for task in tasks {
        if let (Some(min), Some(max)) = (task.min_age, task.max_age)
            && min > max
        {
            return Err(GenerationError::CatalogInconsistency {
                domain_id,
                reason: format!("task '{}' has inverted age bounds {min}..{max}", task.title),
            });
        }
        for agent_id in &task.fixed_assignees {
            if !known.contains(agent_id) {
                return Err(GenerationError::CatalogInconsistency {
                    domain_id,
                    reason: format!(
                        "fixed task '{}' is bound to unknown agent {agent_id}",
                        task.title
                    ),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Difficulty;
    use crate::store::LibSqlBackend;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn agent(domain_id: Uuid, name: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            domain_id,
            name: name.into(),
            birth_date: None,
            active: true,
        }
    }

    fn task(domain_id: Uuid, title: &str, difficulty: Difficulty, position: i64) -> Task {
        Task {
            id: Uuid::new_v4(),
            domain_id,
            title: title.into(),
            kind: TaskKind::Rotating,
            difficulty,
            min_age: None,
            max_age: None,
            estimated_minutes: None,
            position,
            active: true,
            fixed_assignees: Vec::new(),
        }
    }

    async fn generate(
        db: &LibSqlBackend,
        domain_id: Uuid,
        agents: &[Agent],
        tasks: &[Task],
        as_of: NaiveDate,
    ) -> GenerationPlan {
        let config = EngineConfig::default();
        Orchestrator::new(db, &config)
            .generate(domain_id, agents, tasks, as_of)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fairness_bound_holds_for_spread_weights() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let a = agent(domain.id, "Ada");
        let b = agent(domain.id, "Ben");
        let agents = vec![a.clone(), b.clone()];

        // Weights [3, 2, 1, 1], no prior history.
        let tasks = vec![
            task(domain.id, "mow", Difficulty::Hard, 0),
            task(domain.id, "dishes", Difficulty::Medium, 1),
            task(domain.id, "trash", Difficulty::Easy, 2),
            task(domain.id, "mail", Difficulty::Easy, 3),
        ];

        let plan = generate(&db, domain.id, &agents, &tasks, date(2026, 8, 25)).await;
        assert!(plan.unresolved.is_empty());
        assert_eq!(plan.assigned_count(), 4);

        let weight_of = |agent_id: Uuid| -> u32 {
            plan.assignments
                .get(&agent_id)
                .map(|ids| {
                    ids.iter()
                        .map(|id| tasks.iter().find(|t| t.id == *id).unwrap().weight())
                        .sum()
                })
                .unwrap_or(0)
        };
        let (wa, wb) = (weight_of(a.id), weight_of(b.id));
        assert_eq!(wa + wb, 7);
        // Spread never exceeds the heaviest task assigned in the pass.
        assert!(wa.abs_diff(wb) <= 3, "spread {wa} vs {wb}");
        // The hard task lands alone on one agent, the medium on the other.
        let hard_owner = plan
            .assignments
            .iter()
            .find(|(_, ids)| ids.contains(&tasks[0].id))
            .map(|(id, _)| *id)
            .unwrap();
        assert!(!plan.assignments[&hard_owner].contains(&tasks[1].id));
    }

    #[tokio::test]
    async fn repeated_runs_pick_the_same_agent_without_history() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let agents = vec![agent(domain.id, "Ada"), agent(domain.id, "Ben")];
        let tasks = vec![task(domain.id, "dishes", Difficulty::Medium, 0)];

        let first = generate(&db, domain.id, &agents, &tasks, date(2026, 8, 25)).await;
        for _ in 0..3 {
            let next = generate(&db, domain.id, &agents, &tasks, date(2026, 8, 25)).await;
            assert_eq!(next.rotations, first.rotations);
        }
    }

    #[tokio::test]
    async fn ineligible_task_is_unresolved_without_side_effects() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let mut young = agent(domain.id, "Kit");
        young.birth_date = Some(date(2020, 1, 1));
        let agents = vec![young.clone()];

        let mut gated = task(domain.id, "mow", Difficulty::Hard, 0);
        gated.min_age = Some(14);
        let open = task(domain.id, "mail", Difficulty::Easy, 1);
        let tasks = vec![gated.clone(), open.clone()];

        let plan = generate(&db, domain.id, &agents, &tasks, date(2026, 8, 25)).await;
        assert_eq!(plan.unresolved, vec![gated.id]);
        assert_eq!(plan.assignments[&young.id], vec![open.id]);
    }

    #[tokio::test]
    async fn fixed_tasks_skip_tracker_and_rotation_history() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let a = agent(domain.id, "Ada");
        let b = agent(domain.id, "Ben");
        let mut inactive = agent(domain.id, "Idle");
        inactive.active = false;
        let agents = vec![a.clone(), b.clone(), inactive.clone()];

        let mut fixed = task(domain.id, "feed-cat", Difficulty::Hard, 0);
        fixed.kind = TaskKind::Fixed;
        fixed.fixed_assignees = vec![a.id, inactive.id];
        let rotating = task(domain.id, "trash", Difficulty::Easy, 1);
        let tasks = vec![fixed.clone(), rotating.clone()];

        let plan = generate(&db, domain.id, &agents, &tasks, date(2026, 8, 25)).await;

        // The inactive binding is skipped; the fixed task creates no rotation.
        assert_eq!(plan.assignments[&a.id].first(), Some(&fixed.id));
        assert!(!plan.assignments.contains_key(&inactive.id));
        assert_eq!(plan.rotations.len(), 1);
        assert_eq!(plan.rotations[0].0, rotating.id);
        // Ada's fixed load doesn't count toward balancing, so the rotating
        // task still resolves by history tie-break, not by her fixed weight.
    }

    #[tokio::test]
    async fn unknown_fixed_binding_is_a_catalog_inconsistency() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let a = agent(domain.id, "Ada");

        let mut fixed = task(domain.id, "feed-cat", Difficulty::Easy, 0);
        fixed.kind = TaskKind::Fixed;
        fixed.fixed_assignees = vec![Uuid::new_v4()];

        let config = EngineConfig::default();
        let err = Orchestrator::new(&db, &config)
            .generate(domain.id, &[a], &[fixed], date(2026, 8, 25))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::CatalogInconsistency { .. }));
    }

    #[tokio::test]
    async fn inverted_bounds_are_a_catalog_inconsistency() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let a = agent(domain.id, "Ada");
        let mut bad = task(domain.id, "mow", Difficulty::Easy, 0);
        bad.min_age = Some(12);
        bad.max_age = Some(8);

        let config = EngineConfig::default();
        let err = Orchestrator::new(&db, &config)
            .generate(domain.id, &[a], &[bad], date(2026, 8, 25))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::CatalogInconsistency { .. }));
    }

    #[tokio::test]
    async fn history_steers_equal_weight_ties() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let domain = db.create_domain("home").await.unwrap();
        let a = agent(domain.id, "Ada");
        let b = agent(domain.id, "Ben");
        let agents = vec![a.clone(), b.clone()];
        db.insert_agent(&a).await.unwrap();
        db.insert_agent(&b).await.unwrap();
        let t = task(domain.id, "dishes", Difficulty::Medium, 0);
        db.insert_task(&t).await.unwrap();

        // Ada took the task yesterday, so Ben gets it today.
        db.insert_rotation(t.id, a.id, date(2026, 8, 24)).await.unwrap();

        let plan = generate(&db, domain.id, &agents, std::slice::from_ref(&t), date(2026, 8, 25)).await;
        assert_eq!(plan.rotations, vec![(t.id, b.id)]);
    }
}
