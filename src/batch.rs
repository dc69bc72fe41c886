//! Batch driver — run generation across all domains for a target date.
//!
//! Domains are independent: one domain's failure never stops its siblings,
//! and a pass that loses a concurrent-generation race is retried whole.
//! The driver has no clock of its own; the caller supplies the date.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::{Engine, RunSummary};
use crate::error::{DatabaseError, GenerationError};

/// A domain whose run failed, with the rendered error.
#[derive(Debug, Clone, Serialize)]
pub struct DomainFailure {
    pub domain_id: Uuid,
    pub error: String,
}

/// Result of one batch sweep.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub date: NaiveDate,
    pub runs: Vec<RunSummary>,
    pub failures: Vec<DomainFailure>,
}

/// Iterates all domains for a date, isolating failures per domain.
pub struct BatchDriver {
    engine: Arc<Engine>,
}

impl BatchDriver {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Generate for a single domain, retrying lost races.
    pub async fn run_domain(
        &self,
        domain_id: Uuid,
        date: NaiveDate,
    ) -> Result<RunSummary, GenerationError> {
        let retries = self.engine.config().conflict_retries;
        let mut attempt = 0;
        loop {
            match self.engine.run_generation(domain_id, date).await {
                Ok(summary) => return Ok(summary),
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    warn!(domain_id = %domain_id, %date, attempt, "Generation conflict, retrying pass");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sweep every domain for `date`.
    pub async fn run_all(&self, date: NaiveDate) -> Result<BatchReport, DatabaseError> {
        let domains = self.engine.store().list_domains().await?;
        info!(%date, domains = domains.len(), "Starting generation batch");

        let mut report = BatchReport {
            date,
            runs: Vec::new(),
            failures: Vec::new(),
        };

        if self.engine.config().parallel_domains {
            let passes = domains.iter().map(|d| {
                let id = d.id;
                async move { (id, self.run_domain(id, date).await) }
            });
            for (domain_id, result) in futures::future::join_all(passes).await {
                record(&mut report, domain_id, result);
            }
        } else {
            for domain in &domains {
                let result = self.run_domain(domain.id, date).await;
                record(&mut report, domain.id, result);
            }
        }

        info!(
            %date,
            ok = report.runs.len(),
            failed = report.failures.len(),
            "Generation batch finished"
        );
        Ok(report)
    }
}

fn record(report: &mut BatchReport, domain_id: Uuid, result: Result<RunSummary, GenerationError>) {
    match result {
        Ok(summary) => report.runs.push(summary),
        Err(e) => {
            error!(domain_id = %domain_id, "Generation failed: {e}");
            report.failures.push(DomainFailure {
                domain_id,
                error: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use crate::catalog::{Agent, Difficulty, Domain, Task, TaskKind};
    use crate::config::EngineConfig;
    use crate::store::{DailyTaskList, Database, LibSqlBackend, ListPlan, RotationRecord};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Fails the first N list replacements with a constraint violation, the
    /// way a lost materialization race surfaces from the backend.
    struct RacingStore {
        inner: Arc<LibSqlBackend>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Database for RacingStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }

        async fn list_domains(&self) -> Result<Vec<Domain>, DatabaseError> {
            self.inner.list_domains().await
        }

        async fn list_agents(&self, domain_id: Uuid) -> Result<Vec<Agent>, DatabaseError> {
            self.inner.list_agents(domain_id).await
        }

        async fn list_active_tasks(&self, domain_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
            self.inner.list_active_tasks(domain_id).await
        }

        async fn count_recent_rotations(
            &self,
            task_id: Uuid,
            agent_ids: &[Uuid],
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<HashMap<Uuid, u32>, DatabaseError> {
            self.inner
                .count_recent_rotations(task_id, agent_ids, from, to)
                .await
        }

        async fn last_rotation_date(
            &self,
            task_id: Uuid,
            agent_id: Uuid,
        ) -> Result<Option<NaiveDate>, DatabaseError> {
            self.inner.last_rotation_date(task_id, agent_id).await
        }

        async fn replace_daily_lists(
            &self,
            domain_id: Uuid,
            date: NaiveDate,
            plan: &ListPlan,
        ) -> Result<(), DatabaseError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DatabaseError::Constraint(
                    "UNIQUE constraint failed: daily_lists.agent_id, daily_lists.date".into(),
                ));
            }
            self.inner.replace_daily_lists(domain_id, date, plan).await
        }

        async fn get_daily_list(
            &self,
            agent_id: Uuid,
            date: NaiveDate,
        ) -> Result<Option<DailyTaskList>, DatabaseError> {
            self.inner.get_daily_list(agent_id, date).await
        }

        async fn rotations_on(
            &self,
            domain_id: Uuid,
            date: NaiveDate,
        ) -> Result<Vec<RotationRecord>, DatabaseError> {
            self.inner.rotations_on(domain_id, date).await
        }
    }

    async fn seeded_backend() -> (Arc<LibSqlBackend>, Uuid) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let domain = db.create_domain("home").await.unwrap();
        db.insert_agent(&Agent {
            id: Uuid::new_v4(),
            domain_id: domain.id,
            name: "Ada".into(),
            birth_date: None,
            active: true,
        })
        .await
        .unwrap();
        db.insert_task(&Task {
            id: Uuid::new_v4(),
            domain_id: domain.id,
            title: "trash".into(),
            kind: TaskKind::Rotating,
            difficulty: Difficulty::Easy,
            min_age: None,
            max_age: None,
            estimated_minutes: None,
            position: 0,
            active: true,
            fixed_assignees: Vec::new(),
        })
        .await
        .unwrap();
        (db, domain.id)
    }

    #[tokio::test]
    async fn lost_race_is_retried_and_the_pass_commits() {
        let (inner, domain_id) = seeded_backend().await;
        let store: Arc<dyn Database> = Arc::new(RacingStore {
            inner: inner.clone(),
            failures: AtomicU32::new(1),
        });
        let driver = BatchDriver::new(Arc::new(Engine::new(store, EngineConfig::default())));

        let day = date(2026, 8, 25);
        let summary = driver.run_domain(domain_id, day).await.unwrap();
        assert_eq!(summary.tasks_assigned, 1);
        assert_eq!(inner.rotations_on(domain_id, day).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_conflict() {
        let (inner, domain_id) = seeded_backend().await;
        // Default config allows one retry; two straight losses exhaust it.
        let store: Arc<dyn Database> = Arc::new(RacingStore {
            inner,
            failures: AtomicU32::new(2),
        });
        let driver = BatchDriver::new(Arc::new(Engine::new(store, EngineConfig::default())));

        let err = driver
            .run_domain(domain_id, date(2026, 8, 25))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Conflict { .. }));
    }

    #[tokio::test]
    async fn one_bad_domain_does_not_stop_the_batch() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());

        let good = db.create_domain("good").await.unwrap();
        let bad = db.create_domain("bad").await.unwrap();

        let agent = Agent {
            id: Uuid::new_v4(),
            domain_id: good.id,
            name: "Ada".into(),
            birth_date: None,
            active: true,
        };
        db.insert_agent(&agent).await.unwrap();
        db.insert_task(&Task {
            id: Uuid::new_v4(),
            domain_id: good.id,
            title: "trash".into(),
            kind: TaskKind::Rotating,
            difficulty: Difficulty::Easy,
            min_age: None,
            max_age: None,
            estimated_minutes: None,
            position: 0,
            active: true,
            fixed_assignees: Vec::new(),
        })
        .await
        .unwrap();

        // The bad domain has a fixed task bound to an agent that was never
        // part of its catalog.
        db.insert_task(&Task {
            id: Uuid::new_v4(),
            domain_id: bad.id,
            title: "ghost".into(),
            kind: TaskKind::Fixed,
            difficulty: Difficulty::Easy,
            min_age: None,
            max_age: None,
            estimated_minutes: None,
            position: 0,
            active: true,
            fixed_assignees: vec![Uuid::new_v4()],
        })
        .await
        .unwrap();

        let store: Arc<dyn Database> = db.clone();
        let driver = BatchDriver::new(Arc::new(Engine::new(store, EngineConfig::default())));
        let report = driver.run_all(date(2026, 8, 25)).await.unwrap();

        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.runs[0].domain_id, good.id);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].domain_id, bad.id);
    }

    #[tokio::test]
    async fn empty_catalog_batch_is_a_no_op() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let store: Arc<dyn Database> = db;
        let driver = BatchDriver::new(Arc::new(Engine::new(store, EngineConfig::default())));
        let report = driver.run_all(date(2026, 8, 25)).await.unwrap();
        assert!(report.runs.is_empty());
        assert!(report.failures.is_empty());
    }
}
