//! Generation engine — eligibility, workload balancing, historical
//! tie-breaks, and list materialization for one (domain, date) pass.

pub mod eligibility;
pub mod materializer;
pub mod orchestrator;
pub mod resolver;
pub mod workload;

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::store::Database;

pub use materializer::{Materializer, RunSummary};
pub use orchestrator::{GenerationPlan, Orchestrator};

/// Facade over one domain's generation: load catalog, plan, materialize.
pub struct Engine {
    store: Arc<dyn Database>,
    config: EngineConfig,
    materializer: Materializer,
}

impl Engine {
    pub fn new(store: Arc<dyn Database>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            materializer: Materializer::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Database> {
        &self.store
    }

    /// Run one full generation pass for `(domain_id, date)`.
    ///
    /// This is also the entry point for any manual "regenerate" trigger;
    /// rerunning a date replaces its prior state wholesale.
    pub async fn run_generation(
        &self,
        domain_id: Uuid,
        date: NaiveDate,
    ) -> Result<RunSummary, GenerationError> {
        let agents = self.store.list_agents(domain_id).await?;
        let tasks = self.store.list_active_tasks(domain_id).await?;

        let plan = Orchestrator::new(self.store.as_ref(), &self.config)
            .generate(domain_id, &agents, &tasks, date)
            .await?;

        self.materializer
            .materialize(self.store.as_ref(), domain_id, date, &agents, &plan)
            .await
    }
}
