//! Unified `Database` trait — single async interface for all persistence.
//!
//! Covers the catalog reads the orchestrator needs, the rotation-history
//! queries the resolver needs, the atomic clear-and-rebuild write the
//! materializer needs, and the read side consumed by downstream
//! completion/review workflows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::catalog::{Agent, Domain, Task};
use crate::error::DatabaseError;

/// Immutable historical fact: a task went to an agent on a date.
///
/// At most one record exists per (task, agent, date) triple; the backend
/// enforces this with a unique index. Records are only ever appended, or
/// cleared wholesale for a (domain, date) during regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRecord {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub assigned_date: NaiveDate,
}

/// Status of a daily list entry. The engine only ever writes `Pending`;
/// completion and review workflows move entries forward afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Completed,
    Reviewed,
}

/// One task on an agent's daily list.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: EntryStatus,
}

/// Persisted per-agent, per-date list container. One exists per
/// (agent, date) pair — a unique index backs the invariant.
#[derive(Debug, Clone)]
pub struct DailyTaskList {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<TaskEntry>,
}

/// The list container and entries to create for one agent.
#[derive(Debug, Clone)]
pub struct ListWrite {
    pub agent_id: Uuid,
    pub task_ids: Vec<Uuid>,
}

/// Everything `replace_daily_lists` commits in one transaction: one list per
/// active agent plus the (task, agent) rotation facts for rotating
/// assignments only.
#[derive(Debug, Clone, Default)]
pub struct ListPlan {
    pub lists: Vec<ListWrite>,
    pub rotations: Vec<(Uuid, Uuid)>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Catalog reads ───────────────────────────────────────────────

    /// All scheduling domains, catalog order.
    async fn list_domains(&self) -> Result<Vec<Domain>, DatabaseError>;

    /// Every agent in a domain, active or not, catalog order.
    async fn list_agents(&self, domain_id: Uuid) -> Result<Vec<Agent>, DatabaseError>;

    /// Active tasks in a domain, catalog order, with fixed bindings loaded.
    async fn list_active_tasks(&self, domain_id: Uuid) -> Result<Vec<Task>, DatabaseError>;

    // ── Rotation history ────────────────────────────────────────────

    /// Per-agent count of this task's rotation records with
    /// `from <= assigned_date < to`. Agents with no records map to zero.
    async fn count_recent_rotations(
        &self,
        task_id: Uuid,
        agent_ids: &[Uuid],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<Uuid, u32>, DatabaseError>;

    /// The agent's single most recent assignment date for this task across
    /// all history, or `None` if never assigned.
    async fn last_rotation_date(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<NaiveDate>, DatabaseError>;

    // ── Materialization ─────────────────────────────────────────────

    /// Atomically clear this (domain, date)'s lists, entries, and rotation
    /// records, then write the plan. All-or-nothing: any failure rolls the
    /// domain back to its pre-call state.
    ///
    /// A unique-constraint violation (a concurrent pass won the race) maps
    /// to [`DatabaseError::Constraint`].
    async fn replace_daily_lists(
        &self,
        domain_id: Uuid,
        date: NaiveDate,
        plan: &ListPlan,
    ) -> Result<(), DatabaseError>;

    // ── Downstream reads ────────────────────────────────────────────

    /// An agent's list for a date, with entries, if one was generated.
    async fn get_daily_list(
        &self,
        agent_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyTaskList>, DatabaseError>;

    /// Rotation records written for a domain on a date.
    async fn rotations_on(
        &self,
        domain_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<RotationRecord>, DatabaseError>;
}
