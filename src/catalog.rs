//! Catalog data model — domains, agents, and tasks.
//!
//! Catalog records are maintained by external tooling; the engine only reads
//! them. Seeding helpers live on the storage backend, not here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An independent scheduling unit (e.g. one household). Agents, tasks, and
/// rotation history never cross domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An entity that can receive task assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub name: String,
    /// Eligibility attribute. Absent means "unknown, assume eligible".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    pub active: bool,
}

impl Agent {
    /// Whole years of age as of `date`, or `None` when the birth date is
    /// unknown (or lies in the future of `date`).
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|born| date.years_since(born))
    }
}

/// How a task is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Permanently bound to specific agents; no rotation.
    Fixed,
    /// Assigned fresh each generation pass.
    Rotating,
}

/// Effort class of a task. The ordinal weight drives workload balancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Balancing weight: easy=1, medium=2, hard=3.
    pub fn weight(self) -> u32 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }
}

/// A unit of recurring work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub title: String,
    pub kind: TaskKind,
    pub difficulty: Difficulty,
    /// Inclusive lower age bound; unset means unconstrained below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u32>,
    /// Inclusive upper age bound; unset means unconstrained above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    /// Rough duration for downstream display; not used in balancing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    /// Catalog order — the stable tiebreak for equal-weight rotating tasks.
    pub position: i64,
    pub active: bool,
    /// Permanent bindings for `Fixed` tasks; empty for `Rotating`.
    #[serde(default)]
    pub fixed_assignees: Vec<Uuid>,
}

impl Task {
    pub fn weight(&self) -> u32 {
        self.difficulty.weight()
    }
}
