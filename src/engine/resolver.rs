//! Rotation resolver — historical tie-breaking among equally loaded agents.
//!
//! Called only when the workload tracker alone cannot pick a single agent.
//! Reads the rotation history, never writes it.

use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use crate::catalog::Task;
use crate::error::DatabaseError;
use crate::store::Database;

/// Picks exactly one agent from a multi-candidate tie.
pub struct RotationResolver<'a> {
    store: &'a dyn Database,
    lookback_days: u32,
}

impl<'a> RotationResolver<'a> {
    pub fn new(store: &'a dyn Database, lookback_days: u32) -> Self {
        Self {
            store,
            lookback_days,
        }
    }

    /// Resolve a tie for `task` among `candidates` (len > 1):
    ///
    /// 1. Count this task's rotation records per candidate in the trailing
    ///    half-open window `[as_of - lookback, as_of)`; keep the minimum.
    /// 2. Among remaining ties, compare the most recent assignment date for
    ///    this task across all history; never-assigned sorts before
    ///    assigned-long-ago, so it wins the tie.
    /// 3. Any residual tie falls back to agent id ascending.
    pub async fn resolve(
        &self,
        task: &Task,
        candidates: &[Uuid],
        as_of: NaiveDate,
    ) -> Result<Uuid, DatabaseError> {
        debug_assert!(candidates.len() > 1, "resolve() requires a real tie");

        let from = as_of - Duration::days(self.lookback_days as i64);
        let counts = self
            .store
            .count_recent_rotations(task.id, candidates, from, as_of)
            .await?;

        let count_of = |id: &Uuid| counts.get(id).copied().unwrap_or(0);
        let min_count = candidates.iter().map(count_of).min().unwrap_or(0);
        let remaining: Vec<Uuid> = candidates
            .iter()
            .copied()
            .filter(|id| count_of(id) == min_count)
            .collect();

        if let [only] = remaining[..] {
            return Ok(only);
        }

        // Option<NaiveDate> orders None first, which is exactly the
        // "never assigned beats assigned long ago" rule; the id component
        // makes the residual tie deterministic.
        let mut best: Option<(Option<NaiveDate>, Uuid)> = None;
        for id in remaining {
            let last = self.store.last_rotation_date(task.id, id).await?;
            let key = (last, id);
            if best.as_ref().is_none_or(|b| key < *b) {
                best = Some(key);
            }
        }

        // remaining is non-empty, so best is always set
        Ok(best.map(|(_, id)| id).unwrap_or(candidates[0]))
    }
}
