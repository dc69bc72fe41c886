//! Eligibility filter — which agents may receive a task.

use chrono::NaiveDate;

use crate::catalog::{Agent, Task};

/// The subset of `agents` allowed to receive `task` on `as_of`.
///
/// No side effects; an empty result means "task unresolved for this run",
/// never an error. Callers pass the active pool.
pub fn eligible<'a>(task: &Task, agents: &'a [Agent], as_of: NaiveDate) -> Vec<&'a Agent> {
    agents
        .iter()
        .filter(|agent| is_eligible(task, agent, as_of))
        .collect()
}

/// Bounds are inclusive on both ends; an unset bound is unconstrained on
/// that side. An agent with no birth date is assumed eligible.
pub fn is_eligible(task: &Task, agent: &Agent, as_of: NaiveDate) -> bool {
    let Some(age) = agent.age_on(as_of) else {
        return true;
    };
    if task.min_age.is_some_and(|min| age < min) {
        return false;
    }
    if task.max_age.is_some_and(|max| age > max) {
        return false;
    }
    true
}
