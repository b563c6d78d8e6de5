//! Scoring and per-task reservation latches for the Scheduler / Task
//! Picker. The end-to-end `request_next_task` orchestration
//! (graph snapshot, resolver call, lease open, persistence write-through,
//! event emission) lives on [`crate::facade::Core`]; this module holds the
//! two pieces that are pure or independently lockable.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ScoreWeights;
use crate::models::{Agent, Task};

/// Score a candidate task for an agent. Zero iff the
/// task's labels share nothing with the agent's skills; callers should
/// filter zero-scoring tasks out rather than assigning them.
pub fn score(task: &Task, agent: &Agent, successor_count: usize, weights: &ScoreWeights) -> f64 {
    let matched = task.labels.intersection(&agent.skills).count();
    let required = task.labels.len();
    if required > 0 && matched == 0 {
        return 0.0;
    }
    let skill_ratio = if required == 0 { 1.0 } else { matched as f64 / required as f64 };
    let dependency_impact = (successor_count as f64 / 10.0).min(1.0);

    skill_ratio * weights.skill + task.priority.weight() * weights.priority + dependency_impact * weights.impact
}

/// Rank candidates: subtasks first as a whole group, then parent-level
/// tasks, each group ordered by descending score with the tie-break higher
/// priority, earlier due date, shorter estimated hours, lexicographic id.
/// Subtask-first is a partition, not a tie-break — a low-scoring subtask
/// still outranks every parent-level task.
pub fn rank<'a>(candidates: Vec<(&'a Task, f64)>) -> Vec<&'a Task> {
    let (mut subtasks, mut parents): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|(t, _)| t.is_subtask);

    let by_score_then_tiebreak = |(a, score_a): &(&Task, f64), (b, score_b): &(&Task, f64)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.due_date.cmp(&b.due_date))
            .then_with(|| a.estimated_hours.partial_cmp(&b.estimated_hours).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    };
    subtasks.sort_by(by_score_then_tiebreak);
    parents.sort_by(by_score_then_tiebreak);

    subtasks.into_iter().chain(parents).map(|(t, _)| t).collect()
}

/// Fine-grained exclusive lock keyed by task id, held only during the
/// reserve check+flip. Lives independently of the graph lock
/// so the lock-ordering rule (`Graph writer > Lease writer > Per-task
/// latch`) is expressible without nesting the graph's own lock inside it.
#[derive(Default)]
pub struct ReservationLatches {
    latches: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReservationLatches {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn for_task(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut latches = self.latches.lock();
        latches.entry(task_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn weights() -> ScoreWeights {
        ScoreWeights { skill: 0.5, priority: 0.3, impact: 0.2 }
    }

    fn agent(skills: &[&str]) -> Agent {
        Agent::new("a1".into(), "A".into(), "engineer".into(), skills.iter().map(|s| s.to_string()).collect(), 40.0)
    }

    fn task(id: &str, labels: &[&str], priority: crate::models::Priority) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            status: crate::models::TaskStatus::Todo,
            priority,
            estimated_hours: 1.0,
            actual_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            done_at: None,
            due_date: None,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            project_id: "p1".into(),
            dependencies: vec![],
            is_subtask: false,
            parent_task_id: None,
            subtask_index: None,
            provides: None,
            requires: None,
            assigned_to: None,
            board_sync_pending: false,
        }
    }

    #[test]
    fn mismatched_skills_score_zero() {
        let t = task("t1", &["rust"], crate::models::Priority::High);
        let a = agent(&["python"]);
        assert_eq!(score(&t, &a, 0, &weights()), 0.0);
    }

    #[test]
    fn matching_skills_and_priority_raise_score() {
        let t = task("t1", &["rust"], crate::models::Priority::Urgent);
        let a = agent(&["rust"]);
        let s = score(&t, &a, 5, &weights());
        assert!(s > 0.5);
    }

    #[test]
    fn rank_orders_by_score_then_tie_break() {
        let t1 = task("b", &[], crate::models::Priority::Low);
        let t2 = task("a", &[], crate::models::Priority::Low);
        let candidates = vec![(&t1, 0.5), (&t2, 0.5)];
        let ranked = rank(candidates);
        assert_eq!(ranked[0].id, "a");
    }

    #[test]
    fn subtasks_are_partitioned_ahead_of_higher_scoring_parents() {
        let parent = task("parent", &[], crate::models::Priority::Urgent);
        let mut subtask = task("sub", &[], crate::models::Priority::Low);
        subtask.is_subtask = true;
        subtask.parent_task_id = Some("other-parent".into());

        // The parent scores far higher, but subtask-first still wins.
        let candidates = vec![(&parent, 0.9), (&subtask, 0.1)];
        let ranked = rank(candidates);
        assert_eq!(ranked[0].id, "sub");
        assert_eq!(ranked[1].id, "parent");
    }

    #[test]
    fn latches_for_same_task_are_identical() {
        let latches = ReservationLatches::new();
        let l1 = latches.for_task("t1");
        let l2 = latches.for_task("t1");
        assert!(Arc::ptr_eq(&l1, &l2));
    }
}
