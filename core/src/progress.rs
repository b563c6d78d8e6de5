//! Pure helpers and the blocker log backing the Progress & Blocker Handler
//!. The stateful orchestration (authorizing against the
//! active lease, renewing, transitioning task status, emitting events) lives
//! on [`crate::facade::Core`], which is the only thing with a consistent
//! view of the graph, lease table, and event bus together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::{AgentId, BlockerReport, BlockerSeverity, TaskId};

/// Clamp a reported percentage into `[0, 100]` and reject strict decreases
/// below a stored value. Returns the pct to apply.
pub fn clamp_and_guard_progress(reported_pct: u8, stored_pct: u8) -> u8 {
    reported_pct.min(100).max(stored_pct)
}

/// Append-only store of blocker reports, independent of task status so a
/// task's full blocker history survives `unblock_task`.
#[derive(Default)]
pub struct BlockerLog {
    reports: Mutex<Vec<BlockerReport>>,
}

impl BlockerLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, task_id: TaskId, agent_id: AgentId, description: String, severity: BlockerSeverity, now: DateTime<Utc>) {
        self.reports.lock().push(BlockerReport { task_id, agent_id, description, severity, reported_at: now });
    }

    pub fn for_task(&self, task_id: &TaskId) -> Vec<BlockerReport> {
        self.reports.lock().iter().filter(|r| &r.task_id == task_id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_clamps_above_100() {
        assert_eq!(clamp_and_guard_progress(150, 0), 100);
    }

    #[test]
    fn progress_never_regresses_below_stored() {
        assert_eq!(clamp_and_guard_progress(10, 50), 50);
    }

    #[test]
    fn progress_applies_forward_values() {
        assert_eq!(clamp_and_guard_progress(75, 50), 75);
    }

    #[test]
    fn blocker_log_filters_by_task() {
        let log = BlockerLog::new();
        log.record("t1".into(), "a1".into(), "stuck".into(), BlockerSeverity::High, Utc::now());
        log.record("t2".into(), "a1".into(), "stuck too".into(), BlockerSeverity::Low, Utc::now());
        assert_eq!(log.for_task(&"t1".to_string()).len(), 1);
    }
}
