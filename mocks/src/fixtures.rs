//! Standard test fixtures: pre-built tasks and agents covering the common
//! states integration tests need without re-deriving them each time.

use std::collections::BTreeSet;

use chrono::Utc;
use marcus_core::models::{Agent, Priority, Task, TaskStatus};

/// A single todo task with no dependencies, ready to be picked up.
pub fn ready_task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        name: format!("Task {id}"),
        description: "A standard test task".to_string(),
        status: TaskStatus::Todo,
        priority: Priority::Medium,
        estimated_hours: 2.0,
        actual_hours: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        done_at: None,
        due_date: None,
        labels: BTreeSet::new(),
        project_id: "test-project".to_string(),
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

/// A task already marked `done`, with consistent `actual_hours`/`done_at`.
pub fn done_task(id: &str) -> Task {
    let mut task = ready_task(id);
    task.status = TaskStatus::Done;
    task.actual_hours = Some(task.estimated_hours);
    task.done_at = Some(Utc::now());
    task
}

/// `count` distinct ready tasks with ids `t1..tN`.
pub fn ready_tasks(count: usize) -> Vec<Task> {
    (1..=count).map(|i| ready_task(&format!("t{i}"))).collect()
}

/// An agent with the given skills and generous capacity.
pub fn agent_with_skills(id: &str, skills: &[&str]) -> Agent {
    Agent::new(
        id.to_string(),
        format!("Agent {id}"),
        "engineer".to_string(),
        skills.iter().map(|s| s.to_string()).collect(),
        40.0,
    )
}
