//! Fluent builders for constructing [`Task`] instances in tests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use marcus_core::models::{Priority, Task, TaskId, TaskStatus};

pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self { task: crate::fixtures::ready_task("t1") }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.task.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.task.name = name.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_estimated_hours(mut self, hours: f64) -> Self {
        self.task.estimated_hours = hours;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.task.dependencies = deps;
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.task.labels = labels.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<TaskId>, index: u32) -> Self {
        self.task.parent_task_id = Some(parent_id.into());
        self.task.subtask_index = Some(index);
        self.task.is_subtask = true;
        self
    }

    pub fn provides(mut self, tag: impl Into<String>) -> Self {
        self.task.provides = Some(tag.into());
        self
    }

    pub fn requires(mut self, tag: impl Into<String>) -> Self {
        self.task.requires = Some(tag.into());
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.task.due_date = Some(due_date);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_overrides() {
        let task = TaskBuilder::new()
            .with_id("t42")
            .with_priority(Priority::Urgent)
            .with_labels(&["backend"])
            .build();
        assert_eq!(task.id, "t42");
        assert_eq!(task.priority, Priority::Urgent);
        assert!(task.labels.contains("backend"));
    }
}
