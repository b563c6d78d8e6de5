//! The Context Builder: assembles the payload handed to an
//! agent alongside its assignment. Pure and deterministic: given the same
//! graph and memory state, two builds return byte-identical payloads. Never
//! calls out to an LLM or any collaborator beyond the Workspace contract.

use serde::{Deserialize, Serialize};

use crate::collaborators::Workspace;
use crate::error::Result;
use crate::graph::TaskGraph;
use crate::memory::{MemoryRecorder, Outcome};
use crate::models::{AgentId, Artifact, Decision, ProjectId, Task, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedPredecessor {
    pub task: Task,
    pub artifacts: Vec<Artifact>,
}

/// The deterministic payload returned alongside an [`crate::models::Assignment`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub task: Task,
    pub completed_predecessors: Vec<CompletedPredecessor>,
    pub consumed_contracts: Vec<String>,
    pub recent_decisions: Vec<Decision>,
    pub implementation_hint: String,
    pub workspace_path: String,
}

/// Derive a deterministic, category-based implementation hint from a
/// task's labels. Unrecognized labels contribute nothing; the hint is
/// empty (not missing) when no recognized category applies.
fn implementation_hint(labels: &std::collections::BTreeSet<String>) -> String {
    const CATEGORIES: [(&str, &str); 6] = [
        ("frontend", "Implement UI changes; verify with a manual browser pass."),
        ("backend", "Implement server-side logic; cover with unit tests."),
        ("database", "Write a migration; verify schema changes are reversible."),
        ("test", "Add or update automated tests for the behavior under change."),
        ("docs", "Update documentation alongside the change."),
        ("security", "Review for injection, auth bypass, and secret handling."),
    ];
    CATEGORIES
        .iter()
        .filter(|(label, _)| labels.contains(*label))
        .map(|(_, hint)| *hint)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct ContextBuilder<'a> {
    graph: &'a TaskGraph,
    memory: &'a MemoryRecorder,
    workspace: &'a dyn Workspace,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(graph: &'a TaskGraph, memory: &'a MemoryRecorder, workspace: &'a dyn Workspace) -> Self {
        Self { graph, memory, workspace }
    }

    /// Build the context for `task_id`. `decisions_by_parent` supplies the
    /// decision log for the task's parent (the caller owns decision
    /// storage; the builder only selects and formats the five most recent).
    pub async fn build(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        project_id: &ProjectId,
        decisions_for_parent: Vec<Decision>,
        artifacts_for_predecessor: impl Fn(&TaskId) -> Vec<Artifact>,
    ) -> Result<Context> {
        let task = self
            .graph
            .get(task_id)
            .cloned()
            .ok_or_else(|| crate::error::MarcusError::not_found_task(task_id.clone()))?;

        let mut completed_predecessors: Vec<CompletedPredecessor> = self
            .graph
            .predecessors(task_id)
            .into_iter()
            .filter(|t| t.status == crate::models::TaskStatus::Done)
            .map(|t| CompletedPredecessor { artifacts: artifacts_for_predecessor(&t.id), task: t.clone() })
            .collect();
        completed_predecessors.sort_by(|a, b| a.task.id.cmp(&b.task.id));

        let consumed_contracts: Vec<String> = task.requires.iter().cloned().collect();

        let mut recent_decisions = decisions_for_parent;
        recent_decisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent_decisions.truncate(5);

        let workspace_path = self.workspace.path_for(project_id, agent_id).await?;

        // Touch memory so a future, richer hint (e.g. "this agent is slow
        // at `database` work") has a deterministic source to read from; the
        // current hint is purely label-derived and ignores history.
        let _ = self.memory.history_for(agent_id);

        Ok(Context {
            implementation_hint: implementation_hint(&task.labels),
            task,
            completed_predecessors,
            consumed_contracts,
            recent_decisions,
            workspace_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeSet;

    struct FixedWorkspace;

    #[async_trait]
    impl Workspace for FixedWorkspace {
        async fn path_for(&self, project_id: &ProjectId, agent_id: &AgentId) -> Result<String> {
            Ok(format!("/workspaces/{project_id}/{agent_id}"))
        }
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            status: crate::models::TaskStatus::Todo,
            priority: crate::models::Priority::Medium,
            estimated_hours: 1.0,
            actual_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            done_at: None,
            due_date: None,
            labels: BTreeSet::new(),
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

    #[tokio::test]
    async fn build_is_deterministic_across_runs() {
        let mut graph = TaskGraph::new();
        let mut t = task("t1");
        t.labels.insert("backend".into());
        graph.upsert(t).unwrap();
        let memory = MemoryRecorder::default();
        let workspace = FixedWorkspace;
        let builder = ContextBuilder::new(&graph, &memory, &workspace);

        let ctx1 = builder
            .build(&"t1".to_string(), &"a1".to_string(), &"p1".to_string(), vec![], |_| vec![])
            .await
            .unwrap();
        let ctx2 = builder
            .build(&"t1".to_string(), &"a1".to_string(), &"p1".to_string(), vec![], |_| vec![])
            .await
            .unwrap();
        assert_eq!(ctx1, ctx2);
        assert!(ctx1.implementation_hint.contains("server-side"));
    }
}
