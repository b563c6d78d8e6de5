//! A mock `KanbanClient` backed by an in-memory task list, with the same
//! error-injection and call-history conveniences as [`crate::persistence::InMemoryPersistence`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use marcus_core::collaborators::{BoardTask, BoardTaskPatch, BoardTaskSpec, KanbanClient};
use marcus_core::error::{MarcusError, Result};
use marcus_core::models::{AgentId, ProjectId, TaskId};
use parking_lot::Mutex;

#[derive(Default)]
pub struct MockKanbanClient {
    tasks: Mutex<HashMap<TaskId, BoardTask>>,
    comments: Mutex<Vec<(TaskId, String)>>,
    inject_next_error: Mutex<Option<MarcusError>>,
    connected: Mutex<bool>,
}

impl MockKanbanClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tasks(tasks: Vec<BoardTask>) -> Arc<Self> {
        let client = Self::default();
        *client.tasks.lock() = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Arc::new(client)
    }

    pub fn inject_error(&self, error: MarcusError) {
        *self.inject_next_error.lock() = Some(error);
    }

    fn take_injected_error(&self) -> Option<MarcusError> {
        self.inject_next_error.lock().take()
    }

    /// Directly mutate the board state, bypassing the client API, to
    /// simulate external changes a Reconciler pass should pick up.
    pub fn simulate_external_update(&self, task: BoardTask) {
        self.tasks.lock().insert(task.id.clone(), task);
    }

    pub fn simulate_external_removal(&self, task_id: &TaskId) {
        self.tasks.lock().remove(task_id);
    }

    pub fn comments(&self) -> Vec<(TaskId, String)> {
        self.comments.lock().clone()
    }
}

#[async_trait]
impl KanbanClient for MockKanbanClient {
    async fn connect(&self) -> Result<()> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        *self.connected.lock() = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.connected.lock() = false;
        Ok(())
    }

    async fn list_tasks(&self, _project_id: &ProjectId) -> Result<Vec<BoardTask>> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        Ok(self.tasks.lock().values().cloned().collect())
    }

    async fn create_task(&self, _project_id: &ProjectId, spec: BoardTaskSpec) -> Result<BoardTask> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut tasks = self.tasks.lock();
        let id = format!("board-{}", tasks.len() + 1);
        let task = BoardTask {
            id: id.clone(),
            name: spec.name,
            description: spec.description,
            status: marcus_core::models::TaskStatus::Todo,
            assigned_to: None,
            dependencies: spec.dependencies,
            parent_task_id: None,
            provides: None,
            requires: None,
            updated_at: chrono::Utc::now(),
        };
        tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn update_task(&self, task_id: &TaskId, patch: BoardTaskPatch) -> Result<BoardTask> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(task_id).ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(assigned_to) = patch.assigned_to {
            task.assigned_to = assigned_to;
        }
        task.updated_at = chrono::Utc::now();
        Ok(task.clone())
    }

    async fn assign(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<()> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(task_id).ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;
        task.assigned_to = Some(agent_id.clone());
        Ok(())
    }

    async fn comment(&self, task_id: &TaskId, text: &str) -> Result<()> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        self.comments.lock().push((task_id.clone(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(id: &str) -> BoardTask {
        BoardTask {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            status: marcus_core::models::TaskStatus::Todo,
            assigned_to: None,
            dependencies: vec![],
            parent_task_id: None,
            provides: None,
            requires: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn external_update_is_visible_to_list_tasks() {
        let client = MockKanbanClient::new();
        client.simulate_external_update(sample_task("t1"));
        let tasks = client.list_tasks(&"p1".to_string()).await.unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn injected_error_surfaces_once() {
        let client = MockKanbanClient::new();
        client.inject_error(MarcusError::KanbanError("down".into()));
        assert!(client.list_tasks(&"p1".to_string()).await.is_err());
        assert!(client.list_tasks(&"p1".to_string()).await.is_ok());
    }
}
