//! Collaborator contracts. These are the external systems the
//! core consumes but never implements: the kanban board, the agent's
//! workspace, durable storage, and the clock. Concrete implementations live
//! in other crates (`marcus-persistence`, `marcus-mocks`) or outside this
//! workspace entirely (kanban providers).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AgentId, ProjectId, TaskId, TaskStatus};

/// A task as described to/by the kanban board. Deliberately narrower than
/// [`crate::models::Task`]: the board only needs to agree on identity,
/// display fields, and the dependency/contract edges it must mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardTask {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Option<AgentId>,
    pub dependencies: Vec<TaskId>,
    pub parent_task_id: Option<TaskId>,
    pub provides: Option<String>,
    pub requires: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A partial update pushed to the board.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BoardTaskPatch {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Option<AgentId>>,
}

/// Specification for creating a task on the board (used by the
/// project-creation collaborator, out of scope here, and by the Reconciler
/// when pushing a locally-created task upstream).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardTaskSpec {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<TaskId>,
}

/// The kanban board collaborator contract. Implementations are
/// Planka/GitHub/Linear adapters — out of scope for this crate — or, in
/// tests, `marcus-mocks::MockKanbanClient`.
#[async_trait]
pub trait KanbanClient: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn list_tasks(&self, project_id: &ProjectId) -> Result<Vec<BoardTask>>;
    async fn create_task(&self, project_id: &ProjectId, spec: BoardTaskSpec) -> Result<BoardTask>;
    async fn update_task(&self, task_id: &TaskId, patch: BoardTaskPatch) -> Result<BoardTask>;
    async fn assign(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<()>;
    async fn comment(&self, task_id: &TaskId, text: &str) -> Result<()>;
}

/// The per-agent filesystem workspace collaborator contract.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn path_for(&self, project_id: &ProjectId, agent_id: &AgentId) -> Result<String>;
}

/// A single appended record in a durable stream (the event log or the
/// memory/outcome log).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRecord {
    pub seq: u64,
    pub payload: serde_json::Value,
}

/// The durable storage collaborator contract. Covers both the
/// key-value store backing Assignment Persistence and the append-only
/// streams backing the event log and the memory/outcome recorder.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn kv_get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn kv_put(&self, key: &str, value: serde_json::Value) -> Result<()>;
    /// Compare-and-set: write `new_value` iff the current value at `key`
    /// equals `expected` (`None` means "key must be absent"). Returns `true`
    /// if the write happened.
    async fn kv_cas(
        &self,
        key: &str,
        expected: Option<serde_json::Value>,
        new_value: serde_json::Value,
    ) -> Result<bool>;
    async fn kv_delete(&self, key: &str) -> Result<()>;
    async fn kv_list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>>;

    /// Append a record to a named stream, returning its assigned sequence
    /// number. Sequence numbers are monotonic within a stream.
    async fn append(&self, stream: &str, payload: serde_json::Value) -> Result<u64>;
    async fn read_stream(&self, stream: &str, from_seq: u64) -> Result<Vec<StreamRecord>>;
}

/// The monotonic clock collaborator contract. Production code
/// uses [`SystemClock`]; tests inject `marcus-mocks::VirtualClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation of [`Clock`] for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
