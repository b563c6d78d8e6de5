//! The Reconciler: idempotent diff/repair between the Task
//! Graph and the authoritative external kanban board.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::collaborators::{BoardTaskPatch, KanbanClient};
use crate::error::Result;
use crate::events::EventBus;
use crate::graph::TaskGraph;
use crate::lease::LeaseManager;
use crate::models::{AgentId, Event, EventKind, EventPayload, ProjectId, Task, TaskId, TaskStatus};

/// A single repair applied (or attempted) during one reconciliation pass,
/// returned for observability and tests asserting idempotence.
#[derive(Debug, Clone, PartialEq)]
pub enum Repair {
    Upserted(String),
    PushedBoardCorrection(String),
    AdoptedAssignment(String),
    OrphanedAssignmentExpired(String),
    BoardSyncRepaired(String),
}

/// Run one reconciliation pass. Returns every repair applied; an empty
/// vector means the in-memory state already matched the board, so running
/// it twice in a row yields zero diffs.
pub async fn reconcile(
    graph: &parking_lot::Mutex<TaskGraph>,
    leases: &LeaseManager,
    kanban: &dyn KanbanClient,
    events: &EventBus,
    project_id: &ProjectId,
    now: DateTime<Utc>,
    correlation_id: Option<String>,
) -> Result<Vec<Repair>> {
    let board_tasks = kanban.list_tasks(project_id).await?;
    let mut repairs = Vec::new();
    let pending_sync: Vec<(TaskId, AgentId)>;

    {
        let mut graph = graph.lock();

        for board_task in &board_tasks {
            match graph.get(&board_task.id).cloned() {
                None => {
                    let task = Task {
                        id: board_task.id.clone(),
                        name: board_task.name.clone(),
                        description: board_task.description.clone(),
                        status: board_task.status,
                        priority: crate::models::Priority::Medium,
                        estimated_hours: 1.0,
                        actual_hours: None,
                        created_at: now,
                        updated_at: now,
                        done_at: None,
                        due_date: None,
                        labels: Default::default(),
                        project_id: project_id.clone(),
                        dependencies: board_task.dependencies.clone(),
                        is_subtask: board_task.parent_task_id.is_some(),
                        parent_task_id: board_task.parent_task_id.clone(),
                        subtask_index: None,
                        provides: board_task.provides.clone(),
                        requires: board_task.requires.clone(),
                        assigned_to: board_task.assigned_to.clone(),
                        board_sync_pending: false,
                    };
                    if graph.upsert(task).is_ok() {
                        repairs.push(Repair::Upserted(board_task.id.clone()));
                    }
                }
                Some(local) => {
                    let lease = leases.get(&local.id);
                    let in_flight_locally = local.status == TaskStatus::InProgress
                        && lease.as_ref().map(|l| l.last_progress_pct > 0).unwrap_or(false);

                    if in_flight_locally && board_task.status != TaskStatus::InProgress {
                        // Core status wins; push a correction instead of overwriting locally.
                        repairs.push(Repair::PushedBoardCorrection(local.id.clone()));
                    } else if board_task.status != local.status {
                        if let Some(task) = graph.get_mut(&local.id) {
                            task.status = board_task.status;
                            task.updated_at = now;
                        }
                    }

                    if let Some(agent_id) = &board_task.assigned_to {
                        if local.assigned_to.is_none() && leases.get(&local.id).is_none() {
                            if let Some(task) = graph.get_mut(&local.id) {
                                task.assigned_to = Some(agent_id.clone());
                            }
                            let duration = crate::lease::initial_duration(local.estimated_hours, None);
                            let _ = leases.open(local.id.clone(), agent_id.clone(), duration, now);
                            repairs.push(Repair::AdoptedAssignment(local.id.clone()));
                        }
                    }
                }
            }
        }

        let board_ids: std::collections::HashSet<&str> =
            board_tasks.iter().map(|t| t.id.as_str()).collect();
        let orphaned: Vec<String> = graph
            .iter()
            .filter(|t| t.assigned_to.is_some() && !board_ids.contains(t.id.as_str()))
            .map(|t| t.id.clone())
            .collect();
        for task_id in orphaned {
            leases.release(&task_id)?;
            if let Some(task) = graph.get_mut(&task_id) {
                task.assigned_to = None;
            }
            repairs.push(Repair::OrphanedAssignmentExpired(task_id));
        }

        pending_sync = graph
            .iter()
            .filter(|t| t.board_sync_pending)
            .filter_map(|t| t.assigned_to.clone().map(|agent_id| (t.id.clone(), agent_id)))
            .collect();
    }

    for (task_id, agent_id) in pending_sync {
        if kanban.assign(&task_id, &agent_id).await.is_ok() {
            if let Some(task) = graph.lock().get_mut(&task_id) {
                task.board_sync_pending = false;
            }
            repairs.push(Repair::BoardSyncRepaired(task_id));
        }
    }

    for repair in &repairs {
        if let Repair::PushedBoardCorrection(task_id) = repair {
            if let Err(err) = kanban
                .update_task(task_id, BoardTaskPatch { status: Some(TaskStatus::InProgress), assigned_to: None })
                .await
            {
                warn!(task_id = %task_id, error = %err, "failed to push board correction");
            }
        }
        if let Repair::OrphanedAssignmentExpired(task_id) = repair {
            events
                .publish(Event {
                    kind: EventKind::AssignmentOrphaned,
                    payload: EventPayload::AssignmentOrphaned { task_id: task_id.clone() },
                    timestamp: now,
                    project_id: project_id.clone(),
                    correlation_id: correlation_id.clone(),
                })
                .await;
        }
    }

    if !repairs.is_empty() {
        info!(project_id = %project_id, count = repairs.len(), "reconciliation applied repairs");
    }

    Ok(repairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{BoardTask, BoardTaskPatch as Patch, BoardTaskSpec};
    use crate::models::AgentId;
    use std::sync::Mutex as StdMutex;

    struct FixedBoard {
        tasks: Vec<BoardTask>,
        updates: StdMutex<Vec<(String, Patch)>>,
    }

    #[async_trait::async_trait]
    impl KanbanClient for FixedBoard {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn list_tasks(&self, _project_id: &ProjectId) -> Result<Vec<BoardTask>> {
            Ok(self.tasks.clone())
        }
        async fn create_task(&self, _project_id: &ProjectId, _spec: BoardTaskSpec) -> Result<BoardTask> {
            unimplemented!()
        }
        async fn update_task(&self, task_id: &crate::models::TaskId, patch: Patch) -> Result<BoardTask> {
            self.updates.lock().unwrap().push((task_id.clone(), patch));
            Ok(self.tasks.iter().find(|t| &t.id == task_id).cloned().unwrap())
        }
        async fn assign(&self, _task_id: &crate::models::TaskId, _agent_id: &AgentId) -> Result<()> {
            Ok(())
        }
        async fn comment(&self, _task_id: &crate::models::TaskId, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn board_task(id: &str, status: TaskStatus) -> BoardTask {
        BoardTask {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            status,
            assigned_to: None,
            dependencies: vec![],
            parent_task_id: None,
            provides: None,
            requires: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_local_task_is_upserted() {
        let graph = parking_lot::Mutex::new(TaskGraph::new());
        let leases = LeaseManager::default();
        let events = EventBus::new(None);
        let board = FixedBoard { tasks: vec![board_task("t1", TaskStatus::Todo)], updates: StdMutex::new(vec![]) };

        let repairs = reconcile(&graph, &leases, &board, &events, &"p1".to_string(), Utc::now(), None).await.unwrap();
        assert_eq!(repairs, vec![Repair::Upserted("t1".into())]);
        assert!(graph.lock().get(&"t1".to_string()).is_some());
    }

    #[tokio::test]
    async fn board_sync_pending_task_is_repaired_once_assign_succeeds() {
        let graph = parking_lot::Mutex::new(TaskGraph::new());
        let leases = LeaseManager::default();
        let events = EventBus::new(None);
        let board = FixedBoard { tasks: vec![board_task("t1", TaskStatus::Todo)], updates: StdMutex::new(vec![]) };

        let task = Task {
            id: "t1".into(),
            name: "t1".into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: crate::models::Priority::Medium,
            estimated_hours: 1.0,
            actual_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            done_at: None,
            due_date: None,
            labels: Default::default(),
            project_id: "p1".into(),
            dependencies: vec![],
            is_subtask: false,
            parent_task_id: None,
            subtask_index: None,
            provides: None,
            requires: None,
            assigned_to: Some("agent-1".into()),
            board_sync_pending: true,
        };
        graph.lock().upsert(task).unwrap();

        let repairs = reconcile(&graph, &leases, &board, &events, &"p1".to_string(), Utc::now(), None).await.unwrap();
        assert!(repairs.contains(&Repair::BoardSyncRepaired("t1".into())));
        assert!(!graph.lock().get(&"t1".to_string()).unwrap().board_sync_pending);
    }

    #[tokio::test]
    async fn reconciling_twice_with_no_changes_is_idempotent() {
        let graph = parking_lot::Mutex::new(TaskGraph::new());
        let leases = LeaseManager::default();
        let events = EventBus::new(None);
        let board = FixedBoard { tasks: vec![board_task("t1", TaskStatus::Todo)], updates: StdMutex::new(vec![]) };

        reconcile(&graph, &leases, &board, &events, &"p1".to_string(), Utc::now(), None).await.unwrap();
        let repairs = reconcile(&graph, &leases, &board, &events, &"p1".to_string(), Utc::now(), None).await.unwrap();
        assert!(repairs.is_empty());
    }
}
