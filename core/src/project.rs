//! The Project Context Manager: single-active-project
//! invariant, an LRU-bounded cache of [`ProjectContext`]s, and the
//! `switch_project` protocol.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::collaborators::KanbanClient;
use crate::error::{MarcusError, Result};
use crate::events::EventBus;
use crate::graph::TaskGraph;
use crate::lease::LeaseManager;
use crate::memory::MemoryRecorder;
use crate::models::{Artifact, Decision, Project, ProjectId, TaskId};
use crate::progress::BlockerLog;
use crate::scheduler::ReservationLatches;

/// Everything a single active project needs: the task graph, the lease
/// table, the event bus, the memory recorder, the blocker log, the
/// circuit-breaker registry, the reservation latches, and an open kanban
/// client. Assignment persistence is not part of the context: it is
/// injected once at the top level and addressed by project id.
pub struct ProjectContext {
    pub project: Project,
    pub graph: SyncMutex<TaskGraph>,
    pub leases: Arc<LeaseManager>,
    pub events: Arc<EventBus>,
    pub memory: Arc<MemoryRecorder>,
    pub blockers: Arc<BlockerLog>,
    pub circuit_breakers: SyncMutex<HashMap<TaskId, CircuitBreaker>>,
    pub latches: Arc<ReservationLatches>,
    pub kanban: Arc<dyn KanbanClient>,
    pub decisions: SyncMutex<Vec<Decision>>,
    pub artifacts: SyncMutex<Vec<Artifact>>,
}

impl ProjectContext {
    pub fn new(project: Project, kanban: Arc<dyn KanbanClient>, durable_log: Option<Arc<dyn crate::collaborators::Persistence>>) -> Self {
        Self {
            project,
            graph: SyncMutex::new(TaskGraph::new()),
            leases: LeaseManager::new(),
            events: Arc::new(EventBus::new(durable_log)),
            memory: MemoryRecorder::new(),
            blockers: BlockerLog::new(),
            circuit_breakers: SyncMutex::new(HashMap::new()),
            latches: ReservationLatches::new(),
            kanban,
            decisions: SyncMutex::new(Vec::new()),
            artifacts: SyncMutex::new(Vec::new()),
        }
    }
}

/// A builder hook for cache misses: given a project id, connect to the
/// board and construct a fresh [`ProjectContext`]. Kept as a trait so the
/// facade can inject its own persistence/kanban wiring without this module
/// depending on concrete collaborator implementations.
#[async_trait::async_trait]
pub trait ProjectContextFactory: Send + Sync {
    async fn build(&self, project_id: &ProjectId) -> Result<ProjectContext>;
}

/// Single-active-project manager with an LRU-bounded context cache. The
/// switch latch is a `tokio::sync::Mutex` since `switch_project`
/// awaits I/O (closing/opening kanban clients) while holding it.
pub struct ProjectManager<F: ProjectContextFactory> {
    active_project_id: SyncMutex<Option<ProjectId>>,
    contexts: AsyncMutex<LruCache<ProjectId, Arc<ProjectContext>>>,
    switch_latch: AsyncMutex<()>,
    factory: F,
}

impl<F: ProjectContextFactory> ProjectManager<F> {
    pub fn new(capacity: usize, factory: F) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            active_project_id: SyncMutex::new(None),
            contexts: AsyncMutex::new(LruCache::new(capacity)),
            switch_latch: AsyncMutex::new(()),
            factory,
        }
    }

    pub fn active_project_id(&self) -> Option<ProjectId> {
        self.active_project_id.lock().clone()
    }

    /// Resolve the active project's context. Acquires `switch_latch` first
    /// so a scheduling call can never observe a project mid-switch: it either
    /// runs before `switch_project` starts or after it has fully committed.
    pub async fn active_context(&self) -> Result<Arc<ProjectContext>> {
        let _latch = self.switch_latch.lock().await;
        let active = self.active_project_id().ok_or_else(|| {
            MarcusError::InvalidConfig("no active project: call switch_project first".into())
        })?;
        let mut contexts = self.contexts.lock().await;
        contexts
            .get(&active)
            .cloned()
            .ok_or_else(|| MarcusError::GraphInvariantError("active project evicted from cache".into()))
    }

    /// `switch_project(target_id)`. Quiescing
    /// background tickers for the outgoing project is the caller's
    /// responsibility (the facade owns ticker handles); this method
    /// performs the latch acquisition, cache lookup/build, and the
    /// active-id swap.
    pub async fn switch_project(&self, target_id: ProjectId) -> Result<Arc<ProjectContext>> {
        let _latch = self.switch_latch.lock().await;

        let mut contexts = self.contexts.lock().await;
        let context = match contexts.get(&target_id) {
            Some(existing) => existing.clone(),
            None => {
                drop(contexts);
                let built = Arc::new(self.factory.build(&target_id).await?);
                contexts = self.contexts.lock().await;
                contexts.put(target_id.clone(), built.clone());
                built
            }
        };
        drop(contexts);

        *self.active_project_id.lock() = Some(target_id.clone());
        info!(project_id = %target_id, "switched active project");
        Ok(context)
    }

    pub async fn list_cached(&self) -> Vec<ProjectId> {
        self.contexts.lock().await.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Fetch a cached context without triggering a build on miss. Used by
    /// `list_projects`, which only summarizes what is already resident.
    pub async fn get_cached(&self, id: &ProjectId) -> Option<Arc<ProjectContext>> {
        self.contexts.lock().await.peek(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{BoardTask, BoardTaskPatch, BoardTaskSpec};
    use crate::models::AgentId;
    use chrono::Utc;

    struct NullKanban;

    #[async_trait::async_trait]
    impl KanbanClient for NullKanban {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn list_tasks(&self, _project_id: &ProjectId) -> Result<Vec<BoardTask>> {
            Ok(vec![])
        }
        async fn create_task(&self, _project_id: &ProjectId, _spec: BoardTaskSpec) -> Result<BoardTask> {
            unimplemented!("not exercised in this test")
        }
        async fn update_task(&self, _task_id: &TaskId, _patch: BoardTaskPatch) -> Result<BoardTask> {
            unimplemented!("not exercised in this test")
        }
        async fn assign(&self, _task_id: &TaskId, _agent_id: &AgentId) -> Result<()> {
            Ok(())
        }
        async fn comment(&self, _task_id: &TaskId, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    struct TestFactory;

    #[async_trait::async_trait]
    impl ProjectContextFactory for TestFactory {
        async fn build(&self, project_id: &ProjectId) -> Result<ProjectContext> {
            let project = Project {
                id: project_id.clone(),
                display_name: project_id.clone(),
                kanban_provider_handle: "test".into(),
                config: serde_json::json!({}),
                last_accessed: Utc::now(),
            };
            Ok(ProjectContext::new(project, Arc::new(NullKanban), None))
        }
    }

    #[tokio::test]
    async fn switch_project_builds_on_cache_miss_and_sets_active() {
        let manager = ProjectManager::new(4, TestFactory);
        assert!(manager.active_project_id().is_none());

        manager.switch_project("p1".into()).await.unwrap();
        assert_eq!(manager.active_project_id(), Some("p1".to_string()));

        let ctx = manager.active_context().await.unwrap();
        assert_eq!(ctx.project.id, "p1");
    }

    #[tokio::test]
    async fn switching_back_reuses_cached_context() {
        let manager = ProjectManager::new(4, TestFactory);
        manager.switch_project("p1".into()).await.unwrap();
        manager.switch_project("p2".into()).await.unwrap();
        manager.switch_project("p1".into()).await.unwrap();
        let cached = manager.list_cached().await;
        assert!(cached.contains(&"p1".to_string()));
        assert!(cached.contains(&"p2".to_string()));
    }
}
