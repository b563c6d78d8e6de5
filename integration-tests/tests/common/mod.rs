//! Shared scaffolding for the coordination-kernel scenario tests: a
//! `ProjectContextFactory` wired to a single shared mock kanban board plus a
//! virtual clock, so scenarios can drive lease expiry without real sleeps.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use marcus_core::collaborators::{Clock, KanbanClient};
use marcus_core::config::Config;
use marcus_core::error::Result;
use marcus_core::facade::Core;
use marcus_core::models::{Project, ProjectId};
use marcus_core::project::{ProjectContext, ProjectContextFactory};
use marcus_mocks::{InMemoryPersistence, MockKanbanClient, MockWorkspace, VirtualClock};

pub struct TestFactory {
    pub kanban: Arc<dyn KanbanClient>,
}

#[async_trait]
impl ProjectContextFactory for TestFactory {
    async fn build(&self, project_id: &ProjectId) -> Result<ProjectContext> {
        let project = Project {
            id: project_id.clone(),
            display_name: project_id.clone(),
            kanban_provider_handle: "mock".into(),
            config: serde_json::json!({}),
            last_accessed: Utc::now(),
        };
        Ok(ProjectContext::new(project, self.kanban.clone(), None))
    }
}

pub fn test_config() -> Config {
    Config::load().expect("baked-in default config must parse")
}

/// A fresh kernel over one project ("default"), already switched active,
/// backed by an independent mock kanban board and a virtual clock the
/// caller controls.
pub async fn build_kernel() -> (Core<TestFactory>, Arc<VirtualClock>) {
    let clock = VirtualClock::starting_now();
    let kanban = MockKanbanClient::new();
    let factory = TestFactory { kanban };
    let core = Core::new(
        test_config(),
        clock.clone() as Arc<dyn Clock>,
        Arc::new(MockWorkspace::new("/workspaces")),
        InMemoryPersistence::new(),
        factory,
    );
    core.switch_project("default".to_string()).await.expect("switch into default project");
    (core, clock)
}

pub fn skills(labels: &[&str]) -> BTreeSet<String> {
    labels.iter().map(|s| s.to_string()).collect()
}
