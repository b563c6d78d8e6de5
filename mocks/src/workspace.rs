//! A mock `Workspace` that returns a deterministic, fake filesystem path
//! without touching the real filesystem.

use async_trait::async_trait;
use marcus_core::collaborators::Workspace;
use marcus_core::error::Result;
use marcus_core::models::{AgentId, ProjectId};

#[derive(Default)]
pub struct MockWorkspace {
    root: String,
}

impl MockWorkspace {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Workspace for MockWorkspace {
    async fn path_for(&self, project_id: &ProjectId, agent_id: &AgentId) -> Result<String> {
        let root = if self.root.is_empty() { "/workspaces" } else { &self.root };
        Ok(format!("{root}/{project_id}/{agent_id}"))
    }
}
