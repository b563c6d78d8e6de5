//! Command-line driver for the coordination kernel: wires `marcus-core`'s
//! `Core` facade to either an in-memory (`marcus-mocks`) or SQLite-backed
//! (`marcus-persistence`) collaborator stack and runs a scripted demo loop.

mod telemetry;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Parser;
use marcus_core::collaborators::{Clock, KanbanClient, Persistence, SystemClock, Workspace};
use marcus_core::config::Config;
use marcus_core::error::Result as MarcusResult;
use marcus_core::facade::{Core, RequestOutcome};
use marcus_core::models::{Project, ProjectId, Task, TaskStatus};
use marcus_core::project::{ProjectContext, ProjectContextFactory};
use marcus_mocks::{MockKanbanClient, MockWorkspace};
use tracing::info;

#[derive(Parser)]
#[command(name = "marcus")]
#[command(about = "Coordination kernel CLI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path, layered over the baked-in defaults.
    #[arg(short, long, env = "MARCUS_CONFIG_FILE")]
    config: Option<String>,

    /// SQLite database URL. When omitted, an in-memory store is used and
    /// nothing survives past this process.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Project id to run the demo against.
    #[arg(long, default_value = "demo-project")]
    project: String,
}

/// Builds a fresh [`ProjectContext`] backed by a single shared mock kanban
/// board, regardless of which project id is requested. Good enough for the
/// demo loop and for exercising the Project Context Manager's cache.
struct DemoProjectFactory {
    kanban: Arc<dyn KanbanClient>,
    persistence: Arc<dyn Persistence>,
}

#[async_trait]
impl ProjectContextFactory for DemoProjectFactory {
    async fn build(&self, project_id: &ProjectId) -> MarcusResult<ProjectContext> {
        self.kanban.connect().await?;
        let project = Project {
            id: project_id.clone(),
            display_name: format!("Demo project {project_id}"),
            kanban_provider_handle: "mock".into(),
            config: serde_json::json!({}),
            last_accessed: chrono::Utc::now(),
        };
        Ok(ProjectContext::new(project, self.kanban.clone(), Some(self.persistence.clone())))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_telemetry()?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path).context("failed to load config file")?,
        None => Config::load().context("failed to load configuration")?,
    };

    let persistence: Arc<dyn Persistence> = match &cli.database_url {
        Some(url) => {
            info!(url, "connecting to SQLite persistence");
            let store = marcus_persistence::SqlitePersistence::new(url).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            info!("no DATABASE_URL given, using in-memory persistence");
            marcus_mocks::InMemoryPersistence::new()
        }
    };

    let kanban: Arc<dyn KanbanClient> = MockKanbanClient::new();
    let workspace: Arc<dyn Workspace> = Arc::new(MockWorkspace::new("/workspaces"));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let factory = DemoProjectFactory { kanban, persistence: persistence.clone() };

    let core = Arc::new(Core::new(config, clock, workspace, persistence, factory));
    let tickers = core.spawn_background_tickers();
    let result = run_demo(&core, &cli.project).await;
    for handle in tickers {
        handle.abort();
    }
    result
}

async fn run_demo<F: ProjectContextFactory>(core: &Core<F>, project_id: &str) -> Result<()> {
    core.switch_project(project_id.to_string()).await?;

    core.register_agent(
        "agent-1".into(),
        "Demo Agent".into(),
        "engineer".into(),
        BTreeSet::from(["backend".to_string()]),
        40.0,
    )?;

    let setup_task = Task {
        id: "t1".into(),
        name: "Stand up the database schema".into(),
        description: "Create the initial tables".into(),
        status: TaskStatus::Todo,
        priority: marcus_core::models::Priority::High,
        estimated_hours: 3.0,
        actual_hours: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        done_at: None,
        due_date: None,
        labels: BTreeSet::from(["backend".to_string()]),
        project_id: project_id.to_string(),
        dependencies: vec![],
        is_subtask: false,
        parent_task_id: None,
        subtask_index: None,
        provides: None,
        requires: None,
        assigned_to: None,
        board_sync_pending: false,
    };
    core.upsert_task(setup_task).await?;

    match core.request_next_task(&"agent-1".to_string()).await? {
        RequestOutcome::Assigned(assignment) => {
            info!(task = %assignment.task.id, lease_expires = %assignment.lease.expires_at, "assigned task");
            core.report_progress(&"agent-1".to_string(), &assignment.task.id, 50, "schema drafted").await?;
            core.complete_task(&"agent-1".to_string(), &assignment.task.id, "done").await?;
            info!(task = %assignment.task.id, "completed task");
        }
        RequestOutcome::NoWork => info!("no work available"),
    }

    let repairs = core.reconcile().await?;
    info!(count = repairs.len(), "reconciliation pass complete");
    Ok(())
}
