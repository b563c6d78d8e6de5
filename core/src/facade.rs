//! The `Core` facade: the programmatic API tool handlers consume. Composes
//! the Task Graph, Dependency Resolver, Scheduler, Lease Manager, Progress &
//! Blocker Handler, Context Builder, Event Bus, Reconciler, Project Context
//! Manager, Memory Recorder, and the per-task circuit breakers into one
//! operation table.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use tracing::{info, instrument};

use crate::circuit_breaker::{CircuitBreaker, FailureType};
use crate::collaborators::{Clock, Persistence, Workspace};
use crate::config::Config;
use crate::context::{Context, ContextBuilder};
use crate::error::{MarcusError, Result};
use crate::lease::initial_duration;
use crate::memory::Outcome;
use crate::models::{
    Agent, AgentId, Artifact, BlockerSeverity, Decision, Event, EventKind, EventPayload, Lease,
    ProjectId, Task, TaskId, TaskStatus,
};
use crate::progress::clamp_and_guard_progress;
use crate::project::{ProjectContext, ProjectContextFactory, ProjectManager};
use crate::reconciler::{self, Repair};
use crate::resolver::{self, Readiness};
use crate::scheduler;

/// A fresh per-call correlation id, threaded through every event this call
/// publishes and attached to the surfaced error shape if the call fails.
fn new_correlation_id() -> String {
    use rand::Rng;
    format!("corr-{:016x}", rand::thread_rng().gen::<u64>())
}

/// Log the caller-facing surfaced shape of a failed operation. Called at the
/// end of every public `Core` method so `MarcusError::surface` is exercised
/// on the real failure path, not only in its own unit test.
fn log_if_failed<T>(correlation_id: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        let surfaced = err.surface(Some(correlation_id.to_string()));
        tracing::warn!(
            correlation_id,
            kind = ?surfaced.kind,
            retryable = err.is_retryable(),
            remediation = surfaced.remediation.as_deref().unwrap_or("none"),
            "{}",
            surfaced.message
        );
    }
    result
}

/// `request_next_task` success payload.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task: Task,
    pub lease: Lease,
    pub context: Context,
}

/// `request_next_task` result: either an assignment or an explicit
/// "nothing to do right now", which is not an error.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Assigned(Box<Assignment>),
    NoWork,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ack;

#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task: Task,
    pub lease: Option<Lease>,
    pub readiness: Readiness,
}

#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub agent: Agent,
    pub active_assignments: Vec<TaskId>,
    pub lease_health: Vec<Lease>,
}

#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub display_name: String,
}

/// The coordination kernel. Generic over the project-context factory so
/// callers can supply their own persistence/kanban wiring (`marcus-mocks`
/// for tests, `marcus-persistence` + a real `KanbanClient` in production).
pub struct Core<F: ProjectContextFactory> {
    config: Config,
    clock: Arc<dyn Clock>,
    workspace: Arc<dyn Workspace>,
    persistence: Arc<dyn Persistence>,
    agents: SyncMutex<HashMap<AgentId, Agent>>,
    projects: ProjectManager<F>,
}

impl<F: ProjectContextFactory> Core<F> {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        workspace: Arc<dyn Workspace>,
        persistence: Arc<dyn Persistence>,
        factory: F,
    ) -> Self {
        let capacity = config.project.cache_capacity;
        Self {
            config,
            clock,
            workspace,
            persistence,
            agents: SyncMutex::new(HashMap::new()),
            projects: ProjectManager::new(capacity, factory),
        }
    }

    pub async fn switch_project(&self, target_id: ProjectId) -> Result<Ack> {
        self.projects.switch_project(target_id).await?;
        Ok(Ack)
    }

    pub async fn list_projects(&self) -> Vec<ProjectSummary> {
        let mut summaries = Vec::new();
        for id in self.projects.list_cached().await {
            if let Some(ctx) = self.projects.get_cached(&id).await {
                summaries.push(ProjectSummary { id: ctx.project.id.clone(), display_name: ctx.project.display_name.clone() });
            }
        }
        summaries
    }

    /// Seed or replace a task in the active project's graph. Tasks arrive
    /// fully formed (no in-core subtask decomposition, per the Open
    /// Question resolution); this is the write path both the Reconciler and
    /// external callers use to populate the graph.
    pub async fn upsert_task(&self, task: Task) -> Result<()> {
        let correlation_id = new_correlation_id();
        let result: Result<()> = async {
            let ctx = self.projects.active_context().await?;
            let task_id = task.id.clone();
            let mut graph = ctx.graph.lock();
            let previous = graph.get(&task_id).cloned();
            graph.upsert(task)?;
            if let Err(err) = graph.validate() {
                match previous {
                    Some(previous) => {
                        let _ = graph.upsert(previous);
                    }
                    None => {
                        graph.remove(&task_id);
                    }
                }
                return Err(err);
            }
            Ok(())
        }
        .await;
        log_if_failed(&correlation_id, result)
    }

    #[instrument(skip(self))]
    pub fn register_agent(
        &self,
        id: AgentId,
        display_name: String,
        role: String,
        skills: BTreeSet<String>,
        capacity_hours_per_week: f64,
    ) -> Result<Agent> {
        let mut agents = self.agents.lock();
        let agent = agents.entry(id.clone()).or_insert_with(|| {
            Agent::new(id.clone(), display_name.clone(), role.clone(), skills.clone(), capacity_hours_per_week)
        });
        agent.display_name = display_name;
        agent.role = role;
        agent.skills = skills;
        agent.capacity_hours_per_week = capacity_hours_per_week;
        Ok(agent.clone())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// `request_next_task`.
    #[instrument(skip(self))]
    pub async fn request_next_task(&self, agent_id: &AgentId) -> Result<RequestOutcome> {
        let correlation_id = new_correlation_id();
        let result = self.request_next_task_inner(agent_id, &correlation_id).await;
        log_if_failed(&correlation_id, result)
    }

    async fn request_next_task_inner(&self, agent_id: &AgentId, correlation_id: &str) -> Result<RequestOutcome> {
        let agent = self
            .agents
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| MarcusError::not_found_agent(agent_id.clone()))?;

        let ctx = self.projects.active_context().await?;

        let candidates: Vec<Task> = {
            let graph = ctx.graph.lock();
            let breakers = ctx.circuit_breakers.lock();
            graph
                .iter_ready()
                .filter(|t| {
                    matches!(
                        resolver::evaluate(
                            &graph,
                            &t.id,
                            |id| ctx.leases.get(id).map(|l| l.state == crate::models::LeaseState::Active).unwrap_or(false),
                            |id| breakers.get(id).map(|b| b.is_quarantined()).unwrap_or(false),
                        ),
                        Readiness::Ready
                    )
                })
                .cloned()
                .collect()
        };

        let weights = &self.config.scheduler.score_weights;
        let now = self.now();
        let mut scored: Vec<(Task, f64)> = Vec::new();
        {
            let graph = ctx.graph.lock();
            for t in candidates {
                let successors = graph.successors(&t.id).len();
                let s = scheduler::score(&t, &agent, successors, weights);
                if s > 0.0 {
                    scored.push((t, s));
                    continue;
                }
                // No overlap between the task's required labels and the
                // agent's skills: this candidate can never be served by this
                // agent, so it counts against the task's circuit breaker
                // rather than being silently dropped.
                let tripped = {
                    let mut breakers = ctx.circuit_breakers.lock();
                    breakers.entry(t.id.clone()).or_default().record_failure(FailureType::CapabilityMismatch, now)
                };
                if tripped {
                    ctx.events
                        .publish(Event {
                            kind: EventKind::TaskQuarantined,
                            payload: EventPayload::TaskQuarantined { task_id: t.id.clone(), reason: "no agent has the required skills".into() },
                            timestamp: now,
                            project_id: ctx.project.id.clone(),
                            correlation_id: Some(correlation_id.to_string()),
                        })
                        .await;
                }
            }
        }

        let refs: Vec<(&Task, f64)> = scored.iter().map(|(t, s)| (t, *s)).collect();
        let ranked_ids: Vec<TaskId> = scheduler::rank(refs).into_iter().map(|t| t.id.clone()).collect();

        for task_id in ranked_ids {
            // Lock ordering: Graph writer > Lease writer >
            // Per-task latch. The graph lock is acquired first; the latch
            // is nested inside it, never the other way around.
            let reserved = {
                let mut graph = ctx.graph.lock();
                let latch = ctx.latches.for_task(&task_id);
                let _guard = latch.lock();
                let breakers = ctx.circuit_breakers.lock();
                let readiness = resolver::evaluate(
                    &graph,
                    &task_id,
                    |id| ctx.leases.get(id).map(|l| l.state == crate::models::LeaseState::Active).unwrap_or(false),
                    |id| breakers.get(id).map(|b| b.is_quarantined()).unwrap_or(false),
                );
                if readiness != Readiness::Ready {
                    None
                } else if let Some(task) = graph.get_mut(&task_id) {
                    if task.assigned_to.is_some() {
                        None
                    } else {
                        task.assigned_to = Some(agent_id.clone());
                        task.status = TaskStatus::InProgress;
                        task.updated_at = self.now();
                        Some(task.clone())
                    }
                } else {
                    None
                }
            };

            let Some(task) = reserved else { continue };

            let velocity = ctx.memory.velocity_estimate(agent_id, &task.labels).map(|v| v.hours_per_point);
            let duration = initial_duration(task.estimated_hours, velocity);
            let now = self.now();

            let lease = match ctx.leases.open(task.id.clone(), agent_id.clone(), duration, now) {
                Ok(lease) => lease,
                Err(err) => {
                    // Roll back the in-memory reservation; no event emitted.
                    if let Some(t) = ctx.graph.lock().get_mut(&task.id) {
                        t.assigned_to = None;
                        t.status = TaskStatus::Todo;
                    }
                    return Err(err);
                }
            };

            let assignment_key = format!("assignment:{}", task.id);
            let snapshot = serde_json::json!({
                "agent_id": agent_id,
                "opened_at": now,
                "lease": lease,
            });
            if let Err(err) = self.persistence.kv_put(&assignment_key, snapshot).await {
                if let Some(t) = ctx.graph.lock().get_mut(&task.id) {
                    t.assigned_to = None;
                    t.status = TaskStatus::Todo;
                }
                ctx.leases.release(&task.id)?;
                return Err(err);
            }

            ctx.events
                .publish(Event {
                    kind: EventKind::TaskAssigned,
                    payload: EventPayload::TaskAssigned { task_id: task.id.clone(), agent_id: agent_id.clone() },
                    timestamp: now,
                    project_id: ctx.project.id.clone(),
                    correlation_id: Some(correlation_id.to_string()),
                })
                .await;

            // Mirror the reservation on the board. A failure here never
            // rolls back the reservation: the task stays assigned locally and
            // is flagged for the Reconciler to repair on its next pass.
            let board_sync_pending = ctx.kanban.assign(&task.id, agent_id).await.is_err();
            if let Some(t) = ctx.graph.lock().get_mut(&task.id) {
                t.board_sync_pending = board_sync_pending;
            }
            let task = Task { board_sync_pending, ..task };

            let decisions_for_parent = task
                .parent_task_id
                .as_ref()
                .map(|parent| {
                    ctx.decisions
                        .lock()
                        .iter()
                        .filter(|d| {
                            ctx.graph.lock().get(&d.task_id).and_then(|t| t.parent_task_id.clone()).as_ref()
                                == Some(parent)
                        })
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let artifacts = ctx.artifacts.lock().clone();
            let graph_guard = ctx.graph.lock();
            let builder = ContextBuilder::new(&graph_guard, &ctx.memory, self.workspace.as_ref());
            let context = builder
                .build(&task.id, agent_id, &ctx.project.id, decisions_for_parent, |pred_id| {
                    artifacts.iter().filter(|a| &a.task_id == pred_id).cloned().collect()
                })
                .await?;
            drop(graph_guard);

            info!(task_id = %task.id, agent_id = %agent_id, "assigned task");
            return Ok(RequestOutcome::Assigned(Box::new(Assignment { task, lease, context })));
        }

        Ok(RequestOutcome::NoWork)
    }

    /// `report_progress`.
    pub async fn report_progress(&self, agent_id: &AgentId, task_id: &TaskId, pct: u8, notes: &str) -> Result<Ack> {
        let correlation_id = new_correlation_id();
        let result = self.report_progress_inner(agent_id, task_id, pct, notes, &correlation_id).await;
        log_if_failed(&correlation_id, result)
    }

    async fn report_progress_inner(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        pct: u8,
        notes: &str,
        correlation_id: &str,
    ) -> Result<Ack> {
        let ctx = self.projects.active_context().await?;
        let now = self.now();

        let stored_pct = ctx.leases.get(task_id).map(|l| l.last_progress_pct).unwrap_or(0);
        let applied_pct = clamp_and_guard_progress(pct, stored_pct);

        let estimated_hours = ctx
            .graph
            .lock()
            .get(task_id)
            .map(|t| t.estimated_hours)
            .ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;

        ctx.leases.renew(task_id, agent_id, applied_pct, estimated_hours, now)?;

        ctx.events
            .publish(Event {
                kind: EventKind::ProgressReported,
                payload: EventPayload::ProgressReported { task_id: task_id.clone(), agent_id: agent_id.clone(), pct: applied_pct },
                timestamp: now,
                project_id: ctx.project.id.clone(),
                correlation_id: Some(correlation_id.to_string()),
            })
            .await;

        if applied_pct == 100 {
            self.complete_task_inner(agent_id, task_id, notes, correlation_id).await?;
        }

        Ok(Ack)
    }

    /// `report_blocker`.
    pub async fn report_blocker(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        description: &str,
        severity: BlockerSeverity,
    ) -> Result<Ack> {
        let correlation_id = new_correlation_id();
        let result = self.report_blocker_inner(agent_id, task_id, description, severity, &correlation_id).await;
        log_if_failed(&correlation_id, result)
    }

    async fn report_blocker_inner(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        description: &str,
        severity: BlockerSeverity,
        correlation_id: &str,
    ) -> Result<Ack> {
        let ctx = self.projects.active_context().await?;
        let now = self.now();

        let lease = ctx.leases.get(task_id).ok_or_else(|| {
            MarcusError::AssignmentError(format!("no active lease for task {task_id}"))
        })?;
        if &lease.agent_id != agent_id {
            return Err(MarcusError::AssignmentError("lease held by a different agent".into()));
        }

        {
            let mut graph = ctx.graph.lock();
            let task = graph.get_mut(task_id).ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;
            task.status = TaskStatus::Blocked;
            task.updated_at = now;
        }

        ctx.blockers.record(task_id.clone(), agent_id.clone(), description.to_string(), severity, now);

        let tripped = {
            let mut breakers = ctx.circuit_breakers.lock();
            breakers.entry(task_id.clone()).or_default().record_failure(FailureType::BlockerReported, now)
        };
        if tripped {
            ctx.events
                .publish(Event {
                    kind: EventKind::TaskQuarantined,
                    payload: EventPayload::TaskQuarantined { task_id: task_id.clone(), reason: "repeated blockers".into() },
                    timestamp: now,
                    project_id: ctx.project.id.clone(),
                    correlation_id: Some(correlation_id.to_string()),
                })
                .await;
        }

        ctx.events
            .publish(Event {
                kind: EventKind::BlockerReported,
                payload: EventPayload::BlockerReported { task_id: task_id.clone(), agent_id: agent_id.clone(), severity },
                timestamp: now,
                project_id: ctx.project.id.clone(),
                correlation_id: Some(correlation_id.to_string()),
            })
            .await;

        Ok(Ack)
    }

    /// `unblock_task`: reverts `blocked -> in_progress` if a
    /// lease is still active, else `blocked -> todo`. Also resets this
    /// task's circuit breaker.
    pub async fn unblock_task(&self, task_id: &TaskId, _resolution_notes: &str) -> Result<Ack> {
        let ctx = self.projects.active_context().await?;
        let now = self.now();

        let has_active_lease = ctx.leases.get(task_id).map(|l| l.state == crate::models::LeaseState::Active).unwrap_or(false);

        {
            let mut graph = ctx.graph.lock();
            let task = graph.get_mut(task_id).ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;
            if task.status != TaskStatus::Blocked {
                return Err(MarcusError::invalid_transition(task.status, TaskStatus::InProgress));
            }
            task.status = if has_active_lease { TaskStatus::InProgress } else { TaskStatus::Todo };
            if task.status == TaskStatus::Todo {
                task.assigned_to = None;
            }
            task.updated_at = now;
        }

        ctx.circuit_breakers.lock().entry(task_id.clone()).or_default().reset();

        Ok(Ack)
    }

    /// `complete_task`: the explicit completion path, also
    /// reached internally from `report_progress` at `pct == 100`.
    pub async fn complete_task(&self, agent_id: &AgentId, task_id: &TaskId, outcome: &str) -> Result<Ack> {
        let correlation_id = new_correlation_id();
        let result = self.complete_task_inner(agent_id, task_id, outcome, &correlation_id).await;
        log_if_failed(&correlation_id, result)
    }

    async fn complete_task_inner(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        _outcome: &str,
        correlation_id: &str,
    ) -> Result<Ack> {
        let ctx = self.projects.active_context().await?;
        let now = self.now();

        let lease = ctx.leases.get(task_id).ok_or_else(|| {
            MarcusError::AssignmentError(format!("no active lease for task {task_id}"))
        })?;
        if &lease.agent_id != agent_id {
            return Err(MarcusError::AssignmentError("lease held by a different agent".into()));
        }

        let actual_hours = (now - lease.created_at).num_seconds() as f64 / 3600.0;

        let (estimated_hours, labels) = {
            let mut graph = ctx.graph.lock();
            let task = graph.get_mut(task_id).ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;
            task.status = TaskStatus::Done;
            task.actual_hours = Some(actual_hours);
            task.done_at = Some(now);
            task.updated_at = now;
            (task.estimated_hours, task.labels.clone())
        };

        ctx.leases.release(task_id)?;
        ctx.circuit_breakers.lock().entry(task_id.clone()).or_default().record_success();

        ctx.memory.record(Outcome {
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            labels,
            estimated_hours,
            actual_hours,
            completed_at: now,
        })?;

        ctx.events
            .publish(Event {
                kind: EventKind::TaskCompleted,
                payload: EventPayload::TaskCompleted { task_id: task_id.clone(), agent_id: agent_id.clone() },
                timestamp: now,
                project_id: ctx.project.id.clone(),
                correlation_id: Some(correlation_id.to_string()),
            })
            .await;

        let successors: Vec<TaskId> = ctx.graph.lock().successors(task_id).iter().map(|t| t.id.clone()).collect();
        for successor in successors {
            ctx.events
                .publish(Event {
                    kind: EventKind::DependencyResolved,
                    payload: EventPayload::DependencyResolved { task_id: successor },
                    timestamp: now,
                    project_id: ctx.project.id.clone(),
                    correlation_id: Some(correlation_id.to_string()),
                })
                .await;
        }

        Ok(Ack)
    }

    pub async fn record_decision(&self, decision: Decision) -> Result<Ack> {
        let correlation_id = new_correlation_id();
        let result: Result<Ack> = async {
            let ctx = self.projects.active_context().await?;
            ctx.decisions.lock().push(decision.clone());
            ctx.events
                .publish(Event {
                    kind: EventKind::DecisionRecorded,
                    payload: EventPayload::DecisionRecorded { task_id: decision.task_id.clone(), agent_id: decision.agent_id.clone() },
                    timestamp: self.now(),
                    project_id: ctx.project.id.clone(),
                    correlation_id: Some(correlation_id.clone()),
                })
                .await;
            Ok(Ack)
        }
        .await;
        log_if_failed(&correlation_id, result)
    }

    pub async fn record_artifact(&self, artifact: Artifact) -> Result<Ack> {
        let correlation_id = new_correlation_id();
        let result: Result<Ack> = async {
            let ctx = self.projects.active_context().await?;
            ctx.artifacts.lock().push(artifact.clone());
            ctx.events
                .publish(Event {
                    kind: EventKind::ArtifactRecorded,
                    payload: EventPayload::ArtifactRecorded { task_id: artifact.task_id.clone(), agent_id: artifact.agent_id.clone() },
                    timestamp: self.now(),
                    project_id: ctx.project.id.clone(),
                    correlation_id: Some(correlation_id.clone()),
                })
                .await;
            Ok(Ack)
        }
        .await;
        log_if_failed(&correlation_id, result)
    }

    /// `get_task_context`.
    pub async fn get_task_context(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<Context> {
        let ctx = self.projects.active_context().await?;
        let decisions_for_parent = ctx
            .graph
            .lock()
            .get(task_id)
            .and_then(|t| t.parent_task_id.clone())
            .map(|parent| {
                ctx.decisions
                    .lock()
                    .iter()
                    .filter(|d| {
                        ctx.graph.lock().get(&d.task_id).and_then(|t| t.parent_task_id.clone()).as_ref() == Some(&parent)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let artifacts = ctx.artifacts.lock().clone();
        let graph_guard = ctx.graph.lock();
        let builder = ContextBuilder::new(&graph_guard, &ctx.memory, self.workspace.as_ref());
        builder
            .build(task_id, agent_id, &ctx.project.id, decisions_for_parent, |pred_id| {
                artifacts.iter().filter(|a| &a.task_id == pred_id).cloned().collect()
            })
            .await
    }

    /// `get_task_status`.
    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskSnapshot> {
        let ctx = self.projects.active_context().await?;
        let graph = ctx.graph.lock();
        let task = graph.get(task_id).cloned().ok_or_else(|| MarcusError::not_found_task(task_id.clone()))?;
        let breakers = ctx.circuit_breakers.lock();
        let readiness = resolver::evaluate(
            &graph,
            task_id,
            |id| ctx.leases.get(id).map(|l| l.state == crate::models::LeaseState::Active).unwrap_or(false),
            |id| breakers.get(id).map(|b| b.is_quarantined()).unwrap_or(false),
        );
        Ok(TaskSnapshot { task, lease: ctx.leases.get(task_id), readiness })
    }

    /// `get_agent_status`.
    pub async fn get_agent_status(&self, agent_id: &AgentId) -> Result<AgentSnapshot> {
        let agent = self
            .agents
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| MarcusError::not_found_agent(agent_id.clone()))?;
        let ctx = self.projects.active_context().await?;
        let graph = ctx.graph.lock();
        let active_assignments: Vec<TaskId> =
            graph.iter().filter(|t| t.assigned_to.as_ref() == Some(agent_id)).map(|t| t.id.clone()).collect();
        let lease_health = active_assignments.iter().filter_map(|id| ctx.leases.get(id)).collect();
        Ok(AgentSnapshot { agent, active_assignments, lease_health })
    }

    /// Run one Reconciler pass against the active project.
    pub async fn reconcile(&self) -> Result<Vec<Repair>> {
        let correlation_id = new_correlation_id();
        let result: Result<Vec<Repair>> = async {
            let ctx = self.projects.active_context().await?;
            reconciler::reconcile(
                &ctx.graph,
                &ctx.leases,
                ctx.kanban.as_ref(),
                &ctx.events,
                &ctx.project.id,
                self.now(),
                Some(correlation_id.clone()),
            )
            .await
        }
        .await;
        log_if_failed(&correlation_id, result)
    }

    /// Advance the Lease Manager's background ticker once, releasing
    /// expired assignments and emitting `lease_expired`.
    pub async fn tick_leases(&self) -> Result<()> {
        let correlation_id = new_correlation_id();
        let result = self.tick_leases_inner(&correlation_id).await;
        log_if_failed(&correlation_id, result)
    }

    async fn tick_leases_inner(&self, correlation_id: &str) -> Result<()> {
        let ctx = self.projects.active_context().await?;
        let now = self.now();
        let expired = ctx.leases.tick(now);
        for (task_id, agent_id) in expired {
            {
                let mut graph = ctx.graph.lock();
                if let Some(task) = graph.get_mut(&task_id) {
                    task.assigned_to = None;
                    task.status = TaskStatus::Todo;
                    task.updated_at = now;
                }
            }
            let tripped = {
                let mut breakers = ctx.circuit_breakers.lock();
                breakers.entry(task_id.clone()).or_default().record_failure(FailureType::LeaseExpired, now)
            };
            ctx.events
                .publish(Event {
                    kind: EventKind::LeaseExpired,
                    payload: EventPayload::LeaseExpired { task_id: task_id.clone(), agent_id },
                    timestamp: now,
                    project_id: ctx.project.id.clone(),
                    correlation_id: Some(correlation_id.to_string()),
                })
                .await;
            if tripped {
                ctx.events
                    .publish(Event {
                        kind: EventKind::TaskQuarantined,
                        payload: EventPayload::TaskQuarantined { task_id, reason: "repeated lease expiry".into() },
                        timestamp: now,
                        project_id: ctx.project.id.clone(),
                        correlation_id: Some(correlation_id.to_string()),
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Spawn the lease ticker and, if enabled, the reconciler loop as
    /// background tasks on the current Tokio runtime. Returns their join
    /// handles so the caller can await or abort them on shutdown.
    pub fn spawn_background_tickers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>>
    where
        F: 'static,
    {
        let mut handles = Vec::new();

        let lease_core = self.clone();
        let lease_interval = self.config.lease.ticker_interval_seconds.max(1);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(lease_interval));
            loop {
                ticker.tick().await;
                if let Err(err) = lease_core.tick_leases().await {
                    tracing::warn!(error = %err, "lease ticker pass failed");
                }
            }
        }));

        if self.config.reconciler.enabled {
            let reconciler_core = self.clone();
            let reconciler_interval = self.config.reconciler.interval_seconds.max(1);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(reconciler_interval));
                loop {
                    ticker.tick().await;
                    match reconciler_core.reconcile().await {
                        Ok(repairs) if !repairs.is_empty() => {
                            info!(count = repairs.len(), "reconciler repaired drift");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "reconciler pass failed"),
                    }
                }
            }));
        }

        handles
    }

    pub async fn subscribe_events(
        &self,
        kinds: Option<Vec<EventKind>>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<crate::events::SubscriptionHandle> {
        let ctx = self.projects.active_context().await?;
        Ok(ctx.events.subscribe(kinds, callback))
    }
}
