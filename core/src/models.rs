//! Domain models for the coordination kernel: tasks, agents, assignments,
//! leases, projects, and the append-only records attached to them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable task identifier. Stable across the process lifetime and
/// across the external kanban board.
pub type TaskId = String;

/// Opaque agent identifier.
pub type AgentId = String;

/// Opaque project identifier.
pub type ProjectId = String;

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

/// Task priority. Ordering matters: used directly in the scheduler's
/// tie-break (higher priority wins).
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Normalized weight in `[0.0, 1.0]` used by the scheduler's scoring
    /// function.
    pub fn weight(self) -> f64 {
        match self {
            Priority::Low => 0.25,
            Priority::Medium => 0.5,
            Priority::High => 0.75,
            Priority::Urgent => 1.0,
        }
    }
}

/// Recognized phase tags. A task's phase is derived from its `labels` set;
/// unrecognized labels carry no phase ordering weight.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Design,
    Build,
    Test,
    Deploy,
}

impl Phase {
    const ORDER: [(&'static str, Phase); 4] = [
        ("design", Phase::Design),
        ("build", Phase::Build),
        ("test", Phase::Test),
        ("deploy", Phase::Deploy),
    ];

    /// Find the phase encoded in a label set, if any. The first recognized
    /// label wins; callers are expected not to attach more than one phase
    /// label to a task.
    pub fn from_labels(labels: &BTreeSet<String>) -> Option<Phase> {
        Self::ORDER
            .iter()
            .find(|(label, _)| labels.contains(*label))
            .map(|(_, phase)| *phase)
    }
}

/// A unit of work tracked by the kernel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub estimated_hours: f64,
    pub actual_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub labels: BTreeSet<String>,
    pub project_id: ProjectId,

    /// Ids of tasks this task requires, in the order they were declared.
    pub dependencies: Vec<TaskId>,
    pub is_subtask: bool,
    pub parent_task_id: Option<TaskId>,
    pub subtask_index: Option<u32>,
    /// Contract tag this task produces for cross-parent subtask wiring.
    pub provides: Option<String>,
    /// Contract tag this task consumes for cross-parent subtask wiring.
    pub requires: Option<String>,

    pub assigned_to: Option<AgentId>,

    /// Set when the last attempt to push this task's assignment to the
    /// kanban board failed. The reservation itself still stands; the
    /// Reconciler clears this once the board agrees with the local state.
    pub board_sync_pending: bool,
}

impl Task {
    /// `status == Done` iff `actual_hours` is recorded and `done_at` is set.
    pub fn is_consistently_done(&self) -> bool {
        match self.status {
            TaskStatus::Done => self.actual_hours.is_some() && self.done_at.is_some(),
            _ => self.actual_hours.is_none() || self.done_at.is_none(),
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        Phase::from_labels(&self.labels)
    }
}

/// A worker registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    pub role: String,
    pub skills: BTreeSet<String>,
    pub capacity_hours_per_week: f64,
    /// Declared availability, keyed by an opaque day/slot label to hours
    /// available that slot. Left to the caller's convention; the kernel
    /// never interprets the keys, only sums the values.
    pub availability: std::collections::BTreeMap<String, f64>,
    pub performance_score: f64,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        id: AgentId,
        display_name: String,
        role: String,
        skills: BTreeSet<String>,
        capacity_hours_per_week: f64,
    ) -> Self {
        Self {
            id,
            display_name,
            role,
            skills,
            capacity_hours_per_week,
            availability: std::collections::BTreeMap::new(),
            performance_score: 1.0,
            registered_at: Utc::now(),
        }
    }
}

/// State of a [`Lease`].
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
pub enum LeaseState {
    Active,
    Expired,
    Released,
}

/// A time-bounded contract an agent holds over a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewal_count: u32,
    pub last_progress_pct: u8,
    pub state: LeaseState,
}

/// A (task, agent) binding created by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub opened_at: DateTime<Utc>,
    pub lease: Lease,
}

/// A board and its task collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    pub display_name: String,
    pub kanban_provider_handle: String,
    pub config: serde_json::Value,
    pub last_accessed: DateTime<Utc>,
}

/// Event kinds emitted on the [`crate::events::EventBus`].
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskAssigned,
    TaskStarted,
    ProgressReported,
    TaskCompleted,
    BlockerReported,
    LeaseRenewed,
    LeaseExpired,
    DecisionRecorded,
    ArtifactRecorded,
    DependencyResolved,
    ContextBuilt,
    /// Additive kind for the circuit-breaker supplement.
    TaskQuarantined,
    /// Additive kind covering reconciler repairs.
    AssignmentOrphaned,
}

/// A published event. `payload` is a small tagged enum rather than a bag of
/// dynamic fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub project_id: ProjectId,
    pub correlation_id: Option<String>,
}

/// Tagged payload variants, one family per [`EventKind`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EventPayload {
    TaskAssigned { task_id: TaskId, agent_id: AgentId },
    TaskStarted { task_id: TaskId, agent_id: AgentId },
    ProgressReported { task_id: TaskId, agent_id: AgentId, pct: u8 },
    TaskCompleted { task_id: TaskId, agent_id: AgentId },
    BlockerReported { task_id: TaskId, agent_id: AgentId, severity: BlockerSeverity },
    LeaseRenewed { task_id: TaskId, agent_id: AgentId, expires_at: DateTime<Utc> },
    LeaseExpired { task_id: TaskId, agent_id: AgentId },
    DecisionRecorded { task_id: TaskId, agent_id: AgentId },
    ArtifactRecorded { task_id: TaskId, agent_id: AgentId },
    DependencyResolved { task_id: TaskId },
    ContextBuilt { task_id: TaskId },
    TaskQuarantined { task_id: TaskId, reason: String },
    AssignmentOrphaned { task_id: TaskId },
}

/// Severity of a reported blocker.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// An append-only design decision attached to a task and agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub what: String,
    pub why: String,
    pub impact: String,
    pub confidence: f64,
    pub affected_task_ids: Vec<TaskId>,
    pub timestamp: DateTime<Utc>,
}

/// An append-only artifact record attached to a task and agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub artifact_type: String,
    pub location: String,
    pub size: u64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// A reported blocker, persisted alongside the task it blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockerReport {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub description: String,
    pub severity: BlockerSeverity,
    pub reported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: "T1".into(),
            name: "Test".into(),
            description: "desc".into(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            estimated_hours: 2.0,
            actual_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            done_at: None,
            due_date: None,
            labels: BTreeSet::new(),
            project_id: "P1".into(),
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

    #[test]
    fn done_consistency_requires_hours_and_timestamp() {
        let mut task = sample_task();
        assert!(task.is_consistently_done());

        task.status = TaskStatus::Done;
        assert!(!task.is_consistently_done());

        task.actual_hours = Some(1.5);
        task.done_at = Some(Utc::now());
        assert!(task.is_consistently_done());
    }

    #[test]
    fn phase_from_labels_recognizes_known_tags() {
        let mut labels = BTreeSet::new();
        labels.insert("build".to_string());
        labels.insert("frontend".to_string());
        assert_eq!(Phase::from_labels(&labels), Some(Phase::Build));
    }

    #[test]
    fn phase_from_labels_none_when_unrecognized() {
        let mut labels = BTreeSet::new();
        labels.insert("frontend".to_string());
        assert_eq!(Phase::from_labels(&labels), None);
    }

    #[test]
    fn priority_weight_is_monotonic() {
        assert!(Priority::Low.weight() < Priority::Medium.weight());
        assert!(Priority::Medium.weight() < Priority::High.weight());
        assert!(Priority::High.weight() < Priority::Urgent.weight());
    }
}
