//! Error taxonomy for the coordination kernel.
//!
//! `MarcusError` is the typed, in-process error. [`MarcusError::kind`] maps
//! every variant onto one of six abstract categories, and
//! [`MarcusError::surface`] produces the caller-facing shape every surfaced
//! error must carry: kind, message, correlation id, and an optional
//! remediation hint.

use thiserror::Error;

use crate::models::{AgentId, TaskId, TaskStatus};

pub type Result<T> = std::result::Result<T, MarcusError>;

/// The six abstract error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Integration,
    BusinessLogic,
    Configuration,
    Resource,
    Security,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarcusError {
    // --- Transient: retried internally, surfaced only after the retry budget is spent ---
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },
    #[error("service unavailable: {service}")]
    ServiceUnavailable { service: String },
    #[error("rate limited by {service}, retry after {retry_after_secs}s")]
    RateLimited { service: String, retry_after_secs: u64 },

    // --- Integration: external system violated its contract ---
    #[error("kanban error: {0}")]
    KanbanError(String),
    #[error("persistence error: {0}")]
    PersistenceError(String),

    // --- BusinessLogic: caller violated a rule, no side effects ---
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("assignment error: {0}")]
    AssignmentError(String),
    #[error("dependency violation: {0}")]
    DependencyViolation(String),
    #[error("graph invariant violated: {0}")]
    GraphInvariantError(String),
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    // --- Configuration: static setup failures ---
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // --- Resource: capacity exceeded ---
    #[error("lease table full (capacity {capacity})")]
    LeaseTableFull { capacity: usize },

    // --- Security: never retried ---
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl MarcusError {
    pub fn not_found_task(id: impl Into<TaskId>) -> Self {
        Self::TaskNotFound(id.into())
    }

    pub fn not_found_agent(id: impl Into<AgentId>) -> Self {
        Self::AgentNotFound(id.into())
    }

    pub fn invalid_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidStateTransition { from, to }
    }

    /// Classify this error into one of the six abstract kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarcusError::Timeout { .. }
            | MarcusError::ServiceUnavailable { .. }
            | MarcusError::RateLimited { .. } => ErrorKind::Transient,

            MarcusError::KanbanError(_) | MarcusError::PersistenceError(_) => {
                ErrorKind::Integration
            }

            MarcusError::AgentNotFound(_)
            | MarcusError::TaskNotFound(_)
            | MarcusError::AssignmentError(_)
            | MarcusError::DependencyViolation(_)
            | MarcusError::GraphInvariantError(_)
            | MarcusError::InvalidStateTransition { .. } => ErrorKind::BusinessLogic,

            MarcusError::MissingCredentials(_) | MarcusError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }

            MarcusError::LeaseTableFull { .. } => ErrorKind::Resource,

            MarcusError::Unauthorized(_) => ErrorKind::Security,
        }
    }

    /// Whether the abstract propagation policy allows retrying this error
    /// automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// A short remediation hint, when one exists, for the caller-facing
    /// surfaced error shape.
    pub fn remediation(&self) -> Option<String> {
        match self {
            MarcusError::Timeout { .. } => Some("retry the request after a short delay".into()),
            MarcusError::ServiceUnavailable { .. } => {
                Some("the collaborator is down; the Reconciler will retry in the background".into())
            }
            MarcusError::RateLimited { retry_after_secs, .. } => {
                Some(format!("wait {retry_after_secs}s before retrying"))
            }
            MarcusError::AgentNotFound(_) => Some("register the agent before requesting work".into()),
            MarcusError::AssignmentError(_) => {
                Some("confirm the agent holds an active lease on this task".into())
            }
            MarcusError::DependencyViolation(_) => {
                Some("complete the blocking dependencies before retrying".into())
            }
            MarcusError::InvalidStateTransition { .. } => {
                Some("check the task's current status before transitioning it".into())
            }
            MarcusError::MissingCredentials(_) | MarcusError::InvalidConfig(_) => {
                Some("fix the configuration and restart".into())
            }
            MarcusError::Unauthorized(_) => None,
            _ => None,
        }
    }

    /// Produce the caller-facing surfaced error: kind, message, correlation
    /// id, and remediation hint.
    pub fn surface(&self, correlation_id: Option<String>) -> SurfacedError {
        SurfacedError {
            kind: self.kind(),
            message: self.to_string(),
            correlation_id,
            remediation: self.remediation(),
        }
    }
}

/// The caller-facing error shape every surfaced error must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfacedError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: Option<String>,
    pub remediation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = MarcusError::Timeout { operation: "request_next_task".into() };
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn business_logic_errors_are_not_retryable() {
        let err = MarcusError::not_found_task("T1");
        assert_eq!(err.kind(), ErrorKind::BusinessLogic);
        assert!(!err.is_retryable());
    }

    #[test]
    fn security_errors_have_no_remediation() {
        let err = MarcusError::Unauthorized("bad token".into());
        assert_eq!(err.kind(), ErrorKind::Security);
        assert!(err.remediation().is_none());
    }

    #[test]
    fn surfaced_error_carries_correlation_id() {
        let err = MarcusError::invalid_transition(TaskStatus::Todo, TaskStatus::Done);
        let surfaced = err.surface(Some("corr-1".into()));
        assert_eq!(surfaced.correlation_id, Some("corr-1".into()));
        assert_eq!(surfaced.kind, ErrorKind::BusinessLogic);
        assert!(surfaced.remediation.is_some());
    }
}
