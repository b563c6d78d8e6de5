//! Coordination kernel for a pool of autonomous AI worker agents against a
//! project represented as a directed task graph synchronized with an
//! external kanban board.
//!
//! # Architecture
//!
//! - [`models`] — domain types: tasks, agents, leases, assignments, events.
//! - [`error`] — the error taxonomy and caller-facing surfaced error shape.
//! - [`config`] — layered configuration.
//! - [`collaborators`] — external system contracts (`KanbanClient`,
//!   `Workspace`, `Persistence`, `Clock`); implementations live outside
//!   this crate.
//! - [`graph`] — the Task Graph, an arena of tasks indexed by id.
//! - [`resolver`] — the Dependency Resolver's readiness check.
//! - [`lease`] — the Lease Manager.
//! - [`scheduler`] — scoring and per-task reservation latches.
//! - [`context`] — the deterministic Context Builder.
//! - [`progress`] — pure progress-clamping helpers and the blocker log.
//! - [`events`] — the in-process Event Bus.
//! - [`reconciler`] — board/graph diff-and-repair.
//! - [`project`] — the Project Context Manager.
//! - [`memory`] — the append-only Outcome Recorder.
//! - [`circuit_breaker`] — per-task failure quarantine.
//! - [`facade`] — [`facade::Core`], the top-level operation table.

pub mod circuit_breaker;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod facade;
pub mod graph;
pub mod lease;
pub mod memory;
pub mod models;
pub mod progress;
pub mod project;
pub mod reconciler;
pub mod resolver;
pub mod scheduler;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
