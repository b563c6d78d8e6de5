//! The Memory / Outcome Recorder: an append-only store of
//! completed-assignment outcomes, used to estimate agent velocity for
//! lease-duration adjustment.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AgentId, TaskId};

/// One completed-assignment record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub labels: BTreeSet<String>,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    pub completed_at: DateTime<Utc>,
}

/// A velocity estimate: `hours_per_point` is the agent's actual/estimated
/// ratio averaged over matching history; `confidence` grows with sample
/// count, capped at 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityEstimate {
    pub hours_per_point: f64,
    pub confidence: f64,
}

const CONFIDENCE_SATURATION_SAMPLES: f64 = 10.0;

#[derive(Default)]
pub struct MemoryRecorder {
    outcomes: Mutex<Vec<Outcome>>,
}

impl MemoryRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a completed assignment. No deletion is ever performed;
    /// retention is unbounded.
    pub fn record(&self, outcome: Outcome) -> Result<()> {
        self.outcomes.lock().push(outcome);
        Ok(())
    }

    /// `velocity_estimate(agent_id, labels)`: the ratio
    /// of actual to estimated hours for this agent's history that shares at
    /// least one label with `labels`, below 1.0 meaning the agent tends to
    /// finish faster than estimated.
    pub fn velocity_estimate(&self, agent_id: &AgentId, labels: &BTreeSet<String>) -> Option<VelocityEstimate> {
        let outcomes = self.outcomes.lock();
        let matching: Vec<&Outcome> = outcomes
            .iter()
            .filter(|o| &o.agent_id == agent_id && !o.labels.is_disjoint(labels))
            .collect();

        if matching.is_empty() {
            return None;
        }

        let ratio_sum: f64 = matching
            .iter()
            .map(|o| o.actual_hours / o.estimated_hours.max(f64::EPSILON))
            .sum();
        let hours_per_point = ratio_sum / matching.len() as f64;
        let confidence = (matching.len() as f64 / CONFIDENCE_SATURATION_SAMPLES).min(1.0);

        Some(VelocityEstimate { hours_per_point, confidence })
    }

    pub fn history_for(&self, agent_id: &AgentId) -> Vec<Outcome> {
        self.outcomes.lock().iter().filter(|o| &o.agent_id == agent_id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(agent: &str, label: &str, estimated: f64, actual: f64) -> Outcome {
        Outcome {
            task_id: "t".into(),
            agent_id: agent.into(),
            labels: [label.to_string()].into_iter().collect(),
            estimated_hours: estimated,
            actual_hours: actual,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn no_history_returns_none() {
        let recorder = MemoryRecorder::new();
        let labels: BTreeSet<String> = ["build".into()].into_iter().collect();
        assert!(recorder.velocity_estimate(&"a1".to_string(), &labels).is_none());
    }

    #[test]
    fn faster_than_estimated_yields_ratio_below_one() {
        let recorder = MemoryRecorder::new();
        recorder.record(outcome("a1", "build", 10.0, 5.0)).unwrap();
        let labels: BTreeSet<String> = ["build".into()].into_iter().collect();
        let estimate = recorder.velocity_estimate(&"a1".to_string(), &labels).unwrap();
        assert!((estimate.hours_per_point - 0.5).abs() < 1e-9);
        assert!(estimate.confidence > 0.0 && estimate.confidence <= 1.0);
    }

    #[test]
    fn unrelated_labels_are_excluded() {
        let recorder = MemoryRecorder::new();
        recorder.record(outcome("a1", "deploy", 10.0, 5.0)).unwrap();
        let labels: BTreeSet<String> = ["build".into()].into_iter().collect();
        assert!(recorder.velocity_estimate(&"a1".to_string(), &labels).is_none());
    }
}
