//! Per-task failure circuit breaker. Tracks repeated
//! task-level failures and trips a task into quarantine once a failure
//! type's threshold is exceeded; the Dependency Resolver then reports the
//! task as `BlockedBy([Quarantined])` until [`CircuitBreaker::reset`] is
//! called via `unblock_task`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure categories that count against a task's circuit breaker.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureType {
    /// The agent's lease on the task expired without completion.
    LeaseExpired,
    /// The agent reported a blocker against the task.
    BlockerReported,
    /// The agent lacked the skills the task required; reassignment, not
    /// retry, is the right response, so a single occurrence trips.
    CapabilityMismatch,
}

impl FailureType {
    fn threshold(self) -> u32 {
        match self {
            FailureType::CapabilityMismatch => 1,
            FailureType::LeaseExpired => 3,
            FailureType::BlockerReported => 3,
        }
    }
}

/// Circuit state for a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Quarantined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    failure_counts: HashMap<FailureType, u32>,
    state: CircuitState,
    last_failure: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            failure_counts: HashMap::new(),
            state: CircuitState::Closed,
            last_failure: None,
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure, returning `true` if this failure tripped the
    /// breaker into quarantine.
    pub fn record_failure(&mut self, failure_type: FailureType, now: DateTime<Utc>) -> bool {
        self.last_failure = Some(now);
        let count = self.failure_counts.entry(failure_type).or_insert(0);
        *count += 1;
        if *count >= failure_type.threshold() {
            self.state = CircuitState::Quarantined;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.failure_counts.clear();
        self.state = CircuitState::Closed;
        self.last_failure = None;
    }

    pub fn is_quarantined(&self) -> bool {
        self.state == CircuitState::Quarantined
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Manual reset, invoked by `unblock_task`. Unlike the threshold trip,
    /// this never requires authorization: an operator calling
    /// `unblock_task` is authorization enough.
    pub fn reset(&mut self) {
        self.failure_counts.clear();
        self.state = CircuitState::Closed;
    }

    pub fn failure_counts(&self) -> &HashMap<FailureType, u32> {
        &self.failure_counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_mismatch_trips_on_first_failure() {
        let mut breaker = CircuitBreaker::new();
        let tripped = breaker.record_failure(FailureType::CapabilityMismatch, Utc::now());
        assert!(tripped);
        assert!(breaker.is_quarantined());
    }

    #[test]
    fn lease_expired_trips_after_threshold() {
        let mut breaker = CircuitBreaker::new();
        let now = Utc::now();
        assert!(!breaker.record_failure(FailureType::LeaseExpired, now));
        assert!(!breaker.record_failure(FailureType::LeaseExpired, now));
        assert!(breaker.record_failure(FailureType::LeaseExpired, now));
        assert!(breaker.is_quarantined());
    }

    #[test]
    fn success_clears_counts() {
        let mut breaker = CircuitBreaker::new();
        breaker.record_failure(FailureType::LeaseExpired, Utc::now());
        breaker.record_success();
        assert!(breaker.failure_counts().is_empty());
        assert!(!breaker.is_quarantined());
    }

    #[test]
    fn reset_clears_quarantine() {
        let mut breaker = CircuitBreaker::new();
        breaker.record_failure(FailureType::CapabilityMismatch, Utc::now());
        assert!(breaker.is_quarantined());
        breaker.reset();
        assert!(!breaker.is_quarantined());
    }
}
