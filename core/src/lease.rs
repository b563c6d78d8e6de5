//! The Lease Manager: per-assignment time-bounded contracts
//! with renewal and expiry. Holds no task-graph state of its own; callers
//! (the Scheduler and Progress Handler) are responsible for keeping the
//! task's `status`/`assigned_to` fields in sync with lease transitions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::error::{MarcusError, Result};
use crate::models::{AgentId, Lease, LeaseState, TaskId};

const MIN_DURATION_MINUTES: i64 = 30;
const MAX_DURATION_HOURS: i64 = 24;

/// `initial_duration(task)`: `estimated_hours * 1.25`,
/// clamped to `[30min, 24h]`, optionally shortened by a faster historical
/// velocity estimate for this agent on similar work.
pub fn initial_duration(estimated_hours: f64, velocity_hint: Option<f64>) -> Duration {
    let mut hours = estimated_hours * 1.25;
    if let Some(velocity) = velocity_hint {
        // velocity_hint < 1.0 means the agent historically finishes faster
        // than estimated; never lengthen the lease from this hint.
        if velocity > 0.0 && velocity < 1.0 {
            hours *= velocity;
        }
    }
    let minutes = (hours * 60.0).round() as i64;
    Duration::minutes(minutes.clamp(MIN_DURATION_MINUTES, MAX_DURATION_HOURS * 60))
}

/// The stage factor applied to remaining-time estimates on renewal: slower
/// early (more buffer for ramp-up), faster in the middle, more buffer again
/// late (closer to done means more scrutiny/rework risk).
fn stage_factor(progress_pct: u8) -> f64 {
    match progress_pct {
        0..=33 => 0.8,
        34..=66 => 1.0,
        _ => 1.3,
    }
}

/// `remaining_duration(progress_pct, estimated_hours)`.
pub fn remaining_duration(progress_pct: u8, estimated_hours: f64) -> Duration {
    let remaining_fraction = (100 - progress_pct.min(100)) as f64 / 100.0;
    let hours = estimated_hours * remaining_fraction * stage_factor(progress_pct);
    let minutes = (hours * 60.0).round() as i64;
    Duration::minutes(minutes.max(MIN_DURATION_MINUTES))
}

/// In-memory table of active leases, keyed by task id. Durable persistence
/// of the same state lives behind the `Persistence` collaborator contract;
/// this manager is the authority for the in-process invariants (at most one
/// active lease per task, monotonic progress).
#[derive(Default)]
pub struct LeaseManager {
    leases: Mutex<HashMap<TaskId, Lease>>,
}

impl LeaseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new lease. Fails if one is already active for this task
    /// (`open` and `release` are mutually exclusive per task).
    pub fn open(&self, task_id: TaskId, agent_id: AgentId, duration: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let mut leases = self.leases.lock();
        if let Some(existing) = leases.get(&task_id) {
            if existing.state == LeaseState::Active {
                return Err(MarcusError::AssignmentError(format!(
                    "task {task_id} already has an active lease"
                )));
            }
        }
        let lease = Lease {
            task_id: task_id.clone(),
            agent_id,
            created_at: now,
            expires_at: now + duration,
            renewal_count: 0,
            last_progress_pct: 0,
            state: LeaseState::Active,
        };
        leases.insert(task_id, lease.clone());
        Ok(lease)
    }

    /// Renew the lease held by `agent_id` on `task_id`, extending
    /// `expires_at` by [`remaining_duration`]. Progress is monotonic:
    /// storing a lower `progress_pct` than already recorded still extends
    /// the lease but never lowers `last_progress_pct`.
    pub fn renew(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        progress_pct: u8,
        estimated_hours: f64,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        let mut leases = self.leases.lock();
        let lease = leases
            .get_mut(task_id)
            .ok_or_else(|| MarcusError::AssignmentError(format!("no lease for task {task_id}")))?;

        if lease.state != LeaseState::Active {
            return Err(MarcusError::AssignmentError(format!(
                "lease for task {task_id} is not active"
            )));
        }
        if &lease.agent_id != agent_id {
            return Err(MarcusError::AssignmentError(format!(
                "lease for task {task_id} is held by a different agent"
            )));
        }

        lease.last_progress_pct = lease.last_progress_pct.max(progress_pct);
        lease.expires_at = now + remaining_duration(progress_pct, estimated_hours);
        lease.renewal_count += 1;
        Ok(lease.clone())
    }

    /// Release a lease (completion or cancellation). Idempotent: releasing
    /// an already-released lease is a no-op.
    pub fn release(&self, task_id: &TaskId) -> Result<()> {
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get_mut(task_id) {
            lease.state = LeaseState::Released;
        }
        Ok(())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Lease> {
        self.leases.lock().get(task_id).cloned()
    }

    /// Scan every active lease and expire the ones past `now`. Returns the
    /// task ids of leases that transitioned to `expired` this tick, for the
    /// caller to release the corresponding assignment and emit
    /// `lease_expired`.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<(TaskId, AgentId)> {
        let mut leases = self.leases.lock();
        let mut expired = Vec::new();
        for lease in leases.values_mut() {
            if lease.state == LeaseState::Active && lease.expires_at < now {
                lease.state = LeaseState::Expired;
                expired.push((lease.task_id.clone(), lease.agent_id.clone()));
            }
        }
        expired
    }
}
