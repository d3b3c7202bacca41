//! The health monitor (§4.6): heartbeat window, inactive-worker
//! demotion, defunct-process restart. [`HealthMonitor::tick`] is pure
//! dispatcher logic over a locked [`PoolState`]; the thread loop that
//! calls it on a timer, and decides what to do when it reports every
//! worker inactive, lives in [`crate::pool::Pool`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use taskpool_shared::{PoolConfig, WorkerId};
use tracing::{debug, error};

use crate::handlers::decommission;
use crate::state::PoolState;

/// Per-worker classification for one tick (§4.6). Only `Inactive` counts
/// toward the "every worker inactive → abort the pool" check; a worker
/// that could not initialize but is still within the init window does
/// not, matching the original's separate `w_uninitialized`/`w_inactive`
/// sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Active,
    Uninitialized,
    Inactive,
}

/// Drives a worker restart for the defunct-child check (§4.6.1): stop the
/// old carrier, start a new one, and splice the fresh transport/carrier
/// into the worker's slot. The reference in-process worker never exposes
/// a `ProcessHandle`, so this is never invoked in practice — it exists so
/// a process-carried worker (out of scope per §1) has a documented,
/// typed extension point rather than a TODO.
pub trait WorkerRestarter: Send + Sync {
    fn restart(&self, state: &mut PoolState, id: &WorkerId) -> Result<(), String>;
}

/// The health monitor's own persistent state across ticks. Per Design
/// Notes §9 ("mutable default argument for `workers_last_killed`"), this
/// replaces the original's parameter-default smuggling with an explicit
/// field owned by the monitor component itself.
pub struct HealthMonitor {
    started: Instant,
    last_killed: HashMap<WorkerId, Instant>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_killed: HashMap::new(),
        }
    }

    /// How long the dispatcher should wait before the next tick, and how
    /// long a worker may stay silent before it's deemed dead (§4.6,
    /// "Heartbeat window").
    pub fn loop_sleep(config: &PoolConfig, worker_heartbeat: Duration) -> Duration {
        worker_heartbeat.mul_f64(config.heartbeats_miss_limit as f64)
    }

    /// Runs one monitor tick under the pool lock. Returns `true` if every
    /// worker came back classified inactive, in which case the caller
    /// must abort the whole pool (§4.6).
    pub fn tick(
        &mut self,
        state: &mut PoolState,
        config: &PoolConfig,
        worker_heartbeat: Duration,
        restarter: &dyn WorkerRestarter,
    ) -> bool {
        let loop_sleep = Self::loop_sleep(config, worker_heartbeat);
        let init_window = self.started.elapsed() <= config.heartbeat_init_window();

        let ids: Vec<WorkerId> = state.workers.iter().map(|w| w.id.clone()).collect();
        if ids.is_empty() {
            return false;
        }

        let mut inactive_count = 0usize;
        for id in &ids {
            self.defunct_child_check(state, config, id, restarter);

            let classification = self.classify(state, id, init_window, loop_sleep);
            if classification == Classification::Inactive {
                inactive_count += 1;
            }
        }

        if inactive_count == ids.len() {
            error!("all workers inactive, pool must abort");
            true
        } else {
            false
        }
    }

    fn classify(
        &mut self,
        state: &mut PoolState,
        id: &WorkerId,
        init_window: bool,
        loop_sleep: Duration,
    ) -> Classification {
        let Some(worker) = state.worker(id) else {
            return Classification::Inactive;
        };

        if !worker.active {
            return Classification::Inactive;
        }

        match worker.last_heartbeat {
            None => {
                if init_window {
                    Classification::Uninitialized
                } else {
                    decommission(state, id, "could not initialize");
                    Classification::Uninitialized
                }
            }
            Some(last_heartbeat) => {
                let silence = (Utc::now() - last_heartbeat)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if silence > loop_sleep {
                    decommission(state, id, "failed to send heartbeats");
                    Classification::Inactive
                } else {
                    Classification::Active
                }
            }
        }
    }

    /// §4.6.1: restarts a worker whose process is down to zombie children
    /// with no recent result. A no-op whenever `process_handle` is `None`
    /// (always true for the in-process reference worker).
    fn defunct_child_check(
        &mut self,
        state: &mut PoolState,
        config: &PoolConfig,
        id: &WorkerId,
        restarter: &dyn WorkerRestarter,
    ) {
        let inactivity_threshold = config.worker_inactivity_threshold();
        let last_killed = *self.last_killed.entry(id.clone()).or_insert(self.started);

        let Some(worker) = state.worker(id) else {
            return;
        };
        if worker.process_handle.is_none() {
            return;
        }
        if worker.assigned.is_empty() || last_killed.elapsed() < inactivity_threshold {
            return;
        }

        let handle = worker.process_handle.as_ref().unwrap();
        if !handle.exists() {
            return;
        }
        if !handle.children_all_zombies() {
            return;
        }

        let last_result_age = state
            .workers_last_result
            .get(id)
            .map(|t| (Utc::now() - *t).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::MAX);
        if last_result_age <= inactivity_threshold {
            return;
        }

        self.last_killed.insert(id.clone(), Instant::now());

        let worker = state.worker_mut(id).unwrap();
        let reassigned: Vec<String> = worker.assigned.iter().cloned().collect();
        worker.assigned.clear();
        debug!(worker = %id, "restarting worker after defunct child process");
        for uid in reassigned {
            state.unassigned.push_back(uid);
        }

        if let Err(err) = restarter.restart(state, id) {
            error!(worker = %id, error = %err, "worker failed to restart");
            decommission(state, id, "defunct child process");
        }
    }
}
