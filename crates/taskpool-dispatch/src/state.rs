//! Pool-owned state and the single lock that is the only path to it:
//! `Mutex<PoolState>` is acquired for the whole of `handle_request` and
//! for every monitor tick, so every mutation of pool-owned state happens
//! under the pool lock.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskpool_shared::{Task, TaskResult, WorkerId};

use crate::connection::RoundRobinConnectionManager;
use crate::worker_slot::WorkerSlot;

/// Mirrors the original's `entity.Resource` status tag, restricted to the
/// transitions this core's main loop and lifecycle methods actually drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolStatus {
    #[default]
    Initial,
    Starting,
    Started,
    Stopping,
    Stopped,
    Aborted,
}

/// A reschedule predicate installed via `set_reschedule_check`. The
/// original validates that the callable accepts exactly the `pool`,
/// `task_result` parameter names via runtime introspection; here that
/// validation is the function's type signature, checked at compile time.
pub type RescheduleCheck = dyn Fn(&PoolState, &TaskResult) -> bool + Send + Sync;

pub fn default_reschedule_check() -> Arc<RescheduleCheck> {
    Arc::new(|_pool: &PoolState, _result: &TaskResult| false)
}

/// All pool-owned state, locked as a unit.
pub struct PoolState {
    pub status: PoolStatus,

    pub input: HashMap<String, Arc<dyn Task>>,
    /// Uids submitted but not yet in `results`; order is not significant
    /// (Invariant 2 only constrains set membership), kept as a `Vec` purely
    /// so discard/abort can drain it in submission order for log
    /// readability.
    pub ongoing: Vec<String>,
    pub unassigned: VecDeque<String>,
    pub results: HashMap<String, TaskResult>,
    pub task_assign_cnt: HashMap<String, u32>,

    /// Ordered so iteration order (heartbeat scans, round robin) is
    /// deterministic and matches worker index order.
    pub workers: Vec<WorkerSlot>,
    pub workers_last_result: HashMap<WorkerId, DateTime<Utc>>,

    pub conn: RoundRobinConnectionManager,
    pub should_reschedule: Arc<RescheduleCheck>,

    /// Directory the pool uses for per-worker setup output (§6, "Runpath":
    /// `{index}_startup`). Empty for a [`PoolState`] built outside
    /// `Pool::new` (e.g. unit tests below), in which case no logfile path
    /// is ever attached to a decommission log.
    pub runpath: PathBuf,
}

impl std::fmt::Debug for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolState")
            .field("status", &self.status)
            .field("ongoing", &self.ongoing)
            .field("unassigned", &self.unassigned)
            .field("results", &self.results.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl PoolState {
    pub fn new() -> Self {
        Self {
            status: PoolStatus::Initial,
            input: HashMap::new(),
            ongoing: Vec::new(),
            unassigned: VecDeque::new(),
            results: HashMap::new(),
            task_assign_cnt: HashMap::new(),
            workers: Vec::new(),
            workers_last_result: HashMap::new(),
            conn: RoundRobinConnectionManager::new(),
            should_reschedule: default_reschedule_check(),
            runpath: PathBuf::new(),
        }
    }

    pub fn worker_mut(&mut self, id: &WorkerId) -> Option<&mut WorkerSlot> {
        self.workers.iter_mut().find(|w| &w.id == id)
    }

    pub fn worker(&self, id: &WorkerId) -> Option<&WorkerSlot> {
        self.workers.iter().find(|w| &w.id == id)
    }

    /// The setup-output file a worker's carrier may have written (§6,
    /// "Runpath"), used only to decide whether a decommission log should
    /// attach its path.
    pub fn worker_logfile(&self, id: &WorkerId) -> PathBuf {
        self.runpath.join(format!("{}_startup", id.as_str()))
    }
}

impl Default for PoolState {
    fn default() -> Self {
        Self::new()
    }
}
