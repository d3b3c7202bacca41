//! Pool-side bookkeeping for one worker, minus the parts that belong to
//! the worker's own carrier — `taskpool-worker` owns the loop, this crate
//! owns only what the dispatcher and monitor need to mutate under the
//! pool lock.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use taskpool_shared::{WorkerId, WorkerMetadata};
use taskpool_transport::Transport;

/// Extension point for the defunct-child check. The reference,
/// thread-carried worker never populates one — `WorkerSlot::process_handle`
/// stays `None` for every worker this rewrite constructs — but a
/// process-carried worker (explicitly out of scope for this core) would
/// plug in here without touching the monitor's tick loop.
pub trait ProcessHandle: Send {
    /// True if the process still exists (a `NoSuchProcess` equivalent
    /// yields `false`, and the defunct check silently skips the worker).
    fn exists(&self) -> bool;

    /// True if every child of this process is in a zombie/defunct state.
    /// Only meaningful when [`ProcessHandle::exists`] is `true`.
    fn children_all_zombies(&self) -> bool;
}

/// One worker as seen by the dispatcher and monitor.
pub struct WorkerSlot {
    pub id: WorkerId,
    pub transport: Arc<dyn Transport>,
    pub metadata: WorkerMetadata,

    /// Uids currently in flight at this worker. Disjoint across all
    /// worker slots at any moment the pool lock is held.
    pub assigned: BTreeSet<String>,

    /// Tasks most recently requested but not yet received.
    pub requesting: u32,

    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Cleared by decommission; the monitor and handler both gate on this
    /// before doing any further work with the slot.
    pub active: bool,

    /// The worker's own loop carrier, owned here so `stop`/`abort` can
    /// join or drop it. `None` once the carrier has been taken for
    /// joining, or for a slot that was never started.
    pub carrier: Option<JoinHandle<()>>,

    /// See [`ProcessHandle`]. Always `None` for the in-process reference
    /// worker.
    pub process_handle: Option<Box<dyn ProcessHandle>>,
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("id", &self.id)
            .field("assigned", &self.assigned)
            .field("requesting", &self.requesting)
            .field("last_heartbeat", &self.last_heartbeat)
            .field("active", &self.active)
            .finish()
    }
}

impl WorkerSlot {
    pub fn new(id: WorkerId, transport: Arc<dyn Transport>, metadata: WorkerMetadata) -> Self {
        Self {
            id,
            transport,
            metadata,
            assigned: BTreeSet::new(),
            requesting: 0,
            last_heartbeat: None,
            active: true,
            carrier: None,
            process_handle: None,
        }
    }
}
