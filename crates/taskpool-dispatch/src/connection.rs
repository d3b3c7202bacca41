//! The connection manager: the pool's view of its worker roster, used only
//! to pull the next pending request (§4.3).
//!
//! The original keeps a list of worker *objects* and re-reads
//! `worker.transport` on every `accept()`, so a worker restarted in place
//! (§4.6.1) is always polled through its current transport. This rewrite
//! keeps the analogous property by having the connection manager track
//! only registration order (`WorkerId`s) and resolving the live transport
//! from [`crate::state::PoolState`]'s worker slots on every call, rather
//! than caching an `Arc<dyn Transport>` that a restart could leave stale.

use taskpool_protocol::Message;
use taskpool_shared::WorkerId;

use crate::worker_slot::WorkerSlot;

/// Lifecycle state of a [`ConnectionManager`], mirroring the original's
/// `entity.Resource` status tag (only the transitions this core actually
/// drives are modeled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Initial,
    Started,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("can only register workers when started, current state is {0:?}")]
    NotStarted(ConnectionStatus),
    #[error("worker {0} already registered")]
    AlreadyRegistered(WorkerId),
}

/// The pool's view onto its workers for the purpose of pulling pending
/// requests. `register` is only legal once [`ConnectionManager::starting`]
/// has run; `stopping` drops the whole roster.
pub trait ConnectionManager: Send {
    fn register(&mut self, id: WorkerId) -> Result<(), ConnectionError>;

    /// Returns the next pending request from some registered worker's
    /// current transport, or `None` if none is pending. Must not block.
    fn accept(&mut self, workers: &[WorkerSlot]) -> Option<Message>;

    fn starting(&mut self);
    fn stopping(&mut self);
    fn aborting(&mut self);
}

/// Reference connection manager (§4.3): a monotonically increasing cursor
/// selects `roster[(cursor mod N) - 1]` and polls that worker's transport;
/// the cursor advances unconditionally so that sustained traffic cannot
/// starve any one worker (Testable property 5 / Scenario S6).
#[derive(Debug, Default)]
pub struct RoundRobinConnectionManager {
    roster: Vec<WorkerId>,
    cursor: u64,
    status: ConnectionStatus,
}

impl RoundRobinConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionManager for RoundRobinConnectionManager {
    fn register(&mut self, id: WorkerId) -> Result<(), ConnectionError> {
        if self.status != ConnectionStatus::Started {
            return Err(ConnectionError::NotStarted(self.status));
        }
        if self.roster.contains(&id) {
            return Err(ConnectionError::AlreadyRegistered(id));
        }
        self.roster.push(id);
        Ok(())
    }

    fn accept(&mut self, workers: &[WorkerSlot]) -> Option<Message> {
        if self.roster.is_empty() {
            return None;
        }
        let idx = (self.cursor % self.roster.len() as u64) as usize;
        self.cursor = self.cursor.wrapping_add(1);
        let id = &self.roster[idx];
        workers.iter().find(|w| &w.id == id)?.transport.accept()
    }

    fn starting(&mut self) {
        self.status = ConnectionStatus::Started;
    }

    fn stopping(&mut self) {
        self.roster.clear();
        self.status = ConnectionStatus::Stopped;
    }

    fn aborting(&mut self) {
        // No abort actions are required of the reference connection
        // manager; workers are aborted individually by the pool.
    }
}
