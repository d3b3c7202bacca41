//! Pool dispatcher: the part of this core that owns worker registration,
//! request routing, task (re)assignment and lifecycle transitions. Pairs
//! with `taskpool-worker`'s loop and `taskpool-transport`'s channel to give
//! a complete in-process pool; the health monitor lives here too since it
//! mutates the same locked [`state::PoolState`].

pub mod connection;
pub mod handlers;
pub mod monitor;
pub mod pool;
pub mod state;
pub mod worker_slot;

pub use connection::{ConnectionError, ConnectionManager, ConnectionStatus, RoundRobinConnectionManager};
pub use monitor::{HealthMonitor, WorkerRestarter};
pub use pool::{Pool, WorkerCarrierFactory};
pub use state::{PoolState, PoolStatus, RescheduleCheck};
pub use worker_slot::{ProcessHandle, WorkerSlot};
