//! Error kinds surfaced to callers of the pool.
//!
//! Per the propagation policy: task-execution failures are contained as
//! `TaskResult`s and transport failures terminate only the offending
//! worker's loop (the health monitor then decommissions it). Only
//! [`PoolError::InvalidState`] and [`PoolError::StartupError`] are ever
//! returned to a caller of the pool's lifecycle methods.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The dispatcher or connection manager observed a status it cannot
    /// act on (e.g. the main loop fired while the pool was in `Initial`).
    #[error("pool in unexpected state: {0}")]
    InvalidState(String),

    /// Raised when `start()` could not bring up a single worker.
    #[error("failed to start pool: {0}")]
    StartupError(String),
}
