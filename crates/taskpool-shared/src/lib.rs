//! Data model, configuration and error types shared by every `taskpool-*`
//! crate: the things the protocol, transport, worker and dispatcher crates
//! all need to agree on without depending on each other.

pub mod config;
pub mod error;
pub mod ids;
pub mod result;
pub mod task;

pub use config::{ConfigSnapshot, PoolConfig};
pub use error::PoolError;
pub use ids::{WorkerId, WorkerMetadata};
pub use result::TaskResult;
pub use task::{CallableTask, Executable, MaterializeError, RunObjectTask, RunnableTask, Task, TaskOutcome};
