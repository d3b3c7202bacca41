//! The task / executable capability model: a closed capability set in
//! place of a duck-typed `execute` target.
//!
//! The Python original accepts "anything callable" or "anything with
//! `run()`" as the result of `task.materialize()`. This rewrite closes that
//! over a three-variant [`Executable`] enum; unknown kinds simply cannot be
//! constructed, so a task that can't be run fails at materialize time by
//! construction rather than via a runtime `isinstance` chain.

use crate::ids::WorkerId;
use thiserror::Error;

/// The value a task produces, or the error message describing why it
/// didn't. Kept as JSON so a task can report any serializable value without
/// this crate needing to know its shape (the original's `result` is
/// similarly untyped).
pub type TaskOutcome = Result<serde_json::Value, String>;

/// A unit of work a submitter hands to the pool.
///
/// `uid` identifies the task for the lifetime of the pool; `target` is an
/// opaque diagnostic string (e.g. a dotted path), never interpreted by the
/// core. `materialize` turns the descriptor into something the worker can
/// actually run.
pub trait Task: Send + Sync {
    fn uid(&self) -> &str;

    /// Opaque diagnostic string, surfaced only in logs and discard reasons.
    fn target(&self) -> &str;

    fn materialize(&self) -> Result<Executable, MaterializeError>;
}

/// A `Runnable` target: has an optional parent (the worker that's about to
/// execute it gets adopted as parent if none is set, mirroring
/// `Worker.execute`'s `if not target.parent: target.parent = self`) and a
/// `run()` method.
pub trait RunnableTask: Send {
    fn parent(&self) -> Option<&WorkerId>;
    fn set_parent(&mut self, parent: WorkerId);
    fn run(&mut self) -> TaskOutcome;
}

/// A plain callable target (`target()` in the original).
pub trait CallableTask: Send {
    fn call(&mut self) -> TaskOutcome;
}

/// An object that only exposes `run()`, with no parent-adoption semantics
/// (the original's final `else: result = target.run()` branch).
pub trait RunObjectTask: Send {
    fn run(&mut self) -> TaskOutcome;
}

/// The closed union of everything `materialize()` may return.
pub enum Executable {
    Runnable(Box<dyn RunnableTask>),
    Callable(Box<dyn CallableTask>),
    RunObject(Box<dyn RunObjectTask>),
}

#[derive(Debug, Error)]
#[error("failed to materialize task {uid}: {reason}")]
pub struct MaterializeError {
    pub uid: String,
    pub reason: String,
}

impl MaterializeError {
    pub fn new(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            reason: reason.into(),
        }
    }
}
