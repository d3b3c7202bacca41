//! `TaskResult`: the terminal, immutable record of what happened to a task.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub uid: String,
    /// Carried over from `Task::target()` purely for diagnostics (discard
    /// and abort reasons reference it, as the original does via
    /// `self._input[uid]._target`).
    pub target: String,
    pub result: Option<serde_json::Value>,
    pub status: bool,
    pub reason: Option<String>,
}

impl TaskResult {
    pub fn success(uid: impl Into<String>, target: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            uid: uid.into(),
            target: target.into(),
            result: Some(result),
            status: true,
            reason: None,
        }
    }

    pub fn failure(uid: impl Into<String>, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            target: target.into(),
            result: None,
            status: false,
            reason: Some(reason.into()),
        }
    }
}
