//! The message protocol spoken between a [`Pool`](#) and its workers.
//!
//! One request always elicits exactly one response: `TaskPullRequest`
//! is answered with `TaskSending` or `Ack`; `TaskResults` is answered with
//! `Ack`; `ConfigRequest` with `ConfigSending`; `Heartbeat` with `Ack`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskpool_shared::{ConfigSnapshot, Task, TaskResult, WorkerId, WorkerMetadata};

/// Discriminant-only view of [`Command`], used by
/// [`Message::expect`]-style assertions in `send_and_receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    ConfigRequest,
    ConfigSending,
    TaskPullRequest,
    TaskSending,
    TaskResults,
    Heartbeat,
    SetupFailed,
    Ack,
    Stop,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single protocol message. Every variant carries exactly the data column
/// from the message protocol table.
pub enum Command {
    /// W → P: ask for the pool's configuration chain.
    ConfigRequest,
    /// P → W: the requested configuration snapshots, root-to-leaf order
    /// reversed to leaf-to-root (matching `cfg.parent` walk order).
    ConfigSending(Vec<ConfigSnapshot>),
    /// W → P: "I want up to `n` tasks".
    TaskPullRequest(u32),
    /// P → W: a batch of at most `n` tasks (never empty — an empty batch
    /// is represented as `Ack` instead).
    TaskSending(Vec<Arc<dyn Task>>),
    /// W → P: results for a batch of previously-sent tasks.
    TaskResults(Vec<TaskResult>),
    /// W → P: liveness ping carrying the sender's wall-clock time.
    Heartbeat(DateTime<Utc>),
    /// W → P: worker-side setup failed; diagnostic string attached.
    SetupFailed(String),
    /// Either direction: generic acknowledgement, optionally carrying a
    /// payload (e.g. the pool echoes back `last_heartbeat` on `Heartbeat`).
    Ack(Option<serde_json::Value>),
    /// P → W: shut down the worker loop.
    Stop,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ConfigRequest => CommandKind::ConfigRequest,
            Command::ConfigSending(_) => CommandKind::ConfigSending,
            Command::TaskPullRequest(_) => CommandKind::TaskPullRequest,
            Command::TaskSending(_) => CommandKind::TaskSending,
            Command::TaskResults(_) => CommandKind::TaskResults,
            Command::Heartbeat(_) => CommandKind::Heartbeat,
            Command::SetupFailed(_) => CommandKind::SetupFailed,
            Command::Ack(_) => CommandKind::Ack,
            Command::Stop => CommandKind::Stop,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ConfigRequest => write!(f, "ConfigRequest"),
            Command::ConfigSending(snaps) => {
                write!(f, "ConfigSending({} snapshot(s))", snaps.len())
            }
            Command::TaskPullRequest(n) => write!(f, "TaskPullRequest({n})"),
            Command::TaskSending(tasks) => write!(f, "TaskSending({} task(s))", tasks.len()),
            Command::TaskResults(results) => write!(f, "TaskResults({} result(s))", results.len()),
            Command::Heartbeat(ts) => write!(f, "Heartbeat({ts})"),
            Command::SetupFailed(diag) => write!(f, "SetupFailed({diag:?})"),
            Command::Ack(payload) => write!(f, "Ack({payload:?})"),
            Command::Stop => write!(f, "Stop"),
        }
    }
}

/// Identifies who sent a [`Message`]. Used by the pool to look up the
/// worker a request came from (`sender_metadata['index']` in the
/// original); the pool itself stamps `Pool` on every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderMetadata {
    Pool,
    Worker(WorkerMetadata),
}

impl SenderMetadata {
    pub fn worker_id(&self) -> Option<&WorkerId> {
        match self {
            SenderMetadata::Pool => None,
            SenderMetadata::Worker(meta) => Some(&meta.index),
        }
    }
}

#[derive(Debug)]
pub struct Message {
    pub cmd: Command,
    pub sender: SenderMetadata,
}

impl Message {
    pub fn from_worker(cmd: Command, sender: WorkerMetadata) -> Self {
        Self {
            cmd,
            sender: SenderMetadata::Worker(sender),
        }
    }

    pub fn from_pool(cmd: Command) -> Self {
        Self {
            cmd,
            sender: SenderMetadata::Pool,
        }
    }
}
