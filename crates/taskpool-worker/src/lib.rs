//! The worker agent and its pull-execute-report loop.
//!
//! A [`WorkerLoop`] is the carrier-side half of a worker: it owns nothing
//! the pool needs to reach into under lock, it only talks to the pool
//! through its [`Transport`]. The pool-side bookkeeping (`assigned`,
//! `requesting`, `last_heartbeat`, ...) lives in `taskpool-dispatch`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use taskpool_protocol::{Command, CommandKind, Message};
use taskpool_shared::{Executable, Task, TaskOutcome, TaskResult, WorkerId, WorkerMetadata};
use taskpool_transport::Transport;
use tracing::{debug, warn};

/// Runs the pull-execute-report loop for one worker until the pool sends
/// `Stop`, the transport goes inactive, or a transport error occurs.
pub struct WorkerLoop {
    id: WorkerId,
    transport: Arc<dyn Transport>,
    metadata: WorkerMetadata,
    active_loop_sleep: Duration,
}

impl std::fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLoop").field("id", &self.id).finish()
    }
}

impl WorkerLoop {
    pub fn new(id: WorkerId, transport: Arc<dyn Transport>, active_loop_sleep: Duration) -> Self {
        let carrier_id = format!("{:?}", std::thread::current().id());
        let metadata = WorkerMetadata::new(id.clone(), carrier_id);
        Self {
            id,
            transport,
            metadata,
            active_loop_sleep,
        }
    }

    /// Runs until the loop should exit. Blocking — call from a dedicated
    /// carrier thread.
    pub fn run(&self) {
        loop {
            let request = Message::from_worker(Command::TaskPullRequest(1), self.metadata.clone());
            let response = match self.transport.send_and_receive(request, None) {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(worker = %self.id, error = %err, "transport error pulling tasks, exiting loop");
                    break;
                }
            };

            let Some(response) = response else {
                debug!(worker = %self.id, "transport inactive, exiting loop");
                break;
            };

            match response.cmd {
                Command::Stop => {
                    debug!(worker = %self.id, "received Stop, exiting loop");
                    break;
                }
                Command::TaskSending(tasks) => {
                    let results: Vec<TaskResult> =
                        tasks.iter().map(|task| self.execute(task.as_ref())).collect();
                    let reply =
                        Message::from_worker(Command::TaskResults(results), self.metadata.clone());
                    if let Err(err) = self
                        .transport
                        .send_and_receive(reply, Some(CommandKind::Ack))
                    {
                        warn!(worker = %self.id, error = %err, "transport error reporting results, exiting loop");
                        break;
                    }
                }
                Command::Ack(_) => {}
                other => {
                    warn!(worker = %self.id, cmd = ?other, "unexpected response, ignoring");
                }
            }

            std::thread::sleep(self.active_loop_sleep);
        }
    }

    /// Executes one task, never unwinding past this call.
    fn execute(&self, task: &dyn Task) -> TaskResult {
        let uid = task.uid().to_string();
        let target = task.target().to_string();

        match task.materialize() {
            Ok(executable) => match run_executable(self.id.clone(), executable) {
                Ok(value) => TaskResult::success(uid, target, value),
                Err(reason) => TaskResult::failure(uid, target, reason),
            },
            Err(err) => TaskResult::failure(uid, target, err.to_string()),
        }
    }
}

/// Invokes an [`Executable`], adopting the worker as parent of a
/// `Runnable` that has none, and trapping any panic as a `TaskOutcome`
/// error instead of letting it unwind into the worker carrier.
fn run_executable(worker_id: WorkerId, executable: Executable) -> TaskOutcome {
    match executable {
        Executable::Runnable(mut runnable) => {
            if runnable.parent().is_none() {
                runnable.set_parent(worker_id);
            }
            guarded(move || runnable.run())
        }
        Executable::Callable(mut callable) => guarded(move || callable.call()),
        Executable::RunObject(mut run_object) => guarded(move || run_object.run()),
    }
}

fn guarded(f: impl FnOnce() -> TaskOutcome) -> TaskOutcome {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(format_panic(&payload)),
    }
}

fn format_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskpool_shared::{CallableTask, MaterializeError, RunnableTask};
    use taskpool_transport::InProcessTransport;

    struct ConstTask {
        uid: String,
        value: serde_json::Value,
    }

    impl Task for ConstTask {
        fn uid(&self) -> &str {
            &self.uid
        }
        fn target(&self) -> &str {
            "const"
        }
        fn materialize(&self) -> Result<Executable, MaterializeError> {
            struct Const(serde_json::Value);
            impl CallableTask for Const {
                fn call(&mut self) -> TaskOutcome {
                    Ok(self.0.clone())
                }
            }
            Ok(Executable::Callable(Box::new(Const(self.value.clone()))))
        }
    }

    struct PanicTask;
    impl Task for PanicTask {
        fn uid(&self) -> &str {
            "panics"
        }
        fn target(&self) -> &str {
            "panics"
        }
        fn materialize(&self) -> Result<Executable, MaterializeError> {
            struct Boom;
            impl CallableTask for Boom {
                fn call(&mut self) -> TaskOutcome {
                    panic!("kaboom");
                }
            }
            Ok(Executable::Callable(Box::new(Boom)))
        }
    }

    struct AdoptsParentTask {
        adopted: std::sync::Arc<std::sync::Mutex<Option<WorkerId>>>,
    }
    impl Task for AdoptsParentTask {
        fn uid(&self) -> &str {
            "adopts"
        }
        fn target(&self) -> &str {
            "adopts"
        }
        fn materialize(&self) -> Result<Executable, MaterializeError> {
            struct Runner(std::sync::Arc<std::sync::Mutex<Option<WorkerId>>>, Option<WorkerId>);
            impl RunnableTask for Runner {
                fn parent(&self) -> Option<&WorkerId> {
                    self.1.as_ref()
                }
                fn set_parent(&mut self, parent: WorkerId) {
                    self.1 = Some(parent);
                }
                fn run(&mut self) -> TaskOutcome {
                    *self.0.lock().unwrap() = self.1.clone();
                    Ok(serde_json::Value::Null)
                }
            }
            Ok(Executable::Runnable(Box::new(Runner(self.adopted.clone(), None))))
        }
    }

    fn loop_for(id: &str) -> (WorkerLoop, std::sync::Arc<InProcessTransport>) {
        let transport = std::sync::Arc::new(InProcessTransport::new(Duration::from_millis(5)));
        let worker_loop = WorkerLoop::new(
            WorkerId::new(id),
            transport.clone(),
            Duration::from_millis(1),
        );
        (worker_loop, transport)
    }

    #[test]
    fn execute_success_roundtrips_result() {
        let (worker_loop, _transport) = loop_for("0");
        let task = ConstTask {
            uid: "t1".into(),
            value: serde_json::json!(42),
        };
        let result = worker_loop.execute(&task);
        assert!(result.status);
        assert_eq!(result.result, Some(serde_json::json!(42)));
    }

    #[test]
    fn execute_traps_panics_as_failure() {
        let (worker_loop, _transport) = loop_for("0");
        let task = PanicTask;
        let result = worker_loop.execute(&task);
        assert!(!result.status);
        assert!(result.reason.unwrap().contains("kaboom"));
    }

    #[test]
    fn execute_adopts_worker_as_parent_when_unset() {
        let (worker_loop, _transport) = loop_for("3");
        let adopted = std::sync::Arc::new(std::sync::Mutex::new(None));
        let task = AdoptsParentTask {
            adopted: adopted.clone(),
        };
        let result = worker_loop.execute(&task);
        assert!(result.status);
        assert_eq!(adopted.lock().unwrap().as_ref().unwrap().as_str(), "3");
    }

    #[test]
    fn run_exits_on_stop() {
        let (worker_loop, transport) = loop_for("0");
        // Pre-seed a Stop response so the first pull immediately exits.
        transport.respond(Message::from_pool(Command::Stop)).unwrap();
        worker_loop.run();
        // The pull request should have been visible to the pool side.
        let pulled = transport.accept().unwrap();
        assert_eq!(pulled.cmd.kind(), CommandKind::TaskPullRequest);
    }

    #[test]
    fn run_exits_when_transport_deactivated() {
        let (worker_loop, transport) = loop_for("0");
        transport.deactivate();
        let calls = AtomicUsize::new(0);
        calls.fetch_add(1, Ordering::SeqCst);
        worker_loop.run();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
