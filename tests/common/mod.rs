//! Shared test fixtures for the pool scenario tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskpool_dispatch::{Pool, WorkerCarrierFactory};
use taskpool_shared::{CallableTask, Executable, MaterializeError, PoolConfig, Task, TaskOutcome};
use taskpool_worker::WorkerLoop;

/// A task whose behavior is parameterized per test: succeed outright, fail
/// a fixed number of times before succeeding, sleep for a while, or panic.
pub struct ScriptedTask {
    uid: String,
    // Shared (not per-materialize) so retries of the same uid see the
    // count decremented by the previous attempt.
    fails_remaining: Arc<AtomicU32>,
    sleep: Duration,
    panics: bool,
}

impl ScriptedTask {
    pub fn succeeding(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            fails_remaining: Arc::new(AtomicU32::new(0)),
            sleep: Duration::ZERO,
            panics: false,
        }
    }

    pub fn failing_n_times(uid: impl Into<String>, n: u32) -> Self {
        Self {
            uid: uid.into(),
            fails_remaining: Arc::new(AtomicU32::new(n)),
            sleep: Duration::ZERO,
            panics: false,
        }
    }

    pub fn sleeping(uid: impl Into<String>, sleep: Duration) -> Self {
        Self {
            uid: uid.into(),
            fails_remaining: Arc::new(AtomicU32::new(0)),
            sleep,
            panics: false,
        }
    }

    pub fn panicking(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            fails_remaining: Arc::new(AtomicU32::new(0)),
            sleep: Duration::ZERO,
            panics: true,
        }
    }
}

impl Task for ScriptedTask {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn target(&self) -> &str {
        "scripted::task"
    }

    fn materialize(&self) -> Result<Executable, MaterializeError> {
        struct Runner {
            fails_remaining: Arc<AtomicU32>,
            sleep: Duration,
            panics: bool,
        }
        impl CallableTask for Runner {
            fn call(&mut self) -> TaskOutcome {
                if self.sleep > Duration::ZERO {
                    thread::sleep(self.sleep);
                }
                if self.panics {
                    panic!("scripted task panic");
                }
                let remaining = self.fails_remaining.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.fails_remaining.store(remaining - 1, Ordering::SeqCst);
                    return Err("scripted failure".to_string());
                }
                Ok(serde_json::json!("ok"))
            }
        }
        Ok(Executable::Callable(Box::new(Runner {
            fails_remaining: self.fails_remaining.clone(),
            sleep: self.sleep,
            panics: self.panics,
        })))
    }
}

/// Builds a worker carrier factory backed by the real `WorkerLoop`.
pub fn in_process_factory() -> WorkerCarrierFactory {
    Arc::new(|id, transport, active_loop_sleep| {
        let loop_ = WorkerLoop::new(id, transport, active_loop_sleep);
        Ok(thread::spawn(move || loop_.run()))
    })
}

pub fn test_runpath(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("taskpool-test-{name}-{:?}", thread::current().id()))
}

pub fn small_pool(name: &str, size: usize) -> Arc<Pool> {
    let mut config = PoolConfig::new(name);
    config.size = size;
    config.active_loop_sleep_ms = 2;
    config.recv_poll_interval_ms = 5;
    Pool::new(config, test_runpath(name), in_process_factory())
}

/// Blocks until `pool.ongoing_count() == 0` or `timeout` elapses, returning
/// whether it drained in time.
pub fn wait_for_drain(pool: &Pool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if pool.ongoing_count() == 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
