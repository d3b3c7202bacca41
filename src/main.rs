//! Lifecycle glue (§1, "Lifecycle glue" ~5%): a small demo binary that
//! wires the reference in-process worker carrier into a [`Pool`] and runs
//! it against a handful of closures, matching the shape of the original's
//! `if __name__ == "__main__"` smoke harness.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use taskpool_dispatch::Pool;
use taskpool_shared::{
    CallableTask, Executable, MaterializeError, PoolConfig, Task, TaskOutcome,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "taskpool", about = "In-process worker-pool task executor")]
struct Args {
    /// Number of workers in the pool.
    #[arg(long, default_value_t = 4)]
    size: usize,

    /// Number of demo tasks to submit.
    #[arg(long, default_value_t = 20)]
    tasks: usize,

    /// Seconds between worker heartbeats; omit to disable the health monitor.
    #[arg(long)]
    worker_heartbeat_secs: Option<f64>,

    /// Directory the pool may use for its own runtime bookkeeping.
    #[arg(long)]
    runpath: Option<PathBuf>,
}

/// A trivial demo task: sleeps briefly, then either succeeds with its
/// index or fails, depending on `fail`.
struct DemoTask {
    uid: String,
    fail: bool,
}

impl Task for DemoTask {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn target(&self) -> &str {
        "demo::task"
    }

    fn materialize(&self) -> Result<Executable, MaterializeError> {
        struct Runner {
            fail: bool,
        }
        impl CallableTask for Runner {
            fn call(&mut self) -> TaskOutcome {
                std::thread::sleep(Duration::from_millis(5));
                if self.fail {
                    Err("demo task configured to fail".to_string())
                } else {
                    Ok(serde_json::json!("ok"))
                }
            }
        }
        Ok(Executable::Callable(Box::new(Runner { fail: self.fail })))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = PoolConfig::new("demo-pool");
    config.size = args.size;
    config.worker_heartbeat_secs = args.worker_heartbeat_secs;

    let runpath = args
        .runpath
        .unwrap_or_else(|| std::env::temp_dir().join("taskpool-demo"));

    let factory: taskpool_dispatch::WorkerCarrierFactory = Arc::new(|id, transport, active_loop_sleep| {
        let loop_ = taskpool_worker::WorkerLoop::new(id, transport, active_loop_sleep);
        Ok(thread::spawn(move || loop_.run()))
    });

    let pool = Pool::new(config, runpath, factory);

    for i in 0..args.tasks {
        let uid = format!("task-{i}");
        pool.add(
            DemoTask {
                uid: uid.clone(),
                fail: fastrand::f32() < 0.1,
            },
            uid,
        );
    }

    pool.start()?;
    info!(submitted = args.tasks, "pool started, waiting for results");

    loop {
        if pool.ongoing_count() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    pool.stop();

    let results = pool.results();
    let succeeded = results.values().filter(|r| r.status).count();
    info!(succeeded, failed = results.len() - succeeded, "pool finished");

    Ok(())
}
