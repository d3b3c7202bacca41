//! The pool itself: its submitter-facing surface and lifecycle, wiring
//! the dispatcher main loop, the optional health monitor, and the worker
//! carriers together behind a single lock.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use taskpool_shared::{PoolConfig, PoolError, Task, TaskResult, WorkerId, WorkerMetadata};
use taskpool_transport::{InProcessTransport, Transport};
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::handlers::{self, discard_pending_tasks};
use crate::monitor::{HealthMonitor, WorkerRestarter};
use crate::state::{PoolState, PoolStatus, RescheduleCheck};
use crate::worker_slot::WorkerSlot;

/// Spawns the carrier (thread, in the reference case) that runs a worker's
/// pull-execute-report loop, returning its join handle or a diagnostic
/// string if the carrier could not be started. This is the injection point
/// for the original's configurable `worker_type`: `taskpool-dispatch` has
/// no dependency on `taskpool-worker`, so the caller (the root `taskpool`
/// binary) supplies the closure that actually runs
/// `taskpool_worker::WorkerLoop`.
pub type WorkerCarrierFactory = Arc<
    dyn Fn(WorkerId, Arc<dyn Transport>, Duration) -> Result<JoinHandle<()>, String> + Send + Sync,
>;

struct NoopRestarter;

impl WorkerRestarter for NoopRestarter {
    fn restart(&self, _state: &mut PoolState, _id: &WorkerId) -> Result<(), String> {
        Err("no worker restarter configured".to_string())
    }
}

pub struct Pool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    runpath: PathBuf,
    worker_carrier_factory: WorkerCarrierFactory,
    restarter: Box<dyn WorkerRestarter>,
    dispatcher_carrier: Mutex<Option<JoinHandle<()>>>,
    monitor_carrier: Mutex<Option<JoinHandle<()>>>,
    dispatcher_running: Arc<AtomicBool>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("name", &self.config.name).finish()
    }
}

impl Pool {
    /// Builds a pool with `config.size` workers, each with its own
    /// in-process transport (created eagerly, matching the original's
    /// `Worker.__init__`/`Pool._add_workers` running inside `Pool.__init__`
    /// rather than `start()`).
    pub fn new(config: PoolConfig, runpath: PathBuf, worker_carrier_factory: WorkerCarrierFactory) -> Arc<Self> {
        let mut state = PoolState::new();
        state.runpath = runpath.clone();
        for idx in 0..config.size {
            let id = WorkerId::from(idx);
            let transport: Arc<dyn Transport> =
                Arc::new(InProcessTransport::new(config.recv_poll_interval()));
            let metadata = WorkerMetadata::new(id.clone(), format!("worker-{idx}"));
            debug!(worker = %id, "added worker");
            state.workers.push(WorkerSlot::new(id, transport, metadata));
        }

        Arc::new(Self {
            config,
            state: Mutex::new(state),
            runpath,
            worker_carrier_factory,
            restarter: Box::new(NoopRestarter),
            dispatcher_carrier: Mutex::new(None),
            monitor_carrier: Mutex::new(None),
            dispatcher_running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The pool's own identifier (`uid()` = `name`).
    pub fn uid(&self) -> &str {
        &self.config.name
    }

    /// Enqueues a task for dispatch. The original's runtime `TypeError` on
    /// a non-`Task` argument becomes a compile-time trait bound on `T` —
    /// there is no runtime check left to perform.
    pub fn add<T: Task + 'static>(&self, task: T, uid: impl Into<String>) {
        let uid = uid.into();
        let mut state = self.state.lock().unwrap();
        state.input.insert(uid.clone(), Arc::new(task));
        state.ongoing.push(uid.clone());
        state.unassigned.push_back(uid);
    }

    /// Installs a custom reschedule predicate. The original validates via
    /// introspection that the callable's parameters are named exactly
    /// `pool`, `task_result`; here that contract is the closure's type
    /// signature, enforced at compile time.
    pub fn set_reschedule_check(
        &self,
        check: impl Fn(&PoolState, &TaskResult) -> bool + Send + Sync + 'static,
    ) {
        let mut state = self.state.lock().unwrap();
        state.should_reschedule = Arc::new(check) as Arc<RescheduleCheck>;
    }

    /// Sum of outstanding worker `requesting` counts.
    pub fn workers_requests(&self) -> u32 {
        let state = self.state.lock().unwrap();
        state.workers.iter().map(|w| w.requesting).sum()
    }

    /// Snapshot of every uid that has reached a terminal result so far.
    pub fn results(&self) -> HashMap<String, TaskResult> {
        self.state.lock().unwrap().results.clone()
    }

    pub fn ongoing_count(&self) -> usize {
        self.state.lock().unwrap().ongoing.len()
    }

    /// Number of workers the health monitor still considers active.
    /// Exposed alongside `workers_requests` as a diagnostic accessor.
    pub fn active_worker_count(&self) -> usize {
        self.state.lock().unwrap().workers.iter().filter(|w| w.active).count()
    }

    /// Starting: start the connection manager, register every worker,
    /// start the worker carriers, then the dispatcher and (if configured)
    /// monitor carriers.
    pub fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        std::fs::create_dir_all(&self.runpath)
            .map_err(|e| PoolError::StartupError(format!("could not create runpath: {e}")))?;

        let mut started = 0usize;
        let mut failed = 0usize;
        {
            let mut state = self.state.lock().unwrap();
            state.conn.starting();
            for worker in &state.workers {
                // Registration failure here would mean a duplicate id,
                // which `Pool::new` cannot produce; surfaced as a
                // StartupError rather than silently ignored.
                state
                    .conn
                    .register(worker.id.clone())
                    .map_err(|e| PoolError::StartupError(e.to_string()))?;
            }

            let active_loop_sleep = self.config.active_loop_sleep();
            for worker in &mut state.workers {
                match (self.worker_carrier_factory)(worker.id.clone(), worker.transport.clone(), active_loop_sleep) {
                    Ok(handle) => {
                        worker.carrier = Some(handle);
                        started += 1;
                    }
                    Err(err) => {
                        error!(worker = %worker.id, error = %err, "worker failed to start");
                        worker.active = false;
                        failed += 1;
                    }
                }
            }

            if started == 0 && failed > 0 {
                for worker in &mut state.workers {
                    worker.transport.deactivate();
                    if let Some(handle) = worker.carrier.take() {
                        let _ = handle.join();
                    }
                }
                state.conn.stopping();
                return Err(PoolError::StartupError(
                    "all workers failed to start".to_string(),
                ));
            }

            state.status = PoolStatus::Starting;
        }

        self.dispatcher_running.store(true, Ordering::SeqCst);
        let dispatcher_pool = self.clone();
        let dispatcher_handle = thread::spawn(move || run_dispatcher_loop(dispatcher_pool));
        *self.dispatcher_carrier.lock().unwrap() = Some(dispatcher_handle);

        if let Some(worker_heartbeat) = self.config.worker_heartbeat() {
            debug!("starting health monitor carrier");
            let monitor_pool = self.clone();
            let monitor_handle = thread::spawn(move || run_monitor_loop(monitor_pool, worker_heartbeat));
            *self.monitor_carrier.lock().unwrap() = Some(monitor_handle);
        }

        info!(pool = %self.config.name, "pool started");
        Ok(())
    }

    /// Stopping: stop workers, then the connection manager, under the pool
    /// lock; the dispatcher loop observes the `Stopping` status on its own
    /// next tick and finalizes to `Stopped`.
    pub fn stop(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            for worker in &mut state.workers {
                worker.transport.deactivate();
            }
            let carriers: Vec<_> = state.workers.iter_mut().filter_map(|w| w.carrier.take()).collect();
            for handle in carriers {
                let _ = handle.join();
            }
            state.conn.stopping();
            state.status = PoolStatus::Stopping;
        }

        if let Some(handle) = self.dispatcher_carrier.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.monitor_carrier.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!(pool = %self.config.name, "pool stopped");
    }

    /// Aborting: abort every worker without waiting, abort the connection
    /// manager, then discard pending tasks so every submitted uid still
    /// ends up with a terminal result. Carriers are abandoned, not joined.
    pub fn abort(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            for worker in &mut state.workers {
                worker.transport.deactivate();
                worker.active = false;
                worker.carrier.take();
            }
            state.conn.aborting();
            discard_pending_tasks(&mut state, &self.config.name);
            state.status = PoolStatus::Aborted;
        }
        warn!(pool = %self.config.name, "pool aborted");
    }
}

/// The dispatcher's main loop. Runs on its own carrier, distinct from any
/// worker's.
///
/// Idle backoff (§6.2 "max_active_loop_sleep"): `current_sleep` starts at
/// the configured floor and doubles each tick that found no pending
/// request, capped at `max_active_loop_sleep`; any tick that did find a
/// request resets it to the floor, so a busy pool stays responsive while
/// an idle one stops spinning at the lock every few milliseconds.
fn run_dispatcher_loop(pool: Arc<Pool>) {
    let floor = pool.config.active_loop_sleep();
    let ceiling = pool.config.max_active_loop_sleep();
    let mut current_sleep = floor;

    loop {
        let (should_continue, found_work) = {
            let mut state = pool.state.lock().unwrap();
            match state.status {
                PoolStatus::Aborted => (false, false),
                PoolStatus::Starting => {
                    state.status = PoolStatus::Started;
                    (true, true)
                }
                PoolStatus::Stopping => {
                    state.status = PoolStatus::Stopped;
                    (false, false)
                }
                PoolStatus::Started => {
                    let msg = state.conn.accept(&state.workers);
                    let found_work = msg.is_some();
                    if let Some(msg) = msg {
                        debug!(cmd = ?msg.cmd.kind(), "received message from worker");
                        let config = &pool.config;
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            handlers::handle_request(&mut state, config, msg)
                        }));
                        if let Err(payload) = result {
                            error!(panic = %format_panic(&payload), "request handler panicked, continuing");
                        }
                    }
                    (true, found_work)
                }
                other => {
                    error!(status = ?other, "pool in unexpected state, stopping dispatcher");
                    (false, false)
                }
            }
        };

        if !should_continue {
            break;
        }

        current_sleep = if found_work {
            floor
        } else {
            (current_sleep * 2).min(ceiling)
        };
        thread::sleep(current_sleep);
    }
    pool.dispatcher_running.store(false, Ordering::SeqCst);
}

fn format_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

/// The health monitor's carrier loop. Ticks every `loop_sleep`, polling
/// every ~50ms so it can exit promptly once the dispatcher carrier has
/// stopped.
fn run_monitor_loop(pool: Arc<Pool>, worker_heartbeat: Duration) {
    let mut monitor = HealthMonitor::new();
    let poll_interval = Duration::from_millis(50);

    while pool.dispatcher_running.load(Ordering::SeqCst) {
        let abort_all = {
            let mut state = pool.state.lock().unwrap();
            monitor.tick(&mut state, &pool.config, worker_heartbeat, pool.restarter.as_ref())
        };

        if abort_all {
            pool.abort();
            break;
        }

        let loop_sleep = HealthMonitor::loop_sleep(&pool.config, worker_heartbeat);
        let mut waited = Duration::ZERO;
        while waited < loop_sleep && pool.dispatcher_running.load(Ordering::SeqCst) {
            let step = poll_interval.min(loop_sleep - waited);
            thread::sleep(step);
            waited += step;
        }
    }
}
