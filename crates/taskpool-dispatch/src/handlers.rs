//! Request routing and the five command handlers (§4.5 "Request routing"
//! and "Handlers"). Everything here runs with the pool lock held — it is
//! only ever called from [`crate::pool::Pool`]'s main loop or its tests.

use chrono::Utc;
use taskpool_protocol::{Command, CommandKind, Message};
use taskpool_shared::{PoolConfig, TaskResult, WorkerId};
use tracing::{debug, error, warn};

use crate::state::{PoolState, PoolStatus};

/// Routes one worker request to its handler (§4.5 "Request routing").
/// Per Design Notes §9, this is a `match` over the closed `Command` enum
/// rather than a runtime dispatch table — an unhandled variant is a
/// compile error, not a silent `Ack`.
pub fn handle_request(state: &mut PoolState, config: &PoolConfig, msg: Message) {
    let Some(sender_id) = msg.sender.worker_id().cloned() else {
        warn!("dropping message with no worker sender metadata");
        return;
    };

    let Some(worker) = state.worker(&sender_id) else {
        warn!(worker = %sender_id, "request from unknown worker, dropping");
        return;
    };

    if !worker.active {
        error!(worker = %sender_id, cmd = ?msg.cmd.kind(), "ignoring message from inactive worker");
        respond(state, &sender_id, Command::Ack(None));
        return;
    }

    state.worker_mut(&sender_id).unwrap().last_heartbeat = Some(Utc::now());

    debug!(worker = %sender_id, cmd = ?msg.cmd.kind(), "request received");

    if state.status == PoolStatus::Stopping {
        respond(state, &sender_id, Command::Stop);
        return;
    }

    match msg.cmd {
        Command::ConfigRequest => handle_config_request(state, config, &sender_id),
        Command::TaskPullRequest(n) => handle_task_pull_request(state, config, &sender_id, n),
        Command::TaskResults(results) => handle_task_results(state, config, &sender_id, results),
        Command::Heartbeat(sent_at) => handle_heartbeat(state, &sender_id, sent_at),
        Command::SetupFailed(diag) => handle_setup_failed(state, &sender_id, diag),
        other @ (Command::ConfigSending(_) | Command::TaskSending(_) | Command::Ack(_) | Command::Stop) => {
            error!(worker = %sender_id, cmd = ?other.kind(), "unexpected request kind from worker");
            respond(state, &sender_id, Command::Ack(None));
        }
    }
}

fn respond(state: &mut PoolState, worker_id: &WorkerId, cmd: Command) {
    if let Some(worker) = state.worker(worker_id) {
        let _ = worker.transport.respond(Message::from_pool(cmd));
    }
}

fn handle_config_request(state: &mut PoolState, config: &PoolConfig, worker_id: &WorkerId) {
    // This rewrite has no nested executor/suite config hierarchy, so the
    // chain is always exactly one snapshot long (Open Question resolution,
    // see DESIGN.md).
    respond(state, worker_id, Command::ConfigSending(vec![config.snapshot()]));
}

fn handle_task_pull_request(state: &mut PoolState, config: &PoolConfig, worker_id: &WorkerId, n: u32) {
    let mut batch = Vec::new();

    if state.status == PoolStatus::Started {
        for _ in 0..n {
            let Some(uid) = state.unassigned.pop_front() else {
                break;
            };

            let cnt = state.task_assign_cnt.entry(uid.clone()).or_insert(0);
            if *cnt >= config.task_retries_limit {
                discard_task(state, &uid, format!(
                    "already reached max retries ({})",
                    config.task_retries_limit
                ));
                continue;
            }
            *cnt += 1;

            let Some(task) = state.input.get(&uid).cloned() else {
                continue;
            };
            debug!(worker = %worker_id, uid, "scheduling task");
            if let Some(worker) = state.worker_mut(worker_id) {
                worker.assigned.insert(uid);
            }
            batch.push(task);
        }
    }

    if !batch.is_empty() {
        let remaining = n - batch.len() as u32;
        respond(state, worker_id, Command::TaskSending(batch));
        if let Some(worker) = state.worker_mut(worker_id) {
            worker.requesting = remaining;
        }
        return;
    }

    if let Some(worker) = state.worker_mut(worker_id) {
        worker.requesting = n;
    }
    respond(state, worker_id, Command::Ack(None));
}

fn handle_task_results(
    state: &mut PoolState,
    config: &PoolConfig,
    worker_id: &WorkerId,
    results: Vec<TaskResult>,
) {
    for task_result in results {
        let uid = task_result.uid.clone();

        if let Some(worker) = state.worker_mut(worker_id) {
            worker.assigned.remove(&uid);
        }
        state.workers_last_result.entry(worker_id.clone()).or_insert_with(Utc::now);

        let should_reschedule = (state.should_reschedule.clone())(state, &task_result);
        let assign_cnt = state.task_assign_cnt.get(&uid).copied().unwrap_or(0);

        if should_reschedule {
            if assign_cnt >= config.task_retries_limit {
                debug!(uid, retries = config.task_retries_limit, "not rescheduling, max retries reached");
            } else {
                debug!(uid, "rescheduling task per should_reschedule");
                state.unassigned.push_back(uid);
                continue;
            }
        }

        state.results.insert(uid.clone(), task_result);
        state.ongoing.retain(|existing| existing != &uid);
    }

    respond(state, worker_id, Command::Ack(None));
}

fn handle_heartbeat(state: &mut PoolState, worker_id: &WorkerId, sent_at: chrono::DateTime<Utc>) {
    let now = Utc::now();
    if let Some(worker) = state.worker_mut(worker_id) {
        worker.last_heartbeat = Some(now);
    }
    debug!(worker = %worker_id, sent_at = %sent_at, "heartbeat received");
    respond(
        state,
        worker_id,
        Command::Ack(Some(serde_json::json!(now.to_rfc3339()))),
    );
}

fn handle_setup_failed(state: &mut PoolState, worker_id: &WorkerId, diagnostic: String) {
    warn!(worker = %worker_id, diagnostic, "worker setup failed");
    respond(state, worker_id, Command::Ack(None));
    decommission(state, worker_id, "setup failed");
}

/// Discards one task that has exhausted its retry budget (inside
/// `TaskPullRequest`, §4.5): records a failing result and removes the uid
/// from `ongoing`, restoring Invariant 1 for that uid.
fn discard_task(state: &mut PoolState, uid: &str, reason: String) {
    let target = state
        .input
        .get(uid)
        .map(|t| t.target().to_string())
        .unwrap_or_default();
    error!(uid, reason, "discarding task");
    state.results.insert(
        uid.to_string(),
        TaskResult::failure(uid, target, format!("task discarded: {reason}")),
    );
    state.ongoing.retain(|existing| existing != uid);
}

/// Writes a failing terminal result for every uid still `ongoing` (§4.8,
/// called from `Pool::abort`). Restores Invariant 1 after an abort.
pub fn discard_pending_tasks(state: &mut PoolState, pool_name: &str) {
    error!(pool = pool_name, "discarding pending tasks");
    while !state.ongoing.is_empty() {
        let uid = state.ongoing.remove(0);
        let target = state
            .input
            .get(&uid)
            .map(|t| t.target().to_string())
            .unwrap_or_default();
        let reason = format!("task [{target}] discarding due to {pool_name} abort.");
        state.results.insert(uid.clone(), TaskResult::failure(uid, target, reason));
    }
}

/// Marks a worker inactive, drains its assigned uids back to `unassigned`,
/// and aborts its carrier (§4.5 "Decommission"). Does not remove the
/// worker from the roster; the health monitor later observes it as
/// inactive.
pub fn decommission(state: &mut PoolState, worker_id: &WorkerId, reason: &str) {
    if state.worker(worker_id).is_none() {
        return;
    }
    let logfile = state.worker_logfile(worker_id);
    if logfile.exists() {
        error!(worker = %worker_id, reason, logfile = %logfile.display(), "decommissioning worker");
    } else {
        error!(worker = %worker_id, reason, "decommissioning worker");
    }

    let worker = state.worker_mut(worker_id).unwrap();

    let reassigned: Vec<String> = worker.assigned.iter().cloned().collect();
    worker.assigned.clear();
    worker.active = false;
    worker.transport.deactivate();
    let carrier = worker.carrier.take();

    for uid in reassigned {
        state.unassigned.push_back(uid);
    }

    if let Some(handle) = carrier {
        // Best-effort: a stuck worker carrier must not wedge the
        // dispatcher thread that's holding the pool lock, so this drops
        // the handle rather than joining it. `Pool::stop` performs the
        // interruptible join for workers that are still active.
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use taskpool_shared::{CallableTask, Executable, MaterializeError, PoolConfig, Task, TaskOutcome};
    use taskpool_shared::WorkerMetadata;
    use taskpool_transport::InProcessTransport;

    struct NoopTask(String);
    impl Task for NoopTask {
        fn uid(&self) -> &str {
            &self.0
        }
        fn target(&self) -> &str {
            "noop"
        }
        fn materialize(&self) -> Result<Executable, MaterializeError> {
            struct C;
            impl CallableTask for C {
                fn call(&mut self) -> TaskOutcome {
                    Ok(serde_json::Value::Null)
                }
            }
            Ok(Executable::Callable(Box::new(C)))
        }
    }

    fn state_with_worker(id: &str) -> (PoolState, Arc<InProcessTransport>) {
        let mut state = PoolState::new();
        state.status = PoolStatus::Started;
        let transport = Arc::new(InProcessTransport::new(Duration::from_millis(5)));
        let worker_id = WorkerId::new(id);
        let metadata = WorkerMetadata::new(worker_id.clone(), "test".to_string());
        state.workers.push(crate::worker_slot::WorkerSlot::new(
            worker_id,
            transport.clone(),
            metadata,
        ));
        (state, transport)
    }

    #[test]
    fn task_pull_request_assigns_unassigned_task() {
        let (mut state, transport) = state_with_worker("0");
        let config = PoolConfig::new("p");
        state.input.insert("t1".into(), Arc::new(NoopTask("t1".into())));
        state.unassigned.push_back("t1".into());
        state.ongoing.push("t1".into());

        handle_task_pull_request(&mut state, &config, &WorkerId::new("0"), 1);

        let resp = transport.receive().unwrap();
        assert_eq!(resp.cmd.kind(), CommandKind::TaskSending);
        assert!(state.worker(&WorkerId::new("0")).unwrap().assigned.contains("t1"));
        assert_eq!(*state.task_assign_cnt.get("t1").unwrap(), 1);
    }

    #[test]
    fn task_pull_request_acks_when_empty() {
        let (mut state, transport) = state_with_worker("0");
        let config = PoolConfig::new("p");

        handle_task_pull_request(&mut state, &config, &WorkerId::new("0"), 3);

        let resp = transport.receive().unwrap();
        assert_eq!(resp.cmd.kind(), CommandKind::Ack);
        assert_eq!(state.worker(&WorkerId::new("0")).unwrap().requesting, 3);
    }

    #[test]
    fn task_pull_request_discards_at_retry_limit() {
        let (mut state, _transport) = state_with_worker("0");
        let mut config = PoolConfig::new("p");
        config.task_retries_limit = 1;
        state.input.insert("t1".into(), Arc::new(NoopTask("t1".into())));
        state.unassigned.push_back("t1".into());
        state.ongoing.push("t1".into());
        state.task_assign_cnt.insert("t1".into(), 1);

        handle_task_pull_request(&mut state, &config, &WorkerId::new("0"), 1);

        let result = state.results.get("t1").unwrap();
        assert!(!result.status);
        assert!(result.reason.as_ref().unwrap().contains("max retries"));
        assert!(!state.ongoing.contains(&"t1".to_string()));
    }

    #[test]
    fn task_results_records_terminal_result() {
        let (mut state, transport) = state_with_worker("0");
        let config = PoolConfig::new("p");
        state.ongoing.push("t1".into());
        state.worker_mut(&WorkerId::new("0")).unwrap().assigned.insert("t1".into());

        handle_task_results(
            &mut state,
            &config,
            &WorkerId::new("0"),
            vec![TaskResult::success("t1", "noop", serde_json::json!(1))],
        );

        assert!(state.results.contains_key("t1"));
        assert!(!state.ongoing.contains(&"t1".to_string()));
        assert!(!state.worker(&WorkerId::new("0")).unwrap().assigned.contains("t1"));
        let resp = transport.receive().unwrap();
        assert_eq!(resp.cmd.kind(), CommandKind::Ack);
    }

    #[test]
    fn task_results_reschedules_when_predicate_true() {
        let (mut state, _transport) = state_with_worker("0");
        let config = PoolConfig::new("p");
        state.should_reschedule = Arc::new(|_pool: &PoolState, _r: &TaskResult| true);
        state.ongoing.push("t1".into());
        state.task_assign_cnt.insert("t1".into(), 1);
        state.worker_mut(&WorkerId::new("0")).unwrap().assigned.insert("t1".into());

        handle_task_results(
            &mut state,
            &config,
            &WorkerId::new("0"),
            vec![TaskResult::failure("t1", "noop", "transient")],
        );

        assert!(!state.results.contains_key("t1"));
        assert!(state.unassigned.contains(&"t1".to_string()));
        assert!(state.ongoing.contains(&"t1".to_string()));
    }

    #[test]
    fn task_results_does_not_reschedule_past_retry_limit() {
        let (mut state, _transport) = state_with_worker("0");
        let mut config = PoolConfig::new("p");
        config.task_retries_limit = 2;
        state.should_reschedule = Arc::new(|_pool: &PoolState, _r: &TaskResult| true);
        state.ongoing.push("t1".into());
        state.task_assign_cnt.insert("t1".into(), 2);
        state.worker_mut(&WorkerId::new("0")).unwrap().assigned.insert("t1".into());

        handle_task_results(
            &mut state,
            &config,
            &WorkerId::new("0"),
            vec![TaskResult::failure("t1", "noop", "transient")],
        );

        assert!(state.results.contains_key("t1"));
        assert!(!state.unassigned.contains(&"t1".to_string()));
    }

    #[test]
    fn inactive_worker_gets_ack_and_is_ignored() {
        let (mut state, transport) = state_with_worker("0");
        let config = PoolConfig::new("p");
        state.worker_mut(&WorkerId::new("0")).unwrap().active = false;

        let metadata = WorkerMetadata::new(WorkerId::new("0"), "test".into());
        handle_request(
            &mut state,
            &config,
            Message::from_worker(Command::Heartbeat(Utc::now()), metadata),
        );

        let resp = transport.receive().unwrap();
        assert_eq!(resp.cmd.kind(), CommandKind::Ack);
        assert!(state.worker(&WorkerId::new("0")).unwrap().last_heartbeat.is_none());
    }

    #[test]
    fn stopping_pool_responds_stop() {
        let (mut state, transport) = state_with_worker("0");
        state.status = PoolStatus::Stopping;
        let config = PoolConfig::new("p");
        let metadata = WorkerMetadata::new(WorkerId::new("0"), "test".into());

        handle_request(
            &mut state,
            &config,
            Message::from_worker(Command::Heartbeat(Utc::now()), metadata),
        );

        let resp = transport.receive().unwrap();
        assert_eq!(resp.cmd.kind(), CommandKind::Stop);
    }

    #[test]
    fn setup_failed_decommissions_worker() {
        let (mut state, transport) = state_with_worker("0");
        state.worker_mut(&WorkerId::new("0")).unwrap().assigned.insert("t1".into());
        let config = PoolConfig::new("p");
        let metadata = WorkerMetadata::new(WorkerId::new("0"), "test".into());

        handle_request(
            &mut state,
            &config,
            Message::from_worker(Command::SetupFailed("boom".into()), metadata),
        );

        let resp = transport.receive().unwrap();
        assert_eq!(resp.cmd.kind(), CommandKind::Ack);
        assert!(!state.worker(&WorkerId::new("0")).unwrap().active);
        assert!(state.unassigned.contains(&"t1".to_string()));
    }
}
