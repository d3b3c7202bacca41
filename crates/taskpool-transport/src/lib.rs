//! The abstract transport contract plus `InProcessTransport`, the
//! reference implementation. Remote/IPC transports are out of scope for
//! this core — they only need to satisfy [`Transport`] with the same
//! per-worker response ordering guarantee the in-process implementation
//! provides.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use taskpool_protocol::{CommandKind, Message};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport send failed: {0}")]
    SendFailed(String),
    #[error("expected {expected} response but received none")]
    NoMessage { expected: CommandKind },
    #[error("expected {expected} response but received {got}")]
    UnexpectedResponse {
        expected: CommandKind,
        got: CommandKind,
    },
}

/// Bidirectional duplex channel bound to a single worker.
///
/// `send`/`receive` are the worker-facing half; `accept`/`respond` are the
/// pool-facing half. Implementations must guarantee that, within one
/// worker, responses are delivered to `receive()` in the order the pool
/// called `respond()`.
pub trait Transport: Send + Sync {
    /// Worker-side outbound, non-blocking enqueue.
    fn send(&self, msg: Message) -> Result<(), TransportError>;

    /// Worker-side inbound; blocks until a response is available or the
    /// transport becomes inactive, in which case it returns `None`
    /// promptly.
    fn receive(&self) -> Option<Message>;

    /// Pool-side inbound, non-blocking.
    fn accept(&self) -> Option<Message>;

    /// Pool-side outbound, non-blocking.
    fn respond(&self, msg: Message) -> Result<(), TransportError>;

    /// `true` until [`Transport::deactivate`] is called.
    fn is_active(&self) -> bool;

    /// Unblocks any in-flight `receive()` promptly and makes all future
    /// `send_and_receive` calls short-circuit to `Ok(None)`.
    fn deactivate(&self);

    /// Send `msg` and block for the response, optionally asserting its
    /// command kind. Returns `Ok(None)` without sending if the transport
    /// was already inactive.
    fn send_and_receive(
        &self,
        msg: Message,
        expect: Option<CommandKind>,
    ) -> Result<Option<Message>, TransportError> {
        if !self.is_active() {
            return Ok(None);
        }
        self.send(msg)?;
        let received = self.receive();
        if self.is_active() {
            if let Some(expected) = expect {
                match &received {
                    None => return Err(TransportError::NoMessage { expected }),
                    Some(m) if m.cmd.kind() != expected => {
                        return Err(TransportError::UnexpectedResponse {
                            expected,
                            got: m.cmd.kind(),
                        })
                    }
                    _ => {}
                }
            }
        }
        Ok(received)
    }
}

/// Reference transport: two unbounded channels (requests, responses),
/// polled at `poll_interval` (default 50ms, matching the original's
/// `Transport(recv_sleep=0.05)`).
pub struct InProcessTransport {
    request_tx: Sender<Message>,
    request_rx: Receiver<Message>,
    response_tx: Sender<Message>,
    response_rx: Receiver<Message>,
    active: AtomicBool,
    poll_interval: Duration,
}

impl std::fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("active", &self.is_active())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl InProcessTransport {
    pub fn new(poll_interval: Duration) -> Self {
        let (request_tx, request_rx) = channel::unbounded();
        let (response_tx, response_rx) = channel::unbounded();
        Self {
            request_tx,
            request_rx,
            response_tx,
            response_rx,
            active: AtomicBool::new(true),
            poll_interval,
        }
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Transport for InProcessTransport {
    fn send(&self, msg: Message) -> Result<(), TransportError> {
        trace!(cmd = ?msg.cmd.kind(), "transport send");
        self.request_tx
            .send(msg)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn receive(&self) -> Option<Message> {
        while self.is_active() {
            match self.response_rx.recv_timeout(self.poll_interval) {
                Ok(msg) => return Some(msg),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }

    fn accept(&self) -> Option<Message> {
        self.request_rx.try_recv().ok()
    }

    fn respond(&self, msg: Message) -> Result<(), TransportError> {
        trace!(cmd = ?msg.cmd.kind(), "transport respond");
        self.response_tx
            .send(msg)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
