//! Request/response bridge over the supervised worker.
//!
//! Data flow:
//! ```text
//! caller → Bridge::send → actor → framed JSON → worker stdin
//! worker stdout → line reader → actor → accumulate text → resolve caller
//! ```
//!
//! A single actor task processes every event — caller sends, stdout lines,
//! worker exits, restart timers, request timeouts — one at a time, so the
//! pending queue and the supervisor state are never touched concurrently.

mod pending;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use tether_core::config::Config;
use tether_core::wire::{self, WorkerEvent};

use crate::supervisor::{RestartPolicy, SpawnConfig, Supervisor};

use pending::{PendingRequest, RequestQueue};

/// Errors surfaced to `send` callers.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No worker process is attached; the caller must not block.
    #[error("no worker process attached")]
    NotReady,

    /// No terminal event arrived within the request timeout.
    #[error("no reply from worker within {secs}s")]
    Timeout { secs: u64 },

    /// The bridge shut down while the request was outstanding.
    #[error("bridge is shut down")]
    Closed,
}

/// A resolved worker reply.
///
/// `is_error` is the worker's own error flag, passed through without
/// interpretation; the text is delivered either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub is_error: bool,
}

/// Liveness snapshot for external health checks.
#[derive(Debug, Clone, Copy)]
pub struct HealthStatus {
    pub attached: bool,
}

/// Everything needed to start a bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub spawn: SpawnConfig,
    pub request_timeout: Duration,
    pub terminate_timeout: Duration,
    pub restart: RestartPolicy,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            spawn: SpawnConfig::default(),
            request_timeout: Duration::from_secs(180),
            terminate_timeout: Duration::from_secs(5),
            restart: RestartPolicy::default(),
        }
    }
}

impl BridgeOptions {
    /// Build options from a resolved configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            spawn: SpawnConfig {
                worker_bin: config.worker.worker_bin.clone(),
                working_directory: config.worker.working_directory.clone(),
                model: config.worker.model.clone(),
            },
            request_timeout: Duration::from_secs(config.bridge.request_timeout_secs),
            terminate_timeout: Duration::from_secs(config.bridge.terminate_timeout_secs),
            restart: RestartPolicy {
                initial_delay: Duration::from_secs(config.bridge.restart_initial_delay_secs),
                max_delay: Duration::from_secs(config.bridge.restart_max_delay_secs),
                ..RestartPolicy::default()
            },
        }
    }
}

/// Events processed by the bridge actor, one at a time.
pub(crate) enum Event {
    /// A caller wants a reply for a prompt.
    Send {
        prompt: String,
        reply: oneshot::Sender<Result<Reply, BridgeError>>,
    },
    /// One line observed on the worker's stdout.
    StdoutLine { generation: u64, line: String },
    /// The worker process exited, for any reason.
    WorkerExited { generation: u64, code: Option<i32> },
    /// A scheduled restart delay elapsed.
    RestartDue { generation: u64 },
    /// A request's timeout elapsed.
    RequestTimedOut { request_id: u64 },
    /// Stop the worker and fail outstanding requests.
    Shutdown { done: oneshot::Sender<()> },
}

/// Handle to a running bridge.
#[derive(Clone)]
pub struct Bridge {
    event_tx: mpsc::Sender<Event>,
    attached_rx: watch::Receiver<bool>,
}

impl Bridge {
    /// Start the bridge: spawns the actor task, which immediately launches
    /// the worker and keeps it alive from then on.
    pub fn start(options: BridgeOptions) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (attached_tx, attached_rx) = watch::channel(false);

        let supervisor = Supervisor::new(
            options.spawn,
            options.restart,
            options.terminate_timeout,
            event_tx.clone(),
            attached_tx,
        );
        let actor = BridgeActor {
            supervisor,
            queue: RequestQueue::new(),
            event_rx,
            event_tx: event_tx.clone(),
            request_timeout: options.request_timeout,
        };
        tokio::spawn(actor.run());

        Self {
            event_tx,
            attached_rx,
        }
    }

    /// Send a prompt and await the full text reply.
    ///
    /// Fails immediately with `NotReady` when no worker is attached;
    /// otherwise the request is serialized FIFO behind any outstanding
    /// requests and resolves on the worker's terminal event or its own
    /// timeout, whichever comes first.
    pub async fn send(&self, prompt: &str) -> Result<Reply, BridgeError> {
        if !*self.attached_rx.borrow() {
            return Err(BridgeError::NotReady);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.event_tx
            .send(Event::Send {
                prompt: prompt.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::Closed)?;

        reply_rx.await.map_err(|_| BridgeError::Closed)?
    }

    /// Liveness for external health checks.
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            attached: *self.attached_rx.borrow(),
        }
    }

    /// Wait until a worker is attached, up to `timeout`.
    pub async fn wait_attached(&self, timeout: Duration) -> bool {
        let mut attached_rx = self.attached_rx.clone();
        tokio::time::timeout(timeout, attached_rx.wait_for(|attached| *attached))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Stop the worker and fail outstanding requests with `Closed`.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .event_tx
            .send(Event::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

/// The serialized event-processing context.
struct BridgeActor {
    supervisor: Supervisor,
    queue: RequestQueue,
    event_rx: mpsc::Receiver<Event>,
    /// Clone handed to timer tasks so timeouts re-enter the actor.
    event_tx: mpsc::Sender<Event>,
    request_timeout: Duration,
}

impl BridgeActor {
    async fn run(mut self) {
        self.supervisor.start();
        self.event_loop().await;
    }

    async fn event_loop(mut self) {
        while let Some(event) = self.event_rx.recv().await {
            if self.handle_event(event).await {
                break;
            }
        }
    }

    /// Process one event. Returns `true` on shutdown.
    async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Send { prompt, reply } => {
                self.handle_send(prompt, reply).await;
            }
            Event::StdoutLine { generation, line } => {
                self.handle_stdout_line(generation, &line).await;
            }
            Event::WorkerExited { generation, code } => {
                // The pending request, if any, is deliberately left in
                // place: a crash never resolves a caller, only its own
                // timeout does.
                self.supervisor.on_exit(generation, code);
            }
            Event::RestartDue { generation } => {
                self.supervisor.on_restart_due(generation);
                if self.supervisor.attached() {
                    self.dispatch_front().await;
                }
            }
            Event::RequestTimedOut { request_id } => {
                self.handle_timeout(request_id).await;
            }
            Event::Shutdown { done } => {
                self.handle_shutdown().await;
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    async fn handle_send(
        &mut self,
        prompt: String,
        reply: oneshot::Sender<Result<Reply, BridgeError>>,
    ) {
        if !self.supervisor.attached() {
            let _ = reply.send(Err(BridgeError::NotReady));
            return;
        }

        let id = self.queue.next_id();

        // Timeout measured from send time, also for queued requests, so
        // nobody waits unboundedly behind a stuck front request.
        let event_tx = self.event_tx.clone();
        let timeout = self.request_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = event_tx.send(Event::RequestTimedOut { request_id: id }).await;
        })
        .abort_handle();

        self.queue.push(PendingRequest {
            id,
            prompt,
            buffer: String::new(),
            reply,
            timer,
            dispatched: false,
        });
        debug!(request_id = id, queued = self.queue.len(), "accepted request");

        self.dispatch_front().await;
    }

    async fn handle_stdout_line(&mut self, generation: u64, line: &str) {
        if !self.supervisor.is_current(generation) {
            debug!(generation, "dropping stdout line from stale worker");
            return;
        }
        // Any output is evidence of liveness, not just successful replies.
        self.supervisor.note_output();

        match wire::parse_line(line) {
            None => debug!("discarding non-JSON worker output"),
            Some(WorkerEvent::Ignored { msg_type }) => {
                trace!(msg_type, "ignoring worker event");
            }
            Some(WorkerEvent::Assistant(assistant)) => match self.queue.front_mut() {
                Some(front) if front.dispatched => {
                    for text in assistant.text_blocks {
                        front.buffer.push_str(&text);
                    }
                }
                _ => debug!("assistant event with no dispatched request"),
            },
            Some(WorkerEvent::Result(result)) => {
                if self.queue.front_mut().is_none_or(|f| !f.dispatched) {
                    debug!("terminal event with no dispatched request");
                    return;
                }
                if let Some(mut front) = self.queue.pop_front() {
                    let text = if front.buffer.is_empty() {
                        result.result.unwrap_or_default()
                    } else {
                        std::mem::take(&mut front.buffer)
                    };
                    debug!(
                        request_id = front.id,
                        chars = text.len(),
                        is_error = result.is_error,
                        "request resolved"
                    );
                    front.resolve(Ok(Reply {
                        text,
                        is_error: result.is_error,
                    }));
                }
                self.dispatch_front().await;
            }
        }
    }

    async fn handle_timeout(&mut self, request_id: u64) {
        // A late timer for an already-resolved request finds nothing here.
        let Some(request) = self.queue.remove(request_id) else {
            return;
        };
        let secs = self.request_timeout.as_secs();
        warn!(request_id, secs, "request timed out");
        request.resolve(Err(BridgeError::Timeout { secs }));

        self.dispatch_front().await;
    }

    async fn handle_shutdown(&mut self) {
        info!(pending = self.queue.len(), "bridge shutting down");
        for request in self.queue.drain() {
            request.resolve(Err(BridgeError::Closed));
        }
        self.supervisor.shutdown().await;
    }

    /// Write the front request to the worker, if there is one, it has not
    /// been written yet, and a worker is attached. A detached front is held
    /// (its timeout still armed) until the supervisor re-attaches.
    async fn dispatch_front(&mut self) {
        let Some(stdin) = self.supervisor.stdin() else {
            return;
        };
        let Some(front) = self.queue.front_mut() else {
            return;
        };
        if front.dispatched {
            return;
        }

        let frame = wire::frame_user_message(&front.prompt);
        if stdin.send(frame).await.is_ok() {
            front.dispatched = true;
            debug!(request_id = front.id, "dispatched request to worker");
        } else {
            warn!(
                request_id = front.id,
                "worker stdin closed, holding request until restart"
            );
        }
    }
}
