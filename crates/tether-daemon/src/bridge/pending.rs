//! FIFO queue of pending requests awaiting worker replies.
//!
//! The wire protocol carries no request ids, so replies can only be paired
//! with requests by serializing them: exactly one request (the queue front)
//! is ever written to the worker, and the next terminal event on stdout
//! belongs to it. Later callers wait in enqueue order.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::{BridgeError, Reply};

/// One outstanding caller request.
pub(crate) struct PendingRequest {
    pub id: u64,
    /// Prompt text, kept until the request is dispatched to the worker.
    pub prompt: String,
    /// Accumulated reply text, append-only in stream order.
    pub buffer: String,
    /// Single-fire completion signal back to the caller.
    pub reply: oneshot::Sender<Result<Reply, BridgeError>>,
    /// Timeout timer, armed at send time; aborted on any other exit path.
    pub timer: AbortHandle,
    /// Whether the prompt has been written to the worker's stdin.
    pub dispatched: bool,
}

impl PendingRequest {
    /// Fulfill the completion signal and release the timer.
    pub fn resolve(self, result: Result<Reply, BridgeError>) {
        self.timer.abort();
        let _ = self.reply.send(result);
    }
}

/// FIFO queue of pending requests with monotonically increasing ids.
pub(crate) struct RequestQueue {
    next_id: u64,
    entries: VecDeque<PendingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: VecDeque::new(),
        }
    }

    /// Allocate the id for the next request.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn push(&mut self, request: PendingRequest) {
        self.entries.push_back(request);
    }

    pub fn front_mut(&mut self) -> Option<&mut PendingRequest> {
        self.entries.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<PendingRequest> {
        self.entries.pop_front()
    }

    /// Remove a request by id, wherever it sits in the queue.
    pub fn remove(&mut self, id: u64) -> Option<PendingRequest> {
        let pos = self.entries.iter().position(|r| r.id == id)?;
        self.entries.remove(pos)
    }

    /// Drain all entries, front first.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.entries.drain(..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
