//! Inbound seam between channel loops and the kernel core.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use kernelwire_frame::Message;
use serde_json::Value;

/// Work handed back to the shell loop once a deferred request finishes.
///
/// It runs on the loop thread with access to the queue of requests that
/// arrived while the request was in flight.
pub type Continuation = Box<dyn FnOnce(&mut dyn ShellQueue) + Send>;

/// The backlog of an addressed channel, as seen by a continuation.
pub trait ShellQueue {
    /// Drain every pending request, passing each to `handler`.
    ///
    /// Draining stops once no request has arrived for the abort poll interval.
    fn abort_queue(&mut self, handler: &mut dyn FnMut(Message));
}

/// Result of handing one request to the dispatcher.
pub enum Dispatch {
    /// The request is fully handled.
    Complete,
    /// The reply will be produced later; the loop holds further requests on
    /// this channel until the continuation has run.
    Deferred(Deferred),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Complete => f.write_str("Complete"),
            Dispatch::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Receiving half of a deferred request.
pub struct Deferred {
    rx: Receiver<Continuation>,
}

/// Sending half of a deferred request. Completing consumes it.
pub struct Completion {
    tx: Sender<Continuation>,
}

/// State of a deferred request when polled.
pub enum DeferredState {
    Ready(Continuation),
    Pending,
    /// The completion was dropped without running.
    Abandoned,
}

/// Create a linked completion/deferred pair.
pub fn deferred() -> (Completion, Deferred) {
    let (tx, rx) = mpsc::channel();
    (Completion { tx }, Deferred { rx })
}

impl Completion {
    /// Hand `continuation` to the owning loop.
    ///
    /// Returns false if the loop has already gone away.
    pub fn complete(self, continuation: impl FnOnce(&mut dyn ShellQueue) + Send + 'static) -> bool {
        self.tx.send(Box::new(continuation)).is_ok()
    }
}

impl Deferred {
    /// Non-blocking check for the continuation.
    pub fn poll(&self) -> DeferredState {
        match self.rx.try_recv() {
            Ok(continuation) => DeferredState::Ready(continuation),
            Err(TryRecvError::Empty) => DeferredState::Pending,
            Err(TryRecvError::Disconnected) => DeferredState::Abandoned,
        }
    }
}

/// Inbound listener set installed on a server at start.
pub trait Dispatcher: Send + Sync {
    /// Handle a request received on shell.
    fn dispatch_shell(&self, message: Message) -> Dispatch;

    /// Handle a request received on control.
    fn dispatch_control(&self, message: Message) -> Dispatch;

    /// Answer an internal JSON query forwarded to the shell thread.
    fn internal_request(&self, request: Value) -> Value;
}
