use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use kernelwire_frame::{Channel, Message, Multipart, PubMessage, Serializer};
use serde_json::Value;
use tracing::{debug, info, warn};
use zmq::Socket;

use crate::dispatch::Dispatcher;
use crate::error::{Result, ServerError};
use crate::kernel_server::KernelServer;
use crate::messenger::ControlMessenger;
use crate::server::Topology;

const STDIN_POLL_MS: i64 = 100;

/// Thread-safe sending side of a [`ZmqServer`](crate::ZmqServer).
///
/// Holds only connecting sockets (outboxes, relays, the stdin router) behind
/// mutexes. The shell and control routers stay with their loop threads.
pub struct ServerHandle {
    pub(crate) serializer: Serializer,
    pub(crate) topology: Topology,
    pub(crate) shell_outbox: Mutex<Socket>,
    pub(crate) control_outbox: Mutex<Socket>,
    pub(crate) shell_relay: Mutex<Socket>,
    pub(crate) control_relay: Mutex<Socket>,
    pub(crate) stdin: Mutex<Socket>,
    pub(crate) messenger: ControlMessenger,
    pub(crate) dispatcher: OnceLock<Weak<dyn Dispatcher>>,
    pub(crate) stopped: AtomicBool,
}

impl ServerHandle {
    /// Serializer shared by every channel.
    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    /// Topology the server was built with.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Messenger for worker controllers.
    pub fn messenger(&self) -> &ControlMessenger {
        &self.messenger
    }

    /// Whether [`KernelServer::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self, dispatcher: &Arc<dyn Dispatcher>) {
        if self.dispatcher.set(Arc::downgrade(dispatcher)).is_err() {
            warn!("dispatcher already attached; keeping the first one");
        }
    }

    fn push(socket: &Mutex<Socket>, frames: Multipart) -> Result<()> {
        let socket = socket.lock().unwrap_or_else(PoisonError::into_inner);
        socket.send_multipart(frames, 0)?;
        Ok(())
    }

    /// An empty single frame on an outbox only wakes its loop.
    fn wake(socket: &Mutex<Socket>) {
        let socket = socket.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = socket.send(Vec::<u8>::new(), zmq::DONTWAIT) {
            debug!(error = %err, "wake frame not delivered");
        }
    }
}

impl KernelServer for ServerHandle {
    fn send_shell(&self, message: Message) -> Result<()> {
        let frames = self.serializer.serialize(&message)?;
        Self::push(&self.shell_outbox, frames)
    }

    fn send_control(&self, message: Message) -> Result<()> {
        let frames = self.serializer.serialize(&message)?;
        Self::push(&self.control_outbox, frames)
    }

    fn send_stdin(&self, message: Message) -> Result<Message> {
        let frames = self.serializer.serialize(&message)?;
        let socket = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        socket.send_multipart(frames, 0)?;

        loop {
            if socket.poll(zmq::POLLIN, STDIN_POLL_MS)? > 0 {
                let frames = socket.recv_multipart(0)?;
                return Ok(self.serializer.deserialize(frames)?);
            }
            if self.is_stopped() {
                return Err(ServerError::Disconnected(
                    "server stopped while waiting for input".to_string(),
                ));
            }
        }
    }

    fn publish(&self, message: PubMessage, channel: Channel) -> Result<()> {
        let frames = self.serializer.serialize_pub(&message)?;
        let relay = match channel {
            Channel::Shell => &self.shell_relay,
            Channel::Control => &self.control_relay,
        };
        Self::push(relay, frames)
    }

    fn send_to_shell(&self, request: &Value) -> Result<Value> {
        if self.topology != Topology::Shared {
            return self.messenger.send_to_shell(request);
        }
        // Shell and control share one thread: answer in place.
        let dispatcher = self
            .dispatcher
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| ServerError::Disconnected("no dispatcher attached".to_string()))?;
        Ok(dispatcher.internal_request(request.clone()))
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("kernel server stop requested");
        Self::wake(&self.shell_outbox);
        Self::wake(&self.control_outbox);
    }
}
