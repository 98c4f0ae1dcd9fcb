//! Rendezvous with worker threads over inproc REQ/REP.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use kernelwire_transport::{connect, controller_endpoint, new_socket, SocketOptions};
use serde_json::Value;
use tracing::{debug, info};
use zmq::{Context, Socket};

use crate::control::ControllerRequest;
use crate::error::{Result, ServerError};
use crate::server::Topology;

struct Controller {
    name: &'static str,
    socket: Mutex<Socket>,
}

/// Client side of every worker controller.
pub struct ControlMessenger {
    /// Present when shell runs its own loop with a controller.
    shell: Option<Controller>,
    /// Whether the shell controller belongs to a worker that must be stopped.
    stop_shell: bool,
    workers: Vec<Controller>,
    stop_timeout: Duration,
}

impl ControlMessenger {
    /// Connect REQ sockets to the controllers a topology binds.
    ///
    /// The REP side must already be bound in the same context.
    pub(crate) fn connect(
        context: &Context,
        topology: Topology,
        options: &SocketOptions,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let open = |name: &'static str| -> Result<Controller> {
            let socket = new_socket(context, zmq::REQ, options)?;
            // A timed-out request must not wedge the socket for the next one.
            socket.set_req_relaxed(true)?;
            socket.set_req_correlate(true)?;
            connect(&socket, &controller_endpoint(name))?;
            Ok(Controller {
                name,
                socket: Mutex::new(socket),
            })
        };

        let mut workers = Vec::new();
        let (shell, stop_shell) = match topology {
            Topology::Shared => (None, false),
            Topology::ControlMain => (Some(open("shell")?), true),
            Topology::ShellMain => {
                workers.push(open("control")?);
                (Some(open("shell")?), false)
            }
        };
        workers.push(open("publisher")?);
        workers.push(open("heartbeat")?);

        Ok(Self {
            shell,
            stop_shell,
            workers,
            stop_timeout,
        })
    }

    /// Send `request` to the shell thread and block for its answer.
    pub fn send_to_shell(&self, request: &Value) -> Result<Value> {
        let shell = self.shell.as_ref().ok_or_else(|| {
            ServerError::Disconnected("no shell controller in this topology".to_string())
        })?;
        let frame = ControllerRequest::Internal(request.clone()).encode()?;
        let reply = round_trip(shell, &frame, None)?;
        Ok(serde_json::from_slice(&reply)?)
    }

    /// Stop every worker thread, one after the other, waiting for each ack.
    ///
    /// All workers are asked even if one of them fails to answer; the first
    /// failure is returned.
    pub fn stop_channels(&self) -> Result<()> {
        let frame = ControllerRequest::Stop.encode()?;
        let shell = self.shell.as_ref().filter(|_| self.stop_shell);

        let mut first_error = None;
        for controller in shell.into_iter().chain(self.workers.iter()) {
            debug!(worker = controller.name, "stopping worker");
            if let Err(err) = round_trip(controller, &frame, Some(self.stop_timeout)) {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("all channel workers stopped");
                Ok(())
            }
        }
    }
}

fn round_trip(controller: &Controller, frame: &[u8], timeout: Option<Duration>) -> Result<Vec<u8>> {
    let socket = controller
        .socket
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    socket.send(frame, 0)?;

    let timeout_ms = timeout.map_or(-1, |t| i64::try_from(t.as_millis()).unwrap_or(i64::MAX));
    if socket.poll(zmq::POLLIN, timeout_ms)? == 0 {
        return Err(ServerError::Timeout(timeout.unwrap_or_default()));
    }
    Ok(socket.recv_bytes(0)?)
}
