//! Requests exchanged with inproc channel controllers.
//!
//! Every worker loop owns a REP socket at `inproc://<name>_controller`. The
//! messenger talks to it with a REQ socket: either the literal frame `stop`,
//! which the worker acknowledges by echoing it back before returning, or a
//! JSON document that the shell loop answers through the dispatcher.

use serde_json::{json, Value};
use tracing::warn;
use zmq::Socket;

use crate::error::Result;

/// Controller request frame: stop the worker.
pub const CONTROLLER_STOP: &str = "stop";

/// A request received on a controller socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerRequest {
    Stop,
    Internal(Value),
}

impl ControllerRequest {
    /// Encode as a single frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            ControllerRequest::Stop => Ok(CONTROLLER_STOP.as_bytes().to_vec()),
            ControllerRequest::Internal(value) => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode a single frame.
    ///
    /// A JSON string `"stop"` carries quotes, so it never collides with the
    /// bare stop frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame == CONTROLLER_STOP.as_bytes() {
            return Ok(ControllerRequest::Stop);
        }
        Ok(ControllerRequest::Internal(serde_json::from_slice(frame)?))
    }
}

/// What a worker should do after serving its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControllerEvent {
    /// Stop was requested; the caller must flush and then call [`ack_stop`].
    Stop,
    Served,
}

/// Read one controller request and answer it unless it is a stop.
pub(crate) fn serve_controller(
    socket: &Socket,
    internal: impl FnOnce(Value) -> Value,
) -> Result<ControllerEvent> {
    let frames = socket.recv_multipart(0)?;
    let first = frames.first().map(Vec::as_slice).unwrap_or_default();

    let reply = match ControllerRequest::decode(first) {
        Ok(ControllerRequest::Stop) => return Ok(ControllerEvent::Stop),
        Ok(ControllerRequest::Internal(request)) => internal(request),
        Err(err) => {
            warn!(error = %err, "malformed controller request");
            json!({ "status": "error", "what": format!("malformed internal request: {err}") })
        }
    };

    socket.send(serde_json::to_vec(&reply)?, 0)?;
    Ok(ControllerEvent::Served)
}

/// Acknowledge a stop request.
pub(crate) fn ack_stop(socket: &Socket) -> Result<()> {
    socket.send(CONTROLLER_STOP, 0)?;
    Ok(())
}
