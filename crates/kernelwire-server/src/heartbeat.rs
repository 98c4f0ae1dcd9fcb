//! Heartbeat echo. Frames are returned verbatim and never parsed.

use serde_json::json;
use tracing::{info, trace, warn};
use zmq::Socket;

use crate::control::{ack_stop, serve_controller, ControllerEvent};
use crate::error::Result;

const POLL_MS: i64 = 100;

pub(crate) fn run(heartbeat: Socket, controller: Socket) -> Result<()> {
    info!("heartbeat started");
    loop {
        let (beat_ready, controller_ready) = {
            let mut items = [
                heartbeat.as_poll_item(zmq::POLLIN),
                controller.as_poll_item(zmq::POLLIN),
            ];
            match zmq::poll(&mut items, POLL_MS) {
                Ok(_) => (items[0].is_readable(), items[1].is_readable()),
                Err(zmq::Error::EINTR) => (false, false),
                Err(err) => return Err(err.into()),
            }
        };

        if beat_ready {
            match heartbeat.recv_multipart(zmq::DONTWAIT) {
                Ok(frames) => {
                    trace!(frames = frames.len(), "heartbeat");
                    if let Err(err) = heartbeat.send_multipart(frames, 0) {
                        warn!(error = %err, "heartbeat echo failed");
                    }
                }
                Err(zmq::Error::EAGAIN) => {}
                Err(err) => warn!(error = %err, "heartbeat read failed"),
            }
        }

        if controller_ready {
            let event = serve_controller(&controller, |_| {
                json!({ "status": "error", "what": "heartbeat does not answer internal requests" })
            })?;
            if event == ControllerEvent::Stop {
                ack_stop(&controller)?;
                info!("heartbeat stopped");
                return Ok(());
            }
        }
    }
}
