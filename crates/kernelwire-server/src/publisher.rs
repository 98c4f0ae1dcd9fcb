//! iopub forwarder.
//!
//! Every origin channel pushes serialized broadcasts to the relay; this
//! thread owns the only PUB socket and forwards them in arrival order.

use serde_json::json;
use tracing::{info, warn};
use zmq::Socket;

use crate::control::{ack_stop, serve_controller, ControllerEvent};
use crate::error::Result;

const POLL_MS: i64 = 100;

pub(crate) fn run(relay: Socket, publisher: Socket, controller: Socket) -> Result<()> {
    info!("publisher started");
    loop {
        let (relay_ready, controller_ready) = {
            let mut items = [
                relay.as_poll_item(zmq::POLLIN),
                controller.as_poll_item(zmq::POLLIN),
            ];
            match zmq::poll(&mut items, POLL_MS) {
                Ok(_) => (items[0].is_readable(), items[1].is_readable()),
                Err(zmq::Error::EINTR) => (false, false),
                Err(err) => return Err(err.into()),
            }
        };

        if relay_ready {
            forward(&relay, &publisher);
        }

        if controller_ready {
            let event = serve_controller(&controller, |_| {
                json!({ "status": "error", "what": "publisher does not answer internal requests" })
            })?;
            if event == ControllerEvent::Stop {
                forward(&relay, &publisher);
                ack_stop(&controller)?;
                info!("publisher stopped");
                return Ok(());
            }
        }
    }
}

fn forward(relay: &Socket, publisher: &Socket) {
    loop {
        let frames = match relay.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => return,
            Err(err) => {
                warn!(error = %err, "relay read failed");
                return;
            }
        };
        if let Err(err) = publisher.send_multipart(frames, 0) {
            warn!(error = %err, "broadcast not sent");
        }
    }
}
