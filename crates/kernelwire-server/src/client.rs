use std::time::{Duration, Instant};

use kernelwire_frame::{
    new_id, Authentication, Channel, Header, Message, MessageBody, PubMessage, Serializer,
};
use kernelwire_transport::{connect, new_socket, ConnectionInfo, PortKind, SocketOptions};
use serde_json::{json, Value};
use tracing::debug;
use zmq::{Context, Socket};

use crate::error::{Result, ServerError};

/// Longest wait for the iopub echo of one readiness probe.
const READY_PROBE: Duration = Duration::from_millis(500);

/// Blocking client for a running kernel.
///
/// Shell, control and stdin share one routing identity so that input
/// requests reach the client that sent the execute request.
pub struct KernelClient {
    serializer: Serializer,
    session: String,
    username: String,
    shell: Socket,
    control: Socket,
    stdin: Socket,
    iopub: Socket,
    heartbeat: Socket,
    _context: Context,
}

impl KernelClient {
    /// Connect to every channel described by `info`.
    pub fn connect(info: &ConnectionInfo) -> Result<Self> {
        let auth = Authentication::new(&info.signature_scheme, info.key.as_bytes())?;
        let context = Context::new();
        let options = SocketOptions {
            linger_ms: 0,
            ..SocketOptions::default()
        };
        let session = new_id();

        let open = |kind: zmq::SocketType, port: PortKind| -> Result<Socket> {
            let socket = new_socket(&context, kind, &options)?;
            if kind == zmq::DEALER {
                socket.set_identity(session.as_bytes())?;
            }
            if kind == zmq::SUB {
                socket.set_subscribe(b"")?;
            }
            if kind == zmq::REQ {
                socket.set_req_relaxed(true)?;
                socket.set_req_correlate(true)?;
            }
            connect(&socket, &info.endpoint(port))?;
            Ok(socket)
        };

        let shell = open(zmq::DEALER, PortKind::Shell)?;
        let control = open(zmq::DEALER, PortKind::Control)?;
        let stdin = open(zmq::DEALER, PortKind::Stdin)?;
        let iopub = open(zmq::SUB, PortKind::Iopub)?;
        let heartbeat = open(zmq::REQ, PortKind::Heartbeat)?;
        debug!(session = %session, "kernel client connected");

        Ok(Self {
            serializer: Serializer::new(auth),
            session,
            username: "kernelwire-client".to_string(),
            shell,
            control,
            stdin,
            iopub,
            heartbeat,
            _context: context,
        })
    }

    /// Session id stamped on every request.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Send a request on shell or control. Returns the request header, which
    /// replies and broadcasts carry as their parent.
    pub fn request(&self, channel: Channel, msg_type: &str, content: Value) -> Result<Header> {
        let header = Header::new(msg_type, self.session.as_str(), self.username.as_str());
        let message = Message::new(
            Vec::new(),
            MessageBody::new(header.clone(), None, json!({}), content),
        );
        let frames = self.serializer.serialize(&message)?;
        self.addressed(channel).send_multipart(frames, 0)?;
        Ok(header)
    }

    /// Send `kernel_info_request` until it is answered on shell and its
    /// status broadcasts arrive on iopub, which proves the subscription is
    /// live. Returns the `kernel_info_reply`.
    pub fn wait_for_ready(&self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServerError::Timeout(timeout));
            }
            let request = self.request(Channel::Shell, "kernel_info_request", json!({}))?;
            let reply = self.recv_reply(Channel::Shell, &request, remaining)?;

            let probe_deadline = Instant::now() + remaining.min(READY_PROBE);
            loop {
                let left = probe_deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                match self.recv_iopub(left) {
                    Ok(broadcast) if is_child_of(broadcast.body.parent_header.as_ref(), &request) => {
                        return Ok(reply);
                    }
                    Ok(_) | Err(ServerError::Timeout(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            debug!("iopub not subscribed yet; probing again");
        }
    }

    /// Receive the next message on shell or control.
    pub fn recv(&self, channel: Channel, timeout: Duration) -> Result<Message> {
        let frames = recv_frames(self.addressed(channel), timeout)?;
        Ok(self.serializer.deserialize(frames)?)
    }

    /// Receive the reply whose parent is `parent`, skipping anything else.
    pub fn recv_reply(&self, channel: Channel, parent: &Header, timeout: Duration) -> Result<Message> {
        loop {
            let message = self.recv(channel, timeout)?;
            if is_child_of(message.body.parent_header.as_ref(), parent) {
                return Ok(message);
            }
            debug!(msg_type = message.msg_type(), "skipping unrelated reply");
        }
    }

    /// Receive the next iopub broadcast.
    pub fn recv_iopub(&self, timeout: Duration) -> Result<PubMessage> {
        let frames = recv_frames(&self.iopub, timeout)?;
        Ok(self.serializer.deserialize_pub(frames)?)
    }

    /// Receive the next input request on stdin.
    pub fn recv_stdin(&self, timeout: Duration) -> Result<Message> {
        let frames = recv_frames(&self.stdin, timeout)?;
        Ok(self.serializer.deserialize(frames)?)
    }

    /// Answer an input request.
    pub fn input_reply(&self, parent: &Header, value: &str) -> Result<()> {
        let header = Header::new("input_reply", self.session.as_str(), self.username.as_str());
        let message = Message::new(
            Vec::new(),
            MessageBody::new(header, Some(parent.clone()), json!({}), json!({ "value": value })),
        );
        let frames = self.serializer.serialize(&message)?;
        self.stdin.send_multipart(frames, 0)?;
        Ok(())
    }

    /// Send one heartbeat and report whether it came back in time.
    pub fn heartbeat(&self, timeout: Duration) -> Result<bool> {
        let ping = new_id();
        self.heartbeat.send(ping.as_bytes(), 0)?;
        match recv_frames(&self.heartbeat, timeout) {
            Ok(frames) => Ok(frames.first().map(Vec::as_slice) == Some(ping.as_bytes())),
            Err(ServerError::Timeout(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn addressed(&self, channel: Channel) -> &Socket {
        match channel {
            Channel::Shell => &self.shell,
            Channel::Control => &self.control,
        }
    }
}

/// Whether `parent` (a message's parent header) refers to `request`.
pub fn is_child_of(parent: Option<&Header>, request: &Header) -> bool {
    parent.is_some_and(|parent| parent.msg_id == request.msg_id)
}

fn recv_frames(socket: &Socket, timeout: Duration) -> Result<Vec<Vec<u8>>> {
    let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    if socket.poll(zmq::POLLIN, timeout_ms)? == 0 {
        return Err(ServerError::Timeout(timeout));
    }
    Ok(socket.recv_multipart(0)?)
}
