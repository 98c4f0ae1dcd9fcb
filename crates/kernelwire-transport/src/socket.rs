use rand::Rng;
use tracing::{debug, info};
use zmq::{Context, Socket, SocketType};

use crate::endpoint::{endpoint, parse_port};
use crate::error::{Result, TransportError};

/// Linger applied to every kernel socket, in milliseconds.
pub const DEFAULT_LINGER_MS: i32 = 1000;

/// Lowest port tried during ephemeral port negotiation.
pub const EPHEMERAL_PORT_MIN: u16 = 49152;

/// Highest port tried during ephemeral port negotiation (inclusive).
pub const EPHEMERAL_PORT_MAX: u16 = 65535;

/// Random bind attempts before negotiation gives up.
pub const DEFAULT_BIND_ATTEMPTS: usize = 100;

/// Socket setup policy shared by all channels.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Linger in milliseconds (`-1` waits forever, `0` drops pending frames).
    pub linger_ms: i32,
    /// Upper bound on random-port bind attempts.
    pub bind_attempts: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            linger_ms: DEFAULT_LINGER_MS,
            bind_attempts: DEFAULT_BIND_ATTEMPTS,
        }
    }
}

/// Create a socket of `kind` with the configured linger.
pub fn new_socket(context: &Context, kind: SocketType, options: &SocketOptions) -> Result<Socket> {
    let socket = context
        .socket(kind)
        .map_err(|source| TransportError::Socket {
            kind: kind_name(kind),
            source,
        })?;
    socket.set_linger(options.linger_ms)?;
    Ok(socket)
}

/// Bind to an explicit endpoint.
pub fn bind(socket: &Socket, endpoint: &str) -> Result<()> {
    socket.bind(endpoint).map_err(|source| TransportError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })?;
    debug!(endpoint, "bound socket");
    Ok(())
}

/// Connect to an explicit endpoint.
pub fn connect(socket: &Socket, endpoint: &str) -> Result<()> {
    socket
        .connect(endpoint)
        .map_err(|source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
    debug!(endpoint, "connected socket");
    Ok(())
}

/// Bind a channel socket and return the port it ended up on.
///
/// A `port` of 0 triggers ephemeral port negotiation.
pub fn bind_channel(
    socket: &Socket,
    transport: &str,
    ip: &str,
    port: u16,
    options: &SocketOptions,
) -> Result<u16> {
    if port == 0 {
        return bind_random_port(socket, transport, ip, options.bind_attempts);
    }
    let target = endpoint(transport, ip, port);
    bind(socket, &target)?;
    info!(endpoint = %target, "listening");
    Ok(port)
}

/// Bind to a random port in the ephemeral range.
///
/// Only "address in use" style failures are retried; any other bind error is
/// returned immediately.
pub fn bind_random_port(socket: &Socket, transport: &str, ip: &str, attempts: usize) -> Result<u16> {
    let mut rng = rand::thread_rng();
    for _ in 0..attempts {
        let port = rng.gen_range(EPHEMERAL_PORT_MIN..=EPHEMERAL_PORT_MAX);
        let target = endpoint(transport, ip, port);
        match socket.bind(&target) {
            Ok(()) => {
                info!(endpoint = %target, "listening on negotiated port");
                return Ok(port);
            }
            Err(zmq::Error::EADDRINUSE) | Err(zmq::Error::EACCES) => {
                debug!(endpoint = %target, "port taken, retrying");
            }
            Err(source) => {
                return Err(TransportError::Bind {
                    endpoint: target,
                    source,
                })
            }
        }
    }
    Err(TransportError::PortsExhausted {
        transport: transport.to_string(),
        ip: ip.to_string(),
        attempts,
    })
}

/// The endpoint a socket was most recently bound or connected to.
pub fn last_endpoint(socket: &Socket) -> Result<String> {
    match socket.get_last_endpoint()? {
        Ok(endpoint) => Ok(endpoint),
        Err(raw) => Err(TransportError::InvalidEndpoint(
            String::from_utf8_lossy(&raw).into_owned(),
        )),
    }
}

/// The port of the socket's last endpoint.
pub fn bound_port(socket: &Socket) -> Result<u16> {
    parse_port(&last_endpoint(socket)?)
}

/// Version of the linked libzmq as (major, minor, patch).
pub fn zmq_version() -> (i32, i32, i32) {
    zmq::version()
}

fn kind_name(kind: SocketType) -> &'static str {
    match kind {
        SocketType::PAIR => "PAIR",
        SocketType::PUB => "PUB",
        SocketType::SUB => "SUB",
        SocketType::REQ => "REQ",
        SocketType::REP => "REP",
        SocketType::DEALER => "DEALER",
        SocketType::ROUTER => "ROUTER",
        SocketType::PULL => "PULL",
        SocketType::PUSH => "PUSH",
        _ => "zmq",
    }
}
