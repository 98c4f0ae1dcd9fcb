use crate::error::{Result, TransportError};

/// Inproc endpoint where every channel thread pushes broadcast frames for the
/// publisher thread to relay onto the iopub socket.
pub const PUBLISHER_RELAY: &str = "inproc://publisher";

/// Build an external endpoint string.
///
/// TCP uses `tcp://ip:port`; every other transport (notably `ipc`) encodes the
/// port as a filename suffix: `ipc://ip-port`.
pub fn endpoint(transport: &str, ip: &str, port: u16) -> String {
    if transport == "tcp" {
        format!("{transport}://{ip}:{port}")
    } else {
        format!("{transport}://{ip}-{port}")
    }
}

/// Inproc endpoint of the controller socket owned by a worker thread.
pub fn controller_endpoint(name: &str) -> String {
    format!("inproc://{name}_controller")
}

/// Inproc endpoint of the outbox feeding a channel's router socket.
pub fn outbox_endpoint(name: &str) -> String {
    format!("inproc://{name}_outbox")
}

/// Extract the port from an endpoint produced by [`endpoint`] or reported by
/// a socket's last endpoint.
pub fn parse_port(endpoint: &str) -> Result<u16> {
    let (transport, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))?;

    let separator = if transport == "tcp" { ':' } else { '-' };
    let (_, port) = rest
        .rsplit_once(separator)
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))?;

    port.parse::<u16>()
        .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))
}
