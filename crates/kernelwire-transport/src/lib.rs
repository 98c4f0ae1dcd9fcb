//! ZeroMQ transport plumbing for Jupyter kernels.
//!
//! Covers the pieces every channel needs before any protocol message flows:
//! - Socket construction with a uniform linger policy
//! - The `transport://ip:port` endpoint convention (`ip-port` for non-tcp)
//! - Ephemeral port negotiation by bounded random bind attempts
//! - The connection file that tells clients where to find the kernel
//!
//! This is the lowest layer of kernelwire. Everything else builds on the
//! sockets handed out here.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod socket;

pub use config::{ConnectionInfo, PortKind};
pub use endpoint::{controller_endpoint, endpoint, outbox_endpoint, parse_port, PUBLISHER_RELAY};
pub use error::{Result, TransportError};
pub use socket::{
    bind, bind_channel, bind_random_port, bound_port, connect, last_endpoint, new_socket,
    zmq_version, SocketOptions, DEFAULT_BIND_ATTEMPTS, DEFAULT_LINGER_MS, EPHEMERAL_PORT_MAX,
    EPHEMERAL_PORT_MIN,
};
