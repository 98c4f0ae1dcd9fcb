use std::path::PathBuf;

/// Errors that can occur while setting up kernel transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create a socket of the given type.
    #[error("failed to create {kind} socket: {source}")]
    Socket {
        kind: &'static str,
        source: zmq::Error,
    },

    /// Failed to bind to the specified endpoint.
    #[error("failed to bind to {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: zmq::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: zmq::Error,
    },

    /// Every random port tried during negotiation was taken.
    #[error("no free port on {transport}://{ip} after {attempts} attempts")]
    PortsExhausted {
        transport: String,
        ip: String,
        attempts: usize,
    },

    /// The endpoint string does not follow the `transport://ip:port` convention.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A socket option or query failed.
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    /// The connection file could not be read or written.
    #[error("connection file {path}: {source}")]
    ConnectionFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The connection file is not valid JSON for the expected shape.
    #[error("invalid connection info: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
