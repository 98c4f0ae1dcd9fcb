/// Errors that can occur while serving or talking to kernel channels.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] kernelwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] kernelwire_frame::FrameError),

    /// Raw socket error.
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    /// The server is stopping or a peer went away.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A channel thread panicked before acknowledging shutdown.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread spawn failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
