/// Errors raised by the kernel core and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Sending through the kernel server failed.
    #[error("server error: {0}")]
    Server(#[from] kernelwire_server::ServerError),

    /// Connection file or socket setup failed.
    #[error("transport error: {0}")]
    Transport(#[from] kernelwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] kernelwire_frame::FrameError),

    /// Request content did not match its expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A comm message named an id that is not registered.
    #[error("unknown comm id: {0}")]
    UnknownComm(String),

    /// No comm target is registered under this name.
    #[error("unknown comm target: {0}")]
    UnknownTarget(String),

    /// Input could not be requested from the client.
    #[error("stdin error: {0}")]
    Stdin(String),

    /// The debug adapter misbehaved or could not be reached.
    #[error("debugger error: {0}")]
    Debugger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;
