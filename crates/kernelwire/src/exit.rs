use std::fmt;
use std::io;

use kernelwire_core::KernelError;
use kernelwire_frame::FrameError;
use kernelwire_server::ServerError;
use kernelwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const KERNEL_ERROR: i32 = 10;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::ConnectionFile { path, source } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        TransportError::Json(_) | TransportError::InvalidEndpoint(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::UnsupportedScheme(_) => CliError::new(USAGE, format!("{context}: {err}")),
        FrameError::SignatureMismatch
        | FrameError::MissingDelimiter
        | FrameError::Incomplete { .. }
        | FrameError::InvalidUtf8(_)
        | FrameError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn server_error(context: &str, err: ServerError) -> CliError {
    match err {
        ServerError::Transport(err) => transport_error(context, err),
        ServerError::Frame(err) => frame_error(context, err),
        ServerError::Zmq(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        ServerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ServerError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ServerError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        ServerError::Io(source) => io_error(context, source),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn kernel_error(context: &str, err: KernelError) -> CliError {
    match err {
        KernelError::Server(err) => server_error(context, err),
        KernelError::Transport(err) => transport_error(context, err),
        KernelError::Frame(err) => frame_error(context, err),
        KernelError::Io(source) => io_error(context, source),
        KernelError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(KERNEL_ERROR, format!("{context}: {other}")),
    }
}
