/// Errors that can occur while signing, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The `<IDS|MSG>` delimiter frame is absent.
    #[error("delimiter frame <IDS|MSG> not present")]
    MissingDelimiter,

    /// Fewer frames than the signature plus four JSON frames follow the delimiter.
    #[error("incomplete message: expected at least {expected} frames after delimiter, got {actual}")]
    Incomplete { expected: usize, actual: usize },

    /// The signature does not match the signed frames.
    #[error("message signature mismatch")]
    SignatureMismatch,

    /// The requested signature scheme is not in the supported set.
    #[error("unsupported signature scheme: {0:?}")]
    UnsupportedScheme(String),

    /// A JSON frame is not valid UTF-8 under the strict policy.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A JSON frame failed to parse or serialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A debug adapter header block is malformed.
    #[error("invalid debug adapter header: {0}")]
    InvalidHeader(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
