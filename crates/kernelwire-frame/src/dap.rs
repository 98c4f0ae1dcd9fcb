//! `Content-Length` framing used by debug adapters.
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JSON>
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Separator between the header block and the payload.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Header blocks longer than this without a terminator are rejected.
pub const MAX_HEADER_LEN: usize = 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Encode one payload with its header block.
pub fn encode_dap(payload: &[u8], dst: &mut BytesMut) {
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    dst.reserve(header.len() + payload.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(payload);
}

/// Decode one payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the header block and payload from the buffer.
pub fn decode_dap(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    let Some(header_len) = find_terminator(src) else {
        if src.len() > MAX_HEADER_LEN {
            return Err(FrameError::InvalidHeader(format!(
                "no header terminator within {MAX_HEADER_LEN} bytes"
            )));
        }
        return Ok(None);
    };

    let payload_len = content_length(&src[..header_len])?;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = header_len + HEADER_TERMINATOR.len() + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(header_len + HEADER_TERMINATOR.len());
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for debug adapter framing.
#[derive(Debug, Clone)]
pub struct DapConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for DapConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn content_length(block: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(block)
        .map_err(|_| FrameError::InvalidHeader("header block is not utf-8".to_string()))?;

    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            return Err(FrameError::InvalidHeader(format!("malformed header line {line:?}")));
        };
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            return value.trim().parse::<usize>().map_err(|_| {
                FrameError::InvalidHeader(format!("bad Content-Length value {:?}", value.trim()))
            });
        }
    }
    Err(FrameError::InvalidHeader("missing Content-Length".to_string()))
}
