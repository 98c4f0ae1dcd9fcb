use std::io::{ErrorKind, Read};
use std::net::TcpStream;

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::dap::{decode_dap, DapConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete `Content-Length` framed messages from any `Read` stream.
///
/// Handles partial reads internally, so callers always get whole messages.
pub struct DapReader<T> {
    inner: T,
    buf: BytesMut,
    config: DapConfig,
}

impl<T: Read> DapReader<T> {
    /// Create a new reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, DapConfig::default())
    }

    /// Create a new reader with explicit configuration.
    pub fn with_config(inner: T, config: DapConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete payload (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_dap(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read the next payload and parse it as JSON.
    pub fn read_json(&mut self) -> Result<Value> {
        let payload = self.read_message()?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &DapConfig {
        &self.config
    }
}

impl DapReader<TcpStream> {
    /// Create a reader for a TCP stream and apply the read timeout from config.
    pub fn with_config_tcp(inner: TcpStream, config: DapConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::time::Duration;

    use bytes::BytesMut;

    use super::*;
    use crate::dap::encode_dap;

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_dap(payload, &mut buf);
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_message() {
        let mut reader = DapReader::new(Cursor::new(wire(&[b"{\"seq\":1}"])));
        let payload = reader.read_message().expect("message should be read");
        assert_eq!(payload.as_ref(), b"{\"seq\":1}");
    }

    #[test]
    fn read_json_parses_payload() {
        let mut reader = DapReader::new(Cursor::new(wire(&[br#"{"type":"event","event":"stopped"}"#])));
        let value = reader.read_json().expect("json should be read");
        assert_eq!(value["event"], "stopped");
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[b"{\"slow\":true}", b"{}"]),
            pos: 0,
        };
        let mut reader = DapReader::new(byte_reader);

        assert_eq!(
            reader.read_message().expect("first message").as_ref(),
            b"{\"slow\":true}"
        );
        assert_eq!(reader.read_message().expect("second message").as_ref(), b"{}");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = DapReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_message().expect_err("eof should fail");
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_message() {
        let mut reader = DapReader::new(Cursor::new(b"Content-Length: 20\r\n\r\n{\"x\"".to_vec()));
        let err = reader.read_message().expect_err("truncated message should fail");
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[b"{}"])),
        };
        let mut framed = DapReader::new(reader);
        assert_eq!(framed.read_message().expect("retry should succeed").as_ref(), b"{}");
    }

    #[test]
    fn tcp_read_timeout_is_applied() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        let client = TcpStream::connect(addr).expect("client should connect");
        let (_server, _) = listener.accept().expect("listener should accept");

        let config = DapConfig {
            read_timeout: Some(Duration::from_millis(50)),
            ..DapConfig::default()
        };
        let mut reader = DapReader::with_config_tcp(client, config).expect("reader should build");
        let err = reader.read_message().expect_err("silent peer should time out");
        assert!(matches!(
            err,
            FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        ));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut reader = DapReader::new(Cursor::new(Vec::<u8>::new()));
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert_eq!(reader.config().max_payload_size, crate::dap::DEFAULT_MAX_PAYLOAD);
        let _inner = reader.into_inner();
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
