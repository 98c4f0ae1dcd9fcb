//! Jupyter message model and wire format.
//!
//! Every message travels as a zmq multipart:
//! - Routing identities (or a topic for broadcasts)
//! - The `<IDS|MSG>` delimiter
//! - An HMAC signature over the four JSON frames that follow
//! - Header, parent header, metadata and content as JSON
//! - Zero or more raw binary buffers
//!
//! The crate also carries the `Content-Length` framing spoken by debug
//! adapters, which the debugger bridge uses over plain TCP.

pub mod auth;
pub mod channel;
pub mod codec;
pub mod dap;
pub mod error;
pub mod ids;
pub mod message;
pub mod reader;
pub mod writer;

pub use auth::{Authentication, SignatureScheme};
pub use channel::Channel;
pub use codec::{JsonErrorPolicy, Multipart, Serializer, DELIMITER, SIGNED_FRAME_COUNT};
pub use dap::{decode_dap, encode_dap, DapConfig};
pub use error::{FrameError, Result};
pub use ids::{iso8601_now, new_id};
pub use message::{Header, Message, MessageBody, PubMessage, PROTOCOL_VERSION};
pub use reader::DapReader;
pub use writer::DapWriter;
