use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{iso8601_now, new_id};

/// Messaging protocol version stamped on every header this crate builds.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Message header.
///
/// Header keys outside the protocol's fixed set are kept in `extra` so they
/// survive a decode/encode cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    #[serde(default)]
    pub username: String,
    pub session: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    /// A fresh header with a new id and the current timestamp.
    pub fn new(msg_type: impl Into<String>, session: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            msg_id: new_id(),
            username: username.into(),
            session: session.into(),
            date: iso8601_now(),
            msg_type: msg_type.into(),
            version: PROTOCOL_VERSION.to_string(),
            extra: Map::new(),
        }
    }
}

/// The signed part of a message plus its binary buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBody {
    pub header: Header,
    /// `None` is encoded as `{}` on the wire.
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl MessageBody {
    pub fn new(header: Header, parent_header: Option<Header>, metadata: Value, content: Value) -> Self {
        Self {
            header,
            parent_header,
            metadata,
            content,
            buffers: Vec::new(),
        }
    }

    pub fn with_buffers(mut self, buffers: Vec<Bytes>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Decode the content into a typed shape.
    pub fn parse_content<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.content)
    }
}

/// A message routed through a router socket (shell, control, stdin).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Routing identities, copied from request to reply.
    pub identities: Vec<Bytes>,
    pub body: MessageBody,
}

impl Message {
    pub fn new(identities: Vec<Bytes>, body: MessageBody) -> Self {
        Self { identities, body }
    }

    pub fn header(&self) -> &Header {
        &self.body.header
    }

    pub fn msg_type(&self) -> &str {
        &self.body.header.msg_type
    }

    pub fn content(&self) -> &Value {
        &self.body.content
    }

    pub fn parse_content<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        self.body.parse_content()
    }
}

/// A broadcast message on iopub, addressed by topic instead of identities.
#[derive(Debug, Clone, PartialEq)]
pub struct PubMessage {
    pub topic: String,
    pub body: MessageBody,
}

impl PubMessage {
    pub fn new(topic: impl Into<String>, body: MessageBody) -> Self {
        Self {
            topic: topic.into(),
            body,
        }
    }

    pub fn header(&self) -> &Header {
        &self.body.header
    }

    pub fn msg_type(&self) -> &str {
        &self.body.header.msg_type
    }

    pub fn content(&self) -> &Value {
        &self.body.content
    }
}
