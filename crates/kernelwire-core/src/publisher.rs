use std::sync::Arc;

use bytes::Bytes;
use kernelwire_frame::{Channel, Header, MessageBody, PubMessage};
use kernelwire_server::KernelServer;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::error::Result;
use crate::identity::KernelIdentity;

/// Broadcasts on iopub on behalf of one request, or of none.
///
/// Every broadcast carries the bound parent header and goes out through the
/// relay of the bound origin channel.
#[derive(Clone)]
pub struct Publisher {
    identity: Arc<KernelIdentity>,
    server: Arc<dyn KernelServer>,
    channel: Channel,
    parent: Option<Header>,
}

impl Publisher {
    pub fn new(
        identity: Arc<KernelIdentity>,
        server: Arc<dyn KernelServer>,
        channel: Channel,
        parent: Option<Header>,
    ) -> Self {
        Self {
            identity,
            server,
            channel,
            parent,
        }
    }

    /// The same publisher, bound to another request.
    pub fn with_parent(&self, parent: Option<Header>, channel: Channel) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            server: Arc::clone(&self.server),
            channel,
            parent,
        }
    }

    pub fn parent(&self) -> Option<&Header> {
        self.parent.as_ref()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn identity(&self) -> &KernelIdentity {
        &self.identity
    }

    /// Broadcast `content` as `msg_type` with empty metadata.
    pub fn publish(&self, msg_type: &str, content: impl Serialize) -> Result<()> {
        self.publish_with(msg_type, json!({}), content, Vec::new())
    }

    pub fn publish_with(
        &self,
        msg_type: &str,
        metadata: Value,
        content: impl Serialize,
        buffers: Vec<Bytes>,
    ) -> Result<()> {
        let content = serde_json::to_value(content)?;
        trace!(msg_type, channel = %self.channel, "publishing");
        let body = MessageBody::new(
            self.identity.header(msg_type),
            self.parent.clone(),
            metadata,
            content,
        )
        .with_buffers(buffers);
        let message = PubMessage::new(self.identity.topic(msg_type), body);
        self.server.publish(message, self.channel)?;
        Ok(())
    }
}
