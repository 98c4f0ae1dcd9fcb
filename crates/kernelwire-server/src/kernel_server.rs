use kernelwire_frame::{Channel, Message, PubMessage};
use serde_json::Value;

use crate::error::Result;

/// Outbound surface of a kernel server, shared by every thread.
///
/// Replies and broadcasts may be sent from any thread; implementations route
/// them to the thread that owns the underlying socket.
pub trait KernelServer: Send + Sync {
    /// Send a reply on shell. Routing comes from the message identities.
    fn send_shell(&self, message: Message) -> Result<()>;

    /// Send a reply on control.
    fn send_control(&self, message: Message) -> Result<()>;

    /// Send an `input_request` on stdin and block until the client answers.
    fn send_stdin(&self, message: Message) -> Result<Message>;

    /// Broadcast on iopub, through the relay of the origin channel.
    fn publish(&self, message: PubMessage, channel: Channel) -> Result<()>;

    /// Ask the shell thread an internal JSON question and wait for the answer.
    fn send_to_shell(&self, request: &Value) -> Result<Value>;

    /// Request an orderly shutdown. Idempotent.
    fn stop(&self);
}
