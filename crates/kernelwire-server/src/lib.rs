//! Channel servers for Jupyter kernels.
//!
//! Serves shell, control, stdin, iopub and heartbeat concurrently over
//! ZeroMQ. Routers are owned by the thread that polls them; everything else
//! reaches them through inproc sockets, so replies and broadcasts can be sent
//! from any thread via [`KernelServer`].

mod channel_loop;
pub mod client;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod handle;
mod heartbeat;
pub mod kernel_server;
pub mod messenger;
mod publisher;
pub mod server;

pub use client::{is_child_of, KernelClient};
pub use control::{ControllerRequest, CONTROLLER_STOP};
pub use dispatch::{
    deferred, Completion, Continuation, Deferred, DeferredState, Dispatch, Dispatcher, ShellQueue,
};
pub use error::{Result, ServerError};
pub use handle::ServerHandle;
pub use kernel_server::KernelServer;
pub use messenger::ControlMessenger;
pub use server::{
    ServerConfig, Topology, ZmqServer, DEFAULT_ABORT_POLL_INTERVAL, DEFAULT_STOP_TIMEOUT,
};
