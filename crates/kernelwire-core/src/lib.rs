//! Kernel core for Jupyter kernels.
//!
//! [`KernelCore`] receives requests from a [`kernelwire_server::KernelServer`],
//! brackets each with `busy`/`idle`, and routes it to an [`Interpreter`], the
//! [`CommManager`], a [`HistoryManager`] or a [`Debugger`]. [`Kernel`] wires a
//! core to a ZeroMQ server.
//!
//! ```no_run
//! # use kernelwire_core::*;
//! # fn demo(interpreter: impl Interpreter + 'static) -> kernelwire_core::Result<()> {
//! let info = kernelwire_transport::ConnectionInfo::from_file("kernel.json")?;
//! Kernel::builder(info, interpreter).build()?.run()
//! # }
//! ```

pub mod comm;
pub mod debugger;
pub mod error;
pub mod history;
pub mod identity;
pub mod interpreter;
pub mod kernel;
pub mod kernel_core;
pub mod protocol;
pub mod publisher;

pub use comm::{Comm, CommHandler, CommManager};
pub use debugger::{DapDebugger, DebugContext, Debugger, NullDebugger};
pub use error::{KernelError, Result};
pub use history::{Glob, HistoryManager, InMemoryHistory};
pub use identity::{system_user_name, KernelIdentity};
pub use interpreter::{ExecuteReplier, Interpreter, KernelContext, Outputs};
pub use kernel::{Kernel, KernelBuilder};
pub use kernel_core::{Collaborators, KernelCore, Outcome, RequestContext};
pub use protocol::*;
pub use publisher::Publisher;
