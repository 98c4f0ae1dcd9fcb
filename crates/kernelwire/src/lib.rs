//! Jupyter kernel protocol server with pluggable interpreters.
//!
//! kernelwire speaks the Jupyter messaging protocol over ZeroMQ and leaves
//! the language to an [`kernel::Interpreter`] implementation.
//!
//! # Crate Structure
//!
//! - [`transport`]: sockets, endpoints, port negotiation, connection files
//! - [`frame`]: message model, HMAC signing, wire codec, debug adapter framing
//! - [`server`]: the five channel servers and a blocking test client
//! - [`kernel`]: request routing, comms, history, stdin and the debugger bridge
//! - [`echo`]: a small interpreter that echoes its input, for demos and tests

pub mod echo;

/// Re-export transport types.
pub mod transport {
    pub use kernelwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use kernelwire_frame::*;
}

/// Re-export server types.
pub mod server {
    pub use kernelwire_server::*;
}

/// Re-export kernel core types.
pub mod kernel {
    pub use kernelwire_core::*;
}

pub use echo::EchoInterpreter;
