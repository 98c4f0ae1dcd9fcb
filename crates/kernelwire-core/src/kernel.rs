use std::sync::Arc;

use kernelwire_frame::Channel;
use kernelwire_server::{Dispatcher, KernelServer, ServerConfig, ServerHandle, Topology, ZmqServer};
use kernelwire_transport::ConnectionInfo;
use tracing::info;

use crate::debugger::Debugger;
use crate::error::Result;
use crate::history::HistoryManager;
use crate::identity::KernelIdentity;
use crate::interpreter::Interpreter;
use crate::kernel_core::{Collaborators, KernelCore};
use crate::protocol::ExecutionState;

/// Collects the pieces of a kernel before binding its sockets.
pub struct KernelBuilder {
    connection: ConnectionInfo,
    config: ServerConfig,
    collaborators: Collaborators,
    username: Option<String>,
}

impl KernelBuilder {
    pub fn history(mut self, history: impl HistoryManager + 'static) -> Self {
        self.collaborators.history = Box::new(history);
        self
    }

    pub fn debugger(mut self, debugger: impl Debugger + 'static) -> Self {
        self.collaborators.debugger = Box::new(debugger);
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.config.topology = topology;
        self
    }

    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the user name stamped on headers.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Bind every channel and build the core.
    pub fn build(self) -> Result<Kernel> {
        let server = ZmqServer::bind(&self.connection, self.config)?;
        let identity = match self.username {
            Some(username) => KernelIdentity::new(username),
            None => KernelIdentity::from_system(),
        };
        let handle: Arc<dyn KernelServer> = server.handle();
        let core = KernelCore::new(identity, handle, self.collaborators);
        info!(
            kernel_id = %core.identity().kernel_id(),
            topology = %server.config().topology,
            "kernel built"
        );
        Ok(Kernel { server, core })
    }
}

/// A bound kernel, ready to run.
pub struct Kernel {
    server: ZmqServer,
    core: Arc<KernelCore>,
}

impl Kernel {
    pub fn builder(connection: ConnectionInfo, interpreter: impl Interpreter + 'static) -> KernelBuilder {
        KernelBuilder {
            connection,
            config: ServerConfig::default(),
            collaborators: Collaborators::new(Arc::new(interpreter)),
            username: None,
        }
    }

    /// Connection info with the ports actually bound.
    pub fn connection_info(&self) -> &ConnectionInfo {
        self.server.connection_info()
    }

    pub fn core(&self) -> &Arc<KernelCore> {
        &self.core
    }

    /// Handle for stopping the kernel from another thread.
    pub fn handle(&self) -> Arc<ServerHandle> {
        self.server.handle()
    }

    /// Announce `starting` and serve until a shutdown request or
    /// [`KernelServer::stop`].
    pub fn run(self) -> Result<()> {
        self.core
            .publish_status(ExecutionState::Starting, None, Channel::Shell);
        let dispatcher: Arc<dyn Dispatcher> = self.core;
        self.server.start(dispatcher)?;
        info!("kernel stopped");
        Ok(())
    }
}
