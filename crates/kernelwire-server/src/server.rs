use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

use kernelwire_frame::{Authentication, Channel, JsonErrorPolicy, Serializer};
use kernelwire_transport::{
    bind, bind_channel, connect, controller_endpoint, new_socket, outbox_endpoint,
    ConnectionInfo, PortKind, SocketOptions, PUBLISHER_RELAY,
};
use tracing::{error, info};
use zmq::{Context, Socket, SocketType};

use crate::channel_loop::{ChannelLoop, Lane, Role};
use crate::dispatch::Dispatcher;
use crate::error::{Result, ServerError};
use crate::handle::ServerHandle;
use crate::messenger::ControlMessenger;
use crate::{heartbeat, publisher};

/// Default interval without traffic that ends an abort drain.
pub const DEFAULT_ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default wait for each worker to acknowledge `stop`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How the addressed channels are spread across threads.
///
/// iopub and heartbeat always get their own threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    /// Shell and control share one loop on the calling thread.
    Shared,
    /// Control on the calling thread, shell on a worker.
    #[default]
    ControlMain,
    /// Shell on the calling thread, control on a worker.
    ShellMain,
}

impl Topology {
    pub const ALL: [Topology; 3] = [Topology::Shared, Topology::ControlMain, Topology::ShellMain];

    pub fn name(self) -> &'static str {
        match self {
            Topology::Shared => "shared",
            Topology::ControlMain => "control-main",
            Topology::ShellMain => "shell-main",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Topology::ALL
            .into_iter()
            .find(|topology| topology.name() == value)
            .ok_or_else(|| format!("unknown topology '{value}'"))
    }
}

/// Server construction options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub topology: Topology,
    /// Linger and port negotiation policy for every socket.
    pub socket: SocketOptions,
    /// Quiet period that ends an abort drain.
    pub abort_poll_interval: Duration,
    /// Decode policy for JSON frames.
    pub json_policy: JsonErrorPolicy,
    /// Wait for each worker stop acknowledgement.
    pub stop_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            socket: SocketOptions::default(),
            abort_poll_interval: DEFAULT_ABORT_POLL_INTERVAL,
            json_policy: JsonErrorPolicy::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Sockets of the loop that runs on the calling thread.
struct MainSockets {
    name: &'static str,
    lanes: Vec<Lane>,
    controller: Option<Socket>,
}

/// Sockets of the addressed loop that runs on a worker thread, if any.
struct WorkerSockets {
    name: &'static str,
    lane: Lane,
    controller: Socket,
}

struct ChannelSockets {
    main: MainSockets,
    worker: Option<WorkerSockets>,
    iopub: Socket,
    relay: Socket,
    publisher_controller: Socket,
    heartbeat: Socket,
    heartbeat_controller: Socket,
}

/// Kernel server over ZeroMQ.
///
/// Binding happens in [`ZmqServer::bind`], so resolved ports and the
/// [`ServerHandle`] are available before [`ZmqServer::start`] blocks.
pub struct ZmqServer {
    connection: ConnectionInfo,
    config: ServerConfig,
    sockets: ChannelSockets,
    handle: Arc<ServerHandle>,
    _context: Context,
}

impl ZmqServer {
    /// Bind every channel described by `connection`.
    ///
    /// Ports set to 0 are negotiated; the resolved values are reported by
    /// [`ZmqServer::connection_info`].
    pub fn bind(connection: &ConnectionInfo, config: ServerConfig) -> Result<Self> {
        let auth = Authentication::new(&connection.signature_scheme, connection.key.as_bytes())?;
        let serializer = Serializer::with_policy(auth, config.json_policy);
        let context = Context::new();
        let options = &config.socket;
        let mut resolved = connection.clone();

        let shell = bind_external(&context, zmq::ROUTER, &mut resolved, PortKind::Shell, options)?;
        let control =
            bind_external(&context, zmq::ROUTER, &mut resolved, PortKind::Control, options)?;
        let stdin = bind_external(&context, zmq::ROUTER, &mut resolved, PortKind::Stdin, options)?;
        let iopub = bind_external(&context, zmq::PUB, &mut resolved, PortKind::Iopub, options)?;
        let heartbeat =
            bind_external(&context, zmq::ROUTER, &mut resolved, PortKind::Heartbeat, options)?;

        // Inproc receivers are bound before anything connects to them.
        let shell_outbox = bind_inproc(&context, zmq::PULL, &outbox_endpoint("shell"), options)?;
        let control_outbox =
            bind_inproc(&context, zmq::PULL, &outbox_endpoint("control"), options)?;
        let relay = bind_inproc(&context, zmq::PULL, PUBLISHER_RELAY, options)?;
        let publisher_controller =
            bind_inproc(&context, zmq::REP, &controller_endpoint("publisher"), options)?;
        let heartbeat_controller =
            bind_inproc(&context, zmq::REP, &controller_endpoint("heartbeat"), options)?;

        let shell_lane = Lane::new(Channel::Shell, shell, shell_outbox);
        let control_lane = Lane::new(Channel::Control, control, control_outbox);
        let (main, worker) = match config.topology {
            Topology::Shared => (
                MainSockets {
                    name: "shell+control",
                    lanes: vec![shell_lane, control_lane],
                    controller: None,
                },
                None,
            ),
            Topology::ControlMain => (
                MainSockets {
                    name: "control",
                    lanes: vec![control_lane],
                    controller: None,
                },
                Some(WorkerSockets {
                    name: "shell",
                    lane: shell_lane,
                    controller: bind_inproc(
                        &context,
                        zmq::REP,
                        &controller_endpoint("shell"),
                        options,
                    )?,
                }),
            ),
            Topology::ShellMain => (
                MainSockets {
                    name: "shell",
                    lanes: vec![shell_lane],
                    controller: Some(bind_inproc(
                        &context,
                        zmq::REP,
                        &controller_endpoint("shell"),
                        options,
                    )?),
                },
                Some(WorkerSockets {
                    name: "control",
                    lane: control_lane,
                    controller: bind_inproc(
                        &context,
                        zmq::REP,
                        &controller_endpoint("control"),
                        options,
                    )?,
                }),
            ),
        };

        let handle = ServerHandle {
            serializer,
            topology: config.topology,
            shell_outbox: Mutex::new(connect_inproc(&context, &outbox_endpoint("shell"), options)?),
            control_outbox: Mutex::new(connect_inproc(
                &context,
                &outbox_endpoint("control"),
                options,
            )?),
            shell_relay: Mutex::new(connect_inproc(&context, PUBLISHER_RELAY, options)?),
            control_relay: Mutex::new(connect_inproc(&context, PUBLISHER_RELAY, options)?),
            stdin: Mutex::new(stdin),
            messenger: ControlMessenger::connect(
                &context,
                config.topology,
                options,
                config.stop_timeout,
            )?,
            dispatcher: OnceLock::new(),
            stopped: AtomicBool::new(false),
        };

        info!(
            topology = %config.topology,
            transport = %resolved.transport,
            ip = %resolved.ip,
            shell = resolved.shell_port,
            control = resolved.control_port,
            stdin = resolved.stdin_port,
            iopub = resolved.iopub_port,
            heartbeat = resolved.hb_port,
            "kernel channels bound"
        );

        Ok(Self {
            connection: resolved,
            config,
            sockets: ChannelSockets {
                main,
                worker,
                iopub,
                relay,
                publisher_controller,
                heartbeat,
                heartbeat_controller,
            },
            handle: Arc::new(handle),
            _context: context,
        })
    }

    /// Connection info with every negotiated port filled in.
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sending side, to be handed to the kernel core.
    pub fn handle(&self) -> Arc<ServerHandle> {
        Arc::clone(&self.handle)
    }

    /// Serve every channel until the server is stopped.
    ///
    /// Blocks the calling thread. All worker threads are joined before this
    /// returns.
    pub fn start(self, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
        let ZmqServer {
            config,
            sockets,
            handle,
            ..
        } = self;
        handle.attach(&dispatcher);

        let ChannelSockets {
            main,
            worker,
            iopub,
            relay,
            publisher_controller,
            heartbeat,
            heartbeat_controller,
        } = sockets;
        let handle: &ServerHandle = &handle;
        let dispatcher: &dyn Dispatcher = dispatcher.as_ref();
        let abort_poll_interval = config.abort_poll_interval;

        info!(topology = %config.topology, "kernel server starting");
        thread::scope(|scope| {
            let mut workers = Workers::new(scope);
            workers.spawn("publisher", move || {
                publisher::run(relay, iopub, publisher_controller)
            });
            workers.spawn("heartbeat", move || {
                heartbeat::run(heartbeat, heartbeat_controller)
            });
            if let Some(WorkerSockets {
                name,
                lane,
                controller,
            }) = worker
            {
                workers.spawn(name, move || {
                    ChannelLoop::new(
                        name,
                        Role::Worker,
                        vec![lane],
                        Some(controller),
                        handle,
                        dispatcher,
                        abort_poll_interval,
                    )
                    .run()
                });
            }

            let main_result = match workers.spawn_error.take() {
                Some(err) => Err(err),
                None => ChannelLoop::new(
                    main.name,
                    Role::Supervisor,
                    main.lanes,
                    main.controller,
                    handle,
                    dispatcher,
                    abort_poll_interval,
                )
                .run(),
            };
            if let Err(err) = &main_result {
                error!(error = %err, "main channel loop failed");
            }

            let stop_result = handle.messenger().stop_channels();
            let join_result = workers.join();
            info!("kernel server stopped");
            main_result.and(stop_result).and(join_result)
        })
    }
}

struct Workers<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
    handles: Vec<(&'static str, ScopedJoinHandle<'scope, Result<()>>)>,
    spawn_error: Option<ServerError>,
}

impl<'scope, 'env> Workers<'scope, 'env> {
    fn new(scope: &'scope Scope<'scope, 'env>) -> Self {
        Self {
            scope,
            handles: Vec::new(),
            spawn_error: None,
        }
    }

    fn spawn<F>(&mut self, name: &'static str, body: F)
    where
        F: FnOnce() -> Result<()> + Send + 'scope,
    {
        if self.spawn_error.is_some() {
            return;
        }
        match thread::Builder::new()
            .name(format!("kernelwire-{name}"))
            .spawn_scoped(self.scope, body)
        {
            Ok(handle) => self.handles.push((name, handle)),
            Err(err) => self.spawn_error = Some(err.into()),
        }
    }

    /// Join every worker, returning the first failure.
    fn join(self) -> Result<()> {
        let mut first_error = None;
        for (name, handle) in self.handles {
            let outcome = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(ServerError::ThreadPanicked(name)),
            };
            if let Err(err) = outcome {
                error!(worker = name, error = %err, "worker failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn bind_external(
    context: &Context,
    kind: SocketType,
    connection: &mut ConnectionInfo,
    port: PortKind,
    options: &SocketOptions,
) -> Result<Socket> {
    let socket = new_socket(context, kind, options)?;
    let bound = bind_channel(
        &socket,
        &connection.transport,
        &connection.ip,
        connection.port(port),
        options,
    )?;
    connection.set_port(port, bound);
    Ok(socket)
}

fn bind_inproc(
    context: &Context,
    kind: SocketType,
    endpoint: &str,
    options: &SocketOptions,
) -> Result<Socket> {
    let socket = new_socket(context, kind, options)?;
    bind(&socket, endpoint)?;
    Ok(socket)
}

fn connect_inproc(context: &Context, endpoint: &str, options: &SocketOptions) -> Result<Socket> {
    let socket = new_socket(context, zmq::PUSH, options)?;
    connect(&socket, endpoint)?;
    Ok(socket)
}
