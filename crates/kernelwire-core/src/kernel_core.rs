//! Message dispatch: busy/idle bracketing, handler lookup and replies.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use kernelwire_frame::{iso8601_now, Channel, Header, Message, MessageBody};
use kernelwire_server::{deferred, Deferred, Dispatch, Dispatcher, KernelServer, ServerError, ShellQueue};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, trace, warn};

use crate::comm::CommManager;
use crate::debugger::{DebugContext, Debugger, NullDebugger};
use crate::error::{KernelError, Result};
use crate::history::{HistoryManager, InMemoryHistory};
use crate::identity::KernelIdentity;
use crate::interpreter::{ExecuteReplier, Interpreter, KernelContext, Outputs};
use crate::protocol::{
    CommInfoRequest, CompleteRequest, ExecuteInput, ExecuteOutcome, ExecuteRequest,
    ExecutionState, HistoryRequest, InputReply, InputRequest, InspectRequest, IsCompleteRequest,
    ReplyStatus, ShutdownRequest, Status,
};
use crate::publisher::Publisher;

/// How a handler left its request.
pub enum Outcome {
    /// The reply has been sent; idle can be published.
    Replied,
    /// The reply comes later; the continuation publishes idle.
    Pending(Deferred),
}

type Handler = fn(&KernelCore, &Message, Channel) -> Result<Outcome>;

/// Where a request came from: its header, routing identities and channel.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub header: Header,
    pub identities: Vec<Bytes>,
    pub channel: Channel,
}

impl RequestContext {
    pub fn new(message: &Message, channel: Channel) -> Self {
        Self {
            header: message.header().clone(),
            identities: message.identities.clone(),
            channel,
        }
    }
}

/// State an execution carries from dispatch to its reply continuation.
pub(crate) struct PendingExecute {
    pub(crate) context: RequestContext,
    pub(crate) execution_count: u32,
    pub(crate) code: String,
    pub(crate) store_history: bool,
    pub(crate) stop_on_error: bool,
    pub(crate) allow_stdin: bool,
    pub(crate) metadata: Value,
}

/// Pluggable parts of a kernel core.
pub struct Collaborators {
    pub interpreter: Arc<dyn Interpreter>,
    pub history: Box<dyn HistoryManager>,
    pub debugger: Box<dyn Debugger>,
}

impl Collaborators {
    /// In-memory history and no debugger.
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            interpreter,
            history: Box::new(InMemoryHistory::new()),
            debugger: Box::new(NullDebugger),
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatches shell and control requests to the interpreter and the other
/// collaborators, and sends their replies.
pub struct KernelCore {
    this: Weak<KernelCore>,
    identity: Arc<KernelIdentity>,
    server: Arc<dyn KernelServer>,
    interpreter: Arc<dyn Interpreter>,
    history: Mutex<Box<dyn HistoryManager>>,
    debugger: Mutex<Box<dyn Debugger>>,
    comms: Arc<CommManager>,
    execution_count: AtomicU32,
}

impl KernelCore {
    /// Build the core and configure the interpreter.
    pub fn new(
        identity: KernelIdentity,
        server: Arc<dyn KernelServer>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let identity = Arc::new(identity);
        let unbound = Publisher::new(Arc::clone(&identity), Arc::clone(&server), Channel::Shell, None);
        let comms = CommManager::new(unbound.clone());

        let core = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            identity,
            server,
            interpreter: collaborators.interpreter,
            history: Mutex::new(collaborators.history),
            debugger: Mutex::new(collaborators.debugger),
            comms,
            execution_count: AtomicU32::new(0),
        });

        let context = KernelContext::new(Arc::clone(&core.comms), Outputs::new(unbound));
        core.interpreter.configure(&context);
        core
    }

    pub fn identity(&self) -> &KernelIdentity {
        &self.identity
    }

    pub fn comm_manager(&self) -> &Arc<CommManager> {
        &self.comms
    }

    pub fn server(&self) -> &Arc<dyn KernelServer> {
        &self.server
    }

    /// The last execution count handed out.
    pub fn execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::Acquire)
    }

    /// Broadcast an execution state. Failures are logged, never raised.
    pub fn publish_status(&self, state: ExecutionState, parent: Option<&Header>, channel: Channel) {
        let status = Status {
            execution_state: state,
        };
        if let Err(err) = self.publisher(parent.cloned(), channel).publish("status", status) {
            warn!(error = %err, ?state, "failed to publish status");
        }
    }

    fn publisher(&self, parent: Option<Header>, channel: Channel) -> Publisher {
        Publisher::new(Arc::clone(&self.identity), Arc::clone(&self.server), channel, parent)
    }

    fn handler(msg_type: &str) -> Option<Handler> {
        let handler: Handler = match msg_type {
            "execute_request" => Self::execute_request,
            "complete_request" => Self::complete_request,
            "inspect_request" => Self::inspect_request,
            "history_request" => Self::history_request,
            "is_complete_request" => Self::is_complete_request,
            "comm_info_request" => Self::comm_info_request,
            "comm_open" => Self::comm_open,
            "comm_msg" => Self::comm_msg,
            "comm_close" => Self::comm_close,
            "kernel_info_request" => Self::kernel_info_request,
            "shutdown_request" => Self::shutdown_request,
            "interrupt_request" => Self::interrupt_request,
            "debug_request" => Self::debug_request,
            _ => return None,
        };
        Some(handler)
    }

    fn dispatch(&self, message: Message, channel: Channel) -> Dispatch {
        let header = message.header().clone();
        debug!(
            channel = %channel,
            msg_type = %header.msg_type,
            msg_id = %header.msg_id,
            "received message"
        );
        trace!(content = %message.content(), "message content");

        if channel == Channel::Shell {
            self.comms.set_parent(Some(header.clone()), channel);
        }
        self.publish_status(ExecutionState::Busy, Some(&header), channel);

        let outcome = match Self::handler(&header.msg_type) {
            None => {
                error!(msg_type = %header.msg_type, "unknown message type");
                Outcome::Replied
            }
            Some(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler(self, &message, channel))) {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(err)) => {
                        error!(msg_type = %header.msg_type, error = %err, "handler failed");
                        Outcome::Replied
                    }
                    Err(_) => {
                        error!(msg_type = %header.msg_type, "handler panicked");
                        Outcome::Replied
                    }
                }
            }
        };

        match outcome {
            Outcome::Replied => {
                self.publish_status(ExecutionState::Idle, Some(&header), channel);
                Dispatch::Complete
            }
            Outcome::Pending(deferred) => Dispatch::Deferred(deferred),
        }
    }

    /// Send a reply addressed to the origin of `context`.
    pub fn send_reply(
        &self,
        context: &RequestContext,
        msg_type: &str,
        metadata: Value,
        content: impl Serialize,
    ) -> Result<()> {
        let body = MessageBody::new(
            self.identity.header(msg_type),
            Some(context.header.clone()),
            metadata,
            serde_json::to_value(content)?,
        );
        let message = Message::new(context.identities.clone(), body);
        match context.channel {
            Channel::Shell => self.server.send_shell(message)?,
            Channel::Control => self.server.send_control(message)?,
        }
        Ok(())
    }

    fn reply(&self, message: &Message, channel: Channel, msg_type: &str, content: impl Serialize) -> Result<Outcome> {
        self.send_reply(&RequestContext::new(message, channel), msg_type, json!({}), content)?;
        Ok(Outcome::Replied)
    }

    fn execute_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let mut request: ExecuteRequest = message.parse_content()?;
        request.store_history = !request.silent && request.store_history;

        let execution_count = if request.silent {
            self.execution_count()
        } else {
            let count = self.execution_count.fetch_add(1, Ordering::AcqRel) + 1;
            let input = ExecuteInput {
                code: request.code.clone(),
                execution_count: count,
            };
            self.publisher(Some(message.header().clone()), channel)
                .publish("execute_input", input)?;
            count
        };

        let core = self
            .this
            .upgrade()
            .ok_or_else(|| KernelError::Server(ServerError::Disconnected("kernel core dropped".to_string())))?;
        let pending = PendingExecute {
            context: RequestContext::new(message, channel),
            execution_count,
            code: request.code.clone(),
            store_history: request.store_history,
            stop_on_error: request.stop_on_error,
            allow_stdin: request.allow_stdin,
            metadata: json!({ "started": iso8601_now() }),
        };
        let outputs = Outputs::new(self.publisher(Some(message.header().clone()), channel));
        let (completion, deferred) = deferred();

        let replier = ExecuteReplier::new(core, pending, completion, outputs);
        // A panic drops the replier, which queues an error reply on `deferred`.
        if catch_unwind(AssertUnwindSafe(|| self.interpreter.execute(request, replier))).is_err() {
            error!(msg_id = %message.header().msg_id, "interpreter panicked during execution");
        }
        Ok(Outcome::Pending(deferred))
    }

    /// Reply continuation of an execution; runs on the origin channel's thread.
    pub(crate) fn finish_execute(
        &self,
        queue: &mut dyn ShellQueue,
        pending: PendingExecute,
        outcome: ExecuteOutcome,
    ) {
        let status = outcome.status();
        let channel = pending.context.channel;

        match execute_reply_content(&outcome, pending.execution_count) {
            Ok(content) => {
                if let Err(err) = self.send_reply(&pending.context, "execute_reply", pending.metadata, content) {
                    error!(error = %err, "failed to send execute_reply");
                }
            }
            Err(err) => error!(error = %err, "failed to encode execute_reply"),
        }

        if pending.store_history {
            lock(&self.history).store_inputs(0, pending.execution_count, &pending.code);
        }

        if status == ReplyStatus::Error && pending.stop_on_error {
            queue.abort_queue(&mut |queued| self.abort_request(&queued, channel));
        }

        self.publish_status(ExecutionState::Idle, Some(&pending.context.header), channel);
    }

    fn abort_request(&self, message: &Message, channel: Channel) {
        let msg_type = message.msg_type();
        let Some(base) = msg_type.strip_suffix("_request") else {
            warn!(msg_type, "dropping queued message after failed execution");
            return;
        };
        debug!(msg_type, msg_id = %message.header().msg_id, "aborting queued request");
        let content = json!({
            "status": ReplyStatus::Error,
            "ename": "ExecutionAborted",
            "evalue": "a previous execution failed with stop_on_error set",
            "traceback": [],
        });
        let context = RequestContext::new(message, channel);
        if let Err(err) = self.send_reply(&context, &format!("{base}_reply"), json!({}), content) {
            error!(msg_type, error = %err, "failed to send abort reply");
        }
    }

    /// Prompt the client of `pending` for input over stdin.
    pub(crate) fn request_input(&self, pending: &PendingExecute, prompt: &str, password: bool) -> Result<String> {
        if !pending.allow_stdin {
            return Err(KernelError::Stdin("the client does not accept input requests".to_string()));
        }
        let content = InputRequest {
            prompt: prompt.to_string(),
            password,
        };
        let body = MessageBody::new(
            self.identity.header("input_request"),
            Some(pending.context.header.clone()),
            json!({}),
            serde_json::to_value(content)?,
        );
        let request = Message::new(pending.context.identities.clone(), body);
        let reply = self.server.send_stdin(request)?;
        let reply: InputReply = reply.parse_content()?;
        Ok(reply.value)
    }

    fn complete_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let request: CompleteRequest = message.parse_content()?;
        let reply = self.interpreter.complete(&request);
        self.reply(message, channel, "complete_reply", reply)
    }

    fn inspect_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let request: InspectRequest = message.parse_content()?;
        let reply = self.interpreter.inspect(&request);
        self.reply(message, channel, "inspect_reply", reply)
    }

    fn is_complete_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let request: IsCompleteRequest = message.parse_content()?;
        let reply = self.interpreter.is_complete(&request);
        self.reply(message, channel, "is_complete_reply", reply)
    }

    fn history_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let request: HistoryRequest = message.parse_content()?;
        let reply = lock(&self.history).process_request(&request);
        self.reply(message, channel, "history_reply", reply)
    }

    fn comm_info_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let request: CommInfoRequest = message.parse_content()?;
        let comms: Map<String, Value> = self
            .comms
            .comms(request.filter())
            .into_iter()
            .map(|(id, target_name)| (id, json!({ "target_name": target_name })))
            .collect();
        self.reply(
            message,
            channel,
            "comm_info_reply",
            json!({ "status": ReplyStatus::Ok, "comms": comms }),
        )
    }

    fn comm_open(&self, message: &Message, _channel: Channel) -> Result<Outcome> {
        self.comms.comm_open(message)?;
        Ok(Outcome::Replied)
    }

    fn comm_msg(&self, message: &Message, _channel: Channel) -> Result<Outcome> {
        self.comms.comm_msg(message)?;
        Ok(Outcome::Replied)
    }

    fn comm_close(&self, message: &Message, _channel: Channel) -> Result<Outcome> {
        self.comms.comm_close(message)?;
        Ok(Outcome::Replied)
    }

    fn kernel_info_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let mut content = match serde_json::to_value(self.interpreter.kernel_info())? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        content.insert("protocol_version".into(), json!(kernelwire_frame::PROTOCOL_VERSION));
        content.insert("status".into(), json!(ReplyStatus::Ok));
        content.insert("debugger".into(), json!(lock(&self.debugger).supported()));
        self.reply(message, channel, "kernel_info_reply", content)
    }

    fn shutdown_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let request: ShutdownRequest = message.parse_content()?;
        self.interpreter.shutdown();
        self.server.stop();

        let event = json!({ "restart": request.restart });
        self.publisher(Some(message.header().clone()), Channel::Control)
            .publish("shutdown", &event)?;
        self.reply(
            message,
            channel,
            "shutdown_reply",
            json!({ "status": ReplyStatus::Ok, "restart": request.restart }),
        )
    }

    fn interrupt_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        self.interpreter.interrupt();
        self.publisher(Some(message.header().clone()), channel)
            .publish("interrupt", json!({}))?;
        self.reply(message, channel, "interrupt_reply", json!({ "status": ReplyStatus::Ok }))
    }

    fn debug_request(&self, message: &Message, channel: Channel) -> Result<Outcome> {
        let context = DebugContext::new(
            self.server.as_ref(),
            self.publisher(Some(message.header().clone()), Channel::Control),
        );
        let reply = lock(&self.debugger).process_request(&context, message.content());
        self.reply(message, channel, "debug_reply", reply)
    }
}

fn execute_reply_content(outcome: &ExecuteOutcome, execution_count: u32) -> Result<Value> {
    let mut content = serde_json::to_value(outcome)?;
    if let Value::Object(map) = &mut content {
        map.insert("execution_count".into(), json!(execution_count));
    }
    Ok(content)
}

impl Dispatcher for KernelCore {
    fn dispatch_shell(&self, message: Message) -> Dispatch {
        self.dispatch(message, Channel::Shell)
    }

    fn dispatch_control(&self, message: Message) -> Dispatch {
        self.dispatch(message, Channel::Control)
    }

    fn internal_request(&self, request: Value) -> Value {
        self.interpreter.internal_request(&request)
    }
}
