//! The language side of a kernel, and the handles it is given.

use std::fmt;
use std::sync::Arc;

use kernelwire_frame::Header;
use kernelwire_server::Completion;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::comm::CommManager;
use crate::error::{KernelError, Result};
use crate::kernel_core::{KernelCore, PendingExecute};
use crate::protocol::{
    ClearOutput, CompleteReply, CompleteRequest, DisplayData, ErrorContent, ExecuteOutcome,
    ExecuteRequest, ExecuteResult, InspectReply, InspectRequest, IsCompleteReply,
    IsCompleteRequest, KernelInfo, Stream, StreamName,
};
use crate::publisher::Publisher;

/// A language implementation plugged into the kernel core.
///
/// Every method except [`Interpreter::execute`] answers synchronously on the
/// thread that owns the request's channel.
pub trait Interpreter: Send + Sync {
    /// Called once, before any request is dispatched.
    fn configure(&self, context: &KernelContext) {
        let _ = context;
    }

    /// Run `request`. The reply is sent through `replier`, either before
    /// returning or later from another thread.
    fn execute(&self, request: ExecuteRequest, replier: ExecuteReplier);

    fn complete(&self, request: &CompleteRequest) -> CompleteReply;

    fn inspect(&self, request: &InspectRequest) -> InspectReply;

    fn is_complete(&self, request: &IsCompleteRequest) -> IsCompleteReply;

    fn kernel_info(&self) -> KernelInfo;

    fn shutdown(&self);

    /// Cooperative interruption of a running execution.
    fn interrupt(&self) {}

    /// Answer an internal query routed to the shell thread.
    fn internal_request(&self, request: &Value) -> Value {
        let _ = request;
        json!({ "status": "error", "what": "internal request not supported" })
    }
}

/// What an interpreter receives at configuration time.
#[derive(Clone)]
pub struct KernelContext {
    comms: Arc<CommManager>,
    outputs: Outputs,
}

impl KernelContext {
    pub(crate) fn new(comms: Arc<CommManager>, outputs: Outputs) -> Self {
        Self { comms, outputs }
    }

    pub fn comm_manager(&self) -> &Arc<CommManager> {
        &self.comms
    }

    /// Outputs not tied to any request; broadcasts carry no parent header.
    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }
}

/// Typed iopub output helpers.
#[derive(Clone)]
pub struct Outputs {
    publisher: Publisher,
}

impl Outputs {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn stream(&self, name: StreamName, text: impl Into<String>) -> Result<()> {
        let content = Stream {
            name,
            text: text.into(),
        };
        self.publisher.publish("stream", content)
    }

    pub fn display_data(
        &self,
        data: Map<String, Value>,
        metadata: Map<String, Value>,
        transient: Map<String, Value>,
    ) -> Result<()> {
        let content = DisplayData {
            data,
            metadata,
            transient,
        };
        self.publisher.publish("display_data", content)
    }

    /// Replace a display previously published with the same `display_id`
    /// in its transient data.
    pub fn update_display_data(
        &self,
        data: Map<String, Value>,
        metadata: Map<String, Value>,
        transient: Map<String, Value>,
    ) -> Result<()> {
        let content = DisplayData {
            data,
            metadata,
            transient,
        };
        self.publisher.publish("update_display_data", content)
    }

    pub fn execute_result(
        &self,
        execution_count: u32,
        data: Map<String, Value>,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        let content = ExecuteResult {
            execution_count,
            data,
            metadata,
        };
        self.publisher.publish("execute_result", content)
    }

    pub fn error(
        &self,
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Result<()> {
        let content = ErrorContent {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        };
        self.publisher.publish("error", content)
    }

    pub fn clear_output(&self, wait: bool) -> Result<()> {
        self.publisher.publish("clear_output", ClearOutput { wait })
    }
}

/// Reply handle for one `execute_request`.
///
/// Sending consumes the replier. Dropping it unsent replies with an error so
/// the client is never left waiting.
pub struct ExecuteReplier {
    core: Arc<KernelCore>,
    pending: Option<(PendingExecute, Completion)>,
    outputs: Outputs,
    execution_count: u32,
    parent: Header,
}

impl fmt::Debug for ExecuteReplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteReplier")
            .field("msg_id", &self.parent.msg_id)
            .field("execution_count", &self.execution_count)
            .field("sent", &self.pending.is_none())
            .finish()
    }
}

impl ExecuteReplier {
    pub(crate) fn new(
        core: Arc<KernelCore>,
        pending: PendingExecute,
        completion: Completion,
        outputs: Outputs,
    ) -> Self {
        let execution_count = pending.execution_count;
        let parent = pending.context.header.clone();
        Self {
            core,
            pending: Some((pending, completion)),
            outputs,
            execution_count,
            parent,
        }
    }

    /// Outputs bound to this request.
    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// The execution count assigned to this request.
    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// Header of the execute request.
    pub fn parent(&self) -> &Header {
        &self.parent
    }

    /// Ask the client for a line of input and block until it answers.
    pub fn input(&self, prompt: &str, password: bool) -> Result<String> {
        match &self.pending {
            Some((pending, _)) => self.core.request_input(pending, prompt, password),
            None => Err(KernelError::Stdin("execution already replied".to_string())),
        }
    }

    /// Finish the execution with `outcome`.
    pub fn send(mut self, outcome: ExecuteOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: ExecuteOutcome) {
        let Some((pending, completion)) = self.pending.take() else {
            return;
        };
        let core = Arc::clone(&self.core);
        let msg_id = pending.context.header.msg_id.clone();
        let delivered = completion.complete(move |queue| core.finish_execute(queue, pending, outcome));
        if !delivered {
            warn!(msg_id = %msg_id, "execute reply dropped; channel loop has stopped");
        }
    }
}

impl Drop for ExecuteReplier {
    fn drop(&mut self) {
        if self.pending.is_some() {
            warn!(msg_id = %self.parent.msg_id, "execute request dropped without a reply");
            self.finish(ExecuteOutcome::error(
                "KernelError",
                "the interpreter did not reply to this execution",
                Vec::new(),
            ));
        }
    }
}
