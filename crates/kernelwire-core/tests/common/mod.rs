#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kernelwire_core::{
    Collaborators, Comm, CompleteReply, CompleteRequest, ExecuteOutcome, ExecuteReplier,
    ExecuteRequest, InspectReply, InspectRequest, Interpreter, IsCompleteReply, IsCompleteRequest,
    KernelContext, KernelCore, KernelIdentity, KernelInfo, LanguageInfo, StreamName,
};
use kernelwire_frame::{Channel, Header, Message, MessageBody, PubMessage};
use kernelwire_server::{
    DeferredState, Dispatch, Dispatcher, KernelServer, Result as ServerResult, ServerError,
    ShellQueue,
};
use serde_json::{json, Map, Value};

/// In-memory stand-in for the ZeroMQ server.
pub struct MockServer {
    shell: Mutex<Vec<Message>>,
    control: Mutex<Vec<Message>>,
    broadcasts: Mutex<Vec<(PubMessage, Channel)>>,
    stdin_requests: Mutex<Vec<Message>>,
    stdin_answers: Mutex<VecDeque<String>>,
    internal_requests: Mutex<Vec<Value>>,
    internal_answer: Mutex<Value>,
    stopped: AtomicBool,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shell: Mutex::new(Vec::new()),
            control: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            stdin_requests: Mutex::new(Vec::new()),
            stdin_answers: Mutex::new(VecDeque::new()),
            internal_requests: Mutex::new(Vec::new()),
            internal_answer: Mutex::new(json!({ "status": "ok" })),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn replies(&self, channel: Channel) -> Vec<Message> {
        match channel {
            Channel::Shell => self.shell.lock().unwrap().clone(),
            Channel::Control => self.control.lock().unwrap().clone(),
        }
    }

    pub fn broadcasts(&self) -> Vec<(PubMessage, Channel)> {
        self.broadcasts.lock().unwrap().clone()
    }

    /// Broadcast types whose parent is `parent`, in publish order.
    pub fn broadcast_types(&self, parent: &Header) -> Vec<String> {
        self.broadcasts_for(parent)
            .iter()
            .map(|message| message.msg_type().to_string())
            .collect()
    }

    pub fn broadcasts_for(&self, parent: &Header) -> Vec<PubMessage> {
        self.broadcasts()
            .into_iter()
            .map(|(message, _)| message)
            .filter(|message| {
                message.body.parent_header.as_ref().map(|h| &h.msg_id) == Some(&parent.msg_id)
            })
            .collect()
    }

    /// Execution states published for `parent`.
    pub fn statuses(&self, parent: &Header) -> Vec<String> {
        self.broadcasts_for(parent)
            .iter()
            .filter(|message| message.msg_type() == "status")
            .map(|message| message.content()["execution_state"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn queue_input(&self, value: &str) {
        self.stdin_answers.lock().unwrap().push_back(value.to_string());
    }

    pub fn stdin_requests(&self) -> Vec<Message> {
        self.stdin_requests.lock().unwrap().clone()
    }

    pub fn internal_requests(&self) -> Vec<Value> {
        self.internal_requests.lock().unwrap().clone()
    }

    pub fn answer_internal_with(&self, answer: Value) {
        *self.internal_answer.lock().unwrap() = answer;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl KernelServer for MockServer {
    fn send_shell(&self, message: Message) -> ServerResult<()> {
        self.shell.lock().unwrap().push(message);
        Ok(())
    }

    fn send_control(&self, message: Message) -> ServerResult<()> {
        self.control.lock().unwrap().push(message);
        Ok(())
    }

    fn send_stdin(&self, message: Message) -> ServerResult<Message> {
        let header = message.header().clone();
        self.stdin_requests.lock().unwrap().push(message);
        let value = self
            .stdin_answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ServerError::Disconnected("no input queued".to_string()))?;
        Ok(Message::new(
            Vec::new(),
            MessageBody::new(
                Header::new("input_reply", "client-session", "client"),
                Some(header),
                json!({}),
                json!({ "value": value }),
            ),
        ))
    }

    fn publish(&self, message: PubMessage, channel: Channel) -> ServerResult<()> {
        self.broadcasts.lock().unwrap().push((message, channel));
        Ok(())
    }

    fn send_to_shell(&self, request: &Value) -> ServerResult<Value> {
        self.internal_requests.lock().unwrap().push(request.clone());
        Ok(self.internal_answer.lock().unwrap().clone())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Interpreter driven by the code it receives.
///
/// - `fail...` publishes an error and replies with status error
/// - `input:<prompt>` asks for input and streams the answer
/// - `later` replies from another thread
/// - `forget` drops the replier without replying
/// - `panic` panics
/// - anything else is echoed as `execute_result`
#[derive(Default)]
pub struct ScriptInterpreter {
    pub comms: Arc<Mutex<Vec<Comm>>>,
    pub configured: AtomicBool,
    pub interrupted: AtomicBool,
    pub shut_down: AtomicBool,
}

impl Interpreter for ScriptInterpreter {
    fn configure(&self, context: &KernelContext) {
        self.configured.store(true, Ordering::SeqCst);
        let comms = Arc::clone(&self.comms);
        context
            .comm_manager()
            .register_comm_target("echo", move |comm: Comm, _open: &Message| {
                let reply_to = comm.clone();
                comm.on_message(move |message| {
                    let data = message.content()["data"].as_object().cloned().unwrap_or_default();
                    reply_to
                        .send(data, json!({}), Vec::new())
                        .expect("echo should publish");
                });
                comms.lock().unwrap().push(comm);
            });
        context
            .comm_manager()
            .register_comm_target("ephemeral", |_comm: Comm, _open: &Message| {});
    }

    fn execute(&self, request: ExecuteRequest, replier: ExecuteReplier) {
        let code = request.code.as_str();
        if code.starts_with("fail") {
            replier
                .outputs()
                .error("ValueError", "boom", vec!["ValueError: boom".to_string()])
                .expect("error should publish");
            replier.send(ExecuteOutcome::error("ValueError", "boom", vec!["ValueError: boom".to_string()]));
        } else if let Some(prompt) = code.strip_prefix("input:") {
            match replier.input(prompt, false) {
                Ok(value) => {
                    replier
                        .outputs()
                        .stream(StreamName::Stdout, value)
                        .expect("stream should publish");
                    replier.send(ExecuteOutcome::ok());
                }
                Err(err) => replier.send(ExecuteOutcome::error("StdinError", err.to_string(), Vec::new())),
            }
        } else if code == "later" {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                replier.send(ExecuteOutcome::ok());
            });
        } else if code == "forget" {
            drop(replier);
        } else if code == "panic" {
            panic!("interpreter exploded");
        } else {
            let mut data = Map::new();
            data.insert("text/plain".to_string(), json!(code));
            replier
                .outputs()
                .execute_result(replier.execution_count(), data, Map::new())
                .expect("result should publish");
            replier.send(ExecuteOutcome::ok());
        }
    }

    fn complete(&self, request: &CompleteRequest) -> CompleteReply {
        let cursor = request.cursor();
        let prefix: String = request.code.chars().take(cursor).collect();
        let matches = ["print", "println", "probe"]
            .iter()
            .filter(|word| word.starts_with(&prefix))
            .map(|word| word.to_string())
            .collect();
        CompleteReply::new(matches, 0, cursor)
    }

    fn inspect(&self, _request: &InspectRequest) -> InspectReply {
        InspectReply::not_found()
    }

    fn is_complete(&self, request: &IsCompleteRequest) -> IsCompleteReply {
        if request.code.trim_end().ends_with(':') {
            IsCompleteReply::incomplete("    ")
        } else {
            IsCompleteReply::complete()
        }
    }

    fn kernel_info(&self) -> KernelInfo {
        KernelInfo {
            implementation: "script".to_string(),
            implementation_version: "0.1.0".to_string(),
            language_info: LanguageInfo {
                name: "script".to_string(),
                version: "1.0".to_string(),
                mimetype: "text/plain".to_string(),
                file_extension: ".txt".to_string(),
                pygments_lexer: None,
                codemirror_mode: None,
                nbconvert_exporter: None,
            },
            banner: "script kernel".to_string(),
            help_links: Vec::new(),
        }
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn internal_request(&self, request: &Value) -> Value {
        json!({ "status": "ok", "seen": request })
    }
}

/// Backlog handed to continuations.
#[derive(Default)]
pub struct TestQueue {
    pub backlog: VecDeque<Message>,
}

impl ShellQueue for TestQueue {
    fn abort_queue(&mut self, handler: &mut dyn FnMut(Message)) {
        while let Some(message) = self.backlog.pop_front() {
            handler(message);
        }
    }
}

pub fn request(msg_type: &str, content: Value) -> Message {
    Message::new(
        vec![bytes::Bytes::from_static(b"client-identity")],
        MessageBody::new(
            Header::new(msg_type, "client-session", "client"),
            None,
            json!({}),
            content,
        ),
    )
}

/// Run a deferred dispatch to completion against `queue`.
pub fn drive(dispatch: Dispatch, queue: &mut TestQueue) {
    let Dispatch::Deferred(deferred) = dispatch else {
        return;
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match deferred.poll() {
            DeferredState::Ready(continuation) => {
                let queue: &mut dyn ShellQueue = queue;
                return continuation(queue);
            }
            DeferredState::Pending => {
                assert!(Instant::now() < deadline, "deferred request never completed");
                thread::sleep(Duration::from_millis(5));
            }
            DeferredState::Abandoned => panic!("deferred request was abandoned"),
        }
    }
}

pub struct Harness {
    pub server: Arc<MockServer>,
    pub interpreter: Arc<ScriptInterpreter>,
    pub core: Arc<KernelCore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|collaborators| collaborators)
    }

    pub fn with(customize: impl FnOnce(Collaborators) -> Collaborators) -> Self {
        let server = MockServer::new();
        let interpreter = Arc::new(ScriptInterpreter::default());
        let collaborators = customize(Collaborators::new(interpreter.clone()));
        let core = KernelCore::new(KernelIdentity::new("tester"), server.clone(), collaborators);
        Self {
            server,
            interpreter,
            core,
        }
    }

    /// Dispatch a request on `channel`, run it to completion and return its header.
    pub fn send(&self, channel: Channel, msg_type: &str, content: Value) -> Header {
        self.send_with_backlog(channel, msg_type, content, &mut TestQueue::default())
    }

    pub fn shell(&self, msg_type: &str, content: Value) -> Header {
        self.send(Channel::Shell, msg_type, content)
    }

    pub fn send_with_backlog(
        &self,
        channel: Channel,
        msg_type: &str,
        content: Value,
        queue: &mut TestQueue,
    ) -> Header {
        let message = request(msg_type, content);
        let header = message.header().clone();
        let dispatch = match channel {
            Channel::Shell => self.core.dispatch_shell(message),
            Channel::Control => self.core.dispatch_control(message),
        };
        drive(dispatch, queue);
        header
    }

    /// The single reply to `parent` on `channel`.
    pub fn reply_to(&self, channel: Channel, parent: &Header) -> Message {
        let replies: Vec<Message> = self
            .server
            .replies(channel)
            .into_iter()
            .filter(|reply| reply.body.parent_header.as_ref().map(|h| &h.msg_id) == Some(&parent.msg_id))
            .collect();
        assert_eq!(replies.len(), 1, "expected exactly one reply to {}", parent.msg_type);
        replies.into_iter().next().unwrap()
    }

    pub fn has_reply(&self, channel: Channel, parent: &Header) -> bool {
        self.server
            .replies(channel)
            .iter()
            .any(|reply| reply.body.parent_header.as_ref().map(|h| &h.msg_id) == Some(&parent.msg_id))
    }
}
