//! Debugger collaborators behind `debug_request`.
//!
//! [`NullDebugger`] declines everything. [`DapDebugger`] forwards requests to
//! a debug adapter speaking the Debug Adapter Protocol over TCP.

use std::collections::{BTreeMap, BTreeSet};
use std::net::TcpStream;

use kernelwire_frame::{DapConfig, DapReader, DapWriter};
use kernelwire_server::KernelServer;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{KernelError, Result};
use crate::publisher::Publisher;

/// Kernel services available while a debug request is processed.
pub struct DebugContext<'a> {
    server: &'a dyn KernelServer,
    publisher: Publisher,
}

impl<'a> DebugContext<'a> {
    pub fn new(server: &'a dyn KernelServer, publisher: Publisher) -> Self {
        Self { server, publisher }
    }

    /// Ask the shell thread an internal question.
    pub fn send_to_shell(&self, request: &Value) -> Result<Value> {
        Ok(self.server.send_to_shell(request)?)
    }

    /// Broadcast an adapter event as `debug_event`.
    pub fn publish_event(&self, event: &Value) -> Result<()> {
        self.publisher.publish("debug_event", event)
    }
}

pub trait Debugger: Send {
    /// Produce the `debug_reply` content for `request`.
    fn process_request(&mut self, context: &DebugContext<'_>, request: &Value) -> Value;

    /// Reported as `debugger` in `kernel_info_reply`.
    fn supported(&self) -> bool;
}

/// A DAP failure response for `request`.
pub fn failure_response(request: &Value, message: &str) -> Value {
    json!({
        "type": "response",
        "request_seq": request.get("seq").cloned().unwrap_or(Value::Null),
        "success": false,
        "command": request.get("command").cloned().unwrap_or(Value::Null),
        "message": message,
    })
}

fn success_response(request: &Value, body: Value) -> Value {
    json!({
        "type": "response",
        "request_seq": request.get("seq").cloned().unwrap_or(Value::Null),
        "success": true,
        "command": request.get("command").cloned().unwrap_or(Value::Null),
        "body": body,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDebugger;

impl Debugger for NullDebugger {
    fn process_request(&mut self, _context: &DebugContext<'_>, request: &Value) -> Value {
        failure_response(request, "debugger not supported")
    }

    fn supported(&self) -> bool {
        false
    }
}

struct AdapterConnection {
    reader: DapReader<TcpStream>,
    writer: DapWriter<TcpStream>,
}

impl AdapterConnection {
    fn open(address: &str, config: &DapConfig) -> Result<Self> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        let reader = DapReader::with_config_tcp(stream.try_clone()?, config.clone())?;
        let writer = DapWriter::with_config_tcp(stream, config.clone())?;
        Ok(Self { reader, writer })
    }
}

/// Forwards debug requests to a TCP debug adapter.
///
/// `initialize` first asks the shell thread to prepare the adapter with the
/// internal request `{"type": "debugger", "command": "init"}`. `debugInfo` is
/// answered locally; everything else needs a started adapter.
pub struct DapDebugger {
    address: String,
    config: DapConfig,
    connection: Option<AdapterConnection>,
    breakpoints: BTreeMap<String, Value>,
    stopped_threads: BTreeSet<i64>,
}

impl DapDebugger {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(address, DapConfig::default())
    }

    pub fn with_config(address: impl Into<String>, config: DapConfig) -> Self {
        Self {
            address: address.into(),
            config,
            connection: None,
            breakpoints: BTreeMap::new(),
            stopped_threads: BTreeSet::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.connection.is_some()
    }

    fn start(&mut self, context: &DebugContext<'_>) -> Result<()> {
        let answer = context.send_to_shell(&json!({ "type": "debugger", "command": "init" }))?;
        if answer.get("status").and_then(Value::as_str) == Some("error") {
            let what = answer
                .get("what")
                .and_then(Value::as_str)
                .unwrap_or("shell refused to start the debugger");
            return Err(KernelError::Debugger(what.to_string()));
        }
        self.connection = Some(AdapterConnection::open(&self.address, &self.config)?);
        info!(address = %self.address, "debug adapter connected");
        Ok(())
    }

    fn stop(&mut self) {
        self.connection = None;
        self.breakpoints.clear();
        self.stopped_threads.clear();
        info!("debug adapter disconnected");
    }

    fn debug_info(&self, request: &Value) -> Value {
        let breakpoints: Vec<Value> = self
            .breakpoints
            .iter()
            .map(|(source, list)| json!({ "source": source, "breakpoints": list }))
            .collect();
        success_response(
            request,
            json!({
                "isStarted": self.is_started(),
                "breakpoints": breakpoints,
                "stoppedThreads": self.stopped_threads,
            }),
        )
    }

    fn track_event(&mut self, event: &Value) {
        let body = &event["body"];
        match event.get("event").and_then(Value::as_str) {
            Some("stopped") => {
                if body["allThreadsStopped"].as_bool() == Some(true) {
                    if let Some(threads) = body["threadList"].as_array() {
                        self.stopped_threads.extend(threads.iter().filter_map(Value::as_i64));
                    }
                }
                if let Some(id) = body["threadId"].as_i64() {
                    self.stopped_threads.insert(id);
                }
            }
            Some("continued") => {
                if body["allThreadsContinued"].as_bool() == Some(true) {
                    self.stopped_threads.clear();
                } else if let Some(id) = body["threadId"].as_i64() {
                    self.stopped_threads.remove(&id);
                }
            }
            _ => {}
        }
    }

    /// Send `request` and wait for its response, publishing events that
    /// arrive in between.
    fn forward(&mut self, context: &DebugContext<'_>, request: &Value) -> Result<Value> {
        let seq = request.get("seq").cloned().unwrap_or(Value::Null);
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| KernelError::Debugger("debugger not started".to_string()))?;
        connection.writer.send_json(request)?;

        loop {
            let message = self
                .connection
                .as_mut()
                .ok_or_else(|| KernelError::Debugger("debugger not started".to_string()))?
                .reader
                .read_json()?;
            match message.get("type").and_then(Value::as_str) {
                Some("event") => {
                    self.track_event(&message);
                    if let Err(err) = context.publish_event(&message) {
                        warn!(error = %err, "failed to publish debug event");
                    }
                }
                Some("response") if message.get("request_seq") == Some(&seq) => return Ok(message),
                _ => debug!("ignoring unrelated adapter message"),
            }
        }
    }
}

impl Debugger for DapDebugger {
    fn process_request(&mut self, context: &DebugContext<'_>, request: &Value) -> Value {
        let command = request.get("command").and_then(Value::as_str).unwrap_or_default();

        if command == "debugInfo" {
            return self.debug_info(request);
        }
        if command == "initialize" && !self.is_started() {
            if let Err(err) = self.start(context) {
                warn!(error = %err, "debugger failed to start");
                return failure_response(request, &err.to_string());
            }
        }
        if !self.is_started() {
            return failure_response(request, "debugger not started");
        }

        if command == "setBreakpoints" {
            if let Some(source) = request["arguments"]["source"]["path"].as_str() {
                let list = request["arguments"]["breakpoints"].clone();
                self.breakpoints.insert(source.to_string(), list);
            }
        }

        let reply = match self.forward(context, request) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(command, error = %err, "debug adapter request failed");
                self.stop();
                return failure_response(request, &err.to_string());
            }
        };

        if command == "disconnect" {
            self.stop();
        }
        reply
    }

    fn supported(&self) -> bool {
        true
    }
}
