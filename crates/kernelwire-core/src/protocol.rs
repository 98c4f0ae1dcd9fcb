//! Typed request and reply content, one shape per message type.
//!
//! Request structs carry protocol defaults so sparse client content parses.
//! Reply structs serialize to the exact content object sent on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

/// Generic reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    #[default]
    Ok,
    Error,
    Aborted,
}

// execute

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
    #[serde(default = "default_true")]
    pub allow_stdin: bool,
    #[serde(default)]
    pub stop_on_error: bool,
}

/// What an interpreter reports when an execution finishes.
///
/// Serializes to the `execute_reply` content minus `execution_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteOutcome {
    Ok {
        #[serde(default)]
        payload: Vec<Value>,
        #[serde(default)]
        user_expressions: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl ExecuteOutcome {
    pub fn ok() -> Self {
        ExecuteOutcome::Ok {
            payload: Vec::new(),
            user_expressions: Map::new(),
        }
    }

    pub fn error(ename: impl Into<String>, evalue: impl Into<String>, traceback: Vec<String>) -> Self {
        ExecuteOutcome::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    pub fn status(&self) -> ReplyStatus {
        match self {
            ExecuteOutcome::Ok { .. } => ReplyStatus::Ok,
            ExecuteOutcome::Error { .. } => ReplyStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: u32,
}

// complete / inspect / is_complete

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    #[serde(default)]
    pub cursor_pos: Option<usize>,
}

impl CompleteRequest {
    /// Cursor position in characters; the end of the code when absent.
    pub fn cursor(&self) -> usize {
        self.cursor_pos.unwrap_or_else(|| self.code.chars().count())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteReply {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub status: ReplyStatus,
}

impl CompleteReply {
    pub fn new(matches: Vec<String>, cursor_start: usize, cursor_end: usize) -> Self {
        Self {
            matches,
            cursor_start,
            cursor_end,
            metadata: Map::new(),
            status: ReplyStatus::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub code: String,
    #[serde(default)]
    pub cursor_pos: Option<usize>,
    #[serde(default)]
    pub detail_level: u8,
}

impl InspectRequest {
    pub fn cursor(&self) -> usize {
        self.cursor_pos.unwrap_or_else(|| self.code.chars().count())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectReply {
    #[serde(default)]
    pub status: ReplyStatus,
    pub found: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl InspectReply {
    pub fn not_found() -> Self {
        Self {
            status: ReplyStatus::Ok,
            found: false,
            data: Map::new(),
            metadata: Map::new(),
        }
    }

    pub fn found(data: Map<String, Value>) -> Self {
        Self {
            found: true,
            data,
            ..Self::not_found()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteReply {
    pub status: Completeness,
    /// Only meaningful for `incomplete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent: Option<String>,
}

impl IsCompleteReply {
    pub fn complete() -> Self {
        Self {
            status: Completeness::Complete,
            indent: None,
        }
    }

    pub fn incomplete(indent: impl Into<String>) -> Self {
        Self {
            status: Completeness::Incomplete,
            indent: Some(indent.into()),
        }
    }

    pub fn with_status(status: Completeness) -> Self {
        Self { status, indent: None }
    }
}

// kernel_info

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub mimetype: String,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pygments_lexer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codemirror_mode: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbconvert_exporter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpLink {
    pub text: String,
    pub url: String,
}

/// Interpreter self-description for `kernel_info_reply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub help_links: Vec<HelpLink>,
}

// history

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistAccessType {
    #[default]
    Tail,
    Range,
    Search,
}

fn default_n() -> usize {
    10
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_start() -> u32 {
    1
}

fn default_stop() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub hist_access_type: HistAccessType,
    #[serde(default)]
    pub output: bool,
    #[serde(default = "default_true")]
    pub raw: bool,
    #[serde(default)]
    pub session: i64,
    #[serde(default = "default_start")]
    pub start: u32,
    #[serde(default = "default_stop")]
    pub stop: u32,
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub unique: bool,
}

impl Default for HistoryRequest {
    fn default() -> Self {
        Self {
            hist_access_type: HistAccessType::Tail,
            output: false,
            raw: true,
            session: 0,
            start: default_start(),
            stop: default_stop(),
            n: default_n(),
            pattern: default_pattern(),
            unique: false,
        }
    }
}

/// One history row: `[session, line, input]` or `[session, line, [input, output]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Input(i64, u32, String),
    WithOutput(i64, u32, (String, Option<String>)),
}

impl HistoryEntry {
    pub fn line(&self) -> u32 {
        match self {
            HistoryEntry::Input(_, line, _) | HistoryEntry::WithOutput(_, line, _) => *line,
        }
    }

    pub fn input(&self) -> &str {
        match self {
            HistoryEntry::Input(_, _, input) | HistoryEntry::WithOutput(_, _, (input, _)) => input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HistoryReply {
    Ok { history: Vec<HistoryEntry> },
    Error { ename: String, evalue: String },
}

// comms

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommInfoRequest {
    #[serde(default)]
    pub target_name: Option<String>,
}

impl CommInfoRequest {
    /// The filter to apply; empty and null names mean every comm.
    pub fn filter(&self) -> Option<&str> {
        self.target_name.as_deref().filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommOpen {
    pub comm_id: String,
    pub target_name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
}

/// Content of `comm_msg` and `comm_close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommData {
    pub comm_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

// lifecycle

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Starting,
    Busy,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: ExecutionState,
}

// stdin

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReply {
    pub value: String,
}

// iopub outputs

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: StreamName,
    pub text: String,
}

/// Content of `display_data` and `update_display_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DisplayData {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub transient: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: u32,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutput {
    #[serde(default)]
    pub wait: bool,
}
