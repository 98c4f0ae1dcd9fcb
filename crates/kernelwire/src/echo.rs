//! An interpreter whose language is "repeat what you were told".
//!
//! Statements:
//! - `print <text>` streams `<text>` to stdout
//! - `input <prompt>` asks the client for a line and streams it back
//! - `raise <message>` fails with `EchoError`
//! - anything else becomes the `text/plain` execute result
//!
//! A line ending in `\` continues on the next one. Comms opened against the
//! `echo` target send every message straight back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use kernelwire_core::{
    Comm, CompleteReply, CompleteRequest, ExecuteOutcome, ExecuteReplier, ExecuteRequest,
    HelpLink, InspectReply, InspectRequest, Interpreter, IsCompleteReply, IsCompleteRequest,
    KernelContext, KernelInfo, LanguageInfo, StreamName,
};
use kernelwire_frame::Message;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Comm target answered by [`EchoInterpreter`].
pub const ECHO_TARGET: &str = "echo";

const KEYWORDS: [(&str, &str); 3] = [
    ("input", "input <prompt>: read a line from the client"),
    ("print", "print <text>: write text to stdout"),
    ("raise", "raise <message>: fail the execution"),
];

#[derive(Debug, Default)]
pub struct EchoInterpreter {
    comms: Arc<Mutex<BTreeMap<String, Comm>>>,
}

impl EchoInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&self, request: &ExecuteRequest, replier: &ExecuteReplier) -> kernelwire_core::Result<ExecuteOutcome> {
        let code = request.code.replace("\\\n", "");
        let code = code.trim();
        let outputs = replier.outputs();

        if let Some(message) = statement(code, "raise") {
            let traceback = vec![format!("EchoError: {message}")];
            outputs.error("EchoError", message, traceback.clone())?;
            return Ok(ExecuteOutcome::error("EchoError", message, traceback));
        }
        if let Some(text) = statement(code, "print") {
            outputs.stream(StreamName::Stdout, format!("{text}\n"))?;
            return Ok(ExecuteOutcome::ok());
        }
        if let Some(prompt) = statement(code, "input") {
            let answer = replier.input(prompt, false)?;
            outputs.stream(StreamName::Stdout, format!("{answer}\n"))?;
            return Ok(ExecuteOutcome::ok());
        }
        if !code.is_empty() && !request.silent {
            let mut data = Map::new();
            data.insert("text/plain".to_string(), Value::String(code.to_string()));
            outputs.execute_result(replier.execution_count(), data, Map::new())?;
        }
        Ok(ExecuteOutcome::ok())
    }
}

impl Interpreter for EchoInterpreter {
    fn configure(&self, context: &KernelContext) {
        let comms = Arc::clone(&self.comms);
        context
            .comm_manager()
            .register_comm_target(ECHO_TARGET, move |comm: Comm, _open: &Message| {
                let echo = comm.clone();
                comm.on_message(move |message| {
                    let data = message.content()["data"].as_object().cloned().unwrap_or_default();
                    if let Err(err) = echo.send(data, json!({}), message.body.buffers.clone()) {
                        warn!(comm_id = %echo.id(), error = %err, "comm echo failed");
                    }
                });
                let registry = Arc::clone(&comms);
                let id = comm.id().to_string();
                comm.on_close(move |_| {
                    if let Some(comm) = lock(&registry).remove(&id) {
                        release(&comm);
                    }
                });
                debug!(comm_id = %comm.id(), "echo comm opened");
                lock(&comms).insert(comm.id().to_string(), comm);
            });
    }

    fn execute(&self, request: ExecuteRequest, replier: ExecuteReplier) {
        let outcome = self.run(&request, &replier).unwrap_or_else(|err| {
            ExecuteOutcome::error("KernelError", err.to_string(), Vec::new())
        });
        replier.send(outcome);
    }

    fn complete(&self, request: &CompleteRequest) -> CompleteReply {
        let cursor = request.cursor();
        let word = word_before(&request.code, cursor);
        let matches = KEYWORDS
            .iter()
            .map(|(keyword, _)| *keyword)
            .filter(|keyword| keyword.starts_with(word))
            .map(str::to_string)
            .collect();
        CompleteReply::new(matches, cursor - word.chars().count(), cursor)
    }

    fn inspect(&self, request: &InspectRequest) -> InspectReply {
        let word = word_before(&request.code, request.cursor());
        match KEYWORDS.iter().find(|(keyword, _)| *keyword == word) {
            Some((_, help)) => {
                let mut data = Map::new();
                data.insert("text/plain".to_string(), json!(help));
                InspectReply::found(data)
            }
            None => InspectReply::not_found(),
        }
    }

    fn is_complete(&self, request: &IsCompleteRequest) -> IsCompleteReply {
        if request.code.ends_with('\\') {
            IsCompleteReply::incomplete("")
        } else {
            IsCompleteReply::complete()
        }
    }

    fn kernel_info(&self) -> KernelInfo {
        KernelInfo {
            implementation: "kernelwire-echo".to_string(),
            implementation_version: env!("CARGO_PKG_VERSION").to_string(),
            language_info: LanguageInfo {
                name: "echo".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                mimetype: "text/plain".to_string(),
                file_extension: ".echo".to_string(),
                pygments_lexer: None,
                codemirror_mode: None,
                nbconvert_exporter: None,
            },
            banner: format!("kernelwire echo kernel {}", env!("CARGO_PKG_VERSION")),
            help_links: vec![HelpLink {
                text: "kernelwire".to_string(),
                url: "https://github.com/3leaps/kernelwire".to_string(),
            }],
        }
    }

    fn shutdown(&self) {
        let open = std::mem::take(&mut *lock(&self.comms));
        open.values().for_each(release);
        info!(open_comms = open.len(), "echo interpreter shutting down");
    }

    fn internal_request(&self, request: &Value) -> Value {
        json!({ "status": "ok", "echo": request })
    }
}

/// The echo handler holds a handle to its own comm; replacing it lets the
/// comm drop.
fn release(comm: &Comm) {
    comm.on_message(|_| {});
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Argument of `keyword <argument>`, or `None` when `code` is another statement.
fn statement<'a>(code: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = code.strip_prefix(keyword)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(char::is_whitespace).map(str::trim_start)
}

/// The run of non-whitespace characters ending at `cursor` (in characters).
fn word_before(code: &str, cursor: usize) -> &str {
    let end = code
        .char_indices()
        .nth(cursor)
        .map_or(code.len(), |(index, _)| index);
    let head = &code[..end];
    let start = head
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(index, c)| index + c.len_utf8());
    &head[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(code: &str, cursor_pos: Option<usize>) -> CompleteReply {
        EchoInterpreter::new().complete(&CompleteRequest {
            code: code.to_string(),
            cursor_pos,
        })
    }

    #[test]
    fn statements_need_a_separator() {
        assert_eq!(statement("print hello", "print"), Some("hello"));
        assert_eq!(statement("print", "print"), Some(""));
        assert_eq!(statement("printer", "print"), None);
        assert_eq!(statement("raise   spaced", "raise"), Some("spaced"));
    }

    #[test]
    fn word_before_counts_characters() {
        assert_eq!(word_before("print pr", 8), "pr");
        assert_eq!(word_before("é pri", 5), "pri");
        assert_eq!(word_before("print ", 6), "");
        assert_eq!(word_before("in", 99), "in");
    }

    #[test]
    fn completes_keywords_at_cursor() {
        let reply = complete("x = pr", None);
        assert_eq!(reply.matches, ["print"]);
        assert_eq!((reply.cursor_start, reply.cursor_end), (4, 6));

        let reply = complete("", None);
        assert_eq!(reply.matches.len(), KEYWORDS.len());
    }

    #[test]
    fn inspects_keywords_only() {
        let interpreter = EchoInterpreter::new();
        let found = interpreter.inspect(&InspectRequest {
            code: "raise".to_string(),
            cursor_pos: None,
            detail_level: 0,
        });
        assert!(found.found);
        assert!(found.data["text/plain"]
            .as_str()
            .is_some_and(|help| help.starts_with("raise")));

        let missing = interpreter.inspect(&InspectRequest {
            code: "whatever".to_string(),
            cursor_pos: None,
            detail_level: 1,
        });
        assert!(!missing.found);
    }

    #[test]
    fn trailing_backslash_continues() {
        let interpreter = EchoInterpreter::new();
        let pending = interpreter.is_complete(&IsCompleteRequest {
            code: "print a \\".to_string(),
        });
        assert_eq!(pending, IsCompleteReply::incomplete(""));
        let done = interpreter.is_complete(&IsCompleteRequest {
            code: "print a".to_string(),
        });
        assert_eq!(done, IsCompleteReply::complete());
    }
}
