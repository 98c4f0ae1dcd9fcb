use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use kernelwire_frame::{Channel, Header, Message};
use kernelwire_server::{is_child_of, KernelClient, ServerError};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::cmd::{load_connection, parse_timeout, ExecuteArgs};
use crate::exit::{io_error, server_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_json, print_raw, visible_text, OutputFormat};

/// Slice of the overall timeout spent waiting on each socket per turn.
const POLL: Duration = Duration::from_millis(20);

#[derive(Serialize)]
struct OutputRecord {
    msg_type: String,
    content: Value,
}

#[derive(Serialize)]
struct ExecuteOutput {
    msg_id: String,
    status: String,
    execution_count: Option<u64>,
    outputs: Vec<OutputRecord>,
}

pub fn run(args: ExecuteArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let connection = load_connection(&args.connection_file)?;
    let client = KernelClient::connect(&connection).map_err(|err| server_error("connect failed", err))?;
    client
        .wait_for_ready(timeout)
        .map_err(|err| server_error("kernel not ready", err))?;

    let request = client
        .request(
            Channel::Shell,
            "execute_request",
            json!({
                "code": args.code,
                "silent": false,
                "store_history": !args.no_history,
                "user_expressions": {},
                "allow_stdin": true,
                "stop_on_error": true,
            }),
        )
        .map_err(|err| server_error("execute_request failed", err))?;

    let mut inputs: VecDeque<String> = args.inputs.into();
    let mut reply: Option<Message> = None;
    let mut idle = false;
    let mut outputs = Vec::new();
    let deadline = Instant::now() + timeout;

    while reply.is_none() || !idle {
        if Instant::now() >= deadline {
            return Err(CliError::new(
                TIMEOUT,
                format!("execution did not finish within {timeout:?}"),
            ));
        }

        if let Some(prompt) = poll(client.recv_stdin(POLL))? {
            let value = match inputs.pop_front() {
                Some(value) => value,
                None => read_line(prompt.content()["prompt"].as_str().unwrap_or_default())?,
            };
            client
                .input_reply(prompt.header(), &value)
                .map_err(|err| server_error("input_reply failed", err))?;
        }

        if let Some(broadcast) = poll(client.recv_iopub(POLL))? {
            if is_child_of(broadcast.body.parent_header.as_ref(), &request) {
                let msg_type = broadcast.msg_type();
                if msg_type == "status" {
                    idle |= broadcast.content()["execution_state"] == "idle";
                } else if msg_type != "execute_input" {
                    if matches!(format, OutputFormat::Raw | OutputFormat::Pretty | OutputFormat::Table) {
                        if let Some(text) = visible_text(msg_type, broadcast.content()) {
                            print_raw(text.as_bytes());
                        }
                    }
                    outputs.push(OutputRecord {
                        msg_type: msg_type.to_string(),
                        content: broadcast.content().clone(),
                    });
                }
            }
        }

        if reply.is_none() {
            reply = poll(client.recv(Channel::Shell, POLL))?
                .filter(|message| is_reply_to(message, &request));
        }
    }

    let reply = reply.ok_or_else(|| CliError::new(FAILURE, "execute_reply missing"))?;
    let content = reply.content();
    let status = content["status"].as_str().unwrap_or("unknown").to_string();
    debug!(status = %status, outputs = outputs.len(), "execution finished");

    match format {
        OutputFormat::Json => print_json(&ExecuteOutput {
            msg_id: request.msg_id.clone(),
            status: status.clone(),
            execution_count: content["execution_count"].as_u64(),
            outputs,
        }),
        OutputFormat::Raw => {}
        _ => println!(
            "[{}] {}",
            content["execution_count"].as_u64().unwrap_or_default(),
            status
        ),
    }

    if status == "ok" {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn is_reply_to(message: &Message, request: &Header) -> bool {
    is_child_of(message.body.parent_header.as_ref(), request)
}

/// A timed-out poll is not an error; the loop just moves on.
fn poll<T>(result: Result<T, ServerError>) -> CliResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ServerError::Timeout(_)) => Ok(None),
        Err(err) => Err(server_error("receive failed", err)),
    }
}

fn read_line(prompt: &str) -> CliResult<String> {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{prompt}");
    let _ = stderr.flush();

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| io_error("read input", err))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
