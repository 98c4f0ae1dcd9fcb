use std::time::Instant;

use kernelwire_server::KernelClient;
use serde::Serialize;
use serde_json::Value;

use crate::cmd::{load_connection, parse_timeout, InfoArgs};
use crate::exit::{server_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    endpoint: String,
    implementation: String,
    implementation_version: String,
    language: String,
    language_version: String,
    protocol_version: String,
    banner: String,
    debugger: bool,
    heartbeat: bool,
    ready_ms: f64,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let connection = load_connection(&args.connection_file)?;
    let client = KernelClient::connect(&connection).map_err(|err| server_error("connect failed", err))?;

    let started = Instant::now();
    let reply = client
        .wait_for_ready(timeout)
        .map_err(|err| server_error("kernel not ready", err))?;
    let ready_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

    let heartbeat = client
        .heartbeat(timeout)
        .map_err(|err| server_error("heartbeat failed", err))?;

    let content = reply.content();
    let out = InfoOutput {
        endpoint: format!("{}://{}", connection.transport, connection.ip),
        implementation: text(&content["implementation"]),
        implementation_version: text(&content["implementation_version"]),
        language: text(&content["language_info"]["name"]),
        language_version: text(&content["language_info"]["version"]),
        protocol_version: text(&content["protocol_version"]),
        banner: text(&content["banner"]),
        debugger: content["debugger"].as_bool().unwrap_or(false),
        heartbeat,
        ready_ms,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => println!("{}", out.implementation),
        _ => print_fields(
            "Kernel Info",
            &[
                ("endpoint", out.endpoint.clone()),
                ("implementation", format!("{} {}", out.implementation, out.implementation_version)),
                ("language", format!("{} {}", out.language, out.language_version)),
                ("protocol", out.protocol_version.clone()),
                ("debugger", out.debugger.to_string()),
                ("heartbeat", if out.heartbeat { "ok" } else { "no answer" }.to_string()),
                ("ready after", format!("{:.2}ms", out.ready_ms)),
                ("banner", out.banner.clone()),
            ],
            format,
        ),
    }
    Ok(SUCCESS)
}

fn text(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}
