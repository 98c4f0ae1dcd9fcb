use std::path::Path;

use kernelwire::EchoInterpreter;
use kernelwire_core::{DapDebugger, Kernel};
use kernelwire_frame::new_id;
use kernelwire_server::KernelServer;
use kernelwire_transport::ConnectionInfo;
use tracing::info;

use crate::cmd::{load_connection, RunArgs};
use crate::exit::{io_error, kernel_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let connection = match &args.connection_file {
        Some(path) => load_connection(path)?,
        None => ConnectionInfo {
            ip: args.ip.clone(),
            key: new_id(),
            kernel_name: Some("echo".to_string()),
            ..ConnectionInfo::default()
        },
    };

    let mut builder = Kernel::builder(connection, EchoInterpreter::new()).topology(args.topology);
    if let Some(username) = &args.username {
        builder = builder.username(username.as_str());
    }
    if let Some(address) = &args.debugger {
        builder = builder.debugger(DapDebugger::new(address.as_str()));
    }
    let kernel = builder.build().map_err(|err| kernel_error("kernel startup failed", err))?;

    let resolved = kernel.connection_info().clone();
    if let Some(path) = &args.write_connection {
        write_atomically(&resolved, path)?;
    }
    report(&resolved, &args, format);

    let handle = kernel.handle();
    ctrlc::set_handler(move || {
        info!("interrupt received; stopping kernel");
        handle.stop();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    kernel.run().map_err(|err| kernel_error("kernel failed", err))?;
    Ok(SUCCESS)
}

/// Clients poll for the file, so it must never be seen half written.
fn write_atomically(info: &ConnectionInfo, path: &Path) -> CliResult<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".partial");
    info.write_to(&staging)
        .map_err(|err| transport_error("write connection file", err))?;
    std::fs::rename(&staging, path)
        .map_err(|err| io_error(&format!("write connection file {}", path.display()), err))
}

fn report(info: &ConnectionInfo, args: &RunArgs, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Raw => {}
        _ => {
            let mut fields = vec![
                ("transport", info.transport.clone()),
                ("ip", info.ip.clone()),
                ("shell", info.shell_port.to_string()),
                ("control", info.control_port.to_string()),
                ("stdin", info.stdin_port.to_string()),
                ("iopub", info.iopub_port.to_string()),
                ("heartbeat", info.hb_port.to_string()),
                ("signature", info.signature_scheme.clone()),
                ("topology", args.topology.to_string()),
            ];
            if let Some(path) = &args.write_connection {
                fields.push(("connection file", path.display().to_string()));
            }
            print_fields("Kernel", &fields, format);
        }
    }
}
