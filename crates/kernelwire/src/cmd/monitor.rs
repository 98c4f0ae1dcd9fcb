use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kernelwire_server::{KernelClient, ServerError};

use crate::cmd::{load_connection, MonitorArgs};
use crate::exit::{server_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_broadcast, OutputFormat};

/// How often the receive loop checks for Ctrl-C.
const TICK: Duration = Duration::from_millis(250);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let connection = load_connection(&args.connection_file)?;
    let client = KernelClient::connect(&connection).map_err(|err| server_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let broadcast = match client.recv_iopub(TICK) {
            Ok(broadcast) => broadcast,
            Err(ServerError::Timeout(_)) => continue,
            Err(err) => return Err(server_error("receive failed", err)),
        };

        if let Some(msg_types) = &args.msg_types {
            if !msg_types.iter().any(|msg_type| msg_type == broadcast.msg_type()) {
                continue;
            }
        }

        print_broadcast(&broadcast, format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
