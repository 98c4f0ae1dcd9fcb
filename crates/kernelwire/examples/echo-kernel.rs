//! Serve the echo kernel and drive it from an in-process client.
//!
//! Run with:
//!   cargo run -p kernelwire --example echo-kernel
//!
//! The connection file is written to the temp directory, so a Jupyter
//! console can attach with `jupyter console --existing <path>` while the
//! example waits for Enter.

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use kernelwire::frame::{new_id, Channel};
use kernelwire::kernel::Kernel;
use kernelwire::server::{is_child_of, KernelClient, KernelServer};
use kernelwire::transport::ConnectionInfo;
use kernelwire::EchoInterpreter;
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let info = ConnectionInfo {
        key: new_id(),
        kernel_name: Some("echo".to_string()),
        ..ConnectionInfo::default()
    };
    let kernel = Kernel::builder(info, EchoInterpreter::new()).build()?;
    let info = kernel.connection_info().clone();
    let path = std::env::temp_dir().join(format!("kernelwire-echo-{}.json", std::process::id()));
    info.write_to(&path)?;
    eprintln!("Connection file: {}", path.display());

    let handle = kernel.handle();
    let running = thread::spawn(move || kernel.run());

    let client = KernelClient::connect(&info)?;
    let ready = client.wait_for_ready(Duration::from_secs(5))?;
    eprintln!("Kernel ready: {}", ready.content()["banner"]);

    let request = client.request(Channel::Shell, "execute_request", json!({ "code": "print hello from kernelwire" }))?;
    loop {
        let broadcast = client.recv_iopub(Duration::from_secs(5))?;
        if !is_child_of(broadcast.body.parent_header.as_ref(), &request) {
            continue;
        }
        if broadcast.msg_type() == "stream" {
            print!("{}", broadcast.content()["text"].as_str().unwrap_or_default());
        }
        if broadcast.msg_type() == "status" && broadcast.content()["execution_state"] == "idle" {
            break;
        }
    }

    eprintln!("Press Enter to stop the kernel.");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    handle.stop();
    running.join().map_err(|_| "kernel thread panicked")??;
    let _ = std::fs::remove_file(&path);
    Ok(())
}
