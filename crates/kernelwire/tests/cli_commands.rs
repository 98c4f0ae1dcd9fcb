#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use kernelwire_transport::ConnectionInfo;
use serde_json::Value;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "kwcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn kernelwire() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_kernelwire"));
    command.arg("--log-level").arg("error");
    command
}

/// A kernel subprocess plus the connection file it wrote.
struct RunningKernel {
    child: Child,
    connection: PathBuf,
    dir: PathBuf,
}

impl RunningKernel {
    fn start(tag: &str) -> Self {
        let dir = unique_temp_dir(tag);
        let connection = dir.join("kernel.json");
        let child = kernelwire()
            .arg("--format")
            .arg("json")
            .arg("run")
            .arg("--write-connection")
            .arg(&connection)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("run command should start");
        wait_for_file(&connection, Duration::from_secs(5));
        Self {
            child,
            connection,
            dir,
        }
    }
}

impl Drop for RunningKernel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn wait_for_file(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("{} was never written", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn json_stdout(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("command should emit json")
}

#[test]
fn run_writes_a_complete_connection_file() {
    let kernel = RunningKernel::start("conn");
    let info = ConnectionInfo::from_file(&kernel.connection).expect("connection file should parse");
    assert_ne!(info.shell_port, 0);
    assert_ne!(info.hb_port, 0);
    assert!(!info.key.is_empty());
    assert_eq!(info.kernel_name.as_deref(), Some("echo"));
}

#[test]
fn info_reports_the_echo_kernel() {
    let kernel = RunningKernel::start("info");
    let output = kernelwire()
        .arg("--format")
        .arg("json")
        .arg("info")
        .arg(&kernel.connection)
        .output()
        .expect("info should run");

    assert!(output.status.success());
    let payload = json_stdout(&output);
    assert_eq!(payload["implementation"], "kernelwire-echo");
    assert_eq!(payload["language"], "echo");
    assert_eq!(payload["protocol_version"], kernelwire_frame::PROTOCOL_VERSION);
    assert_eq!(payload["heartbeat"], true);
}

#[test]
fn execute_prints_outputs_and_answers_input() {
    let kernel = RunningKernel::start("execute");

    let output = kernelwire()
        .arg("--format")
        .arg("json")
        .arg("execute")
        .arg(&kernel.connection)
        .arg("input your name? ")
        .arg("--input")
        .arg("Ada")
        .output()
        .expect("execute should run");
    assert!(output.status.success());
    let payload = json_stdout(&output);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["execution_count"], 1);
    assert_eq!(payload["outputs"][0]["msg_type"], "stream");
    assert_eq!(payload["outputs"][0]["content"]["text"], "Ada\n");

    let output = kernelwire()
        .arg("--format")
        .arg("raw")
        .arg("execute")
        .arg(&kernel.connection)
        .arg("raise nope")
        .output()
        .expect("execute should run");
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "EchoError: nope\n");
}

#[test]
fn info_timeout_returns_124() {
    let dir = unique_temp_dir("silent");
    let connection = dir.join("kernel.json");
    let info = ConnectionInfo {
        shell_port: 1,
        control_port: 2,
        stdin_port: 3,
        iopub_port: 4,
        hb_port: 5,
        key: "k".to_string(),
        ..ConnectionInfo::default()
    };
    info.write_to(&connection).expect("connection file should be written");

    let output = kernelwire()
        .arg("info")
        .arg(&connection)
        .arg("--timeout")
        .arg("500ms")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_connection_file_fails() {
    let output = kernelwire()
        .arg("info")
        .arg("/nonexistent/kernelwire/kernel.json")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("kernel.json"));
}

#[test]
fn version_reports_package_version() {
    let output = kernelwire().arg("version").output().expect("version should run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("kernelwire {}", env!("CARGO_PKG_VERSION"))
    );
}
