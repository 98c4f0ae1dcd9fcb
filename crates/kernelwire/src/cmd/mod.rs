use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use kernelwire_server::Topology;
use kernelwire_transport::ConnectionInfo;

use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod execute;
pub mod info;
pub mod monitor;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the echo kernel.
    Run(RunArgs),
    /// Ask a running kernel for its kernel_info and heartbeat.
    Info(InfoArgs),
    /// Execute code on a running kernel and print its outputs.
    Execute(ExecuteArgs),
    /// Print iopub broadcasts of a running kernel.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Execute(args) => execute::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Connection file to serve. Ports set to 0 are negotiated.
    /// Without one, every port is negotiated and a fresh key is generated.
    #[arg(short = 'f', long = "connection-file", value_name = "FILE", env = "KERNELWIRE_CONNECTION_FILE")]
    pub connection_file: Option<PathBuf>,
    /// Write the resolved connection file here once every port is bound.
    #[arg(long, value_name = "FILE")]
    pub write_connection: Option<PathBuf>,
    /// How shell and control are spread across threads.
    #[arg(long, default_value_t = Topology::ControlMain)]
    pub topology: Topology,
    /// IP to bind when no connection file is given.
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,
    /// Username stamped on every outgoing header.
    #[arg(long)]
    pub username: Option<String>,
    /// Debug adapter to bridge debug_request to (host:port).
    #[arg(long, value_name = "ADDR")]
    pub debugger: Option<String>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Connection file of the kernel.
    pub connection_file: PathBuf,
    /// Reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ExecuteArgs {
    /// Connection file of the kernel.
    pub connection_file: PathBuf,
    /// Code to execute.
    pub code: String,
    /// Answer input requests with these values, in order. Further requests
    /// read a line from stdin.
    #[arg(long = "input", value_name = "VALUE")]
    pub inputs: Vec<String>,
    /// Do not store the code in the kernel's history.
    #[arg(long)]
    pub no_history: bool,
    /// Time allowed for the whole execution (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Connection file of the kernel.
    pub connection_file: PathBuf,
    /// Only print these message types (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub msg_types: Option<Vec<String>>,
    /// Exit after printing N broadcasts.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn load_connection(path: &Path) -> CliResult<ConnectionInfo> {
    ConnectionInfo::from_file(path).map_err(|err| transport_error("connection file", err))
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("5s").expect("seconds should parse"), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").expect("bare number should parse"), Duration::from_secs(2));
        assert_eq!(
            parse_timeout("150ms").expect("millis should parse"),
            Duration::from_millis(150)
        );
    }

    #[test]
    fn parse_timeout_invalid() {
        for input in ["0s", "bad", "", "5m"] {
            let err = parse_timeout(input).expect_err("invalid timeout should fail");
            assert_eq!(err.code, USAGE);
        }
    }
}
