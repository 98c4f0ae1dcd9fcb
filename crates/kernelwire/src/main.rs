mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "kernelwire", version, about = "Jupyter kernel protocol CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "KERNELWIRE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use kernelwire_server::Topology;

    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "kernelwire",
            "run",
            "--connection-file",
            "/tmp/kernel.json",
            "--topology",
            "shell-main",
        ])
        .expect("run args should parse");

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.topology, Topology::ShellMain);
                assert!(args.connection_file.is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_topology() {
        let err = Cli::try_parse_from(["kernelwire", "run", "--topology", "sideways"])
            .expect_err("unknown topology should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn execute_collects_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "kernelwire",
            "--format",
            "json",
            "execute",
            "/tmp/kernel.json",
            "input name",
            "--input",
            "Ada",
            "--input",
            "Grace",
        ])
        .expect("execute args should parse");

        match cli.command {
            Command::Execute(args) => {
                assert_eq!(args.code, "input name");
                assert_eq!(args.inputs, ["Ada", "Grace"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_monitor_filters() {
        let cli = Cli::try_parse_from([
            "kernelwire",
            "monitor",
            "/tmp/kernel.json",
            "--msg-types",
            "stream,error",
            "--count",
            "3",
        ])
        .expect("monitor args should parse");
        assert!(matches!(cli.command, Command::Monitor(_)));
    }
}
