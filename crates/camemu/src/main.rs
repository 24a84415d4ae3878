mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "camemu", version, about = "Camera emulator and control CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Control endpoint socket path.
    #[arg(long, value_name = "PATH", env = "CAMEMU_CTRL", global = true)]
    ctrl: Option<PathBuf>,

    /// Control reply timeout (e.g. 1s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "1000ms", global = true)]
    timeout: String,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let global = cmd::GlobalArgs {
        ctrl: cli.ctrl,
        timeout: cli.timeout,
        format,
    };
    let result = cmd::run(cli.command, &global);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
