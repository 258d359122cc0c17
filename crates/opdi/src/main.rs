mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "opdi", version, about = "OPDI master console and demo slave")]
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
    use super::*;

    #[test]
    fn parses_caps_subcommand() {
        let cli = Cli::try_parse_from(["opdi", "caps", "opdi_tcp://device.local"])
            .expect("caps args should parse");
        assert!(matches!(cli.command, Command::Caps(_)));
    }

    #[test]
    fn parses_set_subcommand_with_line() {
        let cli = Cli::try_parse_from([
            "opdi",
            "set",
            "opdi_tcp://device.local",
            "door",
            "--line",
            "high",
        ])
        .expect("set args should parse");
        assert!(matches!(cli.command, Command::Set(_)));
    }

    #[test]
    fn parses_serve_with_idle_timeout() {
        let cli = Cli::try_parse_from(["opdi", "serve", "--idle-timeout", "30"])
            .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));
    }
}
