// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `pipeguard`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipeguard",
    version,
    about = "Single-flight admission and execution for a staged batch pipeline.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "PIPEGUARD_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEGUARD_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the admission/status HTTP server.
    Serve {
        /// Override `[server] host`.
        #[arg(long)]
        host: Option<String>,

        /// Override `[server] port`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the pipeline worker.
    Worker {
        /// Handle a trigger that is already present, then exit. No watching.
        #[arg(long)]
        once: bool,
    },

    /// Parse + validate the config and print it, without running anything.
    Check,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = CliArgs::try_parse_from([
            "pipeguard",
            "worker",
            "--once",
            "--config",
            "deploy/Pipeguard.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, "deploy/Pipeguard.toml");
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(args.command, Command::Worker { once: true }));
    }

    #[test]
    fn serve_overrides_are_optional() {
        let args = CliArgs::try_parse_from(["pipeguard", "serve", "--port", "9000"]).unwrap();
        match args.command {
            Command::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
