//! termbridge CLI
//!
//! Single binary for both ends of a terminal session:
//! - `connect`: attach this terminal to a remote process
//! - `serve`: run a process on a PTY and let sessions attach to it

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tb_core::Endpoint;
use termbridge::commands;
use termbridge::output::print_error;

#[derive(Parser)]
#[command(name = "termbridge")]
#[command(author, version, about = "Attach a local terminal to a remote process")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "TERMBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach this terminal to a remote session (Ctrl+] detaches)
    Connect {
        /// Remote endpoint, e.g. ws://devbox:8080/ws (overrides config)
        endpoint: Option<Endpoint>,
        /// Reconnect attempts before giving up (overrides config)
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Run a command on a PTY and serve it to sessions
    Serve {
        /// Listen address, e.g. ws://0.0.0.0:8080/ws (overrides config)
        listen: Option<Endpoint>,
        /// Append all process output to this file
        #[arg(short, long)]
        record: Option<PathBuf>,
        /// Also run the process on this terminal (Ctrl+] detaches)
        #[arg(short, long)]
        attach: bool,
        /// Command and arguments to run (default: $SHELL)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    // Logs go to stderr; stdout belongs to the remote terminal
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

/// Run the selected command and return the process exit code
async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Connect {
            endpoint,
            max_attempts,
        } => {
            let mut config = commands::load_settings(config_path)?.bridge;
            if let Some(endpoint) = endpoint {
                config.endpoint = Some(endpoint);
            }
            if let Some(attempts) = max_attempts {
                config.backoff.max_attempts = attempts;
            }
            let summary = commands::connect_command(config).await?;
            Ok(summary.exit_code.unwrap_or(0))
        }

        Commands::Serve {
            listen,
            record,
            attach,
            command,
        } => {
            let mut config = commands::load_settings(config_path)?.host;
            if let Some(listen) = listen {
                config.listen = Some(listen);
            }
            if record.is_some() {
                config.record = record;
            }
            if !command.is_empty() {
                config.command = command;
            }
            let exit_code = commands::serve_command(config, attach).await?;
            Ok(exit_code.unwrap_or(0))
        }

        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_show(config_path)?,
                ConfigAction::Path => commands::config_path(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, force)?,
            }
            Ok(0)
        }
    }
}
