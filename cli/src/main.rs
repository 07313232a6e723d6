// SPDX-License-Identifier: MIT OR Apache-2.0

//! lanlink CLI - Command-line interface for LAN sessions
//!
//! This binary provides a headless interface for hosting, finding and
//! joining LAN sessions. It's primarily used for manual and scripted testing
//! of the networking layer.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lanlink_cli::command::HELP;
use lanlink_cli::interactive::run_commands;
use lanlink_cli::{preflight, render};
use lanlink_network::config::{load_config, load_config_from};
use lanlink_network::{Session, SessionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "lanlink-cli",
    about = "Host, find and join LAN sessions",
    version
)]
struct Args {
    /// Configuration file (defaults to the per-user config file)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Mode,
}

/// What this instance does
#[derive(Subcommand, Debug)]
enum Mode {
    /// Host a session and announce it on the LAN
    Host {
        /// Name shown to searching clients
        #[clap(long, default_value = "")]
        name: String,
    },
    /// List sessions announced on the LAN
    Search {
        /// Stop after this many seconds (default: run until Ctrl+C)
        #[clap(long)]
        seconds: Option<u64>,

        /// Print each snapshot as JSON
        #[clap(long)]
        json: bool,
    },
    /// Join the session at an address (`ip`, `ip:port` or `host[:port]`)
    Join {
        /// Host address
        address: String,
    },
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => load_config_from(path),
        None => load_config().or_else(|e| {
            tracing::warn!("Using default configuration: {:#}", e);
            Ok(SessionConfig::default())
        }),
    }
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = resolve_config(args.config.as_ref()).context("Failed to load configuration")?;
    let session = Session::new(config);

    // Print status and received messages as they happen
    session.on_message(|m| println!("{}", render::render_message(m)));
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("{}", render::render_event(&event));
        }
    });

    let result = match args.command {
        Mode::Host { name } => {
            if let Some(warning) = preflight::host_port_warning(session.config().session_bind.port())
            {
                tracing::warn!("{}", warning);
            }
            session.start_host(&name).await.context("Failed to start hosting")?;
            run_interactive(&session).await
        }
        Mode::Search { seconds, json } => run_search(&session, seconds, json).await,
        Mode::Join { address } => {
            session
                .connect_to_server(&address)
                .await
                .with_context(|| format!("Failed to join {}", address))?;
            run_interactive(&session).await
        }
    };

    session.shutdown().await;
    result
}

/// Print the discovered hosts once per second
async fn run_search(session: &Session, seconds: Option<u64>, json: bool) -> Result<()> {
    if let Some(warning) = preflight::search_port_warning(session.config().discovery_bind.port()) {
        tracing::warn!("{}", warning);
    }
    session.start_searching().await.context("Failed to start searching")?;
    println!("Searching for LAN sessions. Press Ctrl+C to stop.");

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("\nReceived Ctrl+C, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                let peers = session.snapshot_peers();
                if json {
                    println!("{}", render::render_peers_json(&peers)?);
                } else {
                    println!("{}", render::render_peers(&peers));
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Read commands from stdin until `quit`, EOF, an input error or Ctrl+C
async fn run_interactive(session: &Session) -> Result<()> {
    println!("{}", HELP);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());

    tokio::select! {
        _ = signal::ctrl_c() => {
            println!("\nReceived Ctrl+C, shutting down gracefully...");
        }
        exit = run_commands(session, stdin) => {
            tracing::debug!(?exit, "Command loop ended");
        }
    }

    Ok(())
}
