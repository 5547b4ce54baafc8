//! Stand-in cluster service.
//!
//! Plays the coordinator or a worker closely enough for the functional-test
//! harness: answers the health probe, serves build status and queue contents
//! from a fixture file, writes fixture artifacts into its base directory, and
//! shuts down on SIGTERM with a configurable exit code.

#![forbid(unsafe_code)]

mod api;
mod fixtures;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cr_harness::config::{BASE_CONFIG_SECTION, ConfigFile};
use secrecy::SecretString;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use api::StubState;
use fixtures::Fixtures;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Coordinator,
    Worker,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
        }
    }
}

#[derive(Parser)]
#[command(name = "cr-stub")]
#[command(author, version, about = "Stand-in coordinator/worker for harness tests")]
struct Cli {
    /// Role to play
    #[arg(long, value_enum)]
    role: Role,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long)]
    port: u16,

    /// Working directory; build artifacts go under results/master/
    #[arg(long)]
    base_dir: PathBuf,

    /// TOML config file; the secret is read from its [general] section
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coordinator URL (workers)
    #[arg(long)]
    coordinator_url: Option<String>,

    /// JSON file with canned builds and queue contents
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Exit code after a graceful shutdown
    #[arg(long, default_value = "0")]
    exit_code: i32,

    /// Keep running when asked to terminate
    #[arg(long)]
    ignore_term: bool,

    /// Enable verbose output
    #[arg(short, long, env = "CR_STUB_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!(role = cli.role.as_str(), port = cli.port, "Starting stub service");

    let secret = match &cli.config {
        Some(path) => load_secret(path)?,
        None => None,
    };
    if secret.is_none() {
        warn!("No secret configured; accepting unauthenticated requests");
    }

    let fixtures = match &cli.fixtures {
        Some(path) if cli.role == Role::Coordinator => Fixtures::load(path)?,
        _ => Fixtures::default(),
    };
    fixtures.write_artifacts(&cli.base_dir)?;

    if let Some(url) = &cli.coordinator_url {
        info!(coordinator = %url, "Worker attached to coordinator");
    }

    let router = api::create_router(StubState {
        role: cli.role.as_str(),
        fixtures,
        secret,
        started_at: Instant::now(),
    });

    // Must be in place before the listener is reachable.
    #[cfg(unix)]
    let shutdown = {
        use tokio::signal::unix::{SignalKind, signal};
        let term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        shutdown_signal(term, cli.ignore_term)
    };
    #[cfg(not(unix))]
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(exit_code = cli.exit_code, "Stub service stopped");
    std::process::exit(cli.exit_code)
}

fn load_secret(path: &std::path::Path) -> Result<Option<SecretString>> {
    let conf = ConfigFile::load(path)?;
    Ok(conf
        .read_value("secret", BASE_CONFIG_SECTION)
        .and_then(|value| value.as_str())
        .map(SecretString::from))
}

/// Resolves on SIGTERM or Ctrl-C. With `ignore_term`, SIGTERM is logged and
/// otherwise ignored.
#[cfg(unix)]
async fn shutdown_signal(mut term: tokio::signal::unix::Signal, ignore_term: bool) {
    loop {
        tokio::select! {
            _ = term.recv() => {
                if ignore_term {
                    warn!("Ignoring SIGTERM");
                    continue;
                }
                info!("Received SIGTERM, shutting down");
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                return;
            }
        }
    }
}
