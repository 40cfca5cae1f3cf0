//! Caching forward HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                    CACHING PROXY                     │
//!                         │                                                      │
//!   Client Request        │  ┌──────────┐   ┌──────────┐   ┌──────────────┐      │
//!   ──────────────────────┼─▶│   net    │──▶│  hijack  │──▶│    http      │      │
//!                         │  │ listener │   │ classify │   │  dispatcher  │      │
//!                         │  └──────────┘   └────┬─────┘   └──────┬───────┘      │
//!                         │                      │ CONNECT        │              │
//!                         │                      ▼                ▼              │
//!                         │               ┌──────────┐    ┌──────────────┐       │
//!                         │               │  tunnel  │    │ cache (SQLite)│      │
//!                         │               │  relay   │    └──────┬───────┘       │
//!                         │               └────┬─────┘           │ miss          │
//!                         │                    │                 ▼               │
//!                         │                    │          ┌──────────────┐       │
//!                         │                    │          │   upstream   │       │
//!                         │                    │          │   fetcher    │       │
//!                         │                    │          └──────┬───────┘       │
//!                         └────────────────────┼─────────────────┼───────────────┘
//!                                              ▼                 ▼
//!                                        Origin (TCP)      Origin (HTTP/1.1)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use caching_proxy::config::{read_config, validate_config};
use caching_proxy::lifecycle::startup;
use caching_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "caching-proxy")]
#[command(about = "Forward HTTP proxy that caches plaintext responses and tunnels CONNECT", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override cache.database_path.
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match read_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("caching-proxy: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    if let Some(database) = cli.database {
        config.cache.database_path = database;
    }
    if let Err(errors) = validate_config(&config) {
        for error in errors {
            eprintln!("caching-proxy: invalid configuration: {error}");
        }
        return ExitCode::FAILURE;
    }

    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        database = %config.cache.database_path.display(),
        "caching-proxy starting"
    );

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
