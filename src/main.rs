// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lineboard-server
//!
//! Concurrent, multi-client document server speaking a line-oriented text
//! protocol over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default bind/port
//! lineboard-server
//!
//! # Custom port and config
//! lineboard-server --port 7878 --config server.json
//! ```

use clap::Parser;
use lineboard_server::{DocumentServer, ServerConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// lineboard-server - concurrent document server over a line-oriented TCP protocol.
#[derive(Parser, Debug)]
#[command(name = "lineboard-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on.
    #[arg(short, long, default_value = "7878")]
    port: u16,

    /// Bind address.
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Configuration file (JSON format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(config_path) = args.config {
        info!("loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            log_level: args.log_level.clone(),
        }
    };

    info!("+----------------------------------------------------+");
    info!(
        "|       lineboard-server v{}                      |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind: {}:{}", config.bind_address, config.port);
    info!("+----------------------------------------------------+");

    let server = DocumentServer::new(config)?;

    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, stopping server...");
        server_handle.shutdown().await;
    });

    server.run().await?;

    info!("lineboard-server stopped");
    Ok(())
}
