//! CLI entry point (SPEC_FULL.md §13): loads defaults, merges a config file
//! and CLI overrides, then blocks serving connections until Ctrl-C.
//!
//! The teacher's `main.rs` hand-rolls an `argv` walk around its own
//! `load_server_config`; this crate's richer config surface (TOML-ish JSON,
//! Raft peer tables) is a better fit for `clap`'s derive API, which the rest
//! of this corpus also reaches for on CLI-carrying binaries.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use redcore::config::{Config, ReplicaOfConfig};
use redcore::{logging, net, server::Server};

#[derive(Parser)]
#[command(name = "redcore", about = "A Redis-compatible in-memory store")]
struct Cli {
    /// Path to a JSON config file; missing/omitted falls back to defaults.
    config_file: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, value_name = "yes|no")]
    appendonly: Option<String>,

    #[arg(long, num_args = 2, value_names = ["HOST", "PORT"])]
    replicaof: Option<Vec<String>>,
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(flag) = &cli.appendonly {
        config.appendonly = flag.eq_ignore_ascii_case("yes");
    }
    if let Some(pair) = &cli.replicaof {
        config.replicaof = Some(ReplicaOfConfig {
            host: pair[0].clone(),
            port: pair[1].parse()?,
        });
    }

    let host = config.host.clone();
    let port = config.port;
    let server = Server::new(config)?;

    let shutdown_server = server.clone();
    ctrlc::set_handler(move || {
        shutdown_server.stop();
        std::process::exit(0);
    })?;

    tracing::info!(host, port, "redcore starting");
    net::serve(Arc::clone(&server), &host, port)?;
    Ok(())
}
