mod cli;
mod output;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use blive::packet::Packets;
use blive::{Config, Normalizer, Supervisor};
use bytes::Bytes;
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};
use crate::output::{StdoutHandler, format_event};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet, args.json_logs);

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Run { config, pretty } => run_supervisor(config, pretty).await,
        Commands::Decode { hex, room, pretty } => decode(&hex, room, pretty),
    }
}

async fn run_supervisor(config: Option<PathBuf>, pretty: bool) -> Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
    }

    let path = config
        .or_else(Config::default_path)
        .context("no config path given and no config directory available")?;
    let config = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    if config.bots.is_empty() {
        bail!("{} configures no bots", path.display());
    }

    let supervisor = Supervisor::new(&config, Arc::new(StdoutHandler::new(pretty)))?;
    supervisor.start(&config.bots).await?;
    if supervisor.session_count() == 0 {
        bail!("no session could be started");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    supervisor.stop().await;
    Ok(())
}

fn decode(hex_dump: &str, room_id: u64, pretty: bool) -> Result<()> {
    let cleaned: String = hex_dump.split_whitespace().collect();
    let data = hex::decode(&cleaned).context("invalid hex")?;
    let normalizer = Normalizer::builtin()?;

    let mut packets = Packets::new(Bytes::from(data));
    loop {
        let offset = packets.offset();
        let Some(result) = packets.next() else {
            break;
        };
        let packet = match result {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Frame at offset {} of {} bytes: {}", offset, packets.buffer_len(), e);
                continue;
            }
        };
        info!(
            "Frame at offset {}: operation {}, version {}, sequence {}, {} bytes",
            offset,
            packet.operation,
            packet.version,
            packet.sequence,
            packet.total_len()
        );

        let (messages, errors) = match packet.decode_body() {
            Ok(body) => body.into_messages(),
            Err(e) => {
                warn!("Frame at offset {}: {}", offset, e);
                continue;
            }
        };
        for e in errors {
            warn!("Nested frame in frame at offset {}: {}", offset, e);
        }
        for msg in &messages {
            match normalizer.normalize_message(msg, room_id) {
                Ok(events) => {
                    for event in events {
                        println!("{}", format_event("", &event, pretty)?);
                    }
                }
                Err(e) => warn!("Frame at offset {}: {}", offset, e),
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
