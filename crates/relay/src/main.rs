// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! bcn-relay binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bcn_core::ChannelId;
use bcn_relay::RelayState;

/// bcn-relay: Beacon messaging relay server
#[derive(Parser, Debug)]
#[command(name = "bcn-relay")]
#[command(about = "WebSocket relay for beacon messaging and offline sync")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:7890")]
    bind: SocketAddr,

    /// Directory for the record database
    #[arg(short, long, default_value = ".")]
    data: PathBuf,

    /// Channel advertised as an emergency channel (repeatable)
    #[arg(short, long = "emergency-channel")]
    emergency_channel: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), bcn_relay::BoxError> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let emergency: Vec<ChannelId> = args.emergency_channel.into_iter().map(ChannelId::new).collect();

    info!("Starting bcn-relay");
    info!("  Bind address: {}", args.bind);
    info!("  Data directory: {}", args.data.display());
    info!("  Emergency channels: {}", emergency.len());

    let state = RelayState::open(&args.data, &emergency)?;
    bcn_relay::run(args.bind, state).await
}
