mod config;
mod events;
mod peer;
mod player;
mod server;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use config::{DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_TICK_RATE, ServerConfig};
use server::RelayServer;

#[derive(Parser)]
#[command(name = "convoy-server")]
#[command(about = "Convoy relay server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = convoy::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, default_value_t = DEFAULT_INACTIVITY_TIMEOUT_SECS, help = "Seconds of silence before a player is removed")]
    timeout: u64,

    #[arg(long, default_value_t = 100, help = "Ticks between status log lines (0 disables)")]
    stats_interval: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        inactivity_timeout: Duration::from_secs(args.timeout),
        stats_interval_ticks: args.stats_interval,
        ..Default::default()
    };

    let mut server = RelayServer::bind(&bind_addr, config)
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    log::info!(
        "Server started on {} (world seed {})",
        server.local_addr()?,
        server.world_seed()
    );
    server.run()
}
