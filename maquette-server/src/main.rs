//! Maquette relay server binary.
//!
//! Runs the websocket relay from [`maquette_collab`]. Log verbosity is
//! controlled through `RUST_LOG` (env_logger).

use std::time::Duration;

use clap::Parser;
use log::info;

use maquette_collab::bot::PathReplayBots;
use maquette_collab::server::{RelayConfig, RelayError, RelayServer};

/// Real-time relay server for shared Maquette scenes.
#[derive(Parser)]
#[command(name = "maquette-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind the websocket listener to
    #[arg(long, env = "MAQUETTE_ADDR", default_value = "127.0.0.1:9080")]
    addr: String,

    /// Number of simulated players replaying recorded movement
    #[arg(long, default_value_t = 0)]
    bots: usize,

    /// Milliseconds between bot simulation steps
    #[arg(long, default_value_t = 100)]
    bot_tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    env_logger::init();
    let cli = Cli::parse();

    info!("Starting Maquette relay on {}", cli.addr);

    let config = RelayConfig {
        bind_addr: cli.addr,
        bot_tick: Duration::from_millis(cli.bot_tick_ms),
    };
    let mut server = RelayServer::new(config);
    if cli.bots > 0 {
        info!("Enabling {} simulated players", cli.bots);
        server = server.with_bots(Box::new(PathReplayBots::new(cli.bots)));
    }

    server.run().await
}
