use clap::Parser;
use log::error;
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "27888")]
    port: u16,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "32")]
    max_clients: usize,
    /// Slots in each per-connection game data cache (at most 256)
    #[clap(long, default_value = "256", value_parser = clap::value_parser!(u16).range(1..=256))]
    cache_capacity: u16,
    /// Seconds of silence before a client is dropped
    #[clap(long, default_value = "5")]
    client_timeout: u64,
    /// Seconds game data sent outside a game is reflected back
    #[clap(long, default_value = "30")]
    drop_timeout: u64,
    /// Milliseconds of silence from a player before recent messages are resent
    #[clap(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    game_timeout_ms: u64,
    /// Emulated frames per second, used to classify lag spikes
    #[clap(long, default_value = "60", value_parser = clap::value_parser!(u32).range(1..))]
    frame_rate: u32,
    /// Seconds between handler statistics log lines
    #[clap(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    stats_interval: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_clients: args.max_clients,
            cache_capacity: args.cache_capacity as usize,
            client_timeout: Duration::from_secs(args.client_timeout),
            drop_timeout: Duration::from_secs(args.drop_timeout),
            game_timeout: Duration::from_millis(args.game_timeout_ms),
            frame_duration: Duration::from_secs(1) / args.frame_rate,
            stats_interval: Duration::from_secs(args.stats_interval),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    let mut server = Server::new(config).await?;

    let control = server.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }

    Ok(())
}
