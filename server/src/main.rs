use clap::Parser;
use log::{error, info};
use server::app::App;
use server::game::{FlagPolicy, GameConfig};
use server::network::{Server, ServerConfig};
use server::rules::AlternatingTurns;
use server::store::MemoryStore;
use server::utils::SystemTimeSource;
use std::sync::Arc;
use std::time::Duration;

/// Realtime game server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Seconds between keepalive pings
    #[clap(long, default_value = "30")]
    ping_interval: u64,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "1024")]
    max_clients: usize,
    /// Outbound frames buffered per connection
    #[clap(long, default_value = "256")]
    send_queue: usize,
    /// End a game when a move arrives after the mover's time ran out
    #[clap(long)]
    flag_on_move: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }
    env_logger::init();

    let args = Args::parse();

    let game_config = GameConfig {
        flag_policy: if args.flag_on_move {
            FlagPolicy::OnMove
        } else {
            FlagPolicy::TimerOnly
        },
    };
    let server_config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        ping_interval: Duration::from_secs(args.ping_interval.max(1)),
        max_clients: args.max_clients,
        send_queue: args.send_queue,
    };

    let app = App::new(
        Arc::new(MemoryStore::new()),
        Arc::new(AlternatingTurns),
        Arc::new(SystemTimeSource),
        game_config,
    )?;
    info!("Flag policy: {:?}", game_config.flag_policy);

    let server = Server::new(&server_config, Arc::clone(&app.router)).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    app.shutdown().await;
    Ok(())
}
