//! Room-scoped WebSocket signaling server.
//!
//! Peers connect to the relay route with `?room=<id>&user=<id>` and exchange
//! `offer` / `answer` / `candidate` envelopes. Rooms are managed over the admin
//! listener.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin roomrelay-server
//! cargo run --bin roomrelay-server -- --port 3000 --admin-port 3001 --config rooms.json
//! cargo run --bin roomrelay-server -- --mode direct
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use roomrelay_server::{
    config::ServerConfig,
    ui::{Server, build_direct_app, build_room_app},
};
use roomrelay_shared::logger::setup_logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Peers must join a room they are allowed in
    Rooms,
    /// No rooms: any user may address any other connected user
    Direct,
}

#[derive(Parser, Debug)]
#[command(name = "roomrelay-server")]
#[command(about = "Room-scoped WebSocket signaling relay", long_about = None)]
struct Args {
    /// Host address to bind the relay to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the relay to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Relay route (overrides the config file)
    #[arg(long)]
    route: Option<String>,

    /// Host address for room administration (keep it local)
    #[arg(long, default_value = "127.0.0.1")]
    admin_host: String,

    /// Port number for room administration
    #[arg(long, default_value = "8081")]
    admin_port: u16,

    /// JSON config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Rooms)]
    mode: Mode,

    /// Seconds between liveness pings, 0 to disable (overrides the config file)
    #[arg(long)]
    ping_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(route) = args.route {
        config.relay_route = route;
    }
    if let Some(secs) = args.ping_interval_secs {
        config.ping_interval_secs = secs;
    }

    let (server, admin_addr) = match args.mode {
        Mode::Rooms => match build_room_app(&config) {
            Ok(app) => (
                Server::new(app.relay, &config.relay_route).with_admin(app.admin),
                Some((args.admin_host.as_str(), args.admin_port)),
            ),
            Err(e) => {
                tracing::error!("Failed to start: {}", e);
                std::process::exit(1);
            }
        },
        Mode::Direct => match build_direct_app(&config) {
            Ok(relay) => (Server::new(relay, &config.relay_route), None),
            Err(e) => {
                tracing::error!("Failed to start: {}", e);
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = server.run(&args.host, args.port, admin_addr).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
