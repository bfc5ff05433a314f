use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use tokio::time::{interval, Duration, MissedTickBehavior};

use server::dispatcher::ConsoleDispatcher;
use server::host_status::{LoggingBackend, ServerListManager, ServerListing, ServerVisibility};
use server::rcon_server::RconServer;
use server::task_queue::TaskQueue;
use shared::{AddressSpec, NetConfig, NetKey};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short = 'a', long, default_value = "127.0.0.1:37015")]
    address: String,

    /// RCON password; the server stays down without one
    #[arg(short = 'p', long, default_value = "")]
    password: String,

    /// Listen on every interface instead of the given host
    #[arg(long)]
    all_interfaces: bool,

    /// Ticks per second
    #[arg(short = 't', long, default_value = "20")]
    tick_rate: u32,

    /// Maximum declared frame length in bytes
    #[arg(long, default_value = "4096")]
    max_frame_size: u32,

    /// Bytes queued for one peer before it is dropped for not reading
    #[arg(long, default_value = "262144")]
    max_pending_send: usize,

    /// Maximum simultaneous connections (0 = unlimited)
    #[arg(long, default_value = "8")]
    max_connections: usize,

    /// Server name reported by `status` and the server listing
    #[arg(long, default_value = "rcon server")]
    host_name: String,

    /// Post the server listing every this many seconds (0 = never)
    #[arg(long, default_value = "0")]
    host_interval: u64,

    /// Hide the server from the public list when posting
    #[arg(long)]
    hidden: bool,

    /// Use a random net key instead of the default one
    #[arg(long)]
    random_key: bool,

    /// Background worker count
    #[arg(short = 'w', long, default_value = "2")]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = AddressSpec::resolve(&args.address)?;

    let config = NetConfig {
        max_frame_size: args.max_frame_size,
        max_connections: args.max_connections,
        max_pending_send: args.max_pending_send,
        ..NetConfig::default()
    };
    config.validate()?;

    let net_key = NetKey::default();
    net_key.on_random_key_changed(false, args.random_key);

    let mut rcon =
        RconServer::new(address, config).listen_on_all_interfaces(args.all_interfaces);
    rcon.init(&args.password)?;
    if let Some(local) = rcon.local_address() {
        info!("RCON server listening on {}", local);
    }

    let queue = TaskQueue::new(args.workers);
    let listing = ServerListing {
        host_name: args.host_name.clone(),
        address: address.ip().to_string(),
        port: rcon.local_address().map_or(address.port(), |a| a.port()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        max_players: args.max_connections as u32,
        ..ServerListing::default()
    };
    let visibility = if args.hidden {
        ServerVisibility::Hidden
    } else {
        ServerVisibility::Public
    };
    let list_manager =
        ServerListManager::new(listing, visibility, net_key.clone(), Arc::new(LoggingBackend));

    let mut dispatcher = ConsoleDispatcher::new(&args.host_name, net_key);

    let mut ticker = interval(Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut host_ticker = interval(Duration::from_secs(args.host_interval.max(1)));
    host_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                rcon.run_frame(&mut dispatcher);
            }
            _ = host_ticker.tick(), if args.host_interval > 0 => {
                let players = rcon.connection_count() as u32;
                list_manager.update_hosting_status(rcon.is_initialized(), players, &queue);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }

        if !rcon.is_initialized() {
            warn!("RCON server stopped listening");
            break;
        }
    }

    rcon.broadcast_log("Server shutting down\n");
    rcon.flush();
    rcon.shutdown();
    list_manager.update_hosting_status(false, 0, &queue);
    queue.shutdown().await;

    Ok(())
}
