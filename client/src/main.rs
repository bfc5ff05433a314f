use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};

use client::console::Console;
use client::rcon_client::{RconClient, RconResponse};
use client::throttle::CommandQuota;
use shared::{AddressSpec, NetConfig, NetKey};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RCON server address
    #[arg(short = 'a', long, default_value = "127.0.0.1:37015")]
    address: String,

    /// RCON password used by `rcon PASS` without an argument
    #[arg(short = 'p', long, default_value = "")]
    password: String,

    /// Forwarded commands allowed per second (0 = unlimited)
    #[arg(short = 'q', long, default_value = "10")]
    quota: u32,

    /// Ticks per second
    #[arg(short = 't', long, default_value = "20")]
    tick_rate: u32,

    /// Maximum declared frame length in bytes
    #[arg(long, default_value = "4096")]
    max_frame_size: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = NetConfig {
        max_frame_size: args.max_frame_size,
        ..NetConfig::default()
    };
    config.validate()?;
    let mut rcon = RconClient::new(config);
    rcon.set_address(Some(AddressSpec::resolve(&args.address)?));
    rcon.set_password(&args.password);

    let mut console = Console::new(rcon, CommandQuota::new(args.quota), NetKey::default());

    info!("Connecting to: {}", args.address);
    info!("Type 'rcon PASS' to authenticate, 'rcon <command>' to run commands");
    console.execute("rcon");
    if !args.password.is_empty() {
        console.execute("rcon PASS");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = interval(Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for response in console.client_mut().run_frame() {
                    match response {
                        RconResponse::Value { body, .. } => print!("{}", body),
                        RconResponse::Log(line) => print!("[log] {}", line),
                    }
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => console.execute(&line),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    console.execute("rcon_disconnect");
    Ok(())
}
