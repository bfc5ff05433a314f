//! # RCON Client Library
//!
//! The connecting side of the remote console, driven by console lines the way
//! a game client's developer console would drive it.
//!
//! ## Module Organization
//!
//! ### RCON Client (`rcon_client`)
//! Owns the single connection to an RCON server and its session state:
//! - `Disconnected -> Connecting -> Connected -> Authenticated`
//! - Authentication completes only when the server acknowledges the request id
//! - `run_frame` moves queued bytes and returns command output and log lines
//!
//! ### Console (`console`)
//! Tokenizes console lines and maps them onto the client and the net key:
//! - `rcon` connects, `rcon PASS <pw>` authenticates, `rcon <query>` executes
//! - `rcon_disconnect` tears the connection down
//! - `net_setkey`, `net_generatekey` and `net_userandomkey` manage the net key
//!
//! ### Throttle (`throttle`)
//! Per-second quota on lines forwarded to the server. Lines over quota are
//! dropped with a warning.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::console::Console;
//! use client::rcon_client::{RconClient, RconResponse};
//! use client::throttle::CommandQuota;
//! use shared::{AddressSpec, NetConfig, NetKey};
//!
//! let mut rcon = RconClient::new(NetConfig::default());
//! rcon.set_address(Some(AddressSpec::localhost(37015)));
//! rcon.set_password("hunter2");
//!
//! let mut console = Console::new(rcon, CommandQuota::new(10), NetKey::default());
//! console.execute("rcon");
//! console.execute("rcon PASS");
//!
//! loop {
//!     for response in console.client_mut().run_frame() {
//!         if let RconResponse::Value { body, .. } = response {
//!             print!("{}", body);
//!         }
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! ```

pub mod console;
pub mod rcon_client;
pub mod throttle;
