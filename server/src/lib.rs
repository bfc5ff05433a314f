//! # RCON Server Library
//!
//! The listening side of the remote console. A single [`rcon_server::RconServer`]
//! owns the listen socket and every accepted connection, and is polled once
//! per tick from the binary's main loop. Nothing here spawns threads of its
//! own except the hosting-status post, which runs on a [`task_queue::TaskQueue`].
//!
//! ## Connection Lifecycle
//!
//! 1. The acceptor hands a new peer to the registry with a fresh
//!    `ServerSession` (unauthenticated, empty buffers).
//! 2. The peer sends an `AUTH` frame. A matching password is acknowledged
//!    with an `AUTH_RESPONSE` carrying the request id; a wrong one gets id
//!    `-1`, and too many wrong ones close the connection.
//! 3. Authenticated `EXECCOMMAND` frames go to a
//!    [`dispatcher::CommandDispatcher`]. The output comes back as one or more
//!    `RESPONSE_VALUE` frames, split to respect the frame size limit.
//! 4. Console log lines can be pushed to every authenticated peer with
//!    `CONSOLE_LOG` frames.
//!
//! Malformed frames, unknown request types and peer shutdowns all end with the
//! connection being removed from the registry, which closes its socket.
//!
//! ## Module Organization
//!
//! - `rcon_server`: the server, per-connection session state and output chunking
//! - `dispatcher`: the command execution seam plus a small built-in command set
//! - `host_status`: publishing the server listing through a `HostingBackend`
//! - `task_queue`: the worker pool the hosting post runs on
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::dispatcher::ConsoleDispatcher;
//! use server::rcon_server::RconServer;
//! use shared::{AddressSpec, NetConfig, NetKey};
//!
//! let mut server = RconServer::new(AddressSpec::localhost(37015), NetConfig::default());
//! server.init("hunter2").expect("listen");
//!
//! let mut dispatcher = ConsoleDispatcher::new("my server", NetKey::default());
//! loop {
//!     server.run_frame(&mut dispatcher);
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! ```

pub mod dispatcher;
pub mod host_status;
pub mod rcon_server;
pub mod task_queue;
