//! # RCON socket core
//!
//! Everything the server and client roles share: the dual-stack address type,
//! the non-blocking listen/accept and bounded connect paths, the registry that
//! owns every open socket together with its per-connection session, and the
//! length-prefixed RCON frame codec.
//!
//! Nothing in this crate spawns threads or blocks indefinitely. Callers drive
//! it from a periodic tick:
//!
//! ```rust,no_run
//! use shared::{AddressSpec, ConnectionRegistry, NetConfig, SocketAcceptor};
//! use socket2::Socket;
//!
//! let mut acceptor = SocketAcceptor::new(NetConfig::default());
//! let mut registry = ConnectionRegistry::new();
//! acceptor.create_listen_socket(AddressSpec::localhost(37015), false)?;
//!
//! loop {
//!     acceptor.run_frame(&mut registry, &mut |_: &Socket, addr: &AddressSpec| {
//!         println!("new peer {}", addr);
//!     });
//!     # break;
//! }
//! # Ok::<(), shared::NetError>(())
//! ```

pub mod acceptor;
pub mod address;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connector;
pub mod error;
pub mod netkey;
pub mod registry;

pub use acceptor::{AcceptHandler, SocketAcceptor};
pub use address::{AddressFamily, AddressSpec};
pub use channel::{FrameChannel, PumpStatus};
pub use codec::{Decoded, FrameDecoder, RconFrame, RequestType, ResponseType};
pub use config::{NetConfig, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_PENDING_SEND};
pub use connector::Connector;
pub use error::{FrameError, NetError};
pub use netkey::NetKey;
pub use registry::{AcceptedConnection, ConnectionId, ConnectionRegistry};
