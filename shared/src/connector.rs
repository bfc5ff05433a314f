//! Active open with a bounded wait.
//!
//! A one-shot command client cannot sit in a non-blocking connect across
//! ticks, so this is the one place the core blocks: for at most
//! `NetConfig::connect_timeout` while the handshake completes.

use std::io;

use log::{info, warn};
use socket2::{Protocol, Socket, Type};

use crate::acceptor::{configure_stream, AcceptHandler};
use crate::address::AddressSpec;
use crate::config::NetConfig;
use crate::error::NetError;
use crate::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Clone)]
pub struct Connector {
    config: NetConfig,
}

impl Connector {
    pub fn new(config: NetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Connects to `address` and registers the socket like an accepted one.
    ///
    /// In single-socket mode every existing registry entry is closed first, so
    /// at most one peer is active. On any failure the new socket is closed and
    /// the registry gains nothing.
    pub fn connect_socket<S, H>(
        &self,
        registry: &mut ConnectionRegistry<S>,
        address: AddressSpec,
        single_socket: bool,
        handler: &mut H,
    ) -> Result<ConnectionId, NetError>
    where
        H: AcceptHandler<S>,
    {
        self.config.validate().map_err(|err| {
            warn!("Refusing to connect to {}: {}", address, err);
            err
        })?;

        if single_socket {
            registry.clear();
        }

        let socket = Socket::new(address.family().domain(), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| {
                warn!("Unable to create socket ({})", e);
                NetError::io("create", e)
            })?;

        socket
            .set_nodelay(self.config.tcp_nodelay)
            .map_err(|e| {
                warn!("Unable to set TCP_NODELAY on socket for {} ({})", address, e);
                NetError::io("setsockopt(TCP_NODELAY)", e)
            })?;

        match socket.connect_timeout(&address.to_sock_addr(), self.config.connect_timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                warn!(
                    "Socket connection to {} timed out after {:?}",
                    address, self.config.connect_timeout
                );
                return Err(NetError::ConnectTimeout(address.to_string()));
            }
            Err(e) => {
                warn!("Socket connection to {} failed ({})", address, e);
                return Err(NetError::io("connect", e));
            }
        }

        configure_stream(&socket, &self.config)?;

        let session = handler.on_accepted(&socket, &address);
        let id = registry.insert(socket, address, session);
        info!("Connected to {} as {}", address, id);
        Ok(id)
    }
}
