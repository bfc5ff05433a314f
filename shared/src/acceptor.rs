//! Listening side of the socket core.

use std::io;

use log::{error, info, warn};
use socket2::{Protocol, Socket, Type};

use crate::address::{AddressFamily, AddressSpec};
use crate::config::NetConfig;
use crate::error::NetError;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Builds the per-connection session payload for a freshly registered socket.
///
/// Called exactly once per new connection; the registry drops the returned
/// payload exactly once when the entry goes away.
pub trait AcceptHandler<S> {
    fn on_accepted(&mut self, socket: &Socket, address: &AddressSpec) -> S;
}

impl<S, F> AcceptHandler<S> for F
where
    F: FnMut(&Socket, &AddressSpec) -> S,
{
    fn on_accepted(&mut self, socket: &Socket, address: &AddressSpec) -> S {
        self(socket, address)
    }
}

/// Applies the options every connected socket runs with: non-blocking I/O and
/// (by default) Nagle disabled.
pub fn configure_stream(socket: &Socket, config: &NetConfig) -> Result<(), NetError> {
    socket
        .set_nonblocking(true)
        .map_err(|e| NetError::io("ioctl(FIONBIO)", e))?;
    socket
        .set_nodelay(config.tcp_nodelay)
        .map_err(|e| NetError::io("setsockopt(TCP_NODELAY)", e))?;
    Ok(())
}

/// Owns a single listening socket and accepts connections without blocking.
#[derive(Debug)]
pub struct SocketAcceptor {
    listener: Option<Socket>,
    listen_address: Option<AddressSpec>,
    config: NetConfig,
}

impl SocketAcceptor {
    pub fn new(config: NetConfig) -> Self {
        Self {
            listener: None,
            listen_address: None,
            config,
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Replaces any current listener with a new one bound to `address`.
    ///
    /// With `listen_on_all_interfaces` the host part of `address` is ignored
    /// and the listener binds `[::]` (dual-stack), or `0.0.0.0` when the host
    /// has no IPv6 support. On failure nothing is left open.
    pub fn create_listen_socket(
        &mut self,
        address: AddressSpec,
        listen_on_all_interfaces: bool,
    ) -> Result<(), NetError> {
        self.close_listen_socket();
        if let Err(err) = self.config.validate() {
            warn!("Not listening on {}: {}", address, err);
            return Err(err);
        }

        let result = if listen_on_all_interfaces {
            self.open_listener(AddressSpec::any_v6(address.port()))
                .or_else(|err| {
                    warn!("IPv6 listen socket unavailable ({}), falling back to IPv4", err);
                    self.open_listener(AddressSpec::any_v4(address.port()))
                })
        } else {
            self.open_listener(address)
        };

        match result {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .ok()
                    .and_then(|addr| AddressSpec::from_sock_addr(&addr))
                    .unwrap_or(address);
                info!("Listening for RCON connections on {}", bound);
                self.listener = Some(listener);
                self.listen_address = Some(bound);
                Ok(())
            }
            Err(err) => {
                warn!("Failed to create listen socket on {}: {}", address, err);
                Err(err)
            }
        }
    }

    /// Every early return drops (closes) the half-configured socket.
    fn open_listener(&self, address: AddressSpec) -> Result<Socket, NetError> {
        let socket = Socket::new(address.family().domain(), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| NetError::io("create", e))?;

        if address.family() == AddressFamily::Ipv6 {
            socket
                .set_only_v6(self.config.ipv6_only)
                .map_err(|e| NetError::io("setsockopt(IPV6_V6ONLY)", e))?;
        }

        socket
            .set_reuse_address(true)
            .map_err(|e| NetError::io("setsockopt(SO_REUSEADDR)", e))?;
        socket
            .set_nodelay(self.config.tcp_nodelay)
            .map_err(|e| NetError::io("setsockopt(TCP_NODELAY)", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| NetError::io("ioctl(FIONBIO)", e))?;
        socket
            .bind(&address.to_sock_addr())
            .map_err(|e| NetError::io("bind", e))?;
        socket
            .listen(self.config.listen_backlog)
            .map_err(|e| NetError::io("listen", e))?;

        Ok(socket)
    }

    /// Closes the listener. Safe to call when not listening.
    pub fn close_listen_socket(&mut self) {
        if self.listener.take().is_some() {
            info!("Closed listen socket");
        }
        self.listen_address = None;
    }

    /// True while a listen socket is open.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Address actually bound (port resolved when 0 was requested).
    pub fn local_address(&self) -> Option<AddressSpec> {
        self.listen_address
    }

    /// Makes one non-blocking accept attempt.
    ///
    /// A new connection is configured, registered and handed to `handler`.
    /// "Would block" is an empty poll. Connections beyond
    /// `NetConfig::max_connections` are closed straight away.
    pub fn run_frame<S, H>(
        &mut self,
        registry: &mut ConnectionRegistry<S>,
        handler: &mut H,
    ) -> Option<ConnectionId>
    where
        H: AcceptHandler<S>,
    {
        let listener = self.listener.as_ref()?;

        let (socket, raw_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return None,
            Err(e) => {
                error!("Socket accept failed ({})", e);
                return None;
            }
        };

        let address = match AddressSpec::from_sock_addr(&raw_addr) {
            Some(address) => address.canonical(),
            None => {
                warn!("Dropped connection from a non-IP address");
                return None;
            }
        };

        if self.config.max_connections > 0 && registry.len() >= self.config.max_connections {
            warn!(
                "Refused connection from {}: {} connection(s) already open",
                address,
                registry.len()
            );
            return None;
        }

        if let Err(err) = configure_stream(&socket, &self.config) {
            warn!("Failed to configure socket from {}: {}", address, err);
            return None;
        }

        let session = handler.on_accepted(&socket, &address);
        let id = registry.insert(socket, address, session);
        info!("Accepted connection {} from {}", id, address);
        Some(id)
    }
}

impl Drop for SocketAcceptor {
    fn drop(&mut self) {
        self.close_listen_socket();
    }
}
