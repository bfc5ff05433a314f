//! Listening side of the RCON protocol.

use log::{debug, info, warn};
use socket2::Socket;
use subtle::ConstantTimeEq;
use thiserror::Error;

use shared::codec::AUTH_FAILED_ID;
use shared::{
    AddressSpec, ConnectionId, ConnectionRegistry, FrameChannel, NetConfig, NetError, PumpStatus,
    RconFrame, RequestType, ResponseType, SocketAcceptor,
};

use crate::dispatcher::CommandDispatcher;

/// Body sent back for commands issued before a successful auth.
pub const NOT_AUTHENTICATED_REPLY: &str = "rejected: not authenticated\n";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("RCON password is empty; server not started")]
    EmptyPassword,

    #[error(transparent)]
    Net(#[from] NetError),
}

/// What to do with a connection after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Keep,
    Close,
}

/// Per-connection server state, owned by the registry entry.
#[derive(Debug)]
pub struct ServerSession {
    channel: FrameChannel,
    authenticated: bool,
    failed_auth: u32,
}

impl ServerSession {
    /// Fresh, unauthenticated session with buffers sized from `config`.
    pub fn new(config: &NetConfig) -> Self {
        Self {
            channel: FrameChannel::from_config(config),
            authenticated: false,
            failed_auth: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Consecutive wrong passwords since the last successful auth.
    pub fn failed_auth(&self) -> u32 {
        self.failed_auth
    }

    fn handle_frame(
        &mut self,
        frame: RconFrame,
        password: &str,
        config: &NetConfig,
        address: &AddressSpec,
        dispatcher: &mut dyn CommandDispatcher,
    ) -> Disposition {
        match frame.request_type() {
            Some(RequestType::Auth) => self.handle_auth(&frame, password, config, address),
            Some(RequestType::ExecCommand) => {
                if !self.authenticated {
                    warn!(
                        "Rejected command from unauthenticated connection {}",
                        address
                    );
                    return self.reply(frame.id, NOT_AUTHENTICATED_REPLY, ResponseType::ResponseValue);
                }

                let command = frame.body_text();
                info!("RCON command from {}: '{}'", address, command);
                let output = dispatcher.execute(&command);
                self.queue_output(frame.id, &output, ResponseType::ResponseValue, config)
            }
            None => {
                warn!(
                    "Unknown request type {} from {}; closing connection",
                    frame.kind, address
                );
                Disposition::Close
            }
        }
    }

    fn handle_auth(
        &mut self,
        frame: &RconFrame,
        password: &str,
        config: &NetConfig,
        address: &AddressSpec,
    ) -> Disposition {
        let matches: bool = frame.body.as_slice().ct_eq(password.as_bytes()).into();

        if matches && !password.is_empty() {
            self.authenticated = true;
            self.failed_auth = 0;
            info!("RCON connection {} authenticated", address);
            return self.reply(frame.id, "", ResponseType::AuthResponse);
        }

        self.authenticated = false;
        self.failed_auth += 1;
        warn!(
            "Bad RCON password from {} (attempt {}/{})",
            address, self.failed_auth, config.max_auth_failures
        );

        if self.reply(AUTH_FAILED_ID, "", ResponseType::AuthResponse) == Disposition::Close {
            return Disposition::Close;
        }
        if config.max_auth_failures > 0 && self.failed_auth >= config.max_auth_failures {
            warn!("Too many failed auth attempts from {}; closing", address);
            return Disposition::Close;
        }
        Disposition::Keep
    }

    fn reply(&mut self, id: i32, body: &str, kind: ResponseType) -> Disposition {
        match self.channel.queue(id, body.as_bytes(), kind.code()) {
            Ok(()) => Disposition::Keep,
            Err(err) => {
                warn!("Failed to queue response: {}", err);
                Disposition::Close
            }
        }
    }

    /// Splits output into as many frames as the size limit requires.
    fn queue_output(
        &mut self,
        id: i32,
        output: &str,
        kind: ResponseType,
        config: &NetConfig,
    ) -> Disposition {
        let clean: String = output.chars().filter(|c| *c != '\0').collect();
        for chunk in split_chunks(&clean, config.max_body_len()) {
            if self.reply(id, chunk, kind) == Disposition::Close {
                return Disposition::Close;
            }
        }
        Disposition::Keep
    }
}

/// Splits `text` into pieces of at most `max` bytes without cutting a
/// character. Empty text yields a single empty piece.
///
/// `max` is raised to 4 so every character fits a piece; a validated
/// `NetConfig` never asks for less.
pub fn split_chunks(text: &str, max: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }

    let max = max.max(4);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// RCON server: one listener, many peers, polled once per tick.
pub struct RconServer {
    acceptor: SocketAcceptor,
    registry: ConnectionRegistry<ServerSession>,
    address: AddressSpec,
    listen_on_all_interfaces: bool,
    password: String,
    config: NetConfig,
}

impl RconServer {
    pub fn new(address: AddressSpec, config: NetConfig) -> Self {
        Self {
            acceptor: SocketAcceptor::new(config.clone()),
            registry: ConnectionRegistry::new(),
            address,
            listen_on_all_interfaces: false,
            password: String::new(),
            config,
        }
    }

    pub fn listen_on_all_interfaces(mut self, enabled: bool) -> Self {
        self.listen_on_all_interfaces = enabled;
        self
    }

    /// Starts listening. An empty password keeps the server down.
    pub fn init(&mut self, password: &str) -> Result<(), ServerError> {
        if password.is_empty() {
            warn!("No RCON password set; RCON server disabled");
            return Err(ServerError::EmptyPassword);
        }

        self.acceptor
            .create_listen_socket(self.address, self.listen_on_all_interfaces)?;
        self.password = password.to_string();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.acceptor.is_listening()
    }

    /// Replaces the password. Authenticated connections stay authenticated;
    /// an empty password shuts the server down.
    pub fn set_password(&mut self, password: &str) {
        if password.is_empty() {
            warn!("RCON password cleared; shutting down RCON server");
            self.shutdown();
            return;
        }
        self.password = password.to_string();
        info!("RCON password changed");
    }

    /// Change hook for the externally owned password setting.
    pub fn on_password_changed(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }

        if self.is_initialized() {
            self.set_password(new);
        } else if let Err(err) = self.init(new) {
            warn!("Failed to start RCON server: {}", err);
        }
    }

    pub fn local_address(&self) -> Option<AddressSpec> {
        self.acceptor.local_address()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &ConnectionRegistry<ServerSession> {
        &self.registry
    }

    /// Closes the listener and every connection.
    pub fn shutdown(&mut self) {
        self.acceptor.close_listen_socket();
        self.registry.clear();
        self.password.clear();
    }

    /// One tick: accept at most one new peer, then service every connection.
    pub fn run_frame(&mut self, dispatcher: &mut dyn CommandDispatcher) {
        if !self.is_initialized() {
            return;
        }

        let config = &self.config;
        self.acceptor.run_frame(
            &mut self.registry,
            &mut |_: &Socket, _: &AddressSpec| ServerSession::new(config),
        );

        for id in self.registry.ids() {
            if self.service(id, dispatcher) == Disposition::Close {
                if let Some(address) = self.registry.address(id) {
                    info!("Closed RCON connection {} from {}", id, address);
                }
                self.registry.remove(id);
            }
        }
    }

    fn service(&mut self, id: ConnectionId, dispatcher: &mut dyn CommandDispatcher) -> Disposition {
        let password = &self.password;
        let config = &self.config;
        let Some(entry) = self.registry.get_mut(id) else {
            return Disposition::Close;
        };
        let session = &mut entry.session;

        let status = match session.channel.pump(&entry.socket) {
            Ok(status) => status,
            Err(e) => {
                warn!("Receive from {} failed ({})", entry.address, e);
                return Disposition::Close;
            }
        };

        let mut disposition = match session.channel.drain_frames() {
            Ok(frames) => {
                let mut disposition = Disposition::Keep;
                for frame in frames {
                    disposition =
                        session.handle_frame(frame, password, config, &entry.address, dispatcher);
                    if disposition == Disposition::Close {
                        break;
                    }
                }
                disposition
            }
            Err(err) => {
                warn!("Protocol violation from {}: {}", entry.address, err);
                Disposition::Close
            }
        };

        if let Err(e) = session.channel.flush(&entry.socket) {
            warn!("Send to {} failed ({})", entry.address, e);
            disposition = Disposition::Close;
        }

        if status == PumpStatus::Closed {
            debug!("Peer {} closed the connection", entry.address);
            disposition = Disposition::Close;
        }
        disposition
    }

    /// Queues a console log line for every authenticated connection; it goes
    /// out with the next tick's flush.
    ///
    /// A peer whose send backlog cannot take the line is disconnected.
    pub fn broadcast_log(&mut self, line: &str) {
        let config = &self.config;
        let mut stalled = Vec::new();
        for id in self.registry.ids() {
            if let Some(session) = self.registry.session_mut(id) {
                if session.authenticated
                    && session.queue_output(0, line, ResponseType::ConsoleLog, config)
                        == Disposition::Close
                {
                    stalled.push(id);
                }
            }
        }

        for id in stalled {
            if let Some(address) = self.registry.address(id) {
                warn!("Dropping RCON connection {} from {}: not reading its log", id, address);
            }
            self.registry.remove(id);
        }
    }

    /// Sends whatever is queued without reading; used before shutting down.
    pub fn flush(&mut self) {
        for id in self.registry.ids() {
            if let Some(entry) = self.registry.get_mut(id) {
                if let Err(e) = entry.session.channel.flush(&entry.socket) {
                    debug!("Final flush to {} failed ({})", entry.address, e);
                }
            }
        }
    }
}
