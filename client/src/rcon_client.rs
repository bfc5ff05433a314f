//! Connecting side of the RCON protocol.
//!
//! The client keeps at most one connection, opened through the shared
//! [`Connector`] in single-socket mode, and walks it through
//! `Disconnected -> Connecting -> Connected -> Authenticated`. Like the
//! server it never blocks once connected: [`RconClient::run_frame`] is called
//! once per tick to move bytes and collect responses.

use log::{debug, info, warn};
use socket2::Socket;
use thiserror::Error;

use shared::codec::AUTH_FAILED_ID;
use shared::{
    AddressSpec, ConnectionId, ConnectionRegistry, Connector, FrameChannel, FrameError, NetConfig,
    NetError, PumpStatus, RequestType, ResponseType,
};

/// Connection lifecycle of an [`RconClient`].
///
/// `Connecting` only lasts for the bounded connect inside
/// [`RconClient::connect`]; `Authenticated` is entered when the server
/// acknowledges the pending auth request by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

/// Why a client operation was refused or failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {op} while {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("no RCON address configured")]
    NoAddress,

    #[error("not connected to an RCON server")]
    NotConnected,

    #[error("not authenticated with the RCON server")]
    NotAuthenticated,

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Something the server said that the caller should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RconResponse {
    /// Command output, tagged with the id of the command it answers.
    Value { id: i32, body: String },
    /// A console log line pushed by the server.
    Log(String),
}

/// Per-connection client state.
#[derive(Debug)]
pub struct ClientSession {
    channel: FrameChannel,
    pending_auth: Option<i32>,
}

impl ClientSession {
    fn new(config: &NetConfig) -> Self {
        Self {
            channel: FrameChannel::from_config(config),
            pending_auth: None,
        }
    }
}

/// Client role of the RCON protocol: at most one server connection, driven
/// by console commands and polled once per tick.
///
/// The client only ever runs in single-socket mode, so connecting again
/// closes the previous connection first. Command output and log lines come
/// back from [`RconClient::run_frame`].
pub struct RconClient {
    connector: Connector,
    registry: ConnectionRegistry<ClientSession>,
    connection: Option<ConnectionId>,
    address: Option<AddressSpec>,
    state: SessionState,
    password: String,
    next_id: i32,
}

impl RconClient {
    pub fn new(config: NetConfig) -> Self {
        Self {
            connector: Connector::new(config),
            registry: ConnectionRegistry::new(),
            connection: None,
            address: None,
            state: SessionState::Disconnected,
            password: String::new(),
            next_id: 1,
        }
    }

    /// Where the connection stands right now.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while a connection is open, authenticated or not.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected | SessionState::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Target of the next `connect`, if one was set.
    pub fn address(&self) -> Option<AddressSpec> {
        self.address
    }

    /// Target for the next `connect`. Does not touch an open connection.
    pub fn set_address(&mut self, address: Option<AddressSpec>) {
        self.address = address;
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    /// Change hook for the externally owned password setting. A live
    /// connection re-authenticates with the new password.
    pub fn on_password_changed(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }

        self.set_password(new);
        if self.is_connected() && !new.is_empty() {
            if let Err(err) = self.send_auth(new) {
                warn!("Failed to re-authenticate with RCON server: {}", err);
            }
        }
    }

    fn next_query_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id == i32::MAX {
            1
        } else {
            self.next_id + 1
        };
        id
    }

    /// Opens the connection. Blocks for at most the configured connect
    /// timeout.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                op: "connect",
                state: self.state,
            });
        }
        let address = self.address.ok_or(SessionError::NoAddress)?;

        self.state = SessionState::Connecting;
        let config = self.connector.config();
        let result = self.connector.connect_socket(
            &mut self.registry,
            address,
            true,
            &mut |_: &Socket, _: &AddressSpec| ClientSession::new(config),
        );

        match result {
            Ok(id) => {
                info!("Connected to RCON server at {}", address);
                self.connection = Some(id);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(err) => {
                warn!("Failed to connect to RCON server at {}: {}", address, err);
                self.connection = None;
                self.state = SessionState::Disconnected;
                Err(err.into())
            }
        }
    }

    /// Sends an auth request; the state changes once the server answers.
    /// Returns the request id.
    pub fn send_auth(&mut self, password: &str) -> Result<i32, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let id = self.next_query_id();
        self.send(id, password, RequestType::Auth)?;
        if let Some(session) = self.session_mut() {
            session.pending_auth = Some(id);
        }
        Ok(id)
    }

    /// Sends a command line for execution. Returns the request id the output
    /// will carry.
    pub fn send_command(&mut self, command: &str) -> Result<i32, SessionError> {
        match self.state {
            SessionState::Authenticated => {}
            SessionState::Connected => return Err(SessionError::NotAuthenticated),
            _ => return Err(SessionError::NotConnected),
        }

        let id = self.next_query_id();
        self.send(id, command, RequestType::ExecCommand)?;
        Ok(id)
    }

    fn session_mut(&mut self) -> Option<&mut ClientSession> {
        let id = self.connection?;
        self.registry.session_mut(id)
    }

    fn send(&mut self, id: i32, body: &str, kind: RequestType) -> Result<(), SessionError> {
        let connection = self.connection.ok_or(SessionError::NotConnected)?;
        let entry = self
            .registry
            .get_mut(connection)
            .ok_or(SessionError::NotConnected)?;

        entry
            .session
            .channel
            .queue(id, body.as_bytes(), kind.code())?;

        if let Err(e) = entry.session.channel.flush(&entry.socket) {
            self.disconnect();
            return Err(NetError::io("send", e).into());
        }
        Ok(())
    }

    /// Drops the connection immediately, discarding unsent and partially
    /// received data.
    pub fn disconnect(&mut self) {
        if let Some(id) = self.connection.take() {
            self.registry.remove(id);
            debug!("RCON connection {} closed", id);
        }
        self.state = SessionState::Disconnected;
    }

    /// One tick: flush queued requests, read what arrived and hand back
    /// command output and log lines in receipt order.
    pub fn run_frame(&mut self) -> Vec<RconResponse> {
        let Some(connection) = self.connection else {
            return Vec::new();
        };
        let Some(entry) = self.registry.get_mut(connection) else {
            self.disconnect();
            return Vec::new();
        };

        let mut closed = false;
        if let Err(e) = entry.session.channel.flush(&entry.socket) {
            warn!("Send to RCON server failed ({})", e);
            closed = true;
        }

        match entry.session.channel.pump(&entry.socket) {
            Ok(PumpStatus::Open) => {}
            Ok(PumpStatus::Closed) => {
                info!("RCON server closed the connection");
                closed = true;
            }
            Err(e) => {
                warn!("Receive from RCON server failed ({})", e);
                closed = true;
            }
        }

        let frames = match entry.session.channel.drain_frames() {
            Ok(frames) => frames,
            Err(err) => {
                warn!("Protocol violation from RCON server: {}", err);
                self.disconnect();
                return Vec::new();
            }
        };
        let pending_auth = entry.session.pending_auth;

        let mut responses = Vec::new();
        for frame in frames {
            match frame.response_type() {
                Some(ResponseType::AuthResponse) => {
                    if frame.id == AUTH_FAILED_ID {
                        warn!("RCON authentication refused");
                        self.state = SessionState::Connected;
                        self.clear_pending_auth();
                    } else if Some(frame.id) == pending_auth {
                        info!("Authenticated with RCON server");
                        self.state = SessionState::Authenticated;
                        self.clear_pending_auth();
                    } else {
                        debug!("Ignoring auth response for unknown request {}", frame.id);
                    }
                }
                Some(ResponseType::ResponseValue) => responses.push(RconResponse::Value {
                    id: frame.id,
                    body: frame.body_text(),
                }),
                Some(ResponseType::ConsoleLog) => {
                    responses.push(RconResponse::Log(frame.body_text()))
                }
                None => {
                    warn!("Unknown response type {} from RCON server", frame.kind);
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            self.disconnect();
        }
        responses
    }

    fn clear_pending_auth(&mut self) {
        if let Some(session) = self.session_mut() {
            session.pending_auth = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::{self, Decoded, FrameDecoder};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn listener() -> (TcpListener, AddressSpec) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = AddressSpec::from(listener.local_addr().unwrap());
        (listener, address)
    }

    fn read_request(stream: &mut TcpStream) -> shared::RconFrame {
        let mut decoder = FrameDecoder::new(4096);
        let mut buf = [0u8; 512];
        loop {
            if let Decoded::Frame(frame) = decoder.decode().unwrap() {
                return frame;
            }
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "client closed early");
            decoder.feed(&buf[..n]);
        }
    }

    fn reply(stream: &mut TcpStream, id: i32, body: &str, kind: i32) {
        let bytes = codec::encode(id, body.as_bytes(), b"", kind, 4096).unwrap();
        stream.write_all(&bytes).unwrap();
    }

    fn tick_until(client: &mut RconClient, state: SessionState) -> Vec<RconResponse> {
        let mut responses = Vec::new();
        for _ in 0..200 {
            responses.extend(client.run_frame());
            if client.state() == state {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        responses
    }

    #[test]
    fn test_commands_require_connection() {
        let mut client = RconClient::new(NetConfig::default());
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(matches!(client.send_auth("pw"), Err(SessionError::NotConnected)));
        assert!(matches!(client.send_command("status"), Err(SessionError::NotConnected)));
        assert!(client.run_frame().is_empty());
    }

    #[test]
    fn test_connect_without_address() {
        let mut client = RconClient::new(NetConfig::default());
        assert!(matches!(client.connect(), Err(SessionError::NoAddress)));
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_connect_failure_returns_to_disconnected() {
        let (listener, address) = listener();
        drop(listener);

        let mut client = RconClient::new(NetConfig::default());
        client.set_address(Some(address));
        assert!(client.connect().is_err());
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_auth_then_command() {
        let (listener, address) = listener();
        let mut client = RconClient::new(NetConfig::default());
        client.set_address(Some(address));
        client.connect().unwrap();
        assert_eq!(client.state(), SessionState::Connected);

        assert!(matches!(
            client.connect(),
            Err(SessionError::InvalidState { op: "connect", .. })
        ));
        assert!(matches!(
            client.send_command("status"),
            Err(SessionError::NotAuthenticated)
        ));

        let (mut server, _) = listener.accept().unwrap();
        let auth_id = client.send_auth("secret").unwrap();

        let request = read_request(&mut server);
        assert_eq!(request.kind, RequestType::AUTH);
        assert_eq!(request.id, auth_id);
        assert_eq!(request.body_text(), "secret");

        reply(&mut server, auth_id, "", ResponseType::AUTH_RESPONSE);
        tick_until(&mut client, SessionState::Authenticated);
        assert!(client.is_authenticated());

        let command_id = client.send_command("status").unwrap();
        let request = read_request(&mut server);
        assert_eq!(request.kind, RequestType::EXECCOMMAND);
        assert_eq!(request.body_text(), "status");

        reply(&mut server, 0, "log line", ResponseType::CONSOLE_LOG);
        reply(&mut server, command_id, "ok", ResponseType::RESPONSE_VALUE);

        let mut responses = Vec::new();
        for _ in 0..200 {
            responses.extend(client.run_frame());
            if responses.len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            responses,
            vec![
                RconResponse::Log("log line".to_string()),
                RconResponse::Value {
                    id: command_id,
                    body: "ok".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_refused_auth_stays_connected() {
        let (listener, address) = listener();
        let mut client = RconClient::new(NetConfig::default());
        client.set_address(Some(address));
        client.connect().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        client.send_auth("badpassword").unwrap();
        read_request(&mut server);
        reply(&mut server, AUTH_FAILED_ID, "", ResponseType::AUTH_RESPONSE);

        for _ in 0..20 {
            client.run_frame();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.state(), SessionState::Connected);
        assert!(client.send_command("status").is_err());
    }

    #[test]
    fn test_server_close_disconnects() {
        let (listener, address) = listener();
        let mut client = RconClient::new(NetConfig::default());
        client.set_address(Some(address));
        client.connect().unwrap();

        let (server, _) = listener.accept().unwrap();
        drop(server);

        tick_until(&mut client, SessionState::Disconnected);
        assert_eq!(client.state(), SessionState::Disconnected);

        // A fresh connect is allowed again.
        client.connect().unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn test_disconnect_is_immediate() {
        let (_listener, address) = listener();
        let mut client = RconClient::new(NetConfig::default());
        client.set_address(Some(address));
        client.connect().unwrap();

        client.disconnect();
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.run_frame().is_empty());
    }

    #[test]
    fn test_password_change_hook() {
        let mut client = RconClient::new(NetConfig::default());
        client.on_password_changed("", "first");
        assert_eq!(client.password(), "first");

        client.on_password_changed("first", "first");
        assert_eq!(client.password(), "first");
    }
}
