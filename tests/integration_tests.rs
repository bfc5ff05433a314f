//! Integration tests for the RCON transport
//!
//! These tests run the server and client roles against each other over real
//! loopback sockets, ticking both sides from the test thread.

use std::cell::Cell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use client::console::Console;
use client::rcon_client::{RconClient, RconResponse, SessionState};
use client::throttle::CommandQuota;
use server::dispatcher::ConsoleDispatcher;
use server::rcon_server::{RconServer, NOT_AUTHENTICATED_REPLY};
use shared::codec::{self, AUTH_FAILED_ID};
use shared::{
    AddressFamily, AddressSpec, ConnectionRegistry, Connector, Decoded, FrameDecoder, NetConfig, NetError,
    NetKey, RconFrame, RequestType, ResponseType, SocketAcceptor,
};
use tokio_test::{assert_err, assert_ok};

const PASSWORD: &str = "hunter2";

fn start_server(config: NetConfig) -> (RconServer, AddressSpec) {
    let mut server = RconServer::new(AddressSpec::localhost(0), config);
    assert_ok!(server.init(PASSWORD));
    let address = server.local_address().expect("server should be listening");
    (server, address)
}

fn new_client(address: AddressSpec) -> RconClient {
    let mut client = RconClient::new(NetConfig::default());
    client.set_address(Some(address));
    client.set_password(PASSWORD);
    client
}

/// Ticks both roles until `done` holds or two seconds pass.
fn pump<D, F>(
    server: &mut RconServer,
    dispatcher: &mut D,
    client: &mut RconClient,
    mut done: F,
) -> Vec<RconResponse>
where
    D: server::dispatcher::CommandDispatcher,
    F: FnMut(&RconClient, &[RconResponse]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut responses = Vec::new();
    while Instant::now() < deadline {
        server.run_frame(&mut *dispatcher);
        responses.extend(client.run_frame());
        if done(client, &responses) {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    responses
}

fn raw_frame(id: i32, body: &str, kind: i32) -> Vec<u8> {
    codec::encode(id, body.as_bytes(), b"", kind, 4096).unwrap()
}

/// Ticks the server while reading raw replies until `count` frames arrived.
fn read_raw_replies<D: server::dispatcher::CommandDispatcher>(
    server: &mut RconServer,
    dispatcher: &mut D,
    stream: &mut TcpStream,
    count: usize,
) -> Vec<RconFrame> {
    stream
        .set_read_timeout(Some(Duration::from_millis(5)))
        .unwrap();
    let mut decoder = FrameDecoder::new(4096);
    let mut frames = Vec::new();
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(2);

    while frames.len() < count && Instant::now() < deadline {
        server.run_frame(&mut *dispatcher);
        if let Ok(n) = stream.read(&mut buf) {
            decoder.feed(&buf[..n]);
        }
        while let Ok(Decoded::Frame(frame)) = decoder.decode() {
            frames.push(frame);
        }
    }
    frames
}

/// CLIENT-SERVER SESSION TESTS
mod session_tests {
    use super::*;

    /// Tests the full connect, authenticate and execute round trip
    #[test]
    fn auth_and_command_round_trip() {
        let (mut server, address) = start_server(NetConfig::default());
        let mut dispatcher = ConsoleDispatcher::new("integration", NetKey::default());
        let mut client = new_client(address);

        assert_ok!(client.connect());
        assert_ok!(client.send_auth(PASSWORD));
        pump(&mut server, &mut dispatcher, &mut client, |c, _| {
            c.state() == SessionState::Authenticated
        });
        assert_eq!(client.state(), SessionState::Authenticated);
        assert_eq!(server.connection_count(), 1);

        let id = assert_ok!(client.send_command("echo hello over rcon"));
        let responses = pump(&mut server, &mut dispatcher, &mut client, |_, r| !r.is_empty());

        assert_eq!(
            responses,
            vec![RconResponse::Value {
                id,
                body: "hello over rcon\n".to_string()
            }]
        );
        assert_eq!(dispatcher.executed(), 1);
    }

    /// Tests that a wrong password followed by a command never reaches the dispatcher
    #[test]
    fn bad_password_then_status_is_never_dispatched() {
        let (mut server, address) = start_server(NetConfig::default());
        let mut calls = 0;
        let mut dispatcher = |_: &str| {
            calls += 1;
            "should not run\n".to_string()
        };

        let mut stream = TcpStream::connect(address.socket_addr()).unwrap();
        stream
            .write_all(&raw_frame(1, "badpassword", RequestType::AUTH))
            .unwrap();
        stream
            .write_all(&raw_frame(2, "status", RequestType::EXECCOMMAND))
            .unwrap();

        let replies = read_raw_replies(&mut server, &mut dispatcher, &mut stream, 2);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].kind, ResponseType::AUTH_RESPONSE);
        assert_eq!(replies[0].id, AUTH_FAILED_ID);
        assert_eq!(replies[1].kind, ResponseType::RESPONSE_VALUE);
        assert_eq!(replies[1].body_text(), NOT_AUTHENTICATED_REPLY);

        assert_eq!(calls, 0);
    }

    /// Tests the same scenario driven through the console surface
    #[test]
    fn console_bad_password_keeps_client_unauthenticated() {
        let (mut server, address) = start_server(NetConfig::default());
        let calls = Cell::new(0);
        let mut dispatcher = |_: &str| {
            calls.set(calls.get() + 1);
            String::new()
        };

        let mut console = Console::new(new_client(address), CommandQuota::new(10), NetKey::default());
        console.execute("rcon");
        assert!(console.client().is_connected());

        console.execute("rcon PASS badpassword");
        for _ in 0..50 {
            server.run_frame(&mut dispatcher);
            console.client_mut().run_frame();
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(console.client().state(), SessionState::Connected);

        console.execute("rcon status");
        for _ in 0..20 {
            server.run_frame(&mut dispatcher);
            console.client_mut().run_frame();
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(calls.get(), 0);

        // The configured password still works afterwards.
        console.execute("rcon PASS");
        let deadline = Instant::now() + Duration::from_secs(2);
        while !console.client().is_authenticated() && Instant::now() < deadline {
            server.run_frame(&mut dispatcher);
            console.client_mut().run_frame();
            thread::sleep(Duration::from_millis(2));
        }
        assert!(console.client().is_authenticated());

        console.execute("rcon_disconnect");
        assert_eq!(console.client().state(), SessionState::Disconnected);
    }

    /// Tests console log broadcast to authenticated peers only
    #[test]
    fn log_broadcast_reaches_authenticated_clients() {
        let (mut server, address) = start_server(NetConfig::default());
        let mut dispatcher = ConsoleDispatcher::new("integration", NetKey::default());

        let mut authed = new_client(address);
        assert_ok!(authed.connect());
        assert_ok!(authed.send_auth(PASSWORD));
        pump(&mut server, &mut dispatcher, &mut authed, |c, _| {
            c.is_authenticated()
        });

        let mut stranger = TcpStream::connect(address.socket_addr()).unwrap();
        for _ in 0..20 {
            server.run_frame(&mut dispatcher);
            if server.connection_count() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(server.connection_count(), 2);

        server.broadcast_log("map changed\n");
        let responses = pump(&mut server, &mut dispatcher, &mut authed, |_, r| !r.is_empty());
        assert_eq!(responses, vec![RconResponse::Log("map changed\n".to_string())]);

        stranger
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 64];
        assert!(stranger.read(&mut buf).is_err());
    }

    /// Tests that a declared length above the limit closes the connection
    #[test]
    fn oversized_frame_closes_connection() {
        let (mut server, address) = start_server(NetConfig::default());
        let mut dispatcher = ConsoleDispatcher::new("integration", NetKey::default());

        let mut stream = TcpStream::connect(address.socket_addr()).unwrap();
        stream.write_all(&1_000_000u32.to_le_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(5)))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut closed = false;
        let mut buf = [0u8; 64];
        while !closed && Instant::now() < deadline {
            server.run_frame(&mut dispatcher);
            closed = match stream.read(&mut buf) {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => !matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ),
            };
        }
        assert!(closed, "server kept the connection open");
        assert_eq!(server.connection_count(), 0);
    }

    /// Tests that peer shutdown returns the client to Disconnected
    #[test]
    fn server_shutdown_disconnects_client() {
        let (mut server, address) = start_server(NetConfig::default());
        let mut dispatcher = ConsoleDispatcher::new("integration", NetKey::default());
        let mut client = new_client(address);

        assert_ok!(client.connect());
        pump(&mut server, &mut dispatcher, &mut client, |_, _| true);
        for _ in 0..20 {
            server.run_frame(&mut dispatcher);
            thread::sleep(Duration::from_millis(2));
        }

        server.shutdown();
        assert!(!server.is_initialized());

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.state() != SessionState::Disconnected && Instant::now() < deadline {
            client.run_frame();
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(client.state(), SessionState::Disconnected);
    }
}

/// SOCKET LAYER TESTS
mod socket_tests {
    use super::*;

    /// Tests that connecting to a port nobody listens on fails quickly and registers nothing
    #[test]
    fn connect_to_closed_port_fails_within_a_second() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = Connector::new(NetConfig::default());
        let mut registry: ConnectionRegistry<()> = ConnectionRegistry::new();
        let mut accepted = 0;

        let start = Instant::now();
        let result = connector.connect_socket(
            &mut registry,
            AddressSpec::localhost(port),
            false,
            &mut |_: &socket2::Socket, _: &AddressSpec| accepted += 1,
        );
        let elapsed = start.elapsed();

        let err = assert_err!(result);
        assert!(matches!(
            err,
            NetError::Io { op: "connect", .. } | NetError::ConnectTimeout(_)
        ));
        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
        assert!(registry.is_empty());
        assert_eq!(accepted, 0);
    }

    /// Tests that creating a second listen socket closes the first
    #[test]
    fn second_listen_socket_replaces_first() {
        let mut acceptor = SocketAcceptor::new(NetConfig::default());
        assert_ok!(acceptor.create_listen_socket(AddressSpec::localhost(0), false));
        let first = acceptor.local_address().unwrap();

        assert_ok!(acceptor.create_listen_socket(AddressSpec::localhost(0), false));
        let second = acceptor.local_address().unwrap();

        assert!(TcpStream::connect(second.socket_addr()).is_ok());

        // The old port is free again: a plain listener can take it.
        if first.port() != second.port() {
            assert!(TcpListener::bind(first.socket_addr()).is_ok());
        }
    }

    /// Tests acceptance order and the position shift after a removal
    #[test]
    fn accepted_connections_keep_order() {
        let mut acceptor = SocketAcceptor::new(NetConfig::default());
        assert_ok!(acceptor.create_listen_socket(AddressSpec::localhost(0), false));
        let address = acceptor.local_address().unwrap();

        let mut registry: ConnectionRegistry<usize> = ConnectionRegistry::new();
        let mut next = 0;
        let mut handler = |_: &socket2::Socket, _: &AddressSpec| {
            next += 1;
            next
        };
        let mut peers = Vec::new();
        let mut ids = Vec::new();

        for _ in 0..3 {
            peers.push(TcpStream::connect(address.socket_addr()).unwrap());
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                if let Some(id) = acceptor.run_frame(&mut registry, &mut handler) {
                    ids.push(id);
                    break;
                }
                assert!(Instant::now() < deadline, "connection was never accepted");
                thread::sleep(Duration::from_millis(2));
            }
        }

        assert_eq!(registry.ids(), ids);
        assert_eq!(registry.session(ids[2]), Some(&3));

        assert!(registry.remove(ids[1]));
        assert_eq!(registry.nth(1), Some(ids[2]));
        assert_eq!(registry.session(ids[1]), None);
        assert_eq!(registry.len(), 2);
    }

    /// Tests that an all-interfaces listener accepts IPv4 peers and reports them in IPv4 form
    #[test]
    fn dual_stack_listener_reports_ipv4_peers_canonically() {
        let mut acceptor = SocketAcceptor::new(NetConfig::default());
        assert_ok!(acceptor.create_listen_socket(AddressSpec::localhost(0), true));
        let bound = acceptor.local_address().unwrap();
        if bound.family() != AddressFamily::Ipv6 {
            // No IPv6 on this host: the listener fell back to 0.0.0.0.
            println!("IPv6 unavailable, listening on {}", bound);
        }
        assert!(bound.ip().is_unspecified());

        let peer = TcpStream::connect(("127.0.0.1", bound.port())).unwrap();
        let mut registry: ConnectionRegistry<()> = ConnectionRegistry::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let id = loop {
            let accepted =
                acceptor.run_frame(&mut registry, &mut |_: &socket2::Socket, _: &AddressSpec| ());
            if let Some(id) = accepted {
                break id;
            }
            assert!(Instant::now() < deadline, "connection was never accepted");
            thread::sleep(Duration::from_millis(2));
        };

        let address = *registry.address(id).unwrap();
        assert_eq!(address.family(), AddressFamily::Ipv4);
        assert_eq!(address.ip(), std::net::IpAddr::from([127, 0, 0, 1]));
        assert_eq!(address.port(), peer.local_addr().unwrap().port());
        assert_eq!(address.socket_addr(), peer.local_addr().unwrap());
    }
}

/// CONCURRENCY TESTS
mod background_tests {
    use super::*;
    use server::host_status::{HostingBackend, ServerListManager, ServerListing, ServerVisibility};
    use server::task_queue::TaskQueue;
    use std::sync::{Arc, Mutex};

    struct RecordingBackend(Mutex<Vec<ServerListing>>);

    impl HostingBackend for RecordingBackend {
        fn post_server_host(&self, payload: &[u8]) -> Result<String, String> {
            let listing = bincode::deserialize(payload).map_err(|e| e.to_string())?;
            self.0.lock().unwrap().push(listing);
            Ok("token".to_string())
        }

        fn fetch_server_list(&self) -> Result<Vec<ServerListing>, String> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn server_by_token(&self, token: &str) -> Result<ServerListing, String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|listing| listing.net_key == token)
                .cloned()
                .ok_or_else(|| "unknown token".to_string())
        }
    }

    /// Tests that the hosting post carries the live net key and player count
    #[tokio::test]
    async fn hosting_post_uses_live_state() {
        let backend = Arc::new(RecordingBackend(Mutex::new(Vec::new())));
        let net_key = NetKey::default();
        let manager = ServerListManager::new(
            ServerListing::default(),
            ServerVisibility::Public,
            net_key.clone(),
            backend.clone(),
        );

        let generated = net_key.generate();
        let queue = TaskQueue::new(2);
        assert!(manager.update_hosting_status(true, 3, &queue));
        queue.shutdown().await;

        let posted = backend.0.lock().unwrap().clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].net_key, generated);
        assert_eq!(posted[0].player_count, 3);
        assert_eq!(manager.snapshot().host_token, "token");
    }

    /// Tests that a posted listing shows up in a refreshed server list
    #[tokio::test]
    async fn posted_listing_appears_after_refresh() {
        let backend = Arc::new(RecordingBackend(Mutex::new(Vec::new())));
        let net_key = NetKey::default();
        let listing = ServerListing {
            host_name: "integration".to_string(),
            port: 37015,
            ..ServerListing::default()
        };
        let manager = ServerListManager::new(
            listing,
            ServerVisibility::Hidden,
            net_key.clone(),
            backend.clone(),
        );

        let queue = TaskQueue::new(2);
        assert!(manager.update_hosting_status(true, 1, &queue));
        queue.shutdown().await;

        let queue = TaskQueue::new(2);
        assert!(manager.refresh_server_list(&queue));
        queue.shutdown().await;

        let list = manager.server_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].host_name, "integration");
        assert!(list[0].hidden);

        let found = assert_ok!(manager.server_by_token(&net_key.current()));
        assert_eq!(found.port, 37015);
        assert_err!(manager.server_by_token("nope"));
    }
}
