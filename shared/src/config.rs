//! Tunables shared by the listening and connecting sides.

use std::time::Duration;

use crate::error::NetError;

/// Smallest declared length a frame can carry: id, kind and two NUL terminators.
pub const MIN_FRAME_SIZE: u32 = 10;

/// Default cap on the declared length of a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 4096;

/// Smallest usable frame maximum: a frame that still carries a 4-byte body,
/// enough for any single UTF-8 character of chunked output.
pub const MIN_USABLE_FRAME_SIZE: u32 = MIN_FRAME_SIZE + 4;

/// Default cap on bytes queued for one peer and not yet written.
pub const DEFAULT_MAX_PENDING_SEND: usize = 256 * 1024;

/// Default backlog handed to `listen`.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 8;

/// Socket and framing configuration for the RCON transport.
///
/// Every field has a sensible default; the binaries override a handful of
/// them from the command line.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Maximum declared frame length (bytes after the length prefix).
    pub max_frame_size: u32,
    /// Backlog passed to `listen`.
    pub listen_backlog: i32,
    /// How long an outbound connect may wait for the socket to become writable.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm on every socket. RCON traffic is small and interactive.
    pub tcp_nodelay: bool,
    /// Restrict IPv6 listeners to IPv6 peers instead of running dual-stack.
    pub ipv6_only: bool,
    /// Maximum simultaneous connections accepted by a server (0 = unlimited).
    pub max_connections: usize,
    /// Failed auth attempts tolerated before a server drops the connection.
    pub max_auth_failures: u32,
    /// Bytes that may sit in one connection's send buffer. A peer that stops
    /// reading is disconnected once its backlog would grow past this.
    pub max_pending_send: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            connect_timeout: Duration::from_secs(1),
            tcp_nodelay: true,
            ipv6_only: false,
            max_connections: 8,
            max_auth_failures: 10,
            max_pending_send: DEFAULT_MAX_PENDING_SEND,
        }
    }
}

impl NetConfig {
    /// Largest body that still fits a single frame alongside an empty extra field.
    pub fn max_body_len(&self) -> usize {
        self.max_frame_size.saturating_sub(MIN_FRAME_SIZE) as usize
    }

    /// Rejects settings the transport cannot run with.
    ///
    /// The frame maximum must leave room for a 4-byte body, and the send
    /// buffer must hold at least one maximum-size frame with its prefix.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_frame_size < MIN_USABLE_FRAME_SIZE {
            return Err(NetError::InvalidConfig(format!(
                "max_frame_size {} is below the minimum of {}",
                self.max_frame_size, MIN_USABLE_FRAME_SIZE
            )));
        }
        let one_frame = self.max_frame_size as usize + 4;
        if self.max_pending_send < one_frame {
            return Err(NetError::InvalidConfig(format!(
                "max_pending_send {} cannot hold a {}-byte frame",
                self.max_pending_send, one_frame
            )));
        }
        Ok(())
    }
}
