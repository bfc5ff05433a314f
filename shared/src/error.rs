use std::io;

use thiserror::Error;

/// Failures raised while configuring, binding, accepting or connecting sockets.
#[derive(Debug, Error)]
pub enum NetError {
    /// A socket system call failed. `op` names the call for the log line.
    #[error("socket {op} failed ({source})")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The peer did not complete the TCP handshake within the allowed wait.
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    /// Text could not be parsed into a socket address.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// A `NetConfig` value the transport cannot operate with.
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
}

impl NetError {
    /// Wraps an I/O error with the name of the operation that produced it.
    pub fn io(op: &'static str, source: io::Error) -> Self {
        NetError::Io { op, source }
    }
}

/// Protocol violations detected while encoding or decoding RCON frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("declared frame length {size} exceeds maximum {max}")]
    TooLarge { size: u32, max: u32 },

    #[error("declared frame length {0} is below the minimum of 10")]
    TooShort(u32),

    #[error("frame is missing its NUL terminator")]
    MissingTerminator,

    #[error("frame body contains an interior NUL byte")]
    InteriorNul,

    /// Queuing the frame would push the peer's unsent backlog past its limit.
    #[error("send buffer full: {pending} bytes pending, limit {max}")]
    SendBufferFull { pending: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_formatting() {
        let err = NetError::io(
            "bind",
            io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        );
        assert_eq!(err.to_string(), "socket bind failed (address in use)");

        let err = FrameError::TooLarge {
            size: 5000,
            max: 4096,
        };
        assert_eq!(
            err.to_string(),
            "declared frame length 5000 exceeds maximum 4096"
        );
    }
}
