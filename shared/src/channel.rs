//! Buffered frame I/O over a non-blocking socket.
//!
//! `send`/`recv` on a non-blocking socket may complete partially or not at
//! all. [`FrameChannel`] keeps the unsent tail of queued frames and the
//! undecoded head of received bytes between ticks.

use std::io::{self, Read, Write};

use log::debug;
use socket2::Socket;

use crate::codec::{self, Decoded, FrameDecoder, RconFrame};
use crate::config::{NetConfig, DEFAULT_MAX_PENDING_SEND};
use crate::error::FrameError;

const RECV_CHUNK: usize = 4096;

/// Result of draining a socket's receive side for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// Socket still open; zero or more bytes were buffered.
    Open,
    /// Peer performed an orderly shutdown.
    Closed,
}

/// Send and receive buffers for one connection.
///
/// Both directions are bounded. [`FrameChannel::pump`] reads at most one
/// maximum-size frame (plus its prefix) per call and stops as soon as the
/// decoder rejects a length prefix. [`FrameChannel::queue`] refuses frames
/// that would grow the unsent backlog past `max_pending_send`.
#[derive(Debug)]
pub struct FrameChannel {
    decoder: FrameDecoder,
    outbox: Vec<u8>,
    max_frame_size: u32,
    max_pending_send: usize,
}

impl FrameChannel {
    /// Channel with the default send backlog limit.
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            decoder: FrameDecoder::new(max_frame_size),
            outbox: Vec::new(),
            max_frame_size,
            max_pending_send: DEFAULT_MAX_PENDING_SEND,
        }
    }

    /// Channel sized from the frame and backlog limits in `config`.
    pub fn from_config(config: &NetConfig) -> Self {
        Self::new(config.max_frame_size).with_max_pending_send(config.max_pending_send)
    }

    pub fn with_max_pending_send(mut self, max_pending_send: usize) -> Self {
        self.max_pending_send = max_pending_send;
        self
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn max_pending_send(&self) -> usize {
        self.max_pending_send
    }

    /// Encodes a frame and appends it to the send buffer.
    ///
    /// Fails without queuing anything when the frame is invalid or when the
    /// backlog would exceed `max_pending_send`.
    pub fn queue(&mut self, id: i32, body: &[u8], kind: i32) -> Result<(), FrameError> {
        let bytes = codec::encode(id, body, b"", kind, self.max_frame_size)?;
        if self.outbox.len() + bytes.len() > self.max_pending_send {
            debug!(
                "Send buffer full ({} bytes pending, limit {})",
                self.outbox.len(),
                self.max_pending_send
            );
            return Err(FrameError::SendBufferFull {
                pending: self.outbox.len(),
                max: self.max_pending_send,
            });
        }
        self.outbox.extend_from_slice(&bytes);
        Ok(())
    }

    /// Bytes waiting to be written.
    pub fn pending_send(&self) -> usize {
        self.outbox.len()
    }

    /// Removes and returns the unsent bytes.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbox)
    }

    /// Writes as much of the send buffer as the socket accepts right now.
    /// Whatever the socket refuses stays queued for the next call.
    pub fn flush(&mut self, socket: &Socket) -> io::Result<()> {
        let mut stream = socket;
        while !self.outbox.is_empty() {
            match stream.write(&self.outbox) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ))
                }
                Ok(written) => {
                    self.outbox.drain(..written);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads what is available into the decoder, up to one maximum-size
    /// frame and its prefix per call. Anything beyond that waits for the
    /// next tick.
    pub fn pump(&mut self, socket: &Socket) -> io::Result<PumpStatus> {
        let mut stream = socket;
        let mut buf = [0u8; RECV_CHUNK];
        let mut budget = self.max_frame_size as usize + 4;
        while budget > 0 {
            let want = budget.min(RECV_CHUNK);
            match stream.read(&mut buf[..want]) {
                Ok(0) => return Ok(PumpStatus::Closed),
                Ok(n) => {
                    debug!("Received {} bytes", n);
                    budget -= n;
                    self.decoder.feed(&buf[..n]);
                    if self.decoder.is_poisoned() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(PumpStatus::Open)
    }

    /// Decoder state, for callers that inspect buffering directly.
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Feeds bytes directly, bypassing the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.feed(bytes);
    }

    /// Pulls every complete frame buffered so far, in receipt order.
    ///
    /// On a protocol violation the frames decoded before it are discarded
    /// along with the error; the connection is compromised either way.
    pub fn drain_frames(&mut self) -> Result<Vec<RconFrame>, FrameError> {
        let mut frames = Vec::new();
        loop {
            match self.decoder.decode()? {
                Decoded::Frame(frame) => frames.push(frame),
                Decoded::NeedMoreData => return Ok(frames),
            }
        }
    }

    /// Drops buffered input and output.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.outbox.clear();
    }
}
