//! Source-style RCON framing.
//!
//! ```text
//! +-----------+----------+------------+-----------+------+-----------+------+
//! | len u32le | id i32le | kind i32le | body ...  | 0x00 | extra ... | 0x00 |
//! +-----------+----------+------------+-----------+------+-----------+------+
//! ```
//!
//! `len` counts every byte after the prefix, so the smallest legal frame
//! declares 10. The decoder checks the declared length against the configured
//! maximum as soon as the prefix arrives and never buffers an oversized frame.

use crate::config::MIN_FRAME_SIZE;
use crate::error::FrameError;

/// Query id carried by a refused auth response.
pub const AUTH_FAILED_ID: i32 = -1;

/// Frame kinds sent from client to server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Auth,
    ExecCommand,
}

impl RequestType {
    pub const AUTH: i32 = 3;
    pub const EXECCOMMAND: i32 = 2;

    pub fn code(self) -> i32 {
        match self {
            RequestType::Auth => Self::AUTH,
            RequestType::ExecCommand => Self::EXECCOMMAND,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::AUTH => Some(RequestType::Auth),
            Self::EXECCOMMAND => Some(RequestType::ExecCommand),
            _ => None,
        }
    }
}

/// Frame kinds sent from server to client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    ResponseValue,
    AuthResponse,
    ConsoleLog,
}

impl ResponseType {
    pub const RESPONSE_VALUE: i32 = 0;
    pub const AUTH_RESPONSE: i32 = 2;
    pub const CONSOLE_LOG: i32 = 4;

    pub fn code(self) -> i32 {
        match self {
            ResponseType::ResponseValue => Self::RESPONSE_VALUE,
            ResponseType::AuthResponse => Self::AUTH_RESPONSE,
            ResponseType::ConsoleLog => Self::CONSOLE_LOG,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::RESPONSE_VALUE => Some(ResponseType::ResponseValue),
            Self::AUTH_RESPONSE => Some(ResponseType::AuthResponse),
            Self::CONSOLE_LOG => Some(ResponseType::ConsoleLog),
            _ => None,
        }
    }
}

/// One decoded protocol message.
///
/// `kind` stays a raw integer: request and response codes overlap
/// (`EXECCOMMAND` and `AUTH_RESPONSE` are both 2), so only the receiving
/// role knows how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconFrame {
    pub id: i32,
    pub kind: i32,
    pub body: Vec<u8>,
    pub extra: Vec<u8>,
}

impl RconFrame {
    /// Body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn request_type(&self) -> Option<RequestType> {
        RequestType::from_code(self.kind)
    }

    pub fn response_type(&self) -> Option<ResponseType> {
        ResponseType::from_code(self.kind)
    }

    /// Declared length this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        MIN_FRAME_SIZE as usize + self.body.len() + self.extra.len()
    }
}

/// Serializes a frame. `extra` is the secondary string slot, empty for every
/// message type in use today.
pub fn encode(
    id: i32,
    body: &[u8],
    extra: &[u8],
    kind: i32,
    max_frame_size: u32,
) -> Result<Vec<u8>, FrameError> {
    if body.contains(&0) || extra.contains(&0) {
        return Err(FrameError::InteriorNul);
    }

    let declared = MIN_FRAME_SIZE as usize + body.len() + extra.len();
    if declared > max_frame_size as usize {
        return Err(FrameError::TooLarge {
            size: u32::try_from(declared).unwrap_or(u32::MAX),
            max: max_frame_size,
        });
    }

    let mut bytes = Vec::with_capacity(4 + declared);
    bytes.extend_from_slice(&(declared as u32).to_le_bytes());
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(&kind.to_le_bytes());
    bytes.extend_from_slice(body);
    bytes.push(0);
    bytes.extend_from_slice(extra);
    bytes.push(0);
    Ok(bytes)
}

/// Serializes an already built frame.
pub fn encode_frame(frame: &RconFrame, max_frame_size: u32) -> Result<Vec<u8>, FrameError> {
    encode(frame.id, &frame.body, &frame.extra, frame.kind, max_frame_size)
}

/// Outcome of a decode attempt that did not violate the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(RconFrame),
    NeedMoreData,
}

/// Streaming decoder for one TCP connection.
///
/// Bytes are fed as they arrive from the socket; complete frames are pulled
/// out with [`FrameDecoder::decode`]. Once a protocol violation is seen the
/// decoder is poisoned and keeps reporting it: the connection must be closed,
/// never resynchronised by skipping bytes.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: u32,
    poisoned: Option<FrameError>,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
            poisoned: None,
        }
    }

    /// Appends received bytes. Bytes fed to a poisoned decoder are discarded.
    ///
    /// The length prefix at the head of the buffer is checked here, so an
    /// oversized or undersized declaration poisons the decoder before any of
    /// its payload is kept.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.poisoned.is_some() {
            return;
        }
        self.buffer.extend_from_slice(bytes);
        if let Err(err) = self.check_prefix() {
            self.poison(err);
        }
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Discards buffered bytes and any poison.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.poisoned = None;
    }

    pub fn decode(&mut self) -> Result<Decoded, FrameError> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }

        match self.try_decode() {
            Err(err) => {
                self.poison(err.clone());
                Err(err)
            }
            ok => ok,
        }
    }

    fn poison(&mut self, err: FrameError) {
        self.buffer = Vec::new();
        self.poisoned = Some(err);
    }

    /// Declared length of the frame at the head of the buffer, once its
    /// prefix is complete and within bounds.
    fn check_prefix(&self) -> Result<Option<u32>, FrameError> {
        let Some(prefix) = self.buffer.get(..4) else {
            return Ok(None);
        };
        let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);

        if declared > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: declared,
                max: self.max_frame_size,
            });
        }
        if declared < MIN_FRAME_SIZE {
            return Err(FrameError::TooShort(declared));
        }
        Ok(Some(declared))
    }

    fn try_decode(&mut self) -> Result<Decoded, FrameError> {
        let Some(declared) = self.check_prefix()? else {
            return Ok(Decoded::NeedMoreData);
        };

        let total = 4 + declared as usize;
        if self.buffer.len() < total {
            return Ok(Decoded::NeedMoreData);
        }

        let frame = parse_payload(&self.buffer[4..total])?;
        self.buffer.drain(..total);
        Ok(Decoded::Frame(frame))
    }
}

fn parse_payload(payload: &[u8]) -> Result<RconFrame, FrameError> {
    let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let strings = &payload[8..];

    let body_end = strings
        .iter()
        .position(|&b| b == 0)
        .ok_or(FrameError::MissingTerminator)?;
    let rest = &strings[body_end + 1..];

    // The extra string must end exactly at the declared length.
    match rest.iter().position(|&b| b == 0) {
        Some(end) if end + 1 == rest.len() => Ok(RconFrame {
            id,
            kind,
            body: strings[..body_end].to_vec(),
            extra: rest[..end].to_vec(),
        }),
        _ => Err(FrameError::MissingTerminator),
    }
}
