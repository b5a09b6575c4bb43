//! Decode and encode hooks used by a [`Session`](crate::Session).
//!
//! The session does not interpret message contents. Its read loop hands the
//! accumulated bytes to a [`Decoder`] until the decoder asks for more data,
//! and [`Session::write`](crate::Session::write) runs an [`Encoder`] before
//! touching the socket.
//!
//! Two codecs ship with the crate:
//!
//! - [`RawCodec`] passes bytes through unchanged, one message per read.
//! - [`FinsTcpCodec`] frames the FINS/TCP envelope, leaving the FINS
//!   command payload opaque.
//!
//! # FINS/TCP envelope
//!
//! | Bytes | Field |
//! |-------|-------|
//! | 0-3 | `"FINS"` magic |
//! | 4-7 | Length of everything after this field (u32 BE) |
//! | 8-11 | Command (u32 BE) |
//! | 12-15 | Error code (u32 BE) |
//! | 16.. | Payload |

use crate::buffer::ByteBuffer;
use crate::error::{FinsError, Result};
use crate::header::FinsHeader;

/// Magic bytes opening every FINS/TCP envelope.
pub const FINS_MAGIC: [u8; 4] = *b"FINS";

/// Size of the envelope header (magic, length, command, error code).
pub const FINS_TCP_HEADER_SIZE: usize = 16;

/// Largest payload accepted in a single envelope.
pub const MAX_FINS_TCP_PAYLOAD: usize = 2048;

/// Largest value accepted in the envelope length field.
pub const MAX_FRAME_LENGTH: usize = MAX_FINS_TCP_PAYLOAD + 8;

/// Bytes of a rejected frame included in the diagnostic dump.
const DUMP_LEN: usize = 16;

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<M> {
    /// A complete message, and how many bytes from the starting read cursor it used.
    Frame {
        /// The decoded message.
        message: M,
        /// Bytes consumed from the read cursor the attempt started at.
        consumed: usize,
    },
    /// The buffer holds no complete message yet.
    NeedMore,
}

/// Turns buffered bytes into messages.
///
/// Implementations read through the buffer's cursor. When they return
/// [`Decoded::NeedMore`] the session rewinds the read cursor to where the
/// attempt started, so partial reads never lose bytes. Returning an error is
/// fatal for the session.
pub trait Decoder: Send + 'static {
    /// Message type produced by this decoder.
    type Item: Send + 'static;

    /// Attempts to decode one message from the read cursor of `buf`.
    fn decode(&mut self, buf: &mut ByteBuffer) -> Result<Decoded<Self::Item>>;
}

/// Turns outgoing messages into bytes.
pub trait Encoder<Item>: Send + 'static {
    /// Appends the wire form of `item` to `dst`.
    fn encode(&mut self, item: &Item, dst: &mut ByteBuffer) -> Result<()>;
}

/// Pass-through codec: every read yields the readable bytes as one message.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Decoder for RawCodec {
    type Item = Vec<u8>;

    fn decode(&mut self, buf: &mut ByteBuffer) -> Result<Decoded<Vec<u8>>> {
        let available = buf.read_length();
        if available == 0 {
            return Ok(Decoded::NeedMore);
        }
        Ok(Decoded::Frame {
            message: buf.read_bytes(available)?,
            consumed: available,
        })
    }
}

impl Encoder<Vec<u8>> for RawCodec {
    fn encode(&mut self, item: &Vec<u8>, dst: &mut ByteBuffer) -> Result<()> {
        dst.put_bytes(item);
        Ok(())
    }
}

/// FINS/TCP envelope command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinsTcpCommand {
    /// Client announces its node address (0 = let the server assign one).
    NodeAddressRequest,
    /// Server answers with the client and server node addresses.
    NodeAddressResponse,
    /// Envelope carries a FINS frame.
    Frame,
    /// Server rejected a FINS frame.
    FrameError,
    /// Connection confirmation.
    ConnectionConfirmation,
    /// Any other command value, kept as received.
    Other(u32),
}

impl FinsTcpCommand {
    /// Returns the wire value.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::NodeAddressRequest => 0,
            Self::NodeAddressResponse => 1,
            Self::Frame => 2,
            Self::FrameError => 3,
            Self::ConnectionConfirmation => 6,
            Self::Other(value) => value,
        }
    }
}

impl From<u32> for FinsTcpCommand {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::NodeAddressRequest,
            1 => Self::NodeAddressResponse,
            2 => Self::Frame,
            3 => Self::FrameError,
            6 => Self::ConnectionConfirmation,
            other => Self::Other(other),
        }
    }
}

/// One FINS/TCP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinsTcpFrame {
    /// Envelope command.
    pub command: FinsTcpCommand,
    /// Envelope error code (0 = no error).
    pub error_code: u32,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl FinsTcpFrame {
    /// Creates a frame with a zero error code.
    pub fn new(command: FinsTcpCommand, payload: Vec<u8>) -> Self {
        Self {
            command,
            error_code: 0,
            payload,
        }
    }

    /// Creates the node address request sent right after connecting.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::{FinsTcpCommand, FinsTcpFrame};
    ///
    /// let frame = FinsTcpFrame::node_address_request(0);
    /// assert_eq!(frame.command, FinsTcpCommand::NodeAddressRequest);
    /// assert_eq!(frame.payload, vec![0, 0, 0, 0]);
    /// ```
    pub fn node_address_request(client_node: u8) -> Self {
        Self::new(
            FinsTcpCommand::NodeAddressRequest,
            u32::from(client_node).to_be_bytes().to_vec(),
        )
    }

    /// Wraps an opaque FINS frame.
    pub fn fins(payload: Vec<u8>) -> Self {
        Self::new(FinsTcpCommand::Frame, payload)
    }

    /// Wraps a routing header followed by an opaque command body.
    pub fn fins_command(header: &FinsHeader, body: &[u8]) -> Self {
        let mut buf = ByteBuffer::with_capacity(crate::header::FINS_HEADER_SIZE + body.len());
        header.write_to(&mut buf);
        buf.put_bytes(body);
        Self::fins(buf.readable().to_vec())
    }

    /// Parses the `(client, server)` node numbers of a node address response.
    ///
    /// Returns `None` for any other command or a payload shorter than 8 bytes.
    pub fn node_addresses(&self) -> Option<(u32, u32)> {
        if self.command != FinsTcpCommand::NodeAddressResponse {
            return None;
        }
        let mut buf = ByteBuffer::from(self.payload.as_slice());
        let client = buf.read_u32().ok()?;
        let server = buf.read_u32().ok()?;
        Some((client, server))
    }
}

/// Codec for the FINS/TCP envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinsTcpCodec;

impl FinsTcpCodec {
    /// Hex dump of the bytes at `pos`, zero padded if the frame is incomplete.
    fn dump(buf: &mut ByteBuffer, pos: usize) -> String {
        buf.read_bytes_at(pos, DUMP_LEN)
            .map(hex::encode)
            .unwrap_or_default()
    }
}

impl Decoder for FinsTcpCodec {
    type Item = FinsTcpFrame;

    fn decode(&mut self, buf: &mut ByteBuffer) -> Result<Decoded<FinsTcpFrame>> {
        let start = buf.read_pos();

        let frame_start = match buf.index(&FINS_MAGIC) {
            Some(pos) => pos,
            None if buf.read_length() > MAX_FRAME_LENGTH => {
                return Err(FinsError::invalid_frame(format!(
                    "no FINS magic in {} buffered bytes",
                    buf.read_length()
                )));
            }
            None => return Ok(Decoded::NeedMore),
        };
        if frame_start > start {
            log::warn!(
                "skipping {} bytes before FINS magic: {}",
                frame_start - start,
                hex::encode(&buf.readable()[..frame_start - start])
            );
        }
        buf.set_read_pos(frame_start)?;

        if buf.read_length() < 8 {
            return Ok(Decoded::NeedMore);
        }
        buf.read_bytes(FINS_MAGIC.len())?;
        let length = buf.read_u32()? as usize;
        if !(8..=MAX_FRAME_LENGTH).contains(&length) {
            let dump = Self::dump(buf, frame_start);
            return Err(FinsError::invalid_frame(format!(
                "length field {length} outside 8..={MAX_FRAME_LENGTH}, frame starts {dump}"
            )));
        }
        if buf.read_length() < length {
            return Ok(Decoded::NeedMore);
        }

        let command = FinsTcpCommand::from(buf.read_u32()?);
        let error_code = buf.read_u32()?;
        let payload = buf.read_bytes(length - 8)?;
        log::trace!(
            "decoded FINS/TCP {:?} frame, {} payload bytes",
            command,
            payload.len()
        );

        Ok(Decoded::Frame {
            message: FinsTcpFrame {
                command,
                error_code,
                payload,
            },
            consumed: buf.read_pos() - start,
        })
    }
}

impl Encoder<FinsTcpFrame> for FinsTcpCodec {
    fn encode(&mut self, item: &FinsTcpFrame, dst: &mut ByteBuffer) -> Result<()> {
        if item.payload.len() > MAX_FINS_TCP_PAYLOAD {
            return Err(FinsError::invalid_parameter(
                "payload",
                format!(
                    "{} bytes exceeds maximum of {}",
                    item.payload.len(),
                    MAX_FINS_TCP_PAYLOAD
                ),
            ));
        }

        let start = dst.write_pos();
        dst.put_bytes(&FINS_MAGIC);
        dst.put_u32(0);
        dst.put_u32(item.command.as_u32());
        dst.put_u32(item.error_code);
        dst.put_bytes(&item.payload);

        let length = (dst.write_pos() - start - 8) as u32;
        dst.put_bytes_at(start + 4, &length.to_be_bytes())
    }
}
