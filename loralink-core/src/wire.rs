//! Framing: 4-byte physical header (to, from, id, flags) + envelope payload.

use std::fmt;

use bincode::Options;

use crate::protocol::RadioPacket;

/// Physical header length: to, from, id, flags.
pub const HEADER_LENGTH: usize = 4;
/// Largest raw frame the radio FIFO accepts (header included).
pub const MAX_RAW_LENGTH: usize = 255;
/// Largest envelope payload in one frame.
pub const MAX_PAYLOAD: usize = MAX_RAW_LENGTH - HEADER_LENGTH;
/// Default upload chunk; leaves room for the envelope around the data.
pub const DEFAULT_CHUNK_SIZE: usize = 242 - 24;

/// Broadcast address in `to`/`from`.
pub const BROADCAST: u8 = 0xff;
/// Flags bit 0: zero-payload acknowledgement frame.
pub const FLAG_ACK: u8 = 0x01;

/// One radio frame. `size` never exceeds the payload capacity.
#[derive(Clone, PartialEq, Eq)]
pub struct LoraPacket {
    pub to: u8,
    pub from: u8,
    pub id: u8,
    pub flags: u8,
    size: usize,
    data: [u8; MAX_PAYLOAD],
}

impl LoraPacket {
    pub fn new() -> Self {
        Self {
            to: BROADCAST,
            from: BROADCAST,
            id: 0,
            flags: 0,
            size: 0,
            data: [0u8; MAX_PAYLOAD],
        }
    }

    /// Parse a received buffer. Anything shorter than the header or longer than a
    /// frame yields an empty packet, which callers ignore.
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut lora = Self::new();
        if raw.len() < HEADER_LENGTH || raw.len() > MAX_RAW_LENGTH {
            return lora;
        }
        lora.to = raw[0];
        lora.from = raw[1];
        lora.id = raw[2];
        lora.flags = raw[3];
        let payload = &raw[HEADER_LENGTH..];
        lora.data[..payload.len()].copy_from_slice(payload);
        lora.size = payload.len();
        lora
    }

    /// Zero-payload flagged acknowledgement.
    pub fn ack(to: u8, from: u8, id: u8) -> Self {
        let mut lora = Self::new();
        lora.to = to;
        lora.from = from;
        lora.id = id;
        lora.flags = FLAG_ACK;
        lora
    }

    /// Header followed by payload, as handed to the radio FIFO.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LENGTH + self.size);
        out.extend_from_slice(&[self.to, self.from, self.id, self.flags]);
        out.extend_from_slice(self.payload());
        out
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Whole payload buffer, for codecs writing in place. Follow with `set_size`.
    pub fn payload_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_size(&mut self, size: usize) -> Result<(), FrameEncodeError> {
        if size > MAX_PAYLOAD {
            return Err(FrameEncodeError::TooLarge);
        }
        self.size = size;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & FLAG_ACK != 0
    }
}

impl Default for LoraPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoraPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoraPacket")
            .field("to", &self.to)
            .field("from", &self.from)
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("size", &self.size)
            .finish()
    }
}

/// Byte-level envelope encoding. Swappable per protocol instance.
pub trait EnvelopeCodec {
    /// Write `packet` into `out`, returning the number of bytes used.
    fn encode(&self, packet: &RadioPacket<'_>, out: &mut [u8]) -> Result<usize, FrameEncodeError>;

    /// Parse an envelope; `Data` payloads borrow from `bytes`.
    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<RadioPacket<'a>, FrameDecodeError>;
}

/// Default codec: bincode with varint integers, capped at one frame payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PAYLOAD as u64)
        .reject_trailing_bytes()
}

impl EnvelopeCodec for BincodeCodec {
    fn encode(&self, packet: &RadioPacket<'_>, out: &mut [u8]) -> Result<usize, FrameEncodeError> {
        let required = match bincode_options().serialized_size(packet) {
            Ok(n) => n as usize,
            Err(e) if matches!(*e, bincode::ErrorKind::SizeLimit) => {
                return Err(FrameEncodeError::TooLarge)
            }
            Err(e) => return Err(FrameEncodeError::Encode(e)),
        };
        if required > out.len() {
            return Err(FrameEncodeError::TooLarge);
        }
        bincode_options()
            .serialize_into(&mut out[..required], packet)
            .map_err(FrameEncodeError::Encode)?;
        Ok(required)
    }

    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<RadioPacket<'a>, FrameDecodeError> {
        bincode_options()
            .deserialize(bytes)
            .map_err(FrameDecodeError::Decode)
    }
}

/// Encode an envelope into a fresh frame using `codec`.
pub fn encode_frame(
    codec: &dyn EnvelopeCodec,
    packet: &RadioPacket<'_>,
) -> Result<LoraPacket, FrameEncodeError> {
    let mut lora = LoraPacket::new();
    let written = codec.encode(packet, lora.payload_buffer_mut())?;
    lora.set_size(written)?;
    Ok(lora)
}

/// Decode a frame's envelope. A zero-length frame flagged as ack is a bare `Ack`
/// and never reaches the codec.
pub fn decode_frame<'a>(
    codec: &dyn EnvelopeCodec,
    lora: &'a LoraPacket,
) -> Result<RadioPacket<'a>, FrameDecodeError> {
    if lora.is_empty() {
        if lora.is_ack() {
            return Ok(RadioPacket::Ack);
        }
        return Err(FrameDecodeError::Empty);
    }
    codec.decode(lora.payload())
}

/// Error encoding an envelope into a frame (codec failure or capacity).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Error decoding a frame (empty/invalid frame or codec failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("empty frame")]
    Empty,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
