//! Application envelope carried in a frame's payload: kind plus per-kind fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// Envelope kinds, used for logging and dispatch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PacketKind {
    Ack,
    Nack,
    Ping,
    Pong,
    Prepare,
    Data,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Ack => "Ack",
            PacketKind::Nack => "Nack",
            PacketKind::Ping => "Ping",
            PacketKind::Pong => "Pong",
            PacketKind::Prepare => "Prepare",
            PacketKind::Data => "Data",
        };
        f.write_str(name)
    }
}

/// All envelope messages. Encoding is delegated to an `EnvelopeCodec` (see wire module).
///
/// `Data` borrows its payload from the buffer being encoded or decoded; the envelope
/// never outlives that call.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RadioPacket<'a> {
    /// Acknowledgement. Normally sent as a bare flagged frame with no payload.
    Ack,
    /// Receiver could not take the frame (no session, storage failure).
    Nack { node_id: NodeId },
    /// Discovery: node looking for a gateway.
    Ping { node_id: NodeId },
    /// Discovery reply: the address the gateway assigned to `node_id`.
    Pong { node_id: NodeId, address: u8 },
    /// Start of an upload of `size` bytes.
    Prepare { node_id: NodeId, size: u32 },
    /// One chunk of an upload. Empty `data` closes the transfer.
    Data {
        node_id: NodeId,
        #[serde(borrow)]
        data: &'a [u8],
    },
}

impl<'a> RadioPacket<'a> {
    pub fn kind(&self) -> PacketKind {
        match self {
            RadioPacket::Ack => PacketKind::Ack,
            RadioPacket::Nack { .. } => PacketKind::Nack,
            RadioPacket::Ping { .. } => PacketKind::Ping,
            RadioPacket::Pong { .. } => PacketKind::Pong,
            RadioPacket::Prepare { .. } => PacketKind::Prepare,
            RadioPacket::Data { .. } => PacketKind::Data,
        }
    }

    /// Node id carried by the envelope; bare acks have none.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            RadioPacket::Ack => None,
            RadioPacket::Nack { node_id }
            | RadioPacket::Ping { node_id }
            | RadioPacket::Pong { node_id, .. }
            | RadioPacket::Prepare { node_id, .. }
            | RadioPacket::Data { node_id, .. } => Some(*node_id),
        }
    }

    /// Opaque payload; empty for every kind except non-closing `Data`.
    pub fn data(&self) -> &'a [u8] {
        match self {
            RadioPacket::Data { data, .. } => *data,
            _ => &[],
        }
    }

    /// True for a zero-length `Data` envelope, which marks end of transfer.
    pub fn is_close(&self) -> bool {
        matches!(self, RadioPacket::Data { data, .. } if data.is_empty())
    }
}

/// Node id formatted for log lines; "-" when the envelope has none.
pub(crate) struct LogNodeId(pub Option<NodeId>);

impl fmt::Display for LogNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => f.write_str("-"),
        }
    }
}
