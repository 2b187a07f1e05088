//! Node identity: the 8-byte id a node reports in every envelope.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Length of a node identifier in bytes.
pub const NODE_ID_LEN: usize = 8;

/// Opaque 8-byte node identifier. Copied by value; equality is byte-wise.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Random id, for hosts without a hardware serial number.
    pub fn generate() -> Self {
        let mut raw = [0u8; NODE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        NodeId(raw)
    }

    /// Lowercase hex, used for log lines and archive directory names.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    /// Parse 16 hex characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != NODE_ID_LEN * 2 {
            return Err(ParseNodeIdError::Length(s.len()));
        }
        let mut raw = [0u8; NODE_ID_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            let pair = s.get(i * 2..i * 2 + 2).ok_or(ParseNodeIdError::Hex)?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| ParseNodeIdError::Hex)?;
        }
        Ok(NodeId(raw))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseNodeIdError {
    #[error("expected 16 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex digit")]
    Hex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let id = NodeId::from_bytes([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(id.to_hex(), "deadbeef00010203");
        assert_eq!(id.to_string(), id.to_hex());
        let parsed: NodeId = "deadbeef00010203".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            "abcd".parse::<NodeId>(),
            Err(ParseNodeIdError::Length(4))
        ));
        assert!(matches!(
            "zz00000000000000".parse::<NodeId>(),
            Err(ParseNodeIdError::Hex)
        ));
    }

    #[test]
    fn equality_is_bytewise() {
        let a = NodeId::from_bytes([1; 8]);
        let b = NodeId::from_bytes([1; 8]);
        let c = NodeId::from_bytes([2; 8]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }
}
