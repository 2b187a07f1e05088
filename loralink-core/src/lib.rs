//! Half-duplex LoRa link protocol.
//! Host-driven: no I/O of its own; the host polls the radio, calls `tick()`,
//! and hands received frames to `push()`.

pub mod clock;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod identity;
pub mod io;
pub mod node;
pub mod protocol;
pub mod radio;
pub mod retry;
pub mod sim;
pub mod timer;
pub mod wire;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::ProtocolConfig;
pub use engine::{NetworkProtocol, NetworkState, SendError};
pub use gateway::{
    CurrentNodeTracker, DownloadOutcome, DownloadTracker, GatewayNetworkProtocol, ReceiveSession,
    TransferError, GATEWAY_ADDRESS,
};
pub use identity::{NodeId, ParseNodeIdError};
pub use io::{GatewayCallbacks, NodeCallbacks, OpenedReader, ReadOutcome, Reader, StreamReader, Writer};
pub use node::NodeNetworkProtocol;
pub use protocol::{PacketKind, RadioPacket};
pub use radio::{PacketRadio, RadioError, RadioMode};
pub use retry::RetryCounter;
pub use sim::{SimFrame, SimMedium, SimRadio};
pub use timer::Timer;
pub use wire::{decode_frame, encode_frame, BincodeCodec, EnvelopeCodec, FrameDecodeError, FrameEncodeError, LoraPacket};
