//! Radio capability: the only view the protocol has of the transceiver.

use crate::wire::LoraPacket;

/// Half-duplex packet radio. Hardware backends keep register access behind this
/// trait; receive polling is the backend's own business (the driver loop drains
/// received frames into the protocol's `push`).
pub trait PacketRadio {
    fn is_mode_rx(&self) -> bool;
    fn is_mode_tx(&self) -> bool;
    fn is_idle(&self) -> bool;
    fn set_mode_rx(&mut self);
    fn set_mode_idle(&mut self);
    /// Queue one frame for transmission; the radio is in Tx until it is on air.
    fn send_packet(&mut self, packet: &LoraPacket) -> Result<(), RadioError>;
}

impl<T: PacketRadio + ?Sized> PacketRadio for Box<T> {
    fn is_mode_rx(&self) -> bool {
        (**self).is_mode_rx()
    }
    fn is_mode_tx(&self) -> bool {
        (**self).is_mode_tx()
    }
    fn is_idle(&self) -> bool {
        (**self).is_idle()
    }
    fn set_mode_rx(&mut self) {
        (**self).set_mode_rx()
    }
    fn set_mode_idle(&mut self) {
        (**self).set_mode_idle()
    }
    fn send_packet(&mut self, packet: &LoraPacket) -> Result<(), RadioError> {
        (**self).send_packet(packet)
    }
}

/// Transceiver operating mode, for backends tracking their own state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum RadioMode {
    #[default]
    Idle,
    Rx,
    Tx,
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio busy transmitting")]
    Busy,
    #[error("radio i/o: {0}")]
    Io(#[from] std::io::Error),
}
