//! Shared protocol engine: state, deadlines, sequence counter and the send/ack
//! helpers used by both the node and the gateway machines.

use std::fmt;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ProtocolConfig;
use crate::protocol::{LogNodeId, RadioPacket};
use crate::radio::{PacketRadio, RadioError};
use crate::retry::RetryCounter;
use crate::wire::{self, BincodeCodec, EnvelopeCodec, FrameDecodeError, FrameEncodeError, LoraPacket, BROADCAST};

/// Every state either machine can be in.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum NetworkState {
    Starting,
    ListenForSilence,
    Idle,
    Sleeping,

    PingGateway,
    WaitingForPong,

    Prepare,
    WaitingForReady,
    ReadData,
    SendData,
    WaitingForSendMore,
    SendClose,
    WaitingForClosed,
    SendFailure,

    Listening,
}

impl NetworkState {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkState::Starting => "Starting",
            NetworkState::ListenForSilence => "ListenForSilence",
            NetworkState::Idle => "Idle",
            NetworkState::Sleeping => "Sleeping",
            NetworkState::PingGateway => "PingGateway",
            NetworkState::WaitingForPong => "WaitingForPong",
            NetworkState::Prepare => "Prepare",
            NetworkState::WaitingForReady => "WaitingForReady",
            NetworkState::ReadData => "ReadData",
            NetworkState::SendData => "SendData",
            NetworkState::WaitingForSendMore => "WaitingForSendMore",
            NetworkState::SendClose => "SendClose",
            NetworkState::WaitingForClosed => "WaitingForClosed",
            NetworkState::SendFailure => "SendFailure",
            NetworkState::Listening => "Listening",
        }
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure to put a frame on air. The state machine decides whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("encode failed: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("radio refused frame: {0}")]
    Radio(#[from] RadioError),
}

/// State and timing shared by both ends of the link. Owns the radio.
pub struct NetworkProtocol<R> {
    radio: R,
    clock: Box<dyn Clock>,
    codec: Box<dyn EnvelopeCodec>,
    config: ProtocolConfig,
    state: NetworkState,
    last_transition_at: u64,
    timer_done_at: Option<u64>,
    sequence: u8,
    address: u8,
    retries: RetryCounter,
}

impl<R: PacketRadio> NetworkProtocol<R> {
    pub fn new(radio: R, config: ProtocolConfig, clock: Box<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            radio,
            clock,
            codec: Box::new(BincodeCodec),
            retries: RetryCounter::new(config.max_retries),
            config,
            state: NetworkState::Starting,
            last_transition_at: now,
            timer_done_at: None,
            sequence: 0,
            address: BROADCAST,
        }
    }

    /// Replace the envelope codec (default: bincode).
    pub fn set_codec(&mut self, codec: Box<dyn EnvelopeCodec>) {
        self.codec = codec;
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Encode and broadcast an envelope stamped with the current sequence number.
    pub fn send_packet(&mut self, packet: &RadioPacket<'_>) -> Result<(), SendError> {
        self.send_packet_to(BROADCAST, packet)
    }

    pub fn send_packet_to(&mut self, to: u8, packet: &RadioPacket<'_>) -> Result<(), SendError> {
        let mut lora = wire::encode_frame(self.codec.as_ref(), packet)?;
        lora.to = to;
        lora.from = self.address;
        lora.id = self.sequence;
        debug!(
            "S {} {} {} ({} bytes)",
            packet.kind(),
            LogNodeId(packet.node_id()),
            lora.id,
            lora.size()
        );
        self.radio.send_packet(&lora)?;
        Ok(())
    }

    /// Bare flagged ack for frame `id`; skips the envelope codec.
    pub fn send_ack(&mut self, to: u8, id: u8) -> Result<(), SendError> {
        let ack = LoraPacket::ack(to, self.address, id);
        debug!("S Ack {} -> {:02x}", id, to);
        self.radio.send_packet(&ack)?;
        Ok(())
    }

    /// Decode a received frame with this instance's codec.
    pub fn decode<'a>(&self, lora: &'a LoraPacket) -> Result<RadioPacket<'a>, FrameDecodeError> {
        wire::decode_frame(self.codec.as_ref(), lora)
    }

    /// The only way to change state. `timer_ms > 0` arms a deadline that far ahead.
    pub fn transition(&mut self, new_state: NetworkState, timer_ms: u64) {
        let now = self.clock.now_ms();
        info!("{} -> {}", self.state, new_state);
        self.last_transition_at = now;
        self.state = new_state;
        self.timer_done_at = if timer_ms > 0 {
            Some(now + timer_ms)
        } else {
            None
        };
    }

    /// Armed deadline has passed. False when no deadline is armed.
    pub fn is_timer_done(&self) -> bool {
        matches!(self.timer_done_at, Some(at) if self.clock.now_ms() > at)
    }

    /// More than `ms` since the last transition.
    pub fn in_state_for(&self, ms: u64) -> bool {
        self.clock.now_ms().saturating_sub(self.last_transition_at) > ms
    }

    /// Receive unless a transmission is still on air.
    pub fn listen(&mut self) {
        if !self.radio.is_mode_tx() && !self.radio.is_mode_rx() {
            self.radio.set_mode_rx();
        }
    }

    /// Stand by unless a transmission is still on air.
    pub fn quiet(&mut self) {
        if !self.radio.is_mode_tx() && !self.radio.is_idle() {
            self.radio.set_mode_idle();
        }
    }

    pub fn zero_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn bump_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn is_sleeping(&self) -> bool {
        self.state == NetworkState::Sleeping
    }

    pub fn has_been_sleeping_for(&self, ms: u64) -> bool {
        self.is_sleeping() && self.in_state_for(ms)
    }

    pub fn retries(&mut self) -> &mut RetryCounter {
        &mut self.retries
    }

    /// Link address stamped into `from` of outgoing frames.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::NodeId;
    use crate::testing::RecordingRadio;
    use crate::wire::FLAG_ACK;

    fn engine(clock: &ManualClock) -> NetworkProtocol<RecordingRadio> {
        NetworkProtocol::new(
            RecordingRadio::new(),
            ProtocolConfig::default(),
            Box::new(clock.clone()),
        )
    }

    #[test]
    fn transition_arms_and_clears_timer() {
        let clock = ManualClock::new();
        let mut net = engine(&clock);
        assert!(!net.is_timer_done());

        net.transition(NetworkState::Idle, 100);
        clock.advance(100);
        assert!(!net.is_timer_done());
        clock.advance(1);
        assert!(net.is_timer_done());

        net.transition(NetworkState::Listening, 0);
        clock.advance(10_000);
        assert!(!net.is_timer_done());
    }

    #[test]
    fn in_state_for_counts_from_last_transition() {
        let clock = ManualClock::new();
        let mut net = engine(&clock);
        clock.advance(500);
        assert!(net.in_state_for(499));
        net.transition(NetworkState::Sleeping, 0);
        assert!(!net.in_state_for(0));
        clock.advance(50);
        assert!(net.has_been_sleeping_for(49));
        assert!(!net.has_been_sleeping_for(50));
    }

    #[test]
    fn send_packet_stamps_sequence_and_address() {
        let clock = ManualClock::new();
        let mut net = engine(&clock);
        net.set_address(7);
        net.bump_sequence();
        net.bump_sequence();
        net.send_packet(&RadioPacket::Ping {
            node_id: NodeId::from_bytes([1; 8]),
        })
        .unwrap();
        let sent = net.radio().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 2);
        assert_eq!(sent[0].from, 7);
        assert_eq!(sent[0].to, BROADCAST);
        assert!(!sent[0].is_empty());
    }

    #[test]
    fn ack_is_bare_flagged_frame() {
        let clock = ManualClock::new();
        let mut net = engine(&clock);
        net.send_ack(3, 42).unwrap();
        let ack = &net.radio().sent()[0];
        assert_eq!(ack.to, 3);
        assert_eq!(ack.id, 42);
        assert_eq!(ack.flags, FLAG_ACK);
        assert!(ack.is_empty());
        assert_eq!(net.decode(ack).unwrap(), RadioPacket::Ack);
    }

    #[test]
    fn sequence_wraps() {
        let clock = ManualClock::new();
        let mut net = engine(&clock);
        for _ in 0..256 {
            net.bump_sequence();
        }
        assert_eq!(net.sequence(), 0);
    }

    #[test]
    fn radio_failure_surfaces_as_send_error() {
        let clock = ManualClock::new();
        let mut net = engine(&clock);
        net.radio_mut().fail_sends(true);
        let r = net.send_packet(&RadioPacket::Ping {
            node_id: NodeId::from_bytes([1; 8]),
        });
        assert!(matches!(r, Err(SendError::Radio(_))));
    }
}
