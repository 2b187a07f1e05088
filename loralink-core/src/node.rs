//! Node side: listen for silence, find a gateway, upload one stream in acked
//! chunks, then sleep.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::ProtocolConfig;
use crate::engine::{NetworkProtocol, NetworkState};
use crate::identity::NodeId;
use crate::io::{NodeCallbacks, ReadOutcome, Reader};
use crate::protocol::{LogNodeId, RadioPacket};
use crate::radio::PacketRadio;
use crate::timer::Timer;
use crate::wire::{EnvelopeCodec, LoraPacket, BROADCAST, MAX_PAYLOAD};

pub struct NodeNetworkProtocol<R, C> {
    net: NetworkProtocol<R>,
    callbacks: C,
    node_id: NodeId,
    buffer: [u8; MAX_PAYLOAD],
    buffered: usize,
    reader: Option<Box<dyn Reader>>,
    upload_size: u32,
    rng: StdRng,
    transmitting: Timer,
    waiting_on_ack: Timer,
}

fn send_or_warn<R: PacketRadio>(net: &mut NetworkProtocol<R>, packet: &RadioPacket<'_>) {
    if let Err(e) = net.send_packet(packet) {
        warn!("send {} failed: {}", packet.kind(), e);
    }
}

/// State to re-enter when a waiting state gives up on its window.
fn resend_state(waiting: NetworkState) -> Option<NetworkState> {
    match waiting {
        NetworkState::WaitingForReady => Some(NetworkState::Prepare),
        NetworkState::WaitingForSendMore => Some(NetworkState::SendData),
        NetworkState::WaitingForClosed => Some(NetworkState::SendClose),
        _ => None,
    }
}

impl<R: PacketRadio, C: NodeCallbacks> NodeNetworkProtocol<R, C> {
    pub fn new(radio: R, callbacks: C, node_id: NodeId, config: ProtocolConfig) -> Self {
        Self::with_clock(radio, callbacks, node_id, config, Box::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        radio: R,
        callbacks: C,
        node_id: NodeId,
        config: ProtocolConfig,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            net: NetworkProtocol::new(radio, config, clock),
            callbacks,
            node_id,
            buffer: [0u8; MAX_PAYLOAD],
            buffered: 0,
            reader: None,
            upload_size: 0,
            rng: StdRng::from_entropy(),
            transmitting: Timer::new(),
            waiting_on_ack: Timer::new(),
        }
    }

    /// Deterministic backoff and idle windows.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Replace the envelope codec. Both ends of a link must agree on it.
    pub fn set_codec(&mut self, codec: Box<dyn EnvelopeCodec>) {
        self.net.set_codec(codec);
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn state(&self) -> NetworkState {
        self.net.state()
    }

    pub fn engine(&self) -> &NetworkProtocol<R> {
        &self.net
    }

    pub fn radio_mut(&mut self) -> &mut R {
        self.net.radio_mut()
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn transmitting(&self) -> &Timer {
        &self.transmitting
    }

    pub fn waiting_on_ack(&self) -> &Timer {
        &self.waiting_on_ack
    }

    /// Wake a sleeping node so it starts a new upload cycle. False if not sleeping.
    pub fn send_to_gateway(&mut self) -> bool {
        if !self.net.is_sleeping() {
            return false;
        }
        self.wake();
        true
    }

    /// Abandon whatever the node is doing and start over.
    pub fn restart(&mut self) {
        self.finish_reader(false);
        self.net.transition(NetworkState::Starting, 0);
    }

    /// Advance timers and run the current state's action.
    pub fn tick(&mut self) {
        let now = self.net.now();
        let tx = self.net.radio().is_mode_tx();
        if tx && !self.transmitting.is_running() {
            self.transmitting.begin(now);
        } else if !tx && self.transmitting.is_running() {
            self.transmitting.end(now);
        }

        let cfg = self.net.config().clone();
        match self.net.state() {
            NetworkState::Starting => {
                self.net.retries().clear();
                self.net.transition(NetworkState::ListenForSilence, 0);
            }
            NetworkState::Idle => {
                self.net.quiet();
                if self.net.is_timer_done() {
                    self.net.transition(NetworkState::ListenForSilence, 0);
                }
            }
            NetworkState::Sleeping => {
                self.net.quiet();
                if self.net.is_timer_done() {
                    self.wake();
                }
            }
            NetworkState::ListenForSilence => {
                self.net.retries().clear();
                self.net.listen();
                if self.net.in_state_for(cfg.listen_for_silence_ms) {
                    self.net.transition(NetworkState::PingGateway, 0);
                }
            }
            NetworkState::PingGateway => {
                send_or_warn(&mut self.net, &RadioPacket::Ping { node_id: self.node_id });
                self.net
                    .transition(NetworkState::WaitingForPong, cfg.receive_window_ms);
            }
            NetworkState::WaitingForPong => {
                self.net.listen();
                if self.net.is_timer_done() {
                    info!("no pong from gateway");
                    self.net.transition(NetworkState::ListenForSilence, 0);
                }
            }
            NetworkState::Prepare => self.prepare(&cfg),
            NetworkState::ReadData => self.read_data(&cfg),
            NetworkState::SendData => {
                let packet = RadioPacket::Data {
                    node_id: self.node_id,
                    data: &self.buffer[..self.buffered],
                };
                send_or_warn(&mut self.net, &packet);
                self.waiting_on_ack.begin(now);
                self.net
                    .transition(NetworkState::WaitingForSendMore, cfg.receive_window_ms);
            }
            NetworkState::SendClose => {
                send_or_warn(
                    &mut self.net,
                    &RadioPacket::Data {
                        node_id: self.node_id,
                        data: &[],
                    },
                );
                self.waiting_on_ack.begin(now);
                self.net
                    .transition(NetworkState::WaitingForClosed, cfg.receive_window_ms);
            }
            state @ (NetworkState::WaitingForReady
            | NetworkState::WaitingForSendMore
            | NetworkState::WaitingForClosed) => {
                self.net.listen();
                if self.net.is_timer_done() {
                    self.waiting_on_ack.cancel();
                    info!("no ack in {}", state);
                    self.retry_or_fail(state);
                }
            }
            NetworkState::SendFailure => self.net.quiet(),
            NetworkState::Listening => {}
        }
    }

    fn prepare(&mut self, cfg: &ProtocolConfig) {
        if self.reader.is_none() {
            match self.callbacks.open_reader() {
                Some(opened) => {
                    info!("uploading {} bytes", opened.size);
                    self.reader = Some(opened.reader);
                    self.upload_size = opened.size;
                }
                None => {
                    info!("nothing to upload");
                    self.net
                        .transition(NetworkState::Sleeping, cfg.sleep_after_upload_ms);
                    return;
                }
            }
        }
        self.net.zero_sequence();
        send_or_warn(
            &mut self.net,
            &RadioPacket::Prepare {
                node_id: self.node_id,
                size: self.upload_size,
            },
        );
        self.waiting_on_ack.begin(self.net.now());
        self.net
            .transition(NetworkState::WaitingForReady, cfg.receive_window_ms);
    }

    fn read_data(&mut self, cfg: &ProtocolConfig) {
        let chunk = cfg.effective_chunk_size();
        let outcome = match self.reader.as_mut() {
            Some(reader) => reader.read(&mut self.buffer[..chunk]),
            None => Ok(ReadOutcome::End),
        };
        match outcome {
            Ok(ReadOutcome::Data(n)) => {
                self.buffered = n.min(chunk);
                self.net.transition(NetworkState::SendData, 0);
            }
            Ok(ReadOutcome::Pending) => {}
            Ok(ReadOutcome::End) => self.end_of_stream(),
            Err(e) => {
                warn!("read failed, closing transfer: {}", e);
                self.end_of_stream();
            }
        }
    }

    fn end_of_stream(&mut self) {
        self.buffered = 0;
        info!("transmitting: {}", self.transmitting);
        info!("waiting on ack: {}", self.waiting_on_ack);
        self.net.transition(NetworkState::SendClose, 0);
    }

    fn retry_or_fail(&mut self, waiting: NetworkState) {
        let Some(resend) = resend_state(waiting) else {
            return;
        };
        if self.net.retries().can_retry() {
            self.net.transition(resend, 0);
        } else {
            warn!("retries exhausted in {}", waiting);
            self.finish_reader(false);
            self.net.transition(NetworkState::SendFailure, 0);
        }
    }

    fn finish_reader(&mut self, success: bool) {
        self.buffered = 0;
        if let Some(mut reader) = self.reader.take() {
            if let Err(e) = reader.close() {
                warn!("closing reader: {}", e);
            }
            self.callbacks.close_reader(reader, success);
        }
    }

    fn wake(&mut self) {
        let cfg = self.net.config();
        let (min, max) = (cfg.idle_window_min_ms, cfg.idle_window_max_ms);
        let window = self.random_between(min, max);
        self.net.transition(NetworkState::Idle, window);
    }

    fn back_off(&mut self) {
        let cfg = self.net.config();
        let (min, max) = (cfg.backoff_min_ms, cfg.backoff_max_ms);
        let window = self.random_between(min, max);
        self.net.transition(NetworkState::Sleeping, window);
    }

    fn random_between(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }

    /// Frames the gateway sends this node: its link address or broadcast.
    fn addressed_to_me(&self, lora: &LoraPacket) -> bool {
        lora.to == BROADCAST || lora.to == self.net.address()
    }

    /// Dispatch one received frame. Anything unexpected for the current state is ignored.
    pub fn push(&mut self, lora: &LoraPacket) {
        let packet = match self.net.decode(lora) {
            Ok(p) => p,
            Err(e) => {
                warn!("R undecodable frame from {:02x}: {}", lora.from, e);
                return;
            }
        };
        debug!(
            "R {} {} {} ({} bytes)",
            packet.kind(),
            LogNodeId(packet.node_id()),
            lora.id,
            lora.size()
        );

        let foreign = match packet.node_id() {
            Some(id) => id != self.node_id,
            None => !self.addressed_to_me(lora),
        };

        let state = self.net.state();
        match (state, packet) {
            (NetworkState::ListenForSilence, _) if foreign => {
                info!("overheard traffic, backing off");
                self.back_off();
            }
            (NetworkState::WaitingForPong, RadioPacket::Pong { node_id, address }) => {
                if node_id != self.node_id {
                    debug!("pong for {}, ignoring", node_id);
                    return;
                }
                info!("gateway assigned address {}", address);
                self.net.retries().clear();
                self.net.set_address(address);
                self.net.transition(NetworkState::Prepare, 0);
            }
            (
                NetworkState::WaitingForReady
                | NetworkState::WaitingForSendMore
                | NetworkState::WaitingForClosed,
                RadioPacket::Ack,
            ) => {
                if lora.id != self.net.sequence() || !self.addressed_to_me(lora) {
                    debug!("stale ack {} (expecting {})", lora.id, self.net.sequence());
                    return;
                }
                self.acked(state);
            }
            (
                NetworkState::WaitingForReady
                | NetworkState::WaitingForSendMore
                | NetworkState::WaitingForClosed,
                RadioPacket::Nack { node_id },
            ) if node_id == self.node_id => {
                self.waiting_on_ack.cancel();
                warn!("gateway refused frame in {}", state);
                self.retry_or_fail(state);
            }
            _ => {}
        }
    }

    fn acked(&mut self, state: NetworkState) {
        let now = self.net.now();
        self.waiting_on_ack.end(now);
        self.net.retries().clear();
        match state {
            NetworkState::WaitingForReady => {
                self.net.zero_sequence();
                self.net.bump_sequence();
                self.net.transition(NetworkState::ReadData, 0);
            }
            NetworkState::WaitingForSendMore => {
                self.net.bump_sequence();
                self.net.transition(NetworkState::ReadData, 0);
            }
            NetworkState::WaitingForClosed => {
                self.net.bump_sequence();
                info!("upload of {} bytes complete", self.upload_size);
                self.finish_reader(true);
                let sleep = self.net.config().sleep_after_upload_ms;
                self.net.transition(NetworkState::Sleeping, sleep);
            }
            _ => {}
        }
    }
}
