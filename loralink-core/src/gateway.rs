//! Gateway side: answer pings with addresses, receive uploads into writers.

use std::io;

use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::ProtocolConfig;
use crate::engine::{NetworkProtocol, NetworkState};
use crate::identity::NodeId;
use crate::io::{GatewayCallbacks, Writer};
use crate::protocol::{LogNodeId, RadioPacket};
use crate::radio::PacketRadio;
use crate::wire::{EnvelopeCodec, LoraPacket, BROADCAST};

/// Link address the gateway sends from.
pub const GATEWAY_ADDRESS: u8 = 0x00;

/// Why the gateway could not take a Prepare or Data frame. Each is answered with a Nack.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("opening writer: {0}")]
    Open(#[source] io::Error),
    #[error("no receive session")]
    NoSession,
    #[error("data from {got}, session belongs to {expected}")]
    WrongNode { expected: NodeId, got: NodeId },
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("session already finished")]
    Finished,
}

/// The node currently being served and the address counter.
#[derive(Debug, Clone)]
pub struct CurrentNodeTracker {
    node_id: Option<NodeId>,
    address: u8,
    last_ping_at: u64,
    next_address: u8,
    cooldown_ms: u64,
}

impl CurrentNodeTracker {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            node_id: None,
            address: BROADCAST,
            last_ping_at: 0,
            next_address: 1,
            cooldown_ms,
        }
    }

    /// Address to answer a Ping with, or `None` to ignore it. The current node
    /// always gets its address back; another node has to wait out the cooldown.
    pub fn ping(&mut self, node_id: NodeId, now: u64) -> Option<u8> {
        match self.node_id {
            Some(current) if current == node_id => {
                self.last_ping_at = now;
                return Some(self.address);
            }
            Some(_) if now.saturating_sub(self.last_ping_at) < self.cooldown_ms => {
                return None;
            }
            _ => {}
        }
        self.node_id = Some(node_id);
        self.address = self.allocate();
        self.last_ping_at = now;
        Some(self.address)
    }

    pub fn current(&self) -> Option<NodeId> {
        self.node_id
    }

    fn allocate(&mut self) -> u8 {
        let address = self.next_address;
        self.next_address = match address.wrapping_add(1) {
            0 | BROADCAST => 1,
            next => next,
        };
        address
    }
}

/// One upload in progress (or just finished) at the gateway.
pub struct ReceiveSession {
    node_id: NodeId,
    writer: Option<Box<dyn Writer>>,
    received: u32,
    expected: u32,
    receive_sequence: u8,
    failed: bool,
}

impl ReceiveSession {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Id of the last accepted frame.
    pub fn receive_sequence(&self) -> u8 {
        self.receive_sequence
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

/// What happened to an accepted Data frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DownloadOutcome {
    Accepted,
    /// Not the next expected id; acked but not written.
    Duplicate,
    Closed { success: bool },
}

fn close_writer<C: GatewayCallbacks>(callbacks: &mut C, mut writer: Box<dyn Writer>, success: bool) {
    let success = match writer.close() {
        Ok(()) => success,
        Err(e) => {
            warn!("closing writer: {}", e);
            false
        }
    };
    callbacks.close_writer(writer, success);
}

#[derive(Default)]
pub struct DownloadTracker {
    session: Option<ReceiveSession>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&ReceiveSession> {
        self.session.as_ref()
    }

    /// Start a session for `node_id`, abandoning any unfinished one.
    pub fn prepare<C: GatewayCallbacks>(
        &mut self,
        callbacks: &mut C,
        node_id: NodeId,
        size: u32,
    ) -> Result<(), TransferError> {
        if let Some(writer) = self.session.take().and_then(|s| s.writer) {
            info!("abandoning unfinished upload");
            close_writer(callbacks, writer, false);
        }
        let writer = callbacks
            .open_writer(node_id, size)
            .map_err(TransferError::Open)?;
        self.session = Some(ReceiveSession {
            node_id,
            writer: Some(writer),
            received: 0,
            expected: size,
            receive_sequence: 0,
            failed: false,
        });
        Ok(())
    }

    /// Handle one Data frame with sequence `id`. Empty `data` closes the session.
    pub fn download<C: GatewayCallbacks>(
        &mut self,
        callbacks: &mut C,
        node_id: NodeId,
        id: u8,
        data: &[u8],
    ) -> Result<DownloadOutcome, TransferError> {
        let session = self.session.as_mut().ok_or(TransferError::NoSession)?;
        if session.node_id != node_id {
            return Err(TransferError::WrongNode {
                expected: session.node_id,
                got: node_id,
            });
        }
        if id != session.receive_sequence.wrapping_add(1) {
            debug!("duplicate {} (last {})", id, session.receive_sequence);
            return Ok(DownloadOutcome::Duplicate);
        }
        let Some(writer) = session.writer.as_mut() else {
            return Err(TransferError::Finished);
        };

        if data.is_empty() {
            session.receive_sequence = id;
            let success = session.received == session.expected;
            if success {
                info!("upload complete: {} bytes from {}", session.received, node_id);
            } else {
                warn!(
                    "MISMATCH received {} expected {} from {}",
                    session.received, session.expected, node_id
                );
            }
            if let Some(writer) = session.writer.take() {
                close_writer(callbacks, writer, success);
            }
            return Ok(DownloadOutcome::Closed { success });
        }

        let error = match writer.write(data) {
            Ok(n) if n == data.len() => {
                session.receive_sequence = id;
                session.received += n as u32;
                return Ok(DownloadOutcome::Accepted);
            }
            Ok(written) => TransferError::ShortWrite {
                written,
                expected: data.len(),
            },
            Err(e) => TransferError::Write(e),
        };
        session.failed = true;
        if let Some(writer) = session.writer.take() {
            close_writer(callbacks, writer, false);
        }
        Err(error)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Reply {
    Pong { node_id: NodeId, address: u8 },
    Ack { to: u8, id: u8 },
    Nack { to: u8, node_id: NodeId },
}

struct PendingReply {
    reply: Reply,
    due_at: u64,
}

pub struct GatewayNetworkProtocol<R, C> {
    net: NetworkProtocol<R>,
    callbacks: C,
    nodes: CurrentNodeTracker,
    downloads: DownloadTracker,
    pending: Option<PendingReply>,
}

impl<R: PacketRadio, C: GatewayCallbacks> GatewayNetworkProtocol<R, C> {
    pub fn new(radio: R, callbacks: C, config: ProtocolConfig) -> Self {
        Self::with_clock(radio, callbacks, config, Box::new(MonotonicClock::new()))
    }

    pub fn with_clock(radio: R, callbacks: C, config: ProtocolConfig, clock: Box<dyn Clock>) -> Self {
        let nodes = CurrentNodeTracker::new(config.ping_cooldown_ms);
        let mut net = NetworkProtocol::new(radio, config, clock);
        net.set_address(GATEWAY_ADDRESS);
        Self {
            net,
            callbacks,
            nodes,
            downloads: DownloadTracker::new(),
            pending: None,
        }
    }

    pub fn set_codec(&mut self, codec: Box<dyn EnvelopeCodec>) {
        self.net.set_codec(codec);
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

    pub fn session(&self) -> Option<&ReceiveSession> {
        self.downloads.session()
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.nodes.current()
    }

    pub fn tick(&mut self) {
        match self.net.state() {
            NetworkState::Starting => self.net.transition(NetworkState::Listening, 0),
            NetworkState::Listening => self.net.listen(),
            _ => {}
        }

        let due = matches!(&self.pending, Some(p) if self.net.now() >= p.due_at);
        if !due || self.net.radio().is_mode_tx() {
            return;
        }
        if let Some(PendingReply { reply, .. }) = self.pending.take() {
            let sent = match reply {
                Reply::Pong { node_id, address } => self
                    .net
                    .send_packet_to(BROADCAST, &RadioPacket::Pong { node_id, address }),
                Reply::Ack { to, id } => self.net.send_ack(to, id),
                Reply::Nack { to, node_id } => {
                    self.net.send_packet_to(to, &RadioPacket::Nack { node_id })
                }
            };
            if let Err(e) = sent {
                warn!("reply {:?} failed: {}", reply, e);
            }
        }
    }

    fn reply(&mut self, reply: Reply) {
        let due_at = self.net.now() + self.net.config().reply_delay_ms;
        self.pending = Some(PendingReply { reply, due_at });
    }

    /// Dispatch one received frame.
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

        match packet {
            RadioPacket::Ping { node_id } => match self.nodes.ping(node_id, self.net.now()) {
                Some(address) => self.reply(Reply::Pong { node_id, address }),
                None => info!("IGNORE ping from {}", node_id),
            },
            RadioPacket::Prepare { node_id, size } => {
                match self.downloads.prepare(&mut self.callbacks, node_id, size) {
                    Ok(()) => {
                        info!("receiving {} bytes from {}", size, node_id);
                        self.reply(Reply::Ack {
                            to: lora.from,
                            id: lora.id,
                        });
                    }
                    Err(e) => {
                        warn!("prepare from {}: {}", node_id, e);
                        self.reply(Reply::Nack {
                            to: lora.from,
                            node_id,
                        });
                    }
                }
            }
            RadioPacket::Data { node_id, data } => {
                match self
                    .downloads
                    .download(&mut self.callbacks, node_id, lora.id, data)
                {
                    Ok(_) => self.reply(Reply::Ack {
                        to: lora.from,
                        id: lora.id,
                    }),
                    Err(e) => {
                        warn!("data from {}: {}", node_id, e);
                        self.reply(Reply::Nack {
                            to: lora.from,
                            node_id,
                        });
                    }
                }
            }
            RadioPacket::Ack | RadioPacket::Nack { .. } | RadioPacket::Pong { .. } => {}
        }
    }
}
