//! In-process radio medium: connects any number of simulated half-duplex radios.
//!
//! A frame reaches every other radio that is in receive mode at the moment it is
//! sent. The sender stays in Tx until its next `poll()`, then returns to the mode
//! it was in before transmitting.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::radio::{PacketRadio, RadioError, RadioMode};
use crate::wire::LoraPacket;

/// One frame put on the medium.
#[derive(Debug, Clone)]
pub struct SimFrame {
    /// Index of the sending radio.
    pub sender: usize,
    pub lora: LoraPacket,
    pub dropped: bool,
}

#[derive(Default)]
struct Slot {
    mode: RadioMode,
    resume: RadioMode,
    incoming: VecDeque<Vec<u8>>,
}

#[derive(Default)]
struct MediumState {
    slots: Vec<Slot>,
    drop_next: usize,
    log: Vec<SimFrame>,
}

#[derive(Clone, Default)]
pub struct SimMedium {
    inner: Rc<RefCell<MediumState>>,
}

impl SimMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new radio, initially idle.
    pub fn radio(&self) -> SimRadio {
        let mut state = self.inner.borrow_mut();
        state.slots.push(Slot::default());
        SimRadio {
            medium: self.inner.clone(),
            index: state.slots.len() - 1,
        }
    }

    /// Discard the next `n` frames sent by any radio.
    pub fn drop_next(&self, n: usize) {
        self.inner.borrow_mut().drop_next = n;
    }

    /// Every frame sent so far, dropped ones included.
    pub fn frames(&self) -> Vec<SimFrame> {
        self.inner.borrow().log.clone()
    }
}

pub struct SimRadio {
    medium: Rc<RefCell<MediumState>>,
    index: usize,
}

impl SimRadio {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mode(&self) -> RadioMode {
        self.medium.borrow().slots[self.index].mode
    }

    /// Finish any transmission in progress.
    pub fn poll(&mut self) {
        let mut state = self.medium.borrow_mut();
        let slot = &mut state.slots[self.index];
        if slot.mode == RadioMode::Tx {
            slot.mode = slot.resume;
        }
    }

    /// Next received frame, oldest first.
    pub fn take_incoming(&mut self) -> Option<LoraPacket> {
        let raw = self.medium.borrow_mut().slots[self.index]
            .incoming
            .pop_front()?;
        Some(LoraPacket::from_raw(&raw))
    }

    fn set_mode(&mut self, mode: RadioMode) {
        self.medium.borrow_mut().slots[self.index].mode = mode;
    }
}

impl PacketRadio for SimRadio {
    fn is_mode_rx(&self) -> bool {
        self.mode() == RadioMode::Rx
    }

    fn is_mode_tx(&self) -> bool {
        self.mode() == RadioMode::Tx
    }

    fn is_idle(&self) -> bool {
        self.mode() == RadioMode::Idle
    }

    fn set_mode_rx(&mut self) {
        self.set_mode(RadioMode::Rx);
    }

    fn set_mode_idle(&mut self) {
        self.set_mode(RadioMode::Idle);
    }

    fn send_packet(&mut self, packet: &LoraPacket) -> Result<(), RadioError> {
        let mut state = self.medium.borrow_mut();
        let sender = self.index;
        {
            let slot = &mut state.slots[sender];
            if slot.mode == RadioMode::Tx {
                return Err(RadioError::Busy);
            }
            slot.resume = slot.mode;
            slot.mode = RadioMode::Tx;
        }

        let dropped = state.drop_next > 0;
        if dropped {
            state.drop_next -= 1;
            trace!("radio {} frame {} dropped", sender, packet.id);
        } else {
            let raw = packet.to_raw();
            for (i, slot) in state.slots.iter_mut().enumerate() {
                if i != sender && slot.mode == RadioMode::Rx {
                    slot.incoming.push_back(raw.clone());
                }
            }
        }
        state.log.push(SimFrame {
            sender,
            lora: packet.clone(),
            dropped,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ProtocolConfig;
    use crate::engine::NetworkState;
    use crate::gateway::GatewayNetworkProtocol;
    use crate::identity::NodeId;
    use crate::node::NodeNetworkProtocol;
    use crate::protocol::RadioPacket;
    use crate::testing::{MemoryArchive, MemoryUpload, TaggedCodec, CODEC_TAG};
    use crate::wire::{decode_frame, encode_frame, BincodeCodec, BROADCAST};

    struct Harness {
        clock: ManualClock,
        medium: SimMedium,
        upload: MemoryUpload,
        archive: MemoryArchive,
        node: NodeNetworkProtocol<SimRadio, MemoryUpload>,
        gateway: GatewayNetworkProtocol<SimRadio, MemoryArchive>,
    }

    fn node_id() -> NodeId {
        NodeId::from_bytes([0x42; 8])
    }

    impl Harness {
        fn new(payload: Vec<u8>, config: ProtocolConfig) -> Self {
            let clock = ManualClock::new();
            let medium = SimMedium::new();
            let upload = MemoryUpload::with(payload);
            let archive = MemoryArchive::new();
            let mut node = NodeNetworkProtocol::with_clock(
                medium.radio(),
                upload.clone(),
                node_id(),
                config.clone(),
                Box::new(clock.clone()),
            );
            node.seed_rng(1);
            let gateway = GatewayNetworkProtocol::with_clock(
                medium.radio(),
                archive.clone(),
                config,
                Box::new(clock.clone()),
            );
            Self {
                clock,
                medium,
                upload,
                archive,
                node,
                gateway,
            }
        }

        fn round(&mut self) {
            self.clock.advance(10);
            self.node.radio_mut().poll();
            self.gateway.radio_mut().poll();
            self.node.tick();
            self.gateway.tick();
            while let Some(lora) = self.node.radio_mut().take_incoming() {
                self.node.push(&lora);
            }
            while let Some(lora) = self.gateway.radio_mut().take_incoming() {
                self.gateway.push(&lora);
            }
        }

        /// Run until the upload is closed on the node or `ms` elapse.
        fn run_upload(&mut self, ms: u64, mut each: impl FnMut(&SimMedium)) {
            for _ in 0..ms / 10 {
                self.round();
                each(&self.medium);
                if !self.upload.closed().is_empty() {
                    return;
                }
            }
        }

        fn node_frames(&self) -> Vec<LoraPacket> {
            let node = self.node.engine().radio().index();
            self.medium
                .frames()
                .into_iter()
                .filter(|f| f.sender == node)
                .map(|f| f.lora)
                .collect()
        }
    }

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            chunk_size: 100,
            backoff_min_ms: 3000,
            backoff_max_ms: 3000,
            ..ProtocolConfig::default()
        }
    }

    fn payload() -> Vec<u8> {
        (0..500u32).map(|i| (i * 7) as u8).collect()
    }

    #[test]
    fn upload_of_five_chunks() {
        let mut h = Harness::new(payload(), config());
        h.run_upload(30_000, |_| {});

        assert_eq!(h.upload.closed(), vec![true]);
        assert_eq!(h.node.state(), NetworkState::Sleeping);
        let uploads = h.archive.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].success, Some(true));
        assert_eq!(*uploads[0].data.borrow(), payload());
        let session = h.gateway.session().unwrap();
        assert_eq!(session.received(), 500);
        assert_eq!(session.expected(), 500);

        let gateway_index = h.gateway.engine().radio().index();
        let pong = h
            .medium
            .frames()
            .into_iter()
            .find(|f| f.sender == gateway_index && !f.lora.is_ack())
            .unwrap();
        assert_eq!(
            decode_frame(&BincodeCodec, &pong.lora).unwrap(),
            RadioPacket::Pong {
                node_id: node_id(),
                address: 1
            }
        );

        let frames = h.node_frames();
        let decoded: Vec<_> = frames
            .iter()
            .map(|f| (f.id, decode_frame(&BincodeCodec, f).unwrap()))
            .collect();
        assert!(matches!(decoded[0].1, RadioPacket::Ping { .. }));
        assert_eq!(
            decoded[1].1,
            RadioPacket::Prepare {
                node_id: node_id(),
                size: 500
            }
        );
        for (i, (id, packet)) in decoded[2..7].iter().enumerate() {
            assert_eq!(*id as usize, i + 1);
            assert_eq!(packet.data().len(), 100);
        }
        assert_eq!(decoded[7].0, 6);
        assert!(decoded[7].1.is_close());
        assert_eq!(decoded.len(), 8);
        assert!(frames[1..].iter().all(|f| f.from == 1));
    }

    #[test]
    fn overheard_frame_silences_node_until_backoff_ends() {
        let mut h = Harness::new(payload(), config());
        let mut other = h.medium.radio();
        for _ in 0..100 {
            h.round();
        }
        assert_eq!(h.node.state(), NetworkState::ListenForSilence);

        let mut ping = encode_frame(
            &BincodeCodec,
            &RadioPacket::Ping {
                node_id: NodeId::from_bytes([0x99; 8]),
            },
        )
        .unwrap();
        ping.to = BROADCAST;
        other.send_packet(&ping).unwrap();
        while let Some(lora) = h.node.radio_mut().take_incoming() {
            h.node.push(&lora);
        }
        assert_eq!(h.node.state(), NetworkState::Sleeping);

        for _ in 0..300 {
            h.round();
        }
        assert!(h.node_frames().is_empty());
        h.round();
        assert_eq!(h.node.state(), NetworkState::Idle);

        h.run_upload(30_000, |_| {});
        assert_eq!(h.upload.closed(), vec![true]);
    }

    #[test]
    fn lost_ack_is_recovered_without_duplicating_data() {
        let mut h = Harness::new(payload(), config());
        let node = h.node.engine().radio().index();
        let mut armed = false;
        h.run_upload(30_000, |medium| {
            let sent_chunk_two = medium
                .frames()
                .iter()
                .any(|f| f.sender == node && f.lora.id == 2);
            if sent_chunk_two && !armed {
                medium.drop_next(1);
                armed = true;
            }
        });

        assert!(armed);
        assert!(h.medium.frames().iter().any(|f| f.dropped && f.lora.is_ack()));
        let resent = h
            .node_frames()
            .iter()
            .filter(|f| f.id == 2)
            .count();
        assert_eq!(resent, 2);
        assert_eq!(h.upload.closed(), vec![true]);
        let uploads = h.archive.uploads();
        assert_eq!(uploads[0].success, Some(true));
        assert_eq!(*uploads[0].data.borrow(), payload());
    }

    #[test]
    fn upload_over_a_replacement_codec() {
        let mut h = Harness::new(payload(), config());
        h.node.set_codec(Box::new(TaggedCodec));
        h.gateway.set_codec(Box::new(TaggedCodec));
        h.run_upload(30_000, |_| {});

        assert_eq!(h.upload.closed(), vec![true]);
        let uploads = h.archive.uploads();
        assert_eq!(uploads[0].success, Some(true));
        assert_eq!(*uploads[0].data.borrow(), payload());

        let enveloped: Vec<_> = h
            .medium
            .frames()
            .into_iter()
            .filter(|f| !f.lora.is_ack())
            .collect();
        assert!(enveloped.len() >= 8);
        for f in &enveloped {
            assert_eq!(f.lora.payload()[0], CODEC_TAG);
            assert!(decode_frame(&BincodeCodec, &f.lora).is_err());
        }
        let close = h.node_frames().pop().unwrap();
        assert!(decode_frame(&TaggedCodec, &close).unwrap().is_close());
    }

    #[test]
    fn mismatched_codecs_never_pair() {
        let mut h = Harness::new(payload(), config());
        h.node.set_codec(Box::new(TaggedCodec));
        h.run_upload(20_000, |_| {});

        assert!(h.archive.uploads().is_empty());
        assert!(h.gateway.current_node().is_none());
        assert!(h.node_frames().len() >= 2);
    }

    #[test]
    fn sender_returns_to_previous_mode_after_poll() {
        let medium = SimMedium::new();
        let mut a = medium.radio();
        let mut b = medium.radio();
        b.set_mode_rx();
        a.set_mode_rx();
        a.send_packet(&LoraPacket::ack(1, 2, 3)).unwrap();
        assert!(a.is_mode_tx());
        assert!(matches!(
            a.send_packet(&LoraPacket::ack(1, 2, 4)),
            Err(RadioError::Busy)
        ));
        a.poll();
        assert!(a.is_mode_rx());
        assert_eq!(b.take_incoming().unwrap().id, 3);
        assert!(a.take_incoming().is_none());
    }
}
