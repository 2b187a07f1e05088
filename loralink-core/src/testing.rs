//! Test doubles: a radio that records frames, and in-memory upload/archive callbacks.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use bincode::Options;

use crate::identity::NodeId;
use crate::io::{GatewayCallbacks, NodeCallbacks, OpenedReader, ReadOutcome, Reader, StreamReader, Writer};
use crate::protocol::RadioPacket;
use crate::radio::{PacketRadio, RadioError, RadioMode};
use crate::wire::{EnvelopeCodec, FrameDecodeError, FrameEncodeError, LoraPacket};

/// Records every frame handed to it; transmission completes instantly.
#[derive(Default)]
pub struct RecordingRadio {
    mode: RadioMode,
    sent: Vec<LoraPacket>,
    fail: bool,
}

impl RecordingRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[LoraPacket] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<LoraPacket> {
        std::mem::take(&mut self.sent)
    }

    pub fn fail_sends(&mut self, fail: bool) {
        self.fail = fail;
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }
}

impl PacketRadio for RecordingRadio {
    fn is_mode_rx(&self) -> bool {
        self.mode == RadioMode::Rx
    }
    fn is_mode_tx(&self) -> bool {
        self.mode == RadioMode::Tx
    }
    fn is_idle(&self) -> bool {
        self.mode == RadioMode::Idle
    }
    fn set_mode_rx(&mut self) {
        self.mode = RadioMode::Rx;
    }
    fn set_mode_idle(&mut self) {
        self.mode = RadioMode::Idle;
    }
    fn send_packet(&mut self, packet: &LoraPacket) -> Result<(), RadioError> {
        if self.fail {
            return Err(RadioError::Busy);
        }
        self.sent.push(packet.clone());
        Ok(())
    }
}

/// Reader that reports `Pending` until data is pushed into it.
#[derive(Clone, Default)]
pub struct TrickleReader {
    inner: Rc<RefCell<(Vec<u8>, bool)>>,
}

impl TrickleReader {
    pub fn feed(&self, bytes: &[u8]) {
        self.inner.borrow_mut().0.extend_from_slice(bytes);
    }

    pub fn finish(&self) {
        self.inner.borrow_mut().1 = true;
    }
}

impl Reader for TrickleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut inner = self.inner.borrow_mut();
        if inner.0.is_empty() {
            return Ok(if inner.1 {
                ReadOutcome::End
            } else {
                ReadOutcome::Pending
            });
        }
        let n = inner.0.len().min(buf.len());
        buf[..n].copy_from_slice(&inner.0[..n]);
        inner.0.drain(..n);
        Ok(ReadOutcome::Data(n))
    }
}

/// Node callbacks serving fixed uploads from memory.
#[derive(Clone, Default)]
pub struct MemoryUpload {
    pending: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: Rc<RefCell<Vec<bool>>>,
    trickle: Rc<RefCell<Option<(TrickleReader, u32)>>>,
}

impl MemoryUpload {
    pub fn with(upload: Vec<u8>) -> Self {
        let m = Self::default();
        m.pending.borrow_mut().push(upload);
        m
    }

    pub fn queue(&self, upload: Vec<u8>) {
        self.pending.borrow_mut().push(upload);
    }

    /// Serve `reader` (advertising `size`) for the next upload.
    pub fn trickle(&self, reader: TrickleReader, size: u32) {
        *self.trickle.borrow_mut() = Some((reader, size));
    }

    /// Success flag of every closed reader, in order.
    pub fn closed(&self) -> Vec<bool> {
        self.closed.borrow().clone()
    }
}

impl NodeCallbacks for MemoryUpload {
    fn open_reader(&mut self) -> Option<OpenedReader> {
        if let Some((reader, size)) = self.trickle.borrow_mut().take() {
            return Some(OpenedReader::new(Box::new(reader), size));
        }
        let mut pending = self.pending.borrow_mut();
        if pending.is_empty() {
            return None;
        }
        let upload = pending.remove(0);
        let size = upload.len() as u32;
        Some(OpenedReader::new(
            Box::new(StreamReader::new(io::Cursor::new(upload))),
            size,
        ))
    }

    fn close_reader(&mut self, _reader: Box<dyn Reader>, success: bool) {
        self.closed.borrow_mut().push(success);
    }
}

/// Writer sharing its buffer with the archive that opened it.
pub struct SharedWriter {
    buf: Rc<RefCell<Vec<u8>>>,
    accept_limit: Option<usize>,
}

impl Writer for SharedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = match self.accept_limit {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        self.buf.borrow_mut().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One archived upload as seen by the gateway callbacks.
#[derive(Debug, Clone)]
pub struct ArchivedUpload {
    pub node_id: NodeId,
    pub size: u32,
    pub data: Rc<RefCell<Vec<u8>>>,
    pub success: Option<bool>,
}

/// Gateway callbacks storing uploads in memory.
#[derive(Clone, Default)]
pub struct MemoryArchive {
    uploads: Rc<RefCell<Vec<ArchivedUpload>>>,
    fail_open: Rc<RefCell<bool>>,
    accept_limit: Rc<RefCell<Option<usize>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<ArchivedUpload> {
        self.uploads.borrow().clone()
    }

    pub fn fail_open(&self, fail: bool) {
        *self.fail_open.borrow_mut() = fail;
    }

    /// Writers opened from now on accept at most `limit` bytes per write.
    pub fn short_writes(&self, limit: usize) {
        *self.accept_limit.borrow_mut() = Some(limit);
    }
}

impl GatewayCallbacks for MemoryArchive {
    fn open_writer(&mut self, node_id: NodeId, size: u32) -> io::Result<Box<dyn Writer>> {
        if *self.fail_open.borrow() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "archive read-only"));
        }
        let data = Rc::new(RefCell::new(Vec::new()));
        self.uploads.borrow_mut().push(ArchivedUpload {
            node_id,
            size,
            data: data.clone(),
            success: None,
        });
        Ok(Box::new(SharedWriter {
            buf: data,
            accept_limit: *self.accept_limit.borrow(),
        }))
    }

    fn close_writer(&mut self, _writer: Box<dyn Writer>, success: bool) {
        if let Some(last) = self
            .uploads
            .borrow_mut()
            .iter_mut()
            .rev()
            .find(|u| u.success.is_none())
        {
            last.success = Some(success);
        }
    }
}

/// First payload byte of every `TaggedCodec` envelope.
pub const CODEC_TAG: u8 = 0xc5;

/// Alternate envelope codec: a tag byte, then fixed-width bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedCodec;

fn fixint() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl EnvelopeCodec for TaggedCodec {
    fn encode(&self, packet: &RadioPacket<'_>, out: &mut [u8]) -> Result<usize, FrameEncodeError> {
        let (tag, rest) = out.split_first_mut().ok_or(FrameEncodeError::TooLarge)?;
        let required = fixint().serialized_size(packet)? as usize;
        if required > rest.len() {
            return Err(FrameEncodeError::TooLarge);
        }
        *tag = CODEC_TAG;
        fixint().serialize_into(&mut rest[..required], packet)?;
        Ok(required + 1)
    }

    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<RadioPacket<'a>, FrameDecodeError> {
        match bytes.split_first() {
            Some((&CODEC_TAG, rest)) => Ok(fixint().deserialize(rest)?),
            _ => Err(FrameDecodeError::Empty),
        }
    }
}
