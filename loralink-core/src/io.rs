//! Upload source and archive sink capabilities, plus the callbacks that hand
//! them to the protocol per transfer.

use std::io;

use crate::identity::NodeId;

/// Result of one polling read.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReadOutcome {
    /// `n > 0` bytes were placed at the front of the buffer.
    Data(usize),
    /// Nothing available yet; poll again later.
    Pending,
    /// End of stream.
    End,
}

/// Non-blocking source of upload bytes.
pub trait Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink for received upload bytes.
pub trait Writer {
    /// Returns the number of bytes accepted; anything short of `data.len()` is a
    /// failed write for the transfer.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn close(&mut self) -> io::Result<()>;
}

/// Adapts any `std::io::Read`; a zero-byte read is end of stream.
pub struct StreamReader<R> {
    inner: R,
}

impl<R: io::Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read> Reader for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Pending);
        }
        match self.inner.read(buf) {
            Ok(0) => Ok(ReadOutcome::End),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Pending),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Pending),
            Err(e) => Err(e),
        }
    }
}

/// Collects written bytes in memory.
impl Writer for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A reader opened for one upload, with the total size advertised in Prepare.
pub struct OpenedReader {
    pub reader: Box<dyn Reader>,
    pub size: u32,
}

impl OpenedReader {
    pub fn new(reader: Box<dyn Reader>, size: u32) -> Self {
        Self { reader, size }
    }
}

/// Node side: supplies upload sources.
pub trait NodeCallbacks {
    /// Open the next pending upload, or `None` if there is nothing to send.
    fn open_reader(&mut self) -> Option<OpenedReader>;

    /// Transfer finished; `success` is false when it was abandoned.
    fn close_reader(&mut self, reader: Box<dyn Reader>, success: bool);
}

/// Gateway side: supplies archive destinations.
pub trait GatewayCallbacks {
    /// Open a sink for an upload of `size` bytes from `node_id`.
    fn open_writer(&mut self, node_id: NodeId, size: u32) -> io::Result<Box<dyn Writer>>;

    /// The writer has already been closed; `success` is true only when every
    /// advertised byte arrived and was written.
    fn close_writer(&mut self, writer: Box<dyn Writer>, success: bool);
}
