//! Bench radio: frames travel as UDP multicast datagrams, one group per channel.
//!
//! Datagram layout: 8-byte sender tag, then the raw frame. A process drops its
//! own echoes by tag and only keeps frames that arrive while it is in Rx.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use loralink_core::{LoraPacket, PacketRadio, RadioError, RadioMode};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{trace, warn};

const TAG_LEN: usize = 8;
const MAX_DATAGRAM: usize = 2048;

pub struct UdpRadio {
    socket: UdpSocket,
    dest: SocketAddr,
    tag: [u8; TAG_LEN],
    mode: RadioMode,
    resume: RadioMode,
    incoming: VecDeque<LoraPacket>,
}

fn make_multicast_socket(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn encode_datagram(tag: &[u8; TAG_LEN], lora: &LoraPacket) -> Vec<u8> {
    let mut out = tag.to_vec();
    out.extend_from_slice(&lora.to_raw());
    out
}

/// Frame carried by a datagram, unless it is our own echo or too short.
fn decode_datagram(own_tag: &[u8; TAG_LEN], datagram: &[u8]) -> Option<LoraPacket> {
    if datagram.len() < TAG_LEN || &datagram[..TAG_LEN] == own_tag {
        return None;
    }
    let lora = LoraPacket::from_raw(&datagram[TAG_LEN..]);
    if lora.is_empty() && !lora.is_ack() {
        return None;
    }
    Some(lora)
}

impl UdpRadio {
    /// Join `group:port`. Must be called inside a tokio runtime.
    pub fn bind(group: Ipv4Addr, port: u16) -> io::Result<Self> {
        Ok(Self {
            socket: make_multicast_socket(group, port)?,
            dest: SocketAddr::V4(SocketAddrV4::new(group, port)),
            tag: rand::random(),
            mode: RadioMode::Idle,
            resume: RadioMode::Idle,
            incoming: VecDeque::new(),
        })
    }

    /// Drain the socket, then finish a pending transmission. Datagrams that
    /// arrived while transmitting are missed.
    pub fn poll(&mut self) -> io::Result<()> {
        self.drain()?;
        if self.mode == RadioMode::Tx {
            self.mode = self.resume;
        }
        Ok(())
    }

    /// Sort everything waiting on the socket by the current mode. Runs before
    /// every mode change so each datagram is judged by the mode it arrived in.
    fn drain(&mut self) -> io::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    let Some(lora) = decode_datagram(&self.tag, &buf[..n]) else {
                        continue;
                    };
                    if self.mode == RadioMode::Rx {
                        self.incoming.push_back(lora);
                    } else {
                        trace!("missed frame from {} while {:?}", from, self.mode);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn switch(&mut self, mode: RadioMode) {
        if let Err(e) = self.drain() {
            warn!("radio drain: {}", e);
        }
        self.mode = mode;
    }

    pub fn take_incoming(&mut self) -> Option<LoraPacket> {
        self.incoming.pop_front()
    }
}

impl PacketRadio for UdpRadio {
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
        self.switch(RadioMode::Rx);
    }

    fn set_mode_idle(&mut self) {
        self.switch(RadioMode::Idle);
    }

    fn send_packet(&mut self, packet: &LoraPacket) -> Result<(), RadioError> {
        if self.mode == RadioMode::Tx {
            return Err(RadioError::Busy);
        }
        self.drain()?;
        let datagram = encode_datagram(&self.tag, packet);
        self.socket.try_send_to(&datagram, self.dest)?;
        self.resume = self.mode;
        self.mode = RadioMode::Tx;
        Ok(())
    }
}
