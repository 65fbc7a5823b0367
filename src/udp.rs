use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;

use log::{trace, warn};

use crate::config::INBOX_LIMIT;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::socket::{Outbound, Rank, Socket};
use crate::wire::ip::PROTO_UDP;
use crate::wire::{Datagram, UdpDatagram, UdpHeaderView};

/// Hook for datagrams arriving on a UDP socket.
pub trait DatagramHandler {
    /// Returns bytes to send back to `remote`.
    fn on_datagram(&mut self, remote: Endpoint, payload: &[u8]) -> Option<Vec<u8>>;
}

/// A bound UDP port. Connectionless: every datagram names its peer.
pub struct UdpSocket {
    pub(crate) id: u32,
    pub(crate) port: u16,
    local: Ipv4Addr,
    inbox: VecDeque<(Endpoint, Vec<u8>)>,
    handler: Option<Box<dyn DatagramHandler>>,
}

impl fmt::Display for UdpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} udp:{}", self.id, self.port)
    }
}

impl UdpSocket {
    pub fn new(id: u32, local: Ipv4Addr, port: u16) -> Self {
        UdpSocket {
            id,
            port,
            local,
            inbox: VecDeque::new(),
            handler: None,
        }
    }

    pub fn set_handler(&mut self, handler: Box<dyn DatagramHandler>) {
        self.handler = Some(handler);
    }

    pub fn take_received(&mut self) -> Option<(Endpoint, Vec<u8>)> {
        self.inbox.pop_front()
    }

    pub fn queued(&self) -> usize {
        self.inbox.len()
    }

    pub(crate) fn outbound(&self, dst: Endpoint, payload: &[u8]) -> Result<Outbound> {
        let dgram = UdpDatagram::new(self.port, dst.port, payload.to_vec());
        Ok(Outbound {
            src: self.local,
            dst: dst.addr,
            protocol: PROTO_UDP,
            bytes: dgram.encode(self.local, dst.addr)?,
        })
    }
}

impl Socket for UdpSocket {
    fn protocol(&self) -> u8 {
        PROTO_UDP
    }

    fn accepts(&self, _src: Endpoint, dst_port: u16) -> Option<Rank> {
        (self.port == dst_port).then_some(Rank::Port)
    }

    fn on_process(&mut self, dgram: &Datagram) -> Result<Option<Outbound>> {
        let udp = UdpHeaderView::new(dgram.payload)?;
        if !udp.verify(dgram.src, dgram.dst) {
            warn!("[{}] bad checksum from {}, dropped", self, dgram.src);
            return Ok(None);
        }

        let remote = Endpoint::new(dgram.src, udp.src_port());
        trace!("[{}] {} RX: len={}", self, remote, udp.payload().len());

        let reply = match self.handler.as_mut() {
            Some(h) => h.on_datagram(remote, udp.payload()),
            None => {
                if self.inbox.len() >= INBOX_LIMIT {
                    self.inbox.pop_front();
                    warn!("[{}] inbox full, oldest datagram dropped", self);
                }
                self.inbox.push_back((remote, udp.payload().to_vec()));
                None
            }
        };
        match reply {
            Some(bytes) => self.outbound(remote, &bytes).map(Some),
            None => Ok(None),
        }
    }
}
