use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;

use log::{debug, info, trace, warn};

use crate::config::{INBOX_LIMIT, MSS};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::socket::{Outbound, Rank, Socket};
use crate::tcp::flags::{self, ACK, FIN, PSH, RST, SYN};
use crate::tcp::seq;
use crate::wire::ip::PROTO_TCP;
use crate::wire::{Datagram, TcpHeaderView, TcpSegment};

/// Assumed peer MSS when a SYN carries no option (RFC 879).
const DEFAULT_PEER_MSS: u16 = 536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Closed,
    SynSent,
    Established,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Closed => write!(f, "CLOSED"),
            Status::SynSent => write!(f, "SYN-SENT"),
            Status::Established => write!(f, "ESTABLISHED"),
        }
    }
}

/// Application hooks for a socket. Without a handler, received payloads
/// queue up in the socket's inbox.
pub trait SocketHandler {
    fn on_accepted(&mut self, _remote: Endpoint) {}

    /// Returns bytes to piggyback on the acknowledgment.
    fn on_received(&mut self, _remote: Endpoint, _payload: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn on_disconnected(&mut self, _remote: Endpoint) {}
}

/// Set when an ACK arrives for a socket blocked in connect or send.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitToken {
    armed: bool,
    fired: bool,
}

impl WaitToken {
    pub fn arm(&mut self) {
        self.armed = true;
        self.fired = false;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn observe(&mut self, fgs: u8) {
        if self.armed && fgs & ACK != 0 {
            self.fired = true;
        }
    }

    pub fn fired(&self) -> bool {
        self.fired
    }
}

/// One logical TCP connection with at most one segment in flight.
pub struct TcpSocket {
    pub(crate) id: u32,
    /// Local port filter; 0 accepts any destination port.
    pub(crate) port: u16,
    /// Local port actually used on the wire.
    pub(crate) bind_port: u16,
    pub(crate) seq: u32,
    pub(crate) ack: u32,
    pub(crate) status: Status,
    pub(crate) remote: Endpoint,
    pub(crate) local: Endpoint,
    /// Opened with `listen`; may accept inbound handshakes.
    pub(crate) passive: bool,
    pub(crate) window: u16,
    pub(crate) peer_mss: u16,
    pub(crate) wait: WaitToken,
    inbox: VecDeque<Vec<u8>>,
    handler: Option<Box<dyn SocketHandler>>,
}

impl fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSocket")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("bind_port", &self.bind_port)
            .field("seq", &self.seq)
            .field("ack", &self.ack)
            .field("status", &self.status)
            .field("remote", &self.remote)
            .field("local", &self.local)
            .field("inbox.len()", &self.inbox.len())
            .finish()
    }
}

impl fmt::Display for TcpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} tcp:{}", self.id, self.bind_port)
    }
}

impl TcpSocket {
    pub fn new(id: u32, local: Ipv4Addr, isn: u32, window: u16) -> Self {
        TcpSocket {
            id,
            port: 0,
            bind_port: 0,
            seq: isn,
            ack: 0,
            status: Status::Closed,
            remote: Endpoint::UNSPECIFIED,
            local: Endpoint::new(local, 0),
            passive: false,
            window,
            peer_mss: DEFAULT_PEER_MSS,
            wait: WaitToken::default(),
            inbox: VecDeque::new(),
            handler: None,
        }
    }

    /// A socket waiting for inbound handshakes on `port` (0 = every port).
    pub fn listener(id: u32, local: Ipv4Addr, isn: u32, window: u16, port: u16) -> Self {
        let mut sock = TcpSocket::new(id, local, isn, window);
        sock.port = port;
        sock.bind_port = port;
        sock.local.port = port;
        sock.passive = true;
        sock
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn remote(&self) -> Endpoint {
        self.remote
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    pub fn set_handler(&mut self, handler: Box<dyn SocketHandler>) {
        self.handler = Some(handler);
    }

    fn enqueue(&mut self, payload: &[u8]) {
        if self.inbox.len() >= INBOX_LIMIT {
            self.inbox.pop_front();
            warn!("[{}] inbox full, oldest payload dropped", self);
        }
        self.inbox.push_back(payload.to_vec());
    }

    /// Oldest undelivered payload, when no handler is installed.
    pub fn take_received(&mut self) -> Option<Vec<u8>> {
        self.inbox.pop_front()
    }

    /// Consume one inbound segment. `Ok(None)` means nothing to send back,
    /// including segments that were filtered out or ignored.
    pub fn process(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        segment: &[u8],
    ) -> Result<Option<TcpSegment>> {
        let tcp = TcpHeaderView::new(segment)?;
        let port = tcp.dst_port();
        if self.port != 0 && port != self.port {
            return Ok(None);
        }

        self.local = Endpoint::new(dst, port);
        self.wait.observe(tcp.flags());

        Ok(self.on_segment(src, &tcp))
    }

    fn on_segment(&mut self, src: Ipv4Addr, tcp: &TcpHeaderView) -> Option<TcpSegment> {
        let fgs = tcp.flags();
        let payload = tcp.payload();
        trace!(
            "[{}] {}:{} RX: flags={} seq={} ack={} len={}",
            self,
            src,
            tcp.src_port(),
            flags::flags_to_string(fgs),
            tcp.seq(),
            tcp.ack(),
            payload.len()
        );

        if fgs & (SYN | FIN | RST | ACK) == 0 {
            warn!("[{}] unexpected flags 0x{:02x}, ignored", self, fgs);
            return None;
        }

        if fgs & SYN != 0 && fgs & ACK == 0 {
            return self.on_accept(src, tcp);
        }

        if self.status == Status::Closed && fgs & (FIN | RST) == 0 {
            debug!("[{}] segment for a closed socket ignored", self);
            return None;
        }

        // the ack number that acknowledges our SYN
        let syn_acked = self.seq.wrapping_add(1);
        if fgs & SYN != 0 && self.status == Status::SynSent && tcp.ack() != syn_acked {
            warn!(
                "[{}] SYN+ACK acknowledges {} instead of {}, ignored",
                self,
                tcp.ack(),
                syn_acked
            );
            return None;
        }

        let fresh = self.unseen(tcp);
        self.update_numbers(tcp);

        if fgs & SYN != 0 {
            return self.on_connected(tcp);
        }
        if fgs & (FIN | RST) != 0 {
            return self.on_disconnect(fgs, fresh);
        }
        match self.status {
            Status::SynSent if self.passive && payload.is_empty() && tcp.ack() == syn_acked => {
                self.on_accept3()
            }
            Status::Established if payload.is_empty() => None,
            Status::Established => self.on_data(fresh),
            _ => {
                debug!("[{}] ACK in {} ignored", self, self.status);
                None
            }
        }
    }

    /// Payload bytes past our ack number. Retransmitted and stale bytes were
    /// already delivered and are cut off.
    fn unseen<'a>(&self, tcp: &TcpHeaderView<'a>) -> &'a [u8] {
        let payload = tcp.payload();
        if self.status != Status::Established {
            return payload;
        }
        let end = tcp.seq().wrapping_add(payload.len() as u32);
        if seq::is_seq_lte(end, self.ack) {
            return &[];
        }
        if seq::is_seq_lt(tcp.seq(), self.ack) {
            let seen = self.ack.wrapping_sub(tcp.seq()) as usize;
            return &payload[seen..];
        }
        payload
    }

    /// Seq follows what the peer expects from us, Ack what we expect next
    /// from the peer. Both only move forward within a connection.
    fn update_numbers(&mut self, tcp: &TcpHeaderView) {
        let fgs = tcp.flags();
        let mut next = tcp.seq().wrapping_add(tcp.payload().len() as u32);
        if fgs & (SYN | FIN) != 0 {
            next = next.wrapping_add(1);
        }

        if fgs & SYN != 0 && self.status != Status::Established {
            // the peer's initial sequence number opens a new sequence space
            self.ack = next;
        } else {
            seq::advance(&mut self.ack, next);
        }
        if fgs & ACK != 0 {
            seq::advance(&mut self.seq, tcp.ack());
        }
    }

    /// Inbound SYN: we are the acceptor.
    fn on_accept(&mut self, src: Ipv4Addr, tcp: &TcpHeaderView) -> Option<TcpSegment> {
        let remote = Endpoint::new(src, tcp.src_port());
        if !self.passive {
            debug!("[{}] SYN from {} on an active socket ignored", self, remote);
            return None;
        }
        match self.status {
            Status::Closed => {
                info!("[{}] {} ▶ SYN received, answering handshake", self, remote);
            }
            _ if remote != self.remote => {
                debug!("[{}] busy with {}, SYN from {} ignored", self, self.remote, remote);
                return None;
            }
            Status::SynSent => {
                debug!("[{}] {} ▶ SYN repeated, answering again", self, remote);
                return Some(self.segment(SYN | ACK).with_mss());
            }
            Status::Established => {
                debug!("[{}] {} ▶ SYN on an open connection, re-ACK", self, remote);
                return Some(self.segment(ACK));
            }
        }

        self.status = Status::SynSent;
        self.remote = remote;
        self.bind_port = tcp.dst_port();
        self.peer_mss = tcp.mss().unwrap_or(DEFAULT_PEER_MSS);
        self.ack = tcp
            .seq()
            .wrapping_add(tcp.payload().len() as u32)
            .wrapping_add(1);

        Some(self.segment(SYN | ACK).with_mss())
    }

    /// Inbound SYN+ACK: we are the connector and the peer accepted.
    fn on_connected(&mut self, tcp: &TcpHeaderView) -> Option<TcpSegment> {
        if self.status == Status::SynSent {
            self.peer_mss = tcp.mss().unwrap_or(DEFAULT_PEER_MSS);
            self.establish();
        }
        Some(self.segment(ACK))
    }

    /// Third leg of an inbound handshake.
    fn on_accept3(&mut self) -> Option<TcpSegment> {
        self.establish();
        None
    }

    fn establish(&mut self) {
        info!(
            "[{}] {} STATE: {} --> {}",
            self,
            self.remote,
            self.status,
            Status::Established
        );
        self.status = Status::Established;
        let remote = self.remote;
        if let Some(h) = self.handler.as_mut() {
            h.on_accepted(remote);
        }
    }

    fn on_data(&mut self, payload: &[u8]) -> Option<TcpSegment> {
        if payload.is_empty() {
            trace!("[{}] nothing new, re-ACK", self);
            return Some(self.segment(ACK));
        }

        let remote = self.remote;
        let reply = match self.handler.as_mut() {
            Some(h) => h.on_received(remote, payload),
            None => {
                self.enqueue(payload);
                None
            }
        };

        match reply {
            Some(mut data) if !data.is_empty() => {
                let limit = self.mss() as usize;
                if data.len() > limit {
                    warn!("[{}] reply of {} bytes cut to {}", self, data.len(), limit);
                    data.truncate(limit);
                }
                let seg = self.segment(ACK | PSH).with_payload(data);
                self.seq = self.seq.wrapping_add(seg.payload.len() as u32);
                Some(seg)
            }
            _ => Some(self.segment(ACK)),
        }
    }

    fn on_disconnect(&mut self, fgs: u8, payload: &[u8]) -> Option<TcpSegment> {
        let remote = self.remote;
        if self.status == Status::Established && !payload.is_empty() {
            match self.handler.as_mut() {
                Some(h) => {
                    h.on_received(remote, payload);
                }
                None => self.enqueue(payload),
            }
        }

        if self.status != Status::Closed {
            info!(
                "[{}] {} ▶ {} received, {} --> {}",
                self,
                remote,
                if fgs & FIN != 0 { "FIN" } else { "RST" },
                self.status,
                Status::Closed
            );
            self.status = Status::Closed;
            if let Some(h) = self.handler.as_mut() {
                h.on_disconnected(remote);
            }
        }

        // a reset needs no answer
        if fgs & FIN != 0 {
            Some(self.segment(ACK | FIN))
        } else {
            None
        }
    }

    /// Largest payload we put in one segment.
    pub fn mss(&self) -> u16 {
        self.peer_mss.min(MSS)
    }

    fn segment(&self, fgs: u8) -> TcpSegment {
        TcpSegment::new(self.bind_port, self.remote.port, self.seq, self.ack, fgs)
            .with_window(self.window)
    }

    /// Start an active open towards `remote` from `bind_port`.
    pub(crate) fn begin_connect(&mut self, remote: Endpoint, bind_port: u16) -> TcpSegment {
        self.remote = remote;
        self.bind_port = bind_port;
        self.local.port = bind_port;
        self.ack = 0;
        self.status = Status::SynSent;
        self.segment(SYN).with_mss()
    }

    /// Give up on the connection without telling the peer.
    pub(crate) fn fail(&mut self) {
        if self.status != Status::Closed {
            debug!("[{}] STATE: {} --> {}", self, self.status, Status::Closed);
        }
        self.status = Status::Closed;
        self.wait.disarm();
    }

    pub(crate) fn data_segment(&self, payload: &[u8]) -> TcpSegment {
        self.segment(PSH | ACK).with_payload(payload.to_vec())
    }

    pub(crate) fn fin_segment(&self) -> TcpSegment {
        self.segment(ACK | PSH | FIN)
    }

    /// Encode `seg` from this socket's local address to its remote.
    pub(crate) fn outbound(&self, seg: &TcpSegment) -> Outbound {
        Outbound {
            src: self.local.addr,
            dst: self.remote.addr,
            protocol: PROTO_TCP,
            bytes: seg.encode(self.local.addr, self.remote.addr),
        }
    }

    pub fn peek(&self) -> Snapshot {
        Snapshot {
            id: self.id,
            status: self.status,
            port: self.port,
            bind_port: self.bind_port,
            seq: self.seq,
            ack: self.ack,
            local: self.local,
            remote: self.remote,
            peer_mss: self.peer_mss,
            queued: self.inbox.len(),
        }
    }
}

impl Socket for TcpSocket {
    fn protocol(&self) -> u8 {
        PROTO_TCP
    }

    fn accepts(&self, src: Endpoint, dst_port: u16) -> Option<Rank> {
        if self.status != Status::Closed && self.bind_port == dst_port && self.remote == src {
            return Some(Rank::Connection);
        }
        if !self.passive {
            return None;
        }
        match self.port {
            0 => Some(Rank::Wildcard),
            p if p == dst_port => Some(Rank::Port),
            _ => None,
        }
    }

    fn on_process(&mut self, dgram: &Datagram) -> Result<Option<Outbound>> {
        let reply = self.process(dgram.src, dgram.dst, dgram.payload)?;
        Ok(reply.map(|seg| self.outbound(&seg)))
    }
}

/// Socket snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub id: u32,
    pub status: Status,
    pub port: u16,
    pub bind_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub local: Endpoint,
    pub remote: Endpoint,
    pub peer_mss: u16,
    pub queued: usize,
}
