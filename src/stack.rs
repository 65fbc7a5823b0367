//! The network context: one device, one clock, and every open socket.
//!
//! Inbound frames are pumped from the device by [`Stack::poll`] and handed to
//! the socket that claims them most specifically. Blocking calls (`connect`,
//! `send`) keep pumping while they wait, so a reply is processed even though
//! nobody else is driving the stack.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::config::{Medium, StackConfig, MSS};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::socket::{Outbound, Socket};
use crate::tcp::{Snapshot, SocketHandler, Status, TcpSocket};
use crate::udp::{DatagramHandler, UdpSocket};
use crate::wire::ip::{self, PROTO_TCP, PROTO_UDP};
use crate::wire::{eth, Datagram, TcpHeaderView, UdpHeaderView};
use crate::{Clock, Device};

/// Largest frame read from the device (MTU plus link header room).
const FRAME_BUF: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u32);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Stack {
    device: Box<dyn Device>,
    clock: Arc<dyn Clock>,
    config: StackConfig,
    tcp: BTreeMap<SocketHandle, TcpSocket>,
    udp: BTreeMap<SocketHandle, UdpSocket>,
    next_handle: u32,
    next_ephemeral: u16,
}

impl Stack {
    pub fn new(device: Box<dyn Device>, clock: Arc<dyn Clock>, config: StackConfig) -> Self {
        let next_ephemeral = config.first_ephemeral_port;
        Self {
            device,
            clock,
            config,
            tcp: BTreeMap::new(),
            udp: BTreeMap::new(),
            next_handle: 1,
            next_ephemeral,
        }
    }

    pub fn local_addr(&self) -> Ipv4Addr {
        self.config.local_addr
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn link_up(&self) -> bool {
        self.device.link_up()
    }

    fn handle(&mut self) -> SocketHandle {
        let h = SocketHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        h
    }

    /// Accept inbound connections on `port`; 0 listens on every port.
    pub fn listen(&mut self, port: u16) -> Result<SocketHandle> {
        if self.tcp.values().any(|s| s.passive && s.port == port) {
            return Err(Error::AddressInUse {
                port,
                remote: Endpoint::UNSPECIFIED,
            });
        }
        let h = self.handle();
        let sock = TcpSocket::listener(
            h.0,
            self.config.local_addr,
            rand::random(),
            self.config.window,
            port,
        );
        info!("[{}] listening on port {}", sock, port);
        self.tcp.insert(h, sock);
        Ok(h)
    }

    /// A TCP socket for outbound use; see [`Stack::connect`].
    pub fn open_tcp(&mut self) -> SocketHandle {
        let h = self.handle();
        let sock = TcpSocket::new(
            h.0,
            self.config.local_addr,
            rand::random(),
            self.config.window,
        );
        self.tcp.insert(h, sock);
        h
    }

    /// Bind a UDP port; 0 picks an ephemeral one.
    pub fn open_udp(&mut self, port: u16) -> Result<SocketHandle> {
        let port = match port {
            0 => self.ephemeral_port(),
            p if self.udp.values().any(|s| s.port == p) => {
                return Err(Error::AddressInUse {
                    port: p,
                    remote: Endpoint::UNSPECIFIED,
                })
            }
            p => p,
        };
        let h = self.handle();
        let sock = UdpSocket::new(h.0, self.config.local_addr, port);
        debug!("[{}] bound", sock);
        self.udp.insert(h, sock);
        Ok(h)
    }

    pub fn set_handler(&mut self, h: SocketHandle, handler: Box<dyn SocketHandler>) -> Result<()> {
        self.tcp_mut(h)?.set_handler(handler);
        Ok(())
    }

    pub fn set_datagram_handler(
        &mut self,
        h: SocketHandle,
        handler: Box<dyn DatagramHandler>,
    ) -> Result<()> {
        self.udp_mut(h)?.set_handler(handler);
        Ok(())
    }

    fn tcp_mut(&mut self, h: SocketHandle) -> Result<&mut TcpSocket> {
        self.tcp.get_mut(&h).ok_or(Error::NoSocket(h))
    }

    fn udp_mut(&mut self, h: SocketHandle) -> Result<&mut UdpSocket> {
        self.udp.get_mut(&h).ok_or(Error::NoSocket(h))
    }

    pub fn peek(&self, h: SocketHandle) -> Result<Snapshot> {
        self.tcp.get(&h).map(|s| s.peek()).ok_or(Error::NoSocket(h))
    }

    /// Next free local port from the ephemeral range, wrapping back to its start.
    fn ephemeral_port(&mut self) -> u16 {
        let first = self.config.first_ephemeral_port;
        for _ in 0..=u16::MAX {
            let port = self.next_ephemeral;
            self.next_ephemeral = match port.checked_add(1) {
                Some(p) => p,
                None => first,
            };
            let taken = self.tcp.values().any(|s| s.bind_port == port)
                || self.udp.values().any(|s| s.port == port);
            if !taken {
                return port;
            }
        }
        first
    }

    /// Active open. Blocks, pumping the device, until the handshake finishes
    /// or the wait deadline passes.
    pub fn connect(&mut self, h: SocketHandle, remote: Endpoint) -> Result<()> {
        if !remote.is_specified() {
            return Err(Error::InvalidEndpoint(remote));
        }

        let fixed = self.tcp_mut(h)?.port;
        let bind_port = if fixed != 0 {
            fixed
        } else {
            self.ephemeral_port()
        };
        if self
            .tcp
            .iter()
            .any(|(k, s)| *k != h && s.status() != Status::Closed && s.bind_port == bind_port && s.remote() == remote)
        {
            return Err(Error::AddressInUse {
                port: bind_port,
                remote,
            });
        }

        let sock = self.tcp_mut(h)?;
        let syn = sock.begin_connect(remote, bind_port);
        sock.wait.arm();
        let out = sock.outbound(&syn);
        info!("[{}] connecting to {}", sock, remote);
        let fired = match self.transmit(out).and_then(|()| self.wait_ack(h)) {
            Ok(fired) => fired,
            Err(e) => return Err(self.abort(h, e)),
        };
        let sock = self.tcp_mut(h)?;
        match (fired, sock.status()) {
            (true, Status::Established) => {
                info!("[{}] connected to {}", sock, remote);
                Ok(())
            }
            (true, _) => {
                sock.fail();
                warn!("[{}] {} refused the connection", sock, remote);
                Err(Error::Refused(remote))
            }
            (false, _) => {
                sock.fail();
                warn!("[{}] connect to {} timed out", sock, remote);
                Err(Error::Timeout(self.config.wait_timeout))
            }
        }
    }

    /// Send one segment and block until the peer acknowledges it. A closed
    /// socket reconnects to its last remote first.
    pub fn send(&mut self, h: SocketHandle, data: &[u8]) -> Result<usize> {
        if data.len() > MSS as usize {
            return Err(Error::TooLarge(data.len()));
        }

        let sock = self.tcp_mut(h)?;
        match sock.status() {
            Status::Established => {}
            Status::Closed if sock.remote().is_specified() => {
                let remote = sock.remote();
                debug!("[{}] closed, reconnecting to {}", sock, remote);
                self.connect(h, remote)?;
            }
            _ => return Err(Error::NotConnected),
        }

        let sock = self.tcp_mut(h)?;
        let seg = sock.data_segment(data);
        sock.wait.arm();
        let out = sock.outbound(&seg);
        trace!("[{}] TX: len={}", sock, data.len());
        let acked = match self.transmit(out).and_then(|()| self.wait_ack(h)) {
            Ok(acked) => acked,
            Err(e) => return Err(self.abort(h, e)),
        };
        if !acked {
            let sock = self.tcp_mut(h)?;
            sock.fail();
            warn!("[{}] send timed out", sock);
            return Err(Error::Timeout(self.config.wait_timeout));
        }
        Ok(data.len())
    }

    /// Oldest payload received on `h`, if any. Never blocks.
    pub fn recv(&mut self, h: SocketHandle) -> Result<Option<Vec<u8>>> {
        Ok(self.tcp_mut(h)?.take_received())
    }

    /// Send FIN on an open connection and mark it closed.
    pub fn disconnect(&mut self, h: SocketHandle) -> Result<()> {
        let sock = self.tcp_mut(h)?;
        if sock.status() != Status::Established {
            sock.fail();
            return Ok(());
        }
        let fin = sock.fin_segment();
        let out = sock.outbound(&fin);
        info!("[{}] disconnecting from {}", sock, sock.remote());
        sock.fail();
        self.transmit(out)
    }

    /// Disconnect if needed and forget the socket.
    pub fn close(&mut self, h: SocketHandle) -> Result<()> {
        if self.tcp.contains_key(&h) {
            self.disconnect(h)?;
            self.tcp.remove(&h);
            return Ok(());
        }
        self.udp.remove(&h).map(|_| ()).ok_or(Error::NoSocket(h))
    }

    pub fn send_to(&mut self, h: SocketHandle, dst: Endpoint, data: &[u8]) -> Result<()> {
        if dst.port == 0 {
            return Err(Error::InvalidEndpoint(dst));
        }
        let out = self.udp_mut(h)?.outbound(dst, data)?;
        self.transmit(out)
    }

    pub fn recv_from(&mut self, h: SocketHandle) -> Result<Option<(Endpoint, Vec<u8>)>> {
        Ok(self.udp_mut(h)?.take_received())
    }

    /// Drain the device, dispatching every pending frame. Returns how many
    /// frames were read.
    pub fn poll(&mut self) -> Result<usize> {
        let mut buf = [0u8; FRAME_BUF];
        let mut count = 0;
        loop {
            let n = match self.device.recv(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(count),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            count += 1;
            if let Err(e) = self.handle_frame(&buf[..n]) {
                debug!("frame dropped: {}", e);
            }
        }
    }

    /// Dispatch one inbound frame and transmit whatever the socket answers.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        let packet = match self.config.medium {
            Medium::Ip => frame,
            Medium::Ethernet { .. } => match eth::strip(frame)? {
                Some(p) => p,
                None => return Ok(()),
            },
        };
        let dgram = Datagram::parse(packet)?;

        let reply = match dgram.protocol {
            PROTO_TCP => {
                let tcp = TcpHeaderView::new(dgram.payload)?;
                let src = Endpoint::new(dgram.src, tcp.src_port());
                match pick(&self.tcp, src, tcp.dst_port()) {
                    Some(h) => self.tcp_mut(h)?.on_process(&dgram)?,
                    None => {
                        trace!("no tcp socket for {} -> port {}", src, tcp.dst_port());
                        None
                    }
                }
            }
            PROTO_UDP => {
                let udp = UdpHeaderView::new(dgram.payload)?;
                let src = Endpoint::new(dgram.src, udp.src_port());
                match pick(&self.udp, src, udp.dst_port()) {
                    Some(h) => self.udp_mut(h)?.on_process(&dgram)?,
                    None => None,
                }
            }
            other => {
                trace!("ip protocol {} ignored", other);
                None
            }
        };

        match reply {
            Some(out) => self.transmit(out),
            None => Ok(()),
        }
    }

    fn transmit(&mut self, out: Outbound) -> Result<()> {
        let packet = ip::build(out.src, out.dst, self.config.ttl, out.protocol, &out.bytes)?;
        let frame = match self.config.medium {
            Medium::Ip => packet,
            Medium::Ethernet { local, peer } => eth::wrap(local, peer, &packet),
        };
        self.device.send(&frame)?;
        Ok(())
    }

    /// A blocking call on `h` failed half way: close the socket and hand the
    /// error back.
    fn abort(&mut self, h: SocketHandle, e: Error) -> Error {
        if let Some(sock) = self.tcp.get_mut(&h) {
            sock.fail();
            warn!("[{}] {}, closed", sock, e);
        }
        e
    }

    /// Pump the device until `h`'s wait token fires or the deadline passes.
    fn wait_ack(&mut self, h: SocketHandle) -> Result<bool> {
        let deadline = self.clock.now() + self.config.wait_timeout;
        loop {
            self.poll()?;
            let sock = self.tcp_mut(h)?;
            if sock.wait.fired() {
                sock.wait.disarm();
                return Ok(true);
            }
            if self.clock.now() >= deadline {
                self.tcp_mut(h)?.wait.disarm();
                return Ok(false);
            }
            self.clock.sleep(self.config.wait_step);
        }
    }
}

/// The socket that claims a datagram most specifically; ties go to the
/// oldest socket.
fn pick<S: Socket>(
    sockets: &BTreeMap<SocketHandle, S>,
    src: Endpoint,
    dst_port: u16,
) -> Option<SocketHandle> {
    sockets
        .iter()
        .filter_map(|(h, s)| s.accepts(src, dst_port).map(|rank| (rank, *h)))
        .min()
        .map(|(_, h)| h)
}
