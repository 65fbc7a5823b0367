//! Transports over a shared [`Stack`].

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use log::{debug, info, warn};

use super::{Connector, Transport};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::stack::{SocketHandle, Stack};
use crate::tcp::Status;

fn borrow(stack: &Rc<RefCell<Stack>>) -> Result<RefMut<'_, Stack>> {
    stack.try_borrow_mut().map_err(|_| Error::Busy)
}

/// One TCP connection to a fixed server.
pub struct TcpLink {
    stack: Rc<RefCell<Stack>>,
    handle: SocketHandle,
}

impl TcpLink {
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }
}

impl Transport for TcpLink {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        borrow(&self.stack)?.send(self.handle, frame).map(|_| ())
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let mut stack = borrow(&self.stack).ok()?;
        if let Err(e) = stack.poll() {
            debug!("tcp link: poll failed: {}", e);
        }
        stack.recv(self.handle).ok().flatten()
    }

    fn linked(&self) -> bool {
        match self.stack.try_borrow() {
            Ok(stack) => {
                stack.link_up()
                    && stack
                        .peek(self.handle)
                        .map_or(false, |s| s.status != Status::Closed)
            }
            Err(_) => true,
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        match self.stack.try_borrow_mut() {
            Ok(mut stack) => {
                if let Err(e) = stack.close(self.handle) {
                    debug!("tcp link: close {}: {}", self.handle, e);
                }
            }
            Err(_) => warn!("tcp link: stack busy, socket {} leaked", self.handle),
        }
    }
}

pub struct TcpConnector {
    stack: Rc<RefCell<Stack>>,
    server: Endpoint,
}

impl TcpConnector {
    pub fn new(stack: Rc<RefCell<Stack>>, server: Endpoint) -> Self {
        Self { stack, server }
    }
}

impl Connector for TcpConnector {
    type Link = TcpLink;

    fn connect(&mut self) -> Result<TcpLink> {
        let mut stack = borrow(&self.stack)?;
        if !stack.link_up() {
            return Err(Error::NotConnected);
        }
        let handle = stack.open_tcp();
        if let Err(e) = stack.connect(handle, self.server) {
            let _ = stack.close(handle);
            return Err(e);
        }
        info!("tcp link: connected to {}", self.server);
        drop(stack);
        Ok(TcpLink {
            stack: self.stack.clone(),
            handle,
        })
    }
}

/// A UDP socket talking to a broadcast address until a peer is pinned.
pub struct UdpLink {
    stack: Rc<RefCell<Stack>>,
    handle: SocketHandle,
    peer: Endpoint,
    last_from: Option<Endpoint>,
}

impl UdpLink {
    pub fn peer(&self) -> Endpoint {
        self.peer
    }
}

impl Transport for UdpLink {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        borrow(&self.stack)?.send_to(self.handle, self.peer, frame)
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let mut stack = borrow(&self.stack).ok()?;
        if let Err(e) = stack.poll() {
            debug!("udp link: poll failed: {}", e);
        }
        let (from, bytes) = stack.recv_from(self.handle).ok().flatten()?;
        self.last_from = Some(from);
        Some(bytes)
    }

    fn linked(&self) -> bool {
        self.stack.try_borrow().map_or(true, |s| s.link_up())
    }

    fn pin_peer(&mut self) {
        if let Some(from) = self.last_from {
            info!("udp link: talking to {} from now on", from);
            self.peer = from;
        }
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        if let Ok(mut stack) = self.stack.try_borrow_mut() {
            let _ = stack.close(self.handle);
        }
    }
}

pub struct UdpConnector {
    stack: Rc<RefCell<Stack>>,
    server_port: u16,
}

impl UdpConnector {
    pub fn new(stack: Rc<RefCell<Stack>>, server_port: u16) -> Self {
        Self { stack, server_port }
    }
}

impl Connector for UdpConnector {
    type Link = UdpLink;

    fn connect(&mut self) -> Result<UdpLink> {
        let handle = {
            let mut stack = borrow(&self.stack)?;
            if !stack.link_up() {
                return Err(Error::NotConnected);
            }
            stack.open_udp(0)?
        };
        Ok(UdpLink {
            stack: self.stack.clone(),
            handle,
            peer: Endpoint::broadcast(self.server_port),
            last_from: None,
        })
    }
}
