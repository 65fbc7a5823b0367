use crate::Device;
use std::io;

// Tun wraps a real tun device; frames are bare IPv4 packets.
pub struct Tun {
    device: tun_tap::Iface,
}

impl Tun {
    pub fn new(name: &str) -> io::Result<Self> {
        let device = tun_tap::Iface::without_packet_info(name, tun_tap::Mode::Tun)?;
        // The stack polls; a blocking read would stall every other task.
        device.set_non_blocking()?;
        log::info!("opened tun interface {}", device.name());
        Ok(Self { device })
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }
}

impl Device for Tun {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.recv(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.device.send(buf)
    }
}
