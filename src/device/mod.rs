mod tun;

// Import and re-export
pub use self::tun::Tun;

#[cfg(test)]
pub use self::mock::MockDevice;

/// A trait for network device I/O
pub trait Device: Send {
    /// Receive a frame from the device. `WouldBlock` means nothing is pending.
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Send a frame to the device
    fn send(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Whether the physical link is up.
    fn link_up(&self) -> bool {
        true
    }
}
