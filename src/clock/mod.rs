mod system;

#[cfg(test)]
pub use self::mock::MockClock;

pub use self::system::SystemClock;

use std::time::{Duration, Instant};

/// A source of time, and the yield point for cooperative waits.
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since the Unix epoch.
    fn unix_ms(&self) -> u64;

    /// Give up the processor for `d`.
    fn sleep(&self, d: Duration);
}
