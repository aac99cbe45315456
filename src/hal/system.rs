//! Host clock based on `std::time::Instant`.

use std::time::Instant;

use crate::traits::Clock;

/// Monotonic clock counting from its creation.
///
/// # Example
///
/// ```rust
/// use rs_ddl::hal::SystemClock;
/// use rs_ddl::traits::Clock;
///
/// let clock = SystemClock::new();
/// assert!(clock.now_ms() < 1_000);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Creates a clock reading 0 now.
    #[inline]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
