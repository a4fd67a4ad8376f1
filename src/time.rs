//! Timekeeping for polled hardware waits
//!
//! The driver never waits on interrupts; every hardware condition is polled
//! against a wall-clock deadline taken from a platform [`Clock`].

/// Monotonic time source supplied by the platform
pub trait Clock {
    /// Nanoseconds since an arbitrary fixed point; must never go backwards
    fn now_nanoseconds(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_nanoseconds(&self) -> u64 {
        (**self).now_nanoseconds()
    }
}

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// A deadline measured against a [`Clock`]
pub struct Timeout<'a, C: Clock + ?Sized> {
    clock: &'a C,
    deadline: u64,
}

impl<'a, C: Clock + ?Sized> Timeout<'a, C> {
    /// Deadline `ms` milliseconds from now
    pub fn from_ms(clock: &'a C, ms: u64) -> Self {
        Self::from_us(clock, ms.saturating_mul(1_000))
    }

    /// Deadline `us` microseconds from now
    pub fn from_us(clock: &'a C, us: u64) -> Self {
        let deadline = clock
            .now_nanoseconds()
            .saturating_add(us.saturating_mul(NANOS_PER_MICRO));
        Self { clock, deadline }
    }

    pub fn is_expired(&self) -> bool {
        self.clock.now_nanoseconds() >= self.deadline
    }
}

/// Busy-wait for `us` microseconds
pub fn delay_us<C: Clock + ?Sized>(clock: &C, us: u64) {
    let timeout = Timeout::from_us(clock, us);
    while !timeout.is_expired() {
        core::hint::spin_loop();
    }
}

/// Poll `condition` until it holds or `timeout_ms` elapses.
///
/// `poll_interval_us` is the fixed pause between attempts; zero spins.
/// The condition is always evaluated at least once. Returns whether the
/// condition was met.
pub fn wait_for<C, F>(clock: &C, timeout_ms: u64, poll_interval_us: u64, mut condition: F) -> bool
where
    C: Clock + ?Sized,
    F: FnMut() -> bool,
{
    let timeout = Timeout::from_ms(clock, timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if timeout.is_expired() {
            return false;
        }
        if poll_interval_us == 0 {
            core::hint::spin_loop();
        } else {
            delay_us(clock, poll_interval_us);
        }
    }
}

/// Convert a nanosecond reading to whole milliseconds
pub const fn nanos_to_ms(nanos: u64) -> u64 {
    nanos / NANOS_PER_MILLI
}
