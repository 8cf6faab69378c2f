//! Interrupt Time
//!
//! `KeQueryInterruptTime` returns a monotonic count of 100ns units since
//! boot. It never goes backwards and is unaffected by system time changes,
//! which makes it the clock for every cache and queue expiration.
//!
//! The clock here is an explicit object owned by the driver so that the
//! hosting environment (or a test) decides how it advances.

use core::sync::atomic::{AtomicU64, Ordering};

/// 100ns units per millisecond
pub const TICKS_PER_MILLISECOND: u64 = 10_000;

/// Convert a millisecond timeout into interrupt-time units
#[inline]
pub const fn timeout_from_millis(millis: u32) -> u64 {
    millis as u64 * TICKS_PER_MILLISECOND
}

/// Monotonic interrupt clock
pub struct InterruptClock {
    interrupt_time: AtomicU64,
}

impl InterruptClock {
    pub const fn new() -> Self {
        Self {
            interrupt_time: AtomicU64::new(0),
        }
    }

    /// Clock starting at a given interrupt time
    pub const fn starting_at(interrupt_time: u64) -> Self {
        Self {
            interrupt_time: AtomicU64::new(interrupt_time),
        }
    }

    /// KeQueryInterruptTime
    #[inline]
    pub fn query(&self) -> u64 {
        self.interrupt_time.load(Ordering::Acquire)
    }

    /// Advance the clock by `delta` 100ns units
    pub fn advance(&self, delta: u64) -> u64 {
        self.interrupt_time.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Advance the clock by whole milliseconds
    pub fn advance_millis(&self, millis: u32) -> u64 {
        self.advance(timeout_from_millis(millis))
    }

    /// Absolute expiration time `millis` from now
    #[inline]
    pub fn expiration_time_from_millis(&self, millis: u32) -> u64 {
        self.query().saturating_add(timeout_from_millis(millis))
    }

    /// True while `expiration_time` is still in the future
    #[inline]
    pub fn expiration_time_valid(&self, expiration_time: u64) -> bool {
        self.query() < expiration_time
    }
}

impl Default for InterruptClock {
    fn default() -> Self {
        Self::new()
    }
}
