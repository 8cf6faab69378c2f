//! Kernel (ke)
//!
//! The small slice of the kernel layer the proxy depends on:
//!
//! - **Interrupt time**: monotonic 100ns clock used for all expirations
//! - **Dispatch level**: execution marker for the non-blocking timer path

pub mod dpc;
pub mod time;

pub use dpc::DispatchLevel;
pub use time::{InterruptClock, TICKS_PER_MILLISECOND};
