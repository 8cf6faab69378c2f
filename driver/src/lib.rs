//! File System Proxy Driver - Device and File Node State
//!
//! Kernel-resident state layer of a file system proxy driver: a user-mode
//! process implements the file system while this layer keeps the NT-side
//! objects consistent.
//!
//! # Architecture Overview
//!
//! The crate follows the NT executive layout:
//!
//! - **ke** - Kernel: interrupt time, dispatch-level execution marker
//! - **ex** - Executive: resources (ERESOURCE), delayed work queue
//! - **mm** - Memory Manager: tagged pool, section object pointers
//! - **rtl** - Runtime Library: AVL generic table, path collation
//! - **io** - I/O Manager: driver/device/file objects, I/O timers, share access
//! - **fsrtl** - File System Runtime: FCB header
//! - **fsp** - The proxy itself: device lifecycle, volume state, file nodes
//!
//! # Execution Contexts
//!
//! Two regimes exist:
//!
//! - **Passive**: ordinary worker threads, may block and allocate.
//! - **Dispatch**: the periodic I/O timer callback. Code running there holds
//!   a [`ke::DispatchLevel`] marker and may only flip flags, take or drop
//!   lightweight references and queue pre-reserved work items.

#![no_std]
#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod ex;
pub mod fsp;
pub mod fsrtl;
pub mod io;
pub mod ke;
pub mod mm;
pub mod rtl;
pub mod status;

pub use status::{NtResult, NtStatus};
