//! I/O Manager (io)
//!
//! The parts of the I/O manager the proxy builds on:
//!
//! - **Driver object**: device list, timers, work queue, pool, clock
//! - **Device object**: flags, security, extension, extra payload
//! - **I/O timers**: once-a-second callbacks at DISPATCH_LEVEL
//! - **File object**: per-handle state
//! - **Share access**: NT open admission rules

pub mod device;
pub mod driver;
pub mod file;
pub mod share;
pub mod timer;

pub use device::{io_create_device, io_delete_device, DeviceFlags, DeviceObject};
pub use driver::DriverObject;
pub use file::{file_access, file_share, FileObject};
pub use share::ShareAccess;
