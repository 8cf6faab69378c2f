//! Device Object Implementation
//!
//! Device objects are created by the driver and listed on the driver
//! object until deleted. Each carries:
//! - Type, characteristics and flags
//! - An optional security descriptor (SDDL)
//! - The proxy's device extension
//! - A zero-filled extra payload of caller-chosen size
//! - At most one I/O timer
//!
//! The object's memory is reference counted by `Arc`; the logical
//! lifetime (when the device is torn down) is governed by the reference
//! count in the device extension.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::driver::DriverObject;
use super::timer::{io_uninitialize_timer, IoTimer};
use crate::fsp::device::FspDeviceExtension;
use crate::mm::pool::PoolTag;
use crate::status::{NtResult, STATUS_INSUFFICIENT_RESOURCES};

/// Device types
pub mod device_type {
    pub const FILE_DEVICE_DISK: u32 = 0x00000007;
    pub const FILE_DEVICE_DISK_FILE_SYSTEM: u32 = 0x00000008;
    pub const FILE_DEVICE_FILE_SYSTEM: u32 = 0x00000009;
    pub const FILE_DEVICE_NETWORK_FILE_SYSTEM: u32 = 0x00000014;
}

/// Device characteristics
pub mod device_characteristics {
    pub const FILE_REMOVABLE_MEDIA: u32 = 0x00000001;
    pub const FILE_REMOTE_DEVICE: u32 = 0x00000010;
    pub const FILE_DEVICE_IS_MOUNTED: u32 = 0x00000020;
    pub const FILE_DEVICE_SECURE_OPEN: u32 = 0x00000100;
}

bitflags::bitflags! {
    /// Device object flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceFlags: u32 {
        /// Volume must be verified before use
        const DO_VERIFY_VOLUME = 0x00000002;
        /// Buffered I/O
        const DO_BUFFERED_IO = 0x00000004;
        /// Exclusive access device
        const DO_EXCLUSIVE = 0x00000008;
        /// Direct I/O
        const DO_DIRECT_IO = 0x00000010;
        /// Device has a name
        const DO_DEVICE_HAS_NAME = 0x00000040;
        /// Device is still being initialized
        const DO_DEVICE_INITIALIZING = 0x00000080;
    }
}

/// Device Object structure
pub struct DeviceObject {
    /// Owning driver
    driver: Weak<DriverObject>,
    /// Device type (FILE_DEVICE_*)
    pub device_type: u32,
    /// Device characteristics
    pub characteristics: u32,
    /// DO_* flags
    flags: AtomicU32,
    /// Security descriptor in SDDL form
    security_descriptor: Option<String>,
    /// Caller payload
    extra: spin::Mutex<Vec<u8>>,
    /// I/O timer, if initialized
    pub(crate) timer: spin::Mutex<Option<Arc<IoTimer>>>,
    /// Removed from the driver's device list
    deleted: AtomicBool,
    /// Proxy device extension
    extension: FspDeviceExtension,
}

impl DeviceObject {
    /// Owning driver, while it exists
    pub fn driver(&self) -> Option<Arc<DriverObject>> {
        self.driver.upgrade()
    }

    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: DeviceFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: DeviceFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn security_descriptor(&self) -> Option<&str> {
        self.security_descriptor.as_deref()
    }

    /// Device extension
    pub fn extension(&self) -> &FspDeviceExtension {
        &self.extension
    }

    /// Size of the extra payload
    pub fn extra_size(&self) -> usize {
        self.extra.lock().len()
    }

    /// Run `f` over the extra payload
    pub fn with_extra<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.extra.lock())
    }

    /// True once the device has been removed from its driver
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// True if an I/O timer is attached
    pub fn has_timer(&self) -> bool {
        self.timer.lock().is_some()
    }
}

/// IoCreateDevice / IoCreateDeviceSecure
///
/// The device and its `extra_size` payload are charged to the driver pool
/// under `tag`. The device starts with `DO_DEVICE_INITIALIZING` set and is
/// listed on the driver.
pub fn io_create_device(
    driver: &Arc<DriverObject>,
    tag: PoolTag,
    extension: FspDeviceExtension,
    extra_size: usize,
    device_type: u32,
    characteristics: u32,
    security_descriptor: Option<&str>,
) -> NtResult<Arc<DeviceObject>> {
    let extra = driver.pool().allocate_zeroed(tag, extra_size)?;

    let device = driver.pool().allocate_arc(
        tag,
        DeviceObject {
            driver: Arc::downgrade(driver),
            device_type,
            characteristics,
            flags: AtomicU32::new(DeviceFlags::DO_DEVICE_INITIALIZING.bits()),
            security_descriptor: security_descriptor.map(String::from),
            extra: spin::Mutex::new(extra),
            timer: spin::Mutex::new(None),
            deleted: AtomicBool::new(false),
            extension,
        },
    )?;

    {
        let mut devices = driver.devices.lock();
        devices
            .try_reserve(1)
            .map_err(|_| STATUS_INSUFFICIENT_RESOURCES)?;
        devices.push(Arc::clone(&device));
    }

    Ok(device)
}

/// IoDeleteDevice
///
/// Detaches the device's timer and removes the device from its driver.
/// Memory is released when the last `Arc` goes away.
pub fn io_delete_device(device: &Arc<DeviceObject>) {
    if device.deleted.swap(true, Ordering::AcqRel) {
        return;
    }

    io_uninitialize_timer(device);

    if let Some(driver) = device.driver() {
        driver.devices.lock().retain(|d| !Arc::ptr_eq(d, device));
    }
}
