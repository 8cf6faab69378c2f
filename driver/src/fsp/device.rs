//! Device Lifecycle
//!
//! Every device the proxy creates carries an [`FspDeviceExtension`]. The
//! extension's kind selects what the device is:
//!
//! - **Fsctl**: the control device user-mode file systems talk to
//! - **Fsvrt**: the virtual disk a volume can be mounted on
//! - **Fsvol**: a mounted volume, owning an [`FsvolDeviceExtension`]
//!
//! # Reference Counting
//!
//! The extension keeps a logical reference count, separate from the `Arc`
//! that manages the device's memory. It starts at 1 for the creator. When
//! it drops to 0 the device is torn down: kind-specific fini runs and the
//! device is removed from its driver. Once at 0 the count never rises
//! again.
//!
//! Teardown blocks, so it cannot run at DISPATCH_LEVEL. The dispatch-level
//! entry points [`fsp_device_reference_at_dpc_level`] and
//! [`fsp_device_dereference_from_dpc_level`] exist for the volume timer;
//! the latter asserts that it never drops the last reference.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use super::fsvol::{fsp_fsvol_device_fini, fsp_fsvol_device_init, FsvolDeviceExtension, FsvolDeviceParams};
use crate::io::device::{io_create_device, io_delete_device, DeviceFlags, DeviceObject};
use crate::io::driver::DriverObject;
use crate::ke::dpc::DispatchLevel;
use crate::mm::pool::PoolTag;
use crate::status::{NtResult, STATUS_INVALID_DEVICE_STATE, STATUS_INVALID_PARAMETER};

/// Pool tags
pub const FSP_ALLOC_DEVICE_TAG: PoolTag = PoolTag::from_bytes(b"FspD");
pub const FSP_ALLOC_VPB_TAG: PoolTag = PoolTag::from_bytes(b"FspV");
pub const FSP_ALLOC_TIMER_TAG: PoolTag = PoolTag::from_bytes(b"FspT");
pub const FSP_ALLOC_FILE_NODE_TAG: PoolTag = PoolTag::from_bytes(b"FspN");
pub const FSP_ALLOC_FILE_DESC_TAG: PoolTag = PoolTag::from_bytes(b"FspF");

/// Device extension kind
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FspDeviceExtensionKind {
    /// Control device
    Fsctl = b'C' as u32,
    /// Virtual disk device
    Fsvrt = b'V' as u32,
    /// Volume device
    Fsvol = b'F' as u32,
}

impl FspDeviceExtensionKind {
    /// Convert a raw kind value
    ///
    /// An unknown value is a caller bug: it asserts in debug builds and
    /// fails with `STATUS_INVALID_PARAMETER` otherwise.
    pub fn from_raw(raw: u32) -> NtResult<Self> {
        match raw {
            r if r == Self::Fsctl as u32 => Ok(Self::Fsctl),
            r if r == Self::Fsvrt as u32 => Ok(Self::Fsvrt),
            r if r == Self::Fsvol as u32 => Ok(Self::Fsvol),
            _ => {
                debug_assert!(false, "Unknown device extension kind {:#x}", raw);
                Err(STATUS_INVALID_PARAMETER)
            }
        }
    }
}

/// Device extension (FSP_DEVICE_EXTENSION)
pub struct FspDeviceExtension {
    kind: FspDeviceExtensionKind,
    /// Logical reference count
    ref_count: spin::Mutex<u32>,
    /// Set once teardown has begun
    delete_started: AtomicBool,
    fsvol: Option<FsvolDeviceExtension>,
}

impl FspDeviceExtension {
    /// Extension of the given kind with one reference
    pub fn new(kind: FspDeviceExtensionKind, driver: &Arc<DriverObject>) -> Self {
        let fsvol = match kind {
            FspDeviceExtensionKind::Fsvol => Some(FsvolDeviceExtension::new(Arc::clone(driver.clock()))),
            _ => None,
        };

        Self {
            kind,
            ref_count: spin::Mutex::new(1),
            delete_started: AtomicBool::new(false),
            fsvol,
        }
    }

    pub fn kind(&self) -> FspDeviceExtensionKind {
        self.kind
    }

    /// Current logical reference count
    pub fn ref_count(&self) -> u32 {
        *self.ref_count.lock()
    }

    /// Volume state, for volume devices
    pub fn fsvol(&self) -> Option<&FsvolDeviceExtension> {
        self.fsvol.as_ref()
    }
}

/// Volume state of a device, if it is a volume device
#[inline]
pub fn fsp_fsvol_device_extension(device: &DeviceObject) -> Option<&FsvolDeviceExtension> {
    device.extension().fsvol()
}

/// Create a device
pub fn fsp_device_create(
    driver: &Arc<DriverObject>,
    kind: FspDeviceExtensionKind,
    extra_size: usize,
    device_type: u32,
    characteristics: u32,
) -> NtResult<Arc<DeviceObject>> {
    fsp_device_create_secure(driver, kind, extra_size, device_type, characteristics, None)
}

/// Create a device with a security descriptor
pub fn fsp_device_create_secure(
    driver: &Arc<DriverObject>,
    kind: FspDeviceExtensionKind,
    extra_size: usize,
    device_type: u32,
    characteristics: u32,
    security_descriptor: Option<&str>,
) -> NtResult<Arc<DeviceObject>> {
    let extension = FspDeviceExtension::new(kind, driver);

    let device = io_create_device(
        driver,
        FSP_ALLOC_DEVICE_TAG,
        extension,
        extra_size,
        device_type,
        characteristics,
        security_descriptor,
    )
    .map_err(|status| {
        log::warn!("fsp: {:?} device creation failed: {}", kind, status);
        status
    })?;

    log::debug!("fsp: {:?} device created", kind);
    Ok(device)
}

/// Supply the mount configuration of a volume device
///
/// Must be called once, before [`fsp_device_initialize`].
pub fn fsp_fsvol_device_set_params(device: &DeviceObject, params: FsvolDeviceParams) -> NtResult<()> {
    let fsvol = fsp_fsvol_device_extension(device).ok_or(STATUS_INVALID_DEVICE_STATE)?;
    fsvol.set_params(params)
}

/// Finish device setup
///
/// Volume devices build their volume state. `DO_DEVICE_INITIALIZING` is
/// cleared only on success; on failure the stages completed so far are
/// undone when the device is deleted.
pub fn fsp_device_initialize(device: &Arc<DeviceObject>) -> NtResult<()> {
    if device.extension().kind() == FspDeviceExtensionKind::Fsvol {
        fsp_fsvol_device_init(device)?;
    }

    device.clear_flags(DeviceFlags::DO_DEVICE_INITIALIZING);
    Ok(())
}

/// Tear down a device
///
/// Runs kind-specific fini and removes the device from its driver. Later
/// calls do nothing.
pub fn fsp_device_delete(device: &Arc<DeviceObject>) {
    let extension = device.extension();
    if extension.delete_started.swap(true, Ordering::AcqRel) {
        return;
    }

    if extension.kind() == FspDeviceExtensionKind::Fsvol {
        fsp_fsvol_device_fini(device);
    }

    io_delete_device(device);
    log::debug!("fsp: {:?} device deleted", extension.kind());
}

/// Take a logical reference
///
/// Fails once the count has reached 0.
pub fn fsp_device_reference(device: &DeviceObject) -> bool {
    let mut ref_count = device.extension().ref_count.lock();
    if *ref_count == 0 {
        return false;
    }
    *ref_count += 1;
    true
}

/// Drop a logical reference, deleting the device at 0
pub fn fsp_device_dereference(device: &Arc<DeviceObject>) {
    let delete = {
        let mut ref_count = device.extension().ref_count.lock();
        debug_assert!(*ref_count > 0, "Dereferencing a device with no references");
        if *ref_count == 0 {
            return;
        }
        *ref_count -= 1;
        *ref_count == 0
    };

    if delete {
        fsp_device_delete(device);
    }
}

/// Take a logical reference at DISPATCH_LEVEL
pub(crate) fn fsp_device_reference_at_dpc_level(device: &DeviceObject, _dispatch: &DispatchLevel) -> bool {
    fsp_device_reference(device)
}

/// Drop a logical reference at DISPATCH_LEVEL
///
/// The caller must hold another reference; dropping the last one here is
/// an invariant violation.
pub(crate) fn fsp_device_dereference_from_dpc_level(device: &DeviceObject, _dispatch: &DispatchLevel) {
    let mut ref_count = device.extension().ref_count.lock();
    *ref_count = ref_count.saturating_sub(1);
    assert!(*ref_count != 0, "Last device reference dropped at DISPATCH_LEVEL");
}

/// Snapshot of the driver's devices
pub fn fsp_device_copy_list(driver: &DriverObject) -> NtResult<Vec<Arc<DeviceObject>>> {
    driver.enumerate_device_objects()
}

/// Delete every device of the driver (driver unload)
pub fn fsp_device_delete_all(driver: &DriverObject) -> NtResult<()> {
    let devices = fsp_device_copy_list(driver)?;
    for device in &devices {
        fsp_device_delete(device);
    }
    Ok(())
}
