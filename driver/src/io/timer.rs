//! I/O Timers
//!
//! Each device object can own one I/O timer. Once started, the timer's
//! routine is called roughly once per second at DISPATCH_LEVEL until the
//! timer is stopped.
//!
//! # NT Functions
//!
//! - `IoInitializeTimer` - allocate and attach the timer to the device
//! - `IoStartTimer` / `IoStopTimer` - enable and disable callbacks
//!
//! NT frees a device's timer together with the device. Here
//! [`io_uninitialize_timer`] detaches it explicitly and [`io_delete_device`]
//! calls it for devices that still have one.
//!
//! [`io_delete_device`]: super::device::io_delete_device

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, Ordering};

use super::device::DeviceObject;
use crate::ke::dpc::DispatchLevel;
use crate::mm::pool::PoolTag;
use crate::status::{NtResult, STATUS_INSUFFICIENT_RESOURCES, STATUS_INVALID_DEVICE_STATE};

/// Timer routine, called at DISPATCH_LEVEL
pub type IoTimerRoutine = fn(device: &Arc<DeviceObject>, dispatch: &DispatchLevel);

/// I/O timer (IO_TIMER)
pub struct IoTimer {
    device: Weak<DeviceObject>,
    routine: IoTimerRoutine,
    started: AtomicBool,
}

impl IoTimer {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Invoke the routine if the timer is started and the device is alive
    pub(crate) fn fire(&self, dispatch: &DispatchLevel) {
        if !self.is_started() {
            return;
        }

        if let Some(device) = self.device.upgrade() {
            (self.routine)(&device, dispatch);
        }
    }
}

/// IoInitializeTimer
///
/// Allocates the timer from the driver pool with `tag`. The timer starts
/// stopped.
pub fn io_initialize_timer(device: &Arc<DeviceObject>, routine: IoTimerRoutine, tag: PoolTag) -> NtResult<()> {
    let driver = device.driver().ok_or(STATUS_INVALID_DEVICE_STATE)?;

    let timer = driver.pool().allocate_arc(
        tag,
        IoTimer {
            device: Arc::downgrade(device),
            routine,
            started: AtomicBool::new(false),
        },
    )?;

    {
        let mut timers = driver.timers.lock();
        timers
            .try_reserve(1)
            .map_err(|_| STATUS_INSUFFICIENT_RESOURCES)?;
        timers.push(Arc::clone(&timer));
    }

    *device.timer.lock() = Some(timer);
    Ok(())
}

/// IoStartTimer
pub fn io_start_timer(device: &DeviceObject) {
    if let Some(timer) = device.timer.lock().as_ref() {
        timer.started.store(true, Ordering::Release);
        log::debug!("io: timer started");
    }
}

/// IoStopTimer
///
/// A routine already running on another thread may still complete after
/// this returns.
pub fn io_stop_timer(device: &DeviceObject) {
    if let Some(timer) = device.timer.lock().as_ref() {
        timer.started.store(false, Ordering::Release);
        log::debug!("io: timer stopped");
    }
}

/// Detach and free the device's timer
pub fn io_uninitialize_timer(device: &DeviceObject) {
    let timer = match device.timer.lock().take() {
        Some(timer) => timer,
        None => return,
    };

    timer.started.store(false, Ordering::Release);
    if let Some(driver) = device.driver() {
        driver.timers.lock().retain(|t| !Arc::ptr_eq(t, &timer));
    }
}
