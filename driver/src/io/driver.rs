//! Driver Object Implementation
//!
//! The driver object is the root of everything the proxy allocates. It
//! owns:
//! - The list of device objects created by the driver
//! - The list of per-device I/O timers
//! - The delayed work queue that timer routines defer work to
//! - The interrupt clock and the tagged pool
//!
//! # Timers and Worker Threads
//!
//! The host drives time. It calls [`DriverObject::io_timer_tick`] about
//! once per second, which runs every started I/O timer routine at
//! DISPATCH_LEVEL, and it calls [`DriverObject::process_work_items`] from
//! worker threads to run deferred work.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::device::DeviceObject;
use super::timer::IoTimer;
use crate::ex::worker::WorkQueue;
use crate::ke::dpc::DispatchLevel;
use crate::ke::time::InterruptClock;
use crate::mm::pool::Pool;
use crate::status::{NtResult, STATUS_INSUFFICIENT_RESOURCES};

/// Driver Object structure
pub struct DriverObject {
    /// Driver name
    name: String,
    /// Device objects owned by the driver
    pub(crate) devices: spin::Mutex<Vec<Arc<DeviceObject>>>,
    /// Initialized I/O timers
    pub(crate) timers: spin::Mutex<Vec<Arc<IoTimer>>>,
    /// Delayed work queue
    work_queue: WorkQueue,
    /// Interrupt time source
    clock: Arc<InterruptClock>,
    /// Nonpaged pool
    pool: Pool,
}

impl DriverObject {
    /// Create a driver object with its own clock
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_clock(name, Arc::new(InterruptClock::new()))
    }

    /// Create a driver object sharing an existing clock
    pub fn with_clock(name: &str, clock: Arc<InterruptClock>) -> Arc<Self> {
        log::debug!("driver {}: created", name);
        Arc::new(Self {
            name: String::from(name),
            devices: spin::Mutex::new(Vec::new()),
            timers: spin::Mutex::new(Vec::new()),
            work_queue: WorkQueue::new(),
            clock,
            pool: Pool::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<InterruptClock> {
        &self.clock
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn work_queue(&self) -> &WorkQueue {
        &self.work_queue
    }

    /// Number of live device objects
    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// Number of initialized I/O timers
    pub fn timer_count(&self) -> usize {
        self.timers.lock().len()
    }

    /// IoEnumerateDeviceObjectList
    ///
    /// Snapshot of the driver's device objects. The snapshot buffer is
    /// allocated before the list lock is taken, so allocation failure is
    /// reported instead of blocking the list.
    pub fn enumerate_device_objects(&self) -> NtResult<Vec<Arc<DeviceObject>>> {
        let mut snapshot = Vec::new();

        loop {
            let wanted = self.devices.lock().len();
            snapshot
                .try_reserve_exact(wanted)
                .map_err(|_| STATUS_INSUFFICIENT_RESOURCES)?;

            let devices = self.devices.lock();
            if devices.len() <= snapshot.capacity() {
                snapshot.extend(devices.iter().cloned());
                return Ok(snapshot);
            }
        }
    }

    /// Run one I/O timer tick
    ///
    /// Each started timer's routine runs at DISPATCH_LEVEL. The timer list
    /// lock is not held while a routine runs.
    pub fn io_timer_tick(&self) {
        let dispatch = DispatchLevel::raise();
        let mut index = 0;

        loop {
            let timer = match self.timers.lock().get(index) {
                Some(timer) => Arc::clone(timer),
                None => break,
            };
            index += 1;

            timer.fire(&dispatch);
        }
    }

    /// Run up to `max_items` deferred work items on the calling thread
    pub fn process_work_items(&self, max_items: usize) -> usize {
        self.work_queue.process(max_items)
    }
}
