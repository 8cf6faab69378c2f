//! Test collaborators
//!
//! Mock IRP queue, metadata caches and notify sync. Every handle bumps a
//! live counter on creation and drops it again on `Drop`, so tests can
//! check that volume teardown released exactly what init built.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use super::device::{fsp_device_create, fsp_device_initialize, fsp_fsvol_device_set_params, FspDeviceExtensionKind};
use super::fsvol::FsvolDeviceParams;
use super::params::VolumeParams;
use super::services::{FsvolServices, IoqCancelRoutine, IrpQueue, MetaCache, MetaCacheKind, NotifySync};
use crate::fsrtl::fcb::CcFileSizes;
use crate::io::device::device_type::FILE_DEVICE_DISK_FILE_SYSTEM;
use crate::io::device::DeviceObject;
use crate::io::driver::DriverObject;
use crate::io::file::FileObject;
use crate::mm::pool::PoolTag;
use crate::status::{NtResult, NtStatus, STATUS_INSUFFICIENT_RESOURCES, STATUS_SUCCESS};

#[derive(Default)]
pub(crate) struct MockCounters {
    pub live_ioq: AtomicUsize,
    pub live_security_cache: AtomicUsize,
    pub live_dir_info_cache: AtomicUsize,
    pub live_notify: AtomicUsize,
    pub ioq_sweeps: AtomicUsize,
    pub cache_sweeps: AtomicUsize,
    pub notify_cleanups: AtomicUsize,
    pub last_sweep_time: AtomicU64,
}

impl MockCounters {
    pub fn live_handles(&self) -> usize {
        self.live_ioq.load(Ordering::SeqCst)
            + self.live_security_cache.load(Ordering::SeqCst)
            + self.live_dir_info_cache.load(Ordering::SeqCst)
            + self.live_notify.load(Ordering::SeqCst)
    }
}

/// Where to fail volume init
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MockFailure {
    Pool(PoolTag),
    Ioq,
    SecurityCache,
    DirInfoCache,
    Notify,
}

pub(crate) struct MockServices {
    pub counters: Arc<MockCounters>,
    failure: spin::Mutex<Option<MockFailure>>,
    pub ioq_timeout: AtomicU64,
    pub cache_timeout: AtomicU64,
    pub size_updates: AtomicUsize,
    pub last_file_size: AtomicU64,
    pub size_status: AtomicI32,
}

impl MockServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Arc::new(MockCounters::default()),
            failure: spin::Mutex::new(None),
            ioq_timeout: AtomicU64::new(0),
            cache_timeout: AtomicU64::new(0),
            size_updates: AtomicUsize::new(0),
            last_file_size: AtomicU64::new(0),
            size_status: AtomicI32::new(STATUS_SUCCESS.raw()),
        })
    }

    pub fn fail(&self, failure: MockFailure, driver: &DriverObject) {
        match failure {
            MockFailure::Pool(tag) => driver.pool().inject_failure(tag),
            _ => *self.failure.lock() = Some(failure),
        }
    }

    fn check(&self, stage: MockFailure) -> NtResult<()> {
        if *self.failure.lock() == Some(stage) {
            Err(STATUS_INSUFFICIENT_RESOURCES)
        } else {
            Ok(())
        }
    }
}

struct MockIrpQueue {
    counters: Arc<MockCounters>,
}

impl IrpQueue for MockIrpQueue {
    fn remove_expired(&self, interrupt_time: u64) {
        self.counters.ioq_sweeps.fetch_add(1, Ordering::SeqCst);
        self.counters.last_sweep_time.store(interrupt_time, Ordering::SeqCst);
    }
}

impl Drop for MockIrpQueue {
    fn drop(&mut self) {
        self.counters.live_ioq.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockMetaCache {
    kind: MetaCacheKind,
    counters: Arc<MockCounters>,
}

impl MockMetaCache {
    fn live(&self) -> &AtomicUsize {
        match self.kind {
            MetaCacheKind::Security => &self.counters.live_security_cache,
            MetaCacheKind::DirInfo => &self.counters.live_dir_info_cache,
        }
    }
}

impl MetaCache for MockMetaCache {
    fn invalidate_expired(&self, _interrupt_time: u64) {
        self.counters.cache_sweeps.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockMetaCache {
    fn drop(&mut self) {
        self.live().fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockNotifySync {
    counters: Arc<MockCounters>,
}

impl NotifySync for MockNotifySync {
    fn cleanup_all(&self) {
        self.counters.notify_cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockNotifySync {
    fn drop(&mut self) {
        self.counters.live_notify.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FsvolServices for MockServices {
    fn ioq_create(&self, _capacity: u32, timeout: u64, _cancel: IoqCancelRoutine) -> NtResult<Box<dyn IrpQueue>> {
        self.check(MockFailure::Ioq)?;
        self.ioq_timeout.store(timeout, Ordering::SeqCst);
        self.counters.live_ioq.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockIrpQueue {
            counters: self.counters.clone(),
        }))
    }

    fn meta_cache_create(
        &self,
        kind: MetaCacheKind,
        _capacity: u32,
        _item_size_max: u32,
        timeout: u64,
    ) -> NtResult<Box<dyn MetaCache>> {
        let stage = match kind {
            MetaCacheKind::Security => MockFailure::SecurityCache,
            MetaCacheKind::DirInfo => MockFailure::DirInfoCache,
        };
        self.check(stage)?;
        self.cache_timeout.store(timeout, Ordering::SeqCst);

        let cache = MockMetaCache {
            kind,
            counters: self.counters.clone(),
        };
        cache.live().fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(cache))
    }

    fn notify_initialize_sync(&self) -> NtResult<Box<dyn NotifySync>> {
        self.check(MockFailure::Notify)?;
        self.counters.live_notify.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockNotifySync {
            counters: self.counters.clone(),
        }))
    }

    fn set_file_sizes(&self, _file_object: &FileObject, sizes: &CcFileSizes) -> NtStatus {
        self.size_updates.fetch_add(1, Ordering::SeqCst);
        self.last_file_size.store(sizes.file_size as u64, Ordering::SeqCst);
        NtStatus(self.size_status.load(Ordering::SeqCst))
    }
}

/// Create, configure and initialize a volume device
pub(crate) fn mount_volume(
    driver: &Arc<DriverObject>,
    volume_params: VolumeParams,
    fsvrt_device: Option<Arc<DeviceObject>>,
) -> (Arc<DeviceObject>, Arc<MockServices>) {
    let services = MockServices::new();
    let device =
        fsp_device_create(driver, FspDeviceExtensionKind::Fsvol, 0, FILE_DEVICE_DISK_FILE_SYSTEM, 0).unwrap();

    fsp_fsvol_device_set_params(
        &device,
        FsvolDeviceParams {
            volume_params,
            fsvrt_device,
            services: services.clone(),
        },
    )
    .unwrap();
    fsp_device_initialize(&device).unwrap();

    (device, services)
}
