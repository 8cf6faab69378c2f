//! Volume Device State
//!
//! A volume device represents one mounted file system instance. Its
//! extension holds:
//!
//! - The mount configuration ([`VolumeParams`]) and collaborator factory
//! - The IRP queue, the security and directory info caches and the
//!   change-notification sync
//! - The file context tables, indexed by identifier and by path
//! - The rename resource
//! - The cached volume info
//! - The expiration timer and its work item
//!
//! # Initialization
//!
//! Init builds the state in stages. Each completed stage is recorded in
//! [`FsvolInitDone`]; a failing stage stops init with its status. Fini
//! undoes exactly the recorded stages, in reverse, so a half-built volume
//! is torn down by the same path as a fully built one.
//!
//! # Expiration
//!
//! Once a second the volume's I/O timer fires at DISPATCH_LEVEL. It takes a
//! device reference and queues the expiration work item unless a sweep is
//! already in flight. The work item runs at passive level, invalidates the
//! expired entries of both caches and the IRP queue, clears the in-flight
//! flag and drops the reference.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::Ordering;

use super::device::{
    fsp_device_dereference, fsp_device_dereference_from_dpc_level, fsp_device_reference,
    fsp_device_reference_at_dpc_level, fsp_fsvol_device_extension, FSP_ALLOC_TIMER_TAG, FSP_ALLOC_VPB_TAG,
};
use super::file::FileNode;
use super::params::{
    VolumeInfo, VolumeParams, FSP_FSVOL_DIR_INFO_CACHE_CAPACITY, FSP_FSVOL_DIR_INFO_CACHE_ITEM_SIZE_MAX,
    FSP_FSVOL_SECURITY_CACHE_CAPACITY, FSP_FSVOL_SECURITY_CACHE_ITEM_SIZE_MAX,
};
use super::services::{fsp_iop_complete_canceled_irp, FsvolServices, IrpQueue, MetaCache, MetaCacheKind, NotifySync};
use crate::ex::resource::{EResource, ResourceOwner};
use crate::ex::worker::WorkQueueItem;
use crate::io::device::DeviceObject;
use crate::io::driver::DriverObject;
use crate::io::timer::{io_initialize_timer, io_start_timer, io_stop_timer, io_uninitialize_timer};
use crate::ke::dpc::DispatchLevel;
use crate::ke::time::{timeout_from_millis, InterruptClock};
use crate::rtl::avl::{AvlCompare, AvlTable};
use crate::rtl::string::{rtl_compare_unicode_string, rtl_compare_with_subtree_prefix, rtl_is_subpath};
use crate::status::{NtResult, STATUS_INSUFFICIENT_RESOURCES, STATUS_INVALID_DEVICE_STATE};

/// Mount configuration handed to a volume device before initialization
pub struct FsvolDeviceParams {
    pub volume_params: VolumeParams,
    /// Virtual disk the volume is mounted on
    pub fsvrt_device: Option<Arc<DeviceObject>>,
    /// Collaborator factory
    pub services: Arc<dyn FsvolServices>,
}

/// Volume parameter block
///
/// Spare VPB swapped in when the volume is dismounted from its virtual
/// disk.
#[derive(Debug, Default)]
pub struct Vpb {
    pub flags: u16,
    pub serial_number: u32,
    pub reference_count: u32,
}

bitflags::bitflags! {
    /// Completed initialization stages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsvolInitDone: u32 {
        const FSVRT = 0x01;
        const IOQ = 0x02;
        const SECURITY_CACHE = 0x04;
        const DIR_INFO_CACHE = 0x08;
        const NOTIFY = 0x10;
        const CONTEXT_TABLE = 0x20;
        const TIMER = 0x40;
        const INFO = 0x80;
    }
}

/// Initialization stages, in build order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FsvolInitStage {
    Fsvrt,
    Ioq,
    SecurityCache,
    DirInfoCache,
    Notify,
    ContextTable,
    Timer,
    Info,
}

impl FsvolInitStage {
    const ORDER: [Self; 8] = [
        Self::Fsvrt,
        Self::Ioq,
        Self::SecurityCache,
        Self::DirInfoCache,
        Self::Notify,
        Self::ContextTable,
        Self::Timer,
        Self::Info,
    ];

    fn done_flag(self) -> FsvolInitDone {
        match self {
            Self::Fsvrt => FsvolInitDone::FSVRT,
            Self::Ioq => FsvolInitDone::IOQ,
            Self::SecurityCache => FsvolInitDone::SECURITY_CACHE,
            Self::DirInfoCache => FsvolInitDone::DIR_INFO_CACHE,
            Self::Notify => FsvolInitDone::NOTIFY,
            Self::ContextTable => FsvolInitDone::CONTEXT_TABLE,
            Self::Timer => FsvolInitDone::TIMER,
            Self::Info => FsvolInitDone::INFO,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct VolumeInfoSlot {
    info: VolumeInfo,
    expiration_time: u64,
}

fn compare_context_id(a: &u64, b: &u64) -> Ordering {
    a.cmp(b)
}

fn compare_context_name_case_sensitive(a: &String, b: &String) -> Ordering {
    rtl_compare_unicode_string(a, b, false)
}

fn compare_context_name_case_insensitive(a: &String, b: &String) -> Ordering {
    rtl_compare_unicode_string(a, b, true)
}

/// File context tables of a volume
struct ContextTable {
    by_id: AvlTable<u64, Arc<FileNode>>,
    by_name: AvlTable<String, Arc<FileNode>>,
    case_insensitive: bool,
}

impl ContextTable {
    const fn new(case_insensitive: bool) -> Self {
        let compare_name: AvlCompare<String> = if case_insensitive {
            compare_context_name_case_insensitive
        } else {
            compare_context_name_case_sensitive
        };

        Self {
            by_id: AvlTable::new(compare_context_id),
            by_name: AvlTable::new(compare_name),
            case_insensitive,
        }
    }
}

/// Volume device extension (FSP_FSVOL_DEVICE_EXTENSION)
pub struct FsvolDeviceExtension {
    clock: Arc<InterruptClock>,
    params: spin::Once<FsvolDeviceParams>,
    init_done: spin::Mutex<FsvolInitDone>,
    swap_vpb: spin::Mutex<Option<Box<Vpb>>>,
    ioq: spin::Mutex<Option<Box<dyn IrpQueue>>>,
    security_cache: spin::Mutex<Option<Box<dyn MetaCache>>>,
    dir_info_cache: spin::Mutex<Option<Box<dyn MetaCache>>>,
    notify_sync: spin::Mutex<Option<Box<dyn NotifySync>>>,
    file_rename_resource: EResource,
    context_table: spin::Mutex<ContextTable>,
    expiration_in_progress: spin::Mutex<bool>,
    expiration_work_item: spin::Mutex<Option<Arc<WorkQueueItem>>>,
    volume_info: spin::Mutex<VolumeInfoSlot>,
}

impl FsvolDeviceExtension {
    pub(crate) fn new(clock: Arc<InterruptClock>) -> Self {
        Self {
            clock,
            params: spin::Once::new(),
            init_done: spin::Mutex::new(FsvolInitDone::empty()),
            swap_vpb: spin::Mutex::new(None),
            ioq: spin::Mutex::new(None),
            security_cache: spin::Mutex::new(None),
            dir_info_cache: spin::Mutex::new(None),
            notify_sync: spin::Mutex::new(None),
            file_rename_resource: EResource::new(),
            context_table: spin::Mutex::new(ContextTable::new(true)),
            expiration_in_progress: spin::Mutex::new(false),
            expiration_work_item: spin::Mutex::new(None),
            volume_info: spin::Mutex::new(VolumeInfoSlot::default()),
        }
    }

    pub(crate) fn set_params(&self, mut params: FsvolDeviceParams) -> NtResult<()> {
        params.volume_params.normalize();

        let mut stored = false;
        self.params.call_once(|| {
            stored = true;
            params
        });

        if stored {
            Ok(())
        } else {
            Err(STATUS_INVALID_DEVICE_STATE)
        }
    }

    /// Mount configuration, defaults if none was supplied
    pub fn volume_params(&self) -> VolumeParams {
        self.params.get().map(|p| p.volume_params).unwrap_or_default()
    }

    /// Collaborator factory
    pub fn services(&self) -> Option<&Arc<dyn FsvolServices>> {
        self.params.get().map(|p| &p.services)
    }

    /// Virtual disk the volume is mounted on
    pub fn fsvrt_device(&self) -> Option<&Arc<DeviceObject>> {
        self.params.get().and_then(|p| p.fsvrt_device.as_ref())
    }

    /// Stages completed so far
    pub fn init_done(&self) -> FsvolInitDone {
        *self.init_done.lock()
    }

    pub fn clock(&self) -> &Arc<InterruptClock> {
        &self.clock
    }

    /// True while an expiration sweep is queued or running
    pub fn expiration_in_progress(&self) -> bool {
        *self.expiration_in_progress.lock()
    }

    /*
     * File rename resource
     */

    pub fn file_rename_resource(&self) -> &EResource {
        &self.file_rename_resource
    }

    pub fn acquire_file_rename_resource_shared(&self) {
        self.file_rename_resource.acquire_shared(true);
    }

    pub fn acquire_file_rename_resource_exclusive(&self) {
        self.file_rename_resource.acquire_exclusive(true);
    }

    /// Hand the current hold to `owner`
    pub fn set_file_rename_resource_owner(&self, owner: ResourceOwner) {
        self.file_rename_resource.set_owner_pointer(owner);
    }

    pub fn release_file_rename_resource(&self) {
        self.file_rename_resource.release();
    }

    /// Release a hold on behalf of `owner`
    ///
    /// Releases the hold tagged with `owner`, or an anonymous hold if the
    /// owner was never set.
    pub fn release_file_rename_resource_owner(&self, owner: ResourceOwner) {
        if !self.file_rename_resource.release_for_owner(owner) {
            self.file_rename_resource.release();
        }
    }

    /*
     * Context table
     */

    /// Lock the file context tables
    pub fn lock_context_table(&self) -> FsvolContextTable<'_> {
        FsvolContextTable {
            table: self.context_table.lock(),
        }
    }

    /*
     * Volume info
     */

    /// Cached volume info, expired or not
    pub fn get_volume_info(&self) -> VolumeInfo {
        self.volume_info.lock().info
    }

    /// Cached volume info, if it has not expired
    pub fn try_get_volume_info(&self) -> Option<VolumeInfo> {
        let slot = *self.volume_info.lock();
        if self.clock.expiration_time_valid(slot.expiration_time) {
            Some(slot.info)
        } else {
            None
        }
    }

    /// Cache volume info for the file info timeout
    pub fn set_volume_info(&self, info: &VolumeInfo) {
        let expiration_time = self
            .clock
            .expiration_time_from_millis(self.volume_params().file_info_timeout);

        *self.volume_info.lock() = VolumeInfoSlot {
            info: *info,
            expiration_time,
        };
    }

    /// Expire the cached volume info
    pub fn invalidate_volume_info(&self) {
        self.volume_info.lock().expiration_time = 0;
    }
}

/// Locked file context tables
///
/// Entries hold a reference on their file node. The delete operations
/// hand that reference back; drop it only after this guard is gone,
/// since releasing a node may release the volume.
pub struct FsvolContextTable<'a> {
    table: spin::MutexGuard<'a, ContextTable>,
}

impl FsvolContextTable<'_> {
    /// Number of nodes indexed by identifier
    pub fn context_count(&self) -> usize {
        self.table.by_id.count()
    }

    /// Number of nodes indexed by name
    pub fn context_by_name_count(&self) -> usize {
        self.table.by_name.count()
    }

    pub fn lookup_context(&self, identifier: u64) -> Option<Arc<FileNode>> {
        self.table.by_id.lookup(&identifier).cloned()
    }

    /// Index `node` under `identifier`
    ///
    /// Returns the indexed node and whether `node` was inserted. If another
    /// node already has the identifier, that node is returned.
    pub fn insert_context(&mut self, identifier: u64, node: &Arc<FileNode>) -> (Arc<FileNode>, bool) {
        let storage = match node.take_context_by_id_storage() {
            Some(storage) => storage,
            None => {
                debug_assert!(false, "File node is already indexed by identifier");
                let existing = self.lookup_context(identifier);
                return (existing.unwrap_or_else(|| Arc::clone(node)), false);
            }
        };

        match self.table.by_id.insert(identifier, Arc::clone(node), storage) {
            Ok(()) => (Arc::clone(node), true),
            Err((candidate, storage)) => {
                candidate.return_context_by_id_storage(storage);
                let existing = self.lookup_context(identifier);
                (existing.unwrap_or(candidate), false)
            }
        }
    }

    /// Remove the node indexed under `identifier`
    pub fn delete_context(&mut self, identifier: u64) -> Option<Arc<FileNode>> {
        let (node, storage) = self.table.by_id.delete(&identifier)?;
        node.return_context_by_id_storage(storage);
        Some(node)
    }

    pub fn lookup_context_by_name(&self, path: &str) -> Option<Arc<FileNode>> {
        let ci = self.table.case_insensitive;
        self.table
            .by_name
            .lookup_by(|key| rtl_compare_unicode_string(key, path, ci))
            .cloned()
    }

    /// Index `node` under `path`
    ///
    /// `path` is allocated by the caller before the table is locked.
    pub fn insert_context_by_name(&mut self, path: String, node: &Arc<FileNode>) -> (Arc<FileNode>, bool) {
        let storage = match node.take_context_by_name_storage() {
            Some(storage) => storage,
            None => {
                debug_assert!(false, "File node is already indexed by name");
                let existing = self.lookup_context_by_name(&path);
                return (existing.unwrap_or_else(|| Arc::clone(node)), false);
            }
        };

        let ci = self.table.case_insensitive;
        match self.table.by_name.insert(path, Arc::clone(node), storage) {
            Ok(()) => (Arc::clone(node), true),
            Err((candidate, storage)) => {
                let existing = self
                    .table
                    .by_name
                    .lookup_by(|key| rtl_compare_unicode_string(key, storage.key(), ci))
                    .cloned();
                candidate.return_context_by_name_storage(storage);
                (existing.unwrap_or(candidate), false)
            }
        }
    }

    /// Remove the node indexed under `path`
    pub fn delete_context_by_name(&mut self, path: &str) -> Option<Arc<FileNode>> {
        let ci = self.table.case_insensitive;
        let (node, storage) = self
            .table
            .by_name
            .delete_by(|key| rtl_compare_unicode_string(key, path, ci))?;
        node.return_context_by_name_storage(storage);
        Some(node)
    }

    /// Enumerate the nodes at or below `path`
    ///
    /// Returns the next node after `restart_key` and advances the key;
    /// start with `None`. Unless `subpath_only` is set, a node named
    /// exactly `path` comes first. Only nodes named `path\...` follow.
    pub fn enumerate_context_by_name(
        &self,
        path: &str,
        subpath_only: bool,
        restart_key: &mut Option<String>,
    ) -> Option<Arc<FileNode>> {
        let ci = self.table.case_insensitive;
        let by_name = &self.table.by_name;

        let found = match restart_key.as_deref() {
            None if !subpath_only => by_name
                .seek_by(|key| rtl_compare_unicode_string(key, path, ci), true)
                .filter(|(key, _)| rtl_compare_unicode_string(key, path, ci) == Ordering::Equal)
                .or_else(|| by_name.seek_by(|key| rtl_compare_with_subtree_prefix(key, path, ci), false)),
            Some(last) if rtl_compare_unicode_string(last, path, ci) != Ordering::Equal => {
                by_name.seek_by(|key| rtl_compare_unicode_string(key, last, ci), false)
            }
            _ => by_name.seek_by(|key| rtl_compare_with_subtree_prefix(key, path, ci), false),
        };

        let (key, node) = found?;
        let is_self = rtl_compare_unicode_string(key, path, ci) == Ordering::Equal;
        if !is_self && !rtl_is_subpath(path, key, ci) {
            return None;
        }

        let restart = restart_key.get_or_insert_with(String::new);
        restart.clear();
        restart.push_str(key);

        Some(Arc::clone(node))
    }

    /// Snapshot of every node indexed by name
    pub fn copy_context_by_name_list(&self) -> NtResult<Vec<Arc<FileNode>>> {
        let mut list = Vec::new();
        list.try_reserve_exact(self.table.by_name.count())
            .map_err(|_| STATUS_INSUFFICIENT_RESOURCES)?;
        list.extend(self.table.by_name.iter().map(|(_, node)| Arc::clone(node)));
        Ok(list)
    }
}

/// Build the volume state of a volume device
pub(crate) fn fsp_fsvol_device_init(device: &Arc<DeviceObject>) -> NtResult<()> {
    let fsvol = fsp_fsvol_device_extension(device).ok_or(STATUS_INVALID_DEVICE_STATE)?;
    let driver = device.driver().ok_or(STATUS_INVALID_DEVICE_STATE)?;
    let params = fsvol.params.get().ok_or(STATUS_INVALID_DEVICE_STATE)?;

    if !fsvol.init_done().is_empty() {
        return Err(STATUS_INVALID_DEVICE_STATE);
    }

    for stage in FsvolInitStage::ORDER {
        if let Err(status) = fsvol.init_stage(stage, device, &driver, params) {
            log::warn!("fsvol: {:?} init failed: {}", stage, status);
            return Err(status);
        }

        fsvol.init_done.lock().insert(stage.done_flag());
        log::debug!("fsvol: {:?} initialized", stage);
    }

    Ok(())
}

/// Tear down the volume state of a volume device
///
/// Only stages recorded as completed are undone. Calling it again does
/// nothing.
pub(crate) fn fsp_fsvol_device_fini(device: &Arc<DeviceObject>) {
    let fsvol = match fsp_fsvol_device_extension(device) {
        Some(fsvol) => fsvol,
        None => return,
    };

    let done = core::mem::take(&mut *fsvol.init_done.lock());

    for stage in FsvolInitStage::ORDER.iter().rev() {
        if done.contains(stage.done_flag()) {
            fsvol.fini_stage(*stage, device);
            log::debug!("fsvol: {:?} finalized", stage);
        }
    }
}

impl FsvolDeviceExtension {
    fn init_stage(
        &self,
        stage: FsvolInitStage,
        device: &Arc<DeviceObject>,
        driver: &DriverObject,
        params: &FsvolDeviceParams,
    ) -> NtResult<()> {
        let volume_params = &params.volume_params;
        let services = &params.services;

        match stage {
            FsvolInitStage::Fsvrt => {
                if let Some(fsvrt) = &params.fsvrt_device {
                    let vpb = driver.pool().allocate(FSP_ALLOC_VPB_TAG, Vpb::default())?;
                    if !fsp_device_reference(fsvrt) {
                        return Err(STATUS_INVALID_DEVICE_STATE);
                    }
                    *self.swap_vpb.lock() = Some(vpb);
                }
            }
            FsvolInitStage::Ioq => {
                let ioq = services.ioq_create(
                    volume_params.irp_capacity,
                    timeout_from_millis(volume_params.irp_timeout),
                    fsp_iop_complete_canceled_irp,
                )?;
                *self.ioq.lock() = Some(ioq);
            }
            FsvolInitStage::SecurityCache => {
                let cache = services.meta_cache_create(
                    MetaCacheKind::Security,
                    FSP_FSVOL_SECURITY_CACHE_CAPACITY,
                    FSP_FSVOL_SECURITY_CACHE_ITEM_SIZE_MAX,
                    timeout_from_millis(volume_params.file_info_timeout),
                )?;
                *self.security_cache.lock() = Some(cache);
            }
            FsvolInitStage::DirInfoCache => {
                let cache = services.meta_cache_create(
                    MetaCacheKind::DirInfo,
                    FSP_FSVOL_DIR_INFO_CACHE_CAPACITY,
                    FSP_FSVOL_DIR_INFO_CACHE_ITEM_SIZE_MAX,
                    timeout_from_millis(volume_params.file_info_timeout),
                )?;
                *self.dir_info_cache.lock() = Some(cache);
            }
            FsvolInitStage::Notify => {
                let notify_sync = services.notify_initialize_sync()?;
                *self.notify_sync.lock() = Some(notify_sync);
            }
            FsvolInitStage::ContextTable => {
                *self.context_table.lock() = ContextTable::new(!volume_params.case_sensitive_search);
            }
            FsvolInitStage::Timer => {
                let weak = Arc::downgrade(device);
                let work_item = driver.pool().allocate_arc(
                    FSP_ALLOC_TIMER_TAG,
                    WorkQueueItem::new(move || {
                        if let Some(device) = weak.upgrade() {
                            fsp_fsvol_device_expiration_routine(&device);
                        }
                    }),
                )?;

                driver.work_queue().reserve()?;
                if let Err(status) = io_initialize_timer(device, fsp_fsvol_device_timer_routine, FSP_ALLOC_TIMER_TAG) {
                    driver.work_queue().unreserve();
                    return Err(status);
                }

                *self.expiration_work_item.lock() = Some(work_item);
                io_start_timer(device);
            }
            FsvolInitStage::Info => {
                *self.volume_info.lock() = VolumeInfoSlot::default();
            }
        }

        Ok(())
    }

    fn fini_stage(&self, stage: FsvolInitStage, device: &Arc<DeviceObject>) {
        match stage {
            FsvolInitStage::Fsvrt => {
                let vpb = self.swap_vpb.lock().take();
                drop(vpb);
                if let Some(fsvrt) = self.fsvrt_device() {
                    fsp_device_dereference(fsvrt);
                }
            }
            FsvolInitStage::Ioq => {
                let ioq = self.ioq.lock().take();
                drop(ioq);
            }
            FsvolInitStage::SecurityCache => {
                let cache = self.security_cache.lock().take();
                drop(cache);
            }
            FsvolInitStage::DirInfoCache => {
                let cache = self.dir_info_cache.lock().take();
                drop(cache);
            }
            FsvolInitStage::Notify => {
                let notify_sync = self.notify_sync.lock().take();
                if let Some(notify_sync) = notify_sync {
                    notify_sync.cleanup_all();
                }
            }
            FsvolInitStage::ContextTable => {
                let case_insensitive = !self.volume_params().case_sensitive_search;
                let table = core::mem::replace(&mut *self.context_table.lock(), ContextTable::new(case_insensitive));
                drop(table);
            }
            FsvolInitStage::Timer => {
                io_stop_timer(device);
                io_uninitialize_timer(device);
                let work_item = self.expiration_work_item.lock().take();
                drop(work_item);
                if let Some(driver) = device.driver() {
                    driver.work_queue().unreserve();
                }
            }
            FsvolInitStage::Info => {}
        }
    }
}

/// Volume I/O timer routine
fn fsp_fsvol_device_timer_routine(device: &Arc<DeviceObject>, dispatch: &DispatchLevel) {
    if !fsp_device_reference_at_dpc_level(device, dispatch) {
        return;
    }

    let queued = match (fsp_fsvol_device_extension(device), device.driver()) {
        (Some(fsvol), Some(driver)) => {
            let mut in_progress = fsvol.expiration_in_progress.lock();
            if *in_progress {
                false
            } else {
                let queued = fsvol
                    .expiration_work_item
                    .lock()
                    .as_ref()
                    .map_or(false, |item| driver.work_queue().insert(item));
                *in_progress = queued;
                queued
            }
        }
        _ => false,
    };

    if !queued {
        fsp_device_dereference_from_dpc_level(device, dispatch);
    }
}

/// Expiration sweep, run from a worker thread
fn fsp_fsvol_device_expiration_routine(device: &Arc<DeviceObject>) {
    if let Some(fsvol) = fsp_fsvol_device_extension(device) {
        let interrupt_time = fsvol.clock.query();
        log::trace!("fsvol: expiration sweep at {}", interrupt_time);

        if let Some(cache) = fsvol.security_cache.lock().as_ref() {
            cache.invalidate_expired(interrupt_time);
        }
        if let Some(cache) = fsvol.dir_info_cache.lock().as_ref() {
            cache.invalidate_expired(interrupt_time);
        }
        if let Some(ioq) = fsvol.ioq.lock().as_ref() {
            ioq.remove_expired(interrupt_time);
        }

        *fsvol.expiration_in_progress.lock() = false;
    }

    fsp_device_dereference(device);
}
