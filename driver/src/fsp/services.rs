//! Volume Collaborators
//!
//! The volume device owns handles to subsystems that live outside this
//! crate: the IRP queue feeding the user-mode file system, the security
//! and directory metadata caches, and change-notification synchronization.
//! Only their lifecycle and expiration contract is used here.
//!
//! Handles are boxed trait objects. Dropping a handle deletes the
//! underlying object, so the volume's teardown is just dropping handles in
//! the right order.

use alloc::boxed::Box;

use crate::fsrtl::fcb::CcFileSizes;
use crate::io::file::FileObject;
use crate::status::{NtResult, NtStatus, STATUS_SUCCESS};

/// Called for every request the IRP queue cancels or times out
pub type IoqCancelRoutine = fn(request_hint: u64);

/// Default cancel routine: completes the request as cancelled
pub fn fsp_iop_complete_canceled_irp(request_hint: u64) {
    log::debug!("ioq: request {:#x} cancelled", request_hint);
}

/// Pending request queue (FSP_IOQ)
pub trait IrpQueue: Send + Sync {
    /// Time out requests whose expiration is at or before `interrupt_time`
    fn remove_expired(&self, interrupt_time: u64);
}

/// Metadata cache kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaCacheKind {
    Security,
    DirInfo,
}

/// Time-bounded metadata cache (FSP_META_CACHE)
pub trait MetaCache: Send + Sync {
    /// Drop entries that expired at or before `interrupt_time`
    fn invalidate_expired(&self, interrupt_time: u64);
}

/// Change-notification synchronization
pub trait NotifySync: Send + Sync {
    /// Complete and release every pending notify request
    fn cleanup_all(&self);
}

/// Factory for the collaborators of one volume
pub trait FsvolServices: Send + Sync {
    /// Create the IRP queue. `timeout` is in interrupt-time units.
    fn ioq_create(
        &self,
        capacity: u32,
        timeout: u64,
        cancel: IoqCancelRoutine,
    ) -> NtResult<Box<dyn IrpQueue>>;

    /// Create a metadata cache. `timeout` is in interrupt-time units.
    fn meta_cache_create(
        &self,
        kind: MetaCacheKind,
        capacity: u32,
        item_size_max: u32,
        timeout: u64,
    ) -> NtResult<Box<dyn MetaCache>>;

    /// Initialize change-notification synchronization
    fn notify_initialize_sync(&self) -> NtResult<Box<dyn NotifySync>>;

    /// Tell the cache manager about new file sizes (CcSetFileSizes)
    fn set_file_sizes(&self, _file_object: &FileObject, _sizes: &CcFileSizes) -> NtStatus {
        STATUS_SUCCESS
    }
}
