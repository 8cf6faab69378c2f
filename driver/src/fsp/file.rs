//! File Nodes and File Descriptors
//!
//! A [`FileNode`] is the in-memory state of one file identity on a volume,
//! shared by every handle open on it. A [`FileDesc`] is the per-handle
//! payload.
//!
//! # Lifetime
//!
//! A node is reference counted by `Arc`. While the node has open handles,
//! the volume's by-identifier table holds one reference; every admitted
//! handle holds another. Closing the last handle removes the table entry
//! and drops the table's reference.
//!
//! Each node also holds a logical reference on its volume device, taken on
//! create and dropped when the node is freed.
//!
//! # Open and Close
//!
//! [`fsp_file_node_open`] and [`fsp_file_node_close`] run under the
//! volume's context table lock, so index membership and open counts change
//! together. A node's open count is nonzero exactly while it is indexed.
//!
//! Delete-pending is checked under the same lock: an open serialized after
//! the close that raised it is refused, an open serialized before it was
//! already admitted.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use super::device::{
    fsp_device_dereference, fsp_device_reference, fsp_fsvol_device_extension, FSP_ALLOC_FILE_DESC_TAG,
    FSP_ALLOC_FILE_NODE_TAG,
};
use super::params::FileInfo;
use crate::fsrtl::fcb::FsrtlCommonFcbHeader;
use crate::io::device::DeviceObject;
use crate::io::driver::DriverObject;
use crate::io::file::file_access::{DELETE, FILE_APPEND_DATA, FILE_EXECUTE, FILE_READ_DATA, FILE_WRITE_DATA};
use crate::io::file::file_share::FILE_SHARE_WRITE;
use crate::io::file::FileObject;
use crate::io::share::{io_check_share_access, io_remove_share_access, io_set_share_access, ShareAccess};
use crate::mm::section::{mm_does_file_have_user_writable_references, SectionObjectPointers};
use crate::rtl::avl::ElementStorage;
use crate::status::{
    NtResult, NtStatus, STATUS_BUFFER_OVERFLOW, STATUS_DELETE_PENDING, STATUS_INVALID_DEVICE_STATE,
    STATUS_INVALID_PARAMETER, STATUS_SHARING_VIOLATION, STATUS_SUCCESS,
};

/// FCB node type code of file nodes
pub const FSP_FILE_NODE_TYPE_CODE: i16 = 0x4E46;

bitflags::bitflags! {
    /// File node resources to acquire or release
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileNodeAcquire: u32 {
        /// Main resource
        const MAIN = 0x1;
        /// Paging I/O resource
        const PGIO = 0x2;
        const FULL = Self::MAIN.bits() | Self::PGIO.bits();
    }
}

#[derive(Clone, Copy, Default)]
struct FileInfoSlot {
    info: FileInfo,
    expiration_time: u64,
}

/// Open state, changed only under the volume's context table lock
#[derive(Default)]
struct FileNodeOpenState {
    open_count: u32,
    share_access: ShareAccess,
    delete_on_close: bool,
    delete_pending: bool,
}

/// File node (FSP_FILE_NODE)
pub struct FileNode {
    pub header: FsrtlCommonFcbHeader,
    pub section_object_pointers: SectionObjectPointers,
    /// Owning volume device
    device: Arc<DeviceObject>,
    /// Identity of the file, assigned by the user-mode file system
    identifier: AtomicU64,
    /// Path, bounded by the capacity reserved at create
    file_name: spin::Mutex<String>,
    file_name_capacity: usize,
    info: spin::Mutex<FileInfoSlot>,
    open: spin::Mutex<FileNodeOpenState>,
    context_by_id_storage: spin::Mutex<Option<ElementStorage<u64, Arc<FileNode>>>>,
    context_by_name_storage: spin::Mutex<Option<ElementStorage<String, Arc<FileNode>>>>,
    /// Status of the last cache manager size update
    cc_status: AtomicI32,
}

/// Create a file node on a volume
///
/// The node's path buffer holds up to `extra_size` bytes. The node takes a
/// reference on the volume device.
pub fn fsp_file_node_create(device: &Arc<DeviceObject>, extra_size: usize) -> NtResult<Arc<FileNode>> {
    if fsp_fsvol_device_extension(device).is_none() {
        return Err(STATUS_INVALID_DEVICE_STATE);
    }
    let driver = device.driver().ok_or(STATUS_INVALID_DEVICE_STATE)?;

    let file_name = driver.pool().allocate_string(FSP_ALLOC_FILE_NODE_TAG, extra_size)?;
    let context_by_id_storage = ElementStorage::new();
    let context_by_name_storage = ElementStorage::new();

    if !fsp_device_reference(device) {
        return Err(STATUS_INVALID_DEVICE_STATE);
    }

    // From here on dropping the node releases the device reference
    let node = FileNode {
        header: FsrtlCommonFcbHeader::new(FSP_FILE_NODE_TYPE_CODE, core::mem::size_of::<FileNode>() as i16),
        section_object_pointers: SectionObjectPointers::new(),
        device: Arc::clone(device),
        identifier: AtomicU64::new(0),
        file_name: spin::Mutex::new(file_name),
        file_name_capacity: extra_size,
        info: spin::Mutex::new(FileInfoSlot::default()),
        open: spin::Mutex::new(FileNodeOpenState::default()),
        context_by_id_storage: spin::Mutex::new(Some(context_by_id_storage)),
        context_by_name_storage: spin::Mutex::new(Some(context_by_name_storage)),
        cc_status: AtomicI32::new(STATUS_SUCCESS.raw()),
    };

    driver.pool().allocate_arc(FSP_ALLOC_FILE_NODE_TAG, node)
}

impl Drop for FileNode {
    fn drop(&mut self) {
        fsp_device_dereference(&self.device);
    }
}

impl FileNode {
    /// Owning volume device
    pub fn device(&self) -> &Arc<DeviceObject> {
        &self.device
    }

    /// Number of references to the node
    pub fn reference_count(node: &Arc<FileNode>) -> usize {
        Arc::strong_count(node)
    }

    pub fn identifier(&self) -> u64 {
        self.identifier.load(Ordering::Acquire)
    }

    /// Set the identity of the file; done before the node is opened
    pub fn set_identifier(&self, identifier: u64) {
        self.identifier.store(identifier, Ordering::Release);
    }

    pub fn file_name(&self) -> String {
        self.file_name.lock().clone()
    }

    /// Store the node's path
    ///
    /// Fails with `STATUS_BUFFER_OVERFLOW` if the path does not fit the
    /// capacity reserved at create.
    pub fn set_file_name(&self, file_name: &str) -> NtResult<()> {
        if file_name.len() > self.file_name_capacity {
            return Err(STATUS_BUFFER_OVERFLOW);
        }

        let mut buffer = self.file_name.lock();
        buffer.clear();
        buffer.push_str(file_name);
        Ok(())
    }

    pub fn open_count(&self) -> u32 {
        self.open.lock().open_count
    }

    pub fn share_access(&self) -> ShareAccess {
        self.open.lock().share_access
    }

    pub fn is_delete_on_close(&self) -> bool {
        self.open.lock().delete_on_close
    }

    pub fn is_delete_pending(&self) -> bool {
        self.open.lock().delete_pending
    }

    /// Status of the last cache manager size update
    pub fn cc_status(&self) -> NtStatus {
        NtStatus(self.cc_status.load(Ordering::Acquire))
    }

    pub(crate) fn take_context_by_id_storage(&self) -> Option<ElementStorage<u64, Arc<FileNode>>> {
        self.context_by_id_storage.lock().take()
    }

    pub(crate) fn return_context_by_id_storage(&self, storage: ElementStorage<u64, Arc<FileNode>>) {
        *self.context_by_id_storage.lock() = Some(storage);
    }

    pub(crate) fn take_context_by_name_storage(&self) -> Option<ElementStorage<String, Arc<FileNode>>> {
        self.context_by_name_storage.lock().take()
    }

    pub(crate) fn return_context_by_name_storage(&self, storage: ElementStorage<String, Arc<FileNode>>) {
        *self.context_by_name_storage.lock() = Some(storage);
    }

    /*
     * Main and paging I/O resources
     */

    pub fn acquire_shared(&self, flags: FileNodeAcquire) {
        if flags.contains(FileNodeAcquire::MAIN) {
            self.header.resource.acquire_shared(true);
        }
        if flags.contains(FileNodeAcquire::PGIO) {
            self.header.paging_io_resource.acquire_shared(true);
        }
    }

    pub fn acquire_exclusive(&self, flags: FileNodeAcquire) {
        if flags.contains(FileNodeAcquire::MAIN) {
            self.header.resource.acquire_exclusive(true);
        }
        if flags.contains(FileNodeAcquire::PGIO) {
            self.header.paging_io_resource.acquire_exclusive(true);
        }
    }

    /// Acquire shared without waiting; on failure nothing stays held
    pub fn try_acquire_shared(&self, flags: FileNodeAcquire) -> bool {
        if flags.contains(FileNodeAcquire::MAIN) && !self.header.resource.try_acquire_shared() {
            return false;
        }
        if flags.contains(FileNodeAcquire::PGIO) && !self.header.paging_io_resource.try_acquire_shared() {
            if flags.contains(FileNodeAcquire::MAIN) {
                self.header.resource.release();
            }
            return false;
        }
        true
    }

    /// Acquire exclusive without waiting; on failure nothing stays held
    pub fn try_acquire_exclusive(&self, flags: FileNodeAcquire) -> bool {
        if flags.contains(FileNodeAcquire::MAIN) && !self.header.resource.try_acquire_exclusive() {
            return false;
        }
        if flags.contains(FileNodeAcquire::PGIO) && !self.header.paging_io_resource.try_acquire_exclusive() {
            if flags.contains(FileNodeAcquire::MAIN) {
                self.header.resource.release();
            }
            return false;
        }
        true
    }

    /// Release in reverse order: paging I/O first, then main
    pub fn release(&self, flags: FileNodeAcquire) {
        if flags.contains(FileNodeAcquire::PGIO) {
            self.header.paging_io_resource.release();
        }
        if flags.contains(FileNodeAcquire::MAIN) {
            self.header.resource.release();
        }
    }

    /*
     * Cached file info
     */

    /// Cached file info, expired or not
    pub fn get_file_info(&self) -> FileInfo {
        self.info.lock().info
    }

    /// Cached file info, if it has not expired
    pub fn try_get_file_info(&self) -> Option<FileInfo> {
        let slot = *self.info.lock();
        let fsvol = fsp_fsvol_device_extension(&self.device)?;

        if slot.expiration_time != 0 && fsvol.clock().expiration_time_valid(slot.expiration_time) {
            Some(slot.info)
        } else {
            None
        }
    }

    /// Cache file info for the volume's file info timeout
    ///
    /// A timeout of 0 disables caching.
    pub fn set_file_info(&self, info: &FileInfo) {
        let expiration_time = match fsp_fsvol_device_extension(&self.device) {
            Some(fsvol) => match fsvol.volume_params().file_info_timeout {
                0 => 0,
                timeout => fsvol.clock().expiration_time_from_millis(timeout),
            },
            None => 0,
        };

        *self.info.lock() = FileInfoSlot {
            info: *info,
            expiration_time,
        };
    }
}

/// Open a handle on a file node
///
/// `node` is a candidate created for this open. If the volume already has
/// a node with the same identifier, the candidate is dropped and the open
/// is admitted against the existing node, subject to delete-pending, mapped
/// writable sections and share access. Returns the node the handle now
/// refers to.
pub fn fsp_file_node_open(
    node: Arc<FileNode>,
    file_object: &mut FileObject,
    granted_access: u32,
    share_access: u32,
    delete_on_close: bool,
) -> NtResult<Arc<FileNode>> {
    let fsvol = fsp_fsvol_device_extension(&node.device).ok_or(STATUS_INVALID_DEVICE_STATE)?;
    let mut table = fsvol.lock_context_table();

    let (opened, inserted) = table.insert_context(node.identifier(), &node);

    let result = {
        let mut state = opened.open.lock();

        let admitted = if inserted {
            io_set_share_access(granted_access, share_access, file_object, &mut state.share_access);
            Ok(())
        } else if state.delete_pending {
            Err(STATUS_DELETE_PENDING)
        } else if share_access & FILE_SHARE_WRITE == 0
            && granted_access & (FILE_EXECUTE | FILE_READ_DATA | FILE_WRITE_DATA | FILE_APPEND_DATA | DELETE) != 0
            && mm_does_file_have_user_writable_references(&opened.section_object_pointers)
        {
            Err(STATUS_SHARING_VIOLATION)
        } else {
            io_check_share_access(granted_access, share_access, file_object, &mut state.share_access, true)
        };

        if admitted.is_ok() {
            state.open_count += 1;
            if delete_on_close {
                state.delete_on_close = true;
            }
        }

        admitted
    };

    drop(table);
    drop(node);

    match result {
        Ok(()) => Ok(opened),
        Err(status) => {
            log::debug!("fsp: open of {:#x} refused: {}", opened.identifier(), status);
            Err(status)
        }
    }
}

/// Close a handle on a file node
///
/// Returns true if this close removed the node from the volume's index
/// and the file is pending delete.
pub fn fsp_file_node_close(node: &Arc<FileNode>, file_object: &FileObject) -> bool {
    let fsvol = match fsp_fsvol_device_extension(&node.device) {
        Some(fsvol) => fsvol,
        None => return false,
    };
    let mut table = fsvol.lock_context_table();

    let (delete_pending, removed) = {
        let mut state = node.open.lock();

        if state.delete_on_close {
            state.delete_pending = true;
        }

        io_remove_share_access(file_object, &mut state.share_access);

        debug_assert!(state.open_count > 0, "Closing a file node with no opens");
        state.open_count = state.open_count.saturating_sub(1);

        let removed = if state.open_count == 0 {
            table.delete_context(node.identifier())
        } else {
            None
        };

        (state.delete_pending, removed)
    };

    drop(table);

    let deleted = removed.is_some();
    drop(removed);

    deleted && delete_pending
}

/// Update the sizes of the handle's file node
///
/// The caller holds the node's paging I/O resource exclusive. The cache
/// manager's status is recorded on the node and returned.
pub fn fsp_file_object_set_sizes(file_object: &FileObject, allocation_size: i64, file_size: i64) -> NtResult<()> {
    let node = file_object.fs_context.as_ref().ok_or(STATUS_INVALID_PARAMETER)?;
    debug_assert!(
        node.header.paging_io_resource.is_acquired_exclusive(),
        "Setting file sizes without the paging I/O resource"
    );

    node.header.set_sizes(allocation_size, file_size);

    let status = fsp_fsvol_device_extension(&node.device)
        .and_then(|fsvol| fsvol.services())
        .map_or(STATUS_SUCCESS, |services| {
            services.set_file_sizes(file_object, &node.header.cc_file_sizes())
        });

    node.cc_status.store(status.raw(), Ordering::Release);
    status.into_result()
}

/// Per-handle file descriptor
#[derive(Debug, Default)]
pub struct FileDesc {
    /// Context assigned by the user-mode file system
    pub user_context2: u64,
}

/// Allocate a zeroed file descriptor
pub fn fsp_file_desc_create(driver: &DriverObject) -> NtResult<Box<FileDesc>> {
    driver.pool().allocate(FSP_ALLOC_FILE_DESC_TAG, FileDesc::default())
}

/// Free a file descriptor
pub fn fsp_file_desc_delete(file_desc: Box<FileDesc>) {
    drop(file_desc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsp::device::{fsp_device_create, FspDeviceExtensionKind};
    use crate::fsp::params::VolumeParams;
    use crate::fsp::testing::mount_volume;
    use crate::fsrtl::fcb::VALID_DATA_LENGTH_DISABLED;
    use crate::io::file::file_access::{FILE_GENERIC_READ, FILE_GENERIC_WRITE, FILE_READ_ATTRIBUTES};
    use crate::io::file::file_share::{FILE_SHARE_ALL, FILE_SHARE_DELETE, FILE_SHARE_READ};
    use crate::status::STATUS_INSUFFICIENT_RESOURCES;
    use alloc::vec::Vec;
    use std::sync::Barrier;

    fn volume() -> (Arc<DriverObject>, Arc<DeviceObject>) {
        let driver = DriverObject::new("\\Driver\\Fsp");
        let (device, _services) = mount_volume(&driver, VolumeParams::default(), None);
        (driver, device)
    }

    fn candidate(device: &Arc<DeviceObject>, identifier: u64) -> Arc<FileNode> {
        let node = fsp_file_node_create(device, 260).unwrap();
        node.set_identifier(identifier);
        node
    }

    /// Open a fresh candidate for `identifier` on a new file object
    fn open(
        device: &Arc<DeviceObject>,
        identifier: u64,
        access: u32,
        share: u32,
        delete_on_close: bool,
    ) -> NtResult<(Arc<FileNode>, FileObject)> {
        let mut file_object = FileObject::new("\\a\\b.txt");
        let node = fsp_file_node_open(
            candidate(device, identifier),
            &mut file_object,
            access,
            share,
            delete_on_close,
        )?;
        file_object.fs_context = Some(node.clone());
        Ok((node, file_object))
    }

    fn indexed(device: &DeviceObject, identifier: u64) -> bool {
        let fsvol = fsp_fsvol_device_extension(device).unwrap();
        fsvol.lock_context_table().lookup_context(identifier).is_some()
    }

    #[test]
    fn test_create_references_volume() {
        let (_driver, device) = volume();
        let node = fsp_file_node_create(&device, 16).unwrap();

        assert_eq!(device.extension().ref_count(), 2);
        assert_eq!(FileNode::reference_count(&node), 1);
        assert_eq!(node.open_count(), 0);
        assert_eq!(node.header.valid_data_length(), VALID_DATA_LENGTH_DISABLED);

        drop(node);
        assert_eq!(device.extension().ref_count(), 1);
    }

    #[test]
    fn test_create_requires_volume() {
        let driver = DriverObject::new("\\Driver\\Fsp");
        let device = fsp_device_create(&driver, FspDeviceExtensionKind::Fsctl, 0, 0, 0).unwrap();
        assert_eq!(fsp_file_node_create(&device, 16).err(), Some(STATUS_INVALID_DEVICE_STATE));
        assert_eq!(device.extension().ref_count(), 1);
    }

    #[test]
    fn test_create_out_of_pool() {
        let (driver, device) = volume();
        driver.pool().inject_failure_after(FSP_ALLOC_FILE_NODE_TAG, 1);

        // Path buffer allocated, node allocation fails
        assert_eq!(fsp_file_node_create(&device, 16).err(), Some(STATUS_INSUFFICIENT_RESOURCES));
        assert_eq!(device.extension().ref_count(), 1);

        // Path buffer allocation fails
        driver.pool().inject_failure(FSP_ALLOC_FILE_NODE_TAG);
        assert_eq!(fsp_file_node_create(&device, 16).err(), Some(STATUS_INSUFFICIENT_RESOURCES));
        assert_eq!(device.extension().ref_count(), 1);
    }

    #[test]
    fn test_file_name_capacity() {
        let (_driver, device) = volume();
        let node = fsp_file_node_create(&device, 8).unwrap();

        node.set_file_name("\\a\\b").unwrap();
        assert_eq!(node.file_name(), "\\a\\b");
        assert_eq!(node.set_file_name("\\a\\long.txt"), Err(STATUS_BUFFER_OVERFLOW));
        assert_eq!(node.file_name(), "\\a\\b");
    }

    #[test]
    fn test_acquire_flags() {
        let (_driver, device) = volume();
        let node = fsp_file_node_create(&device, 0).unwrap();

        node.acquire_exclusive(FileNodeAcquire::FULL);
        assert!(node.header.resource.is_acquired_exclusive());
        assert!(node.header.paging_io_resource.is_acquired_exclusive());
        assert!(!node.try_acquire_shared(FileNodeAcquire::MAIN));
        node.release(FileNodeAcquire::FULL);

        node.acquire_shared(FileNodeAcquire::MAIN);
        assert!(node.try_acquire_shared(FileNodeAcquire::MAIN));
        assert_eq!(node.header.resource.shared_count(), 2);
        node.release(FileNodeAcquire::MAIN);
        node.release(FileNodeAcquire::MAIN);

        // Empty set acquires nothing and succeeds
        assert!(node.try_acquire_exclusive(FileNodeAcquire::empty()));
        assert!(!node.header.resource.is_acquired());
    }

    #[test]
    fn test_try_acquire_releases_main_on_paging_failure() {
        let (_driver, device) = volume();
        let node = fsp_file_node_create(&device, 0).unwrap();

        node.acquire_shared(FileNodeAcquire::PGIO);
        assert!(!node.try_acquire_exclusive(FileNodeAcquire::FULL));
        assert!(!node.header.resource.is_acquired());

        node.release(FileNodeAcquire::PGIO);
        node.acquire_exclusive(FileNodeAcquire::PGIO);
        assert!(!node.try_acquire_shared(FileNodeAcquire::FULL));
        assert!(!node.header.resource.is_acquired());
        node.release(FileNodeAcquire::PGIO);

        assert!(node.try_acquire_shared(FileNodeAcquire::FULL));
        node.release(FileNodeAcquire::FULL);
        assert!(!node.header.resource.is_acquired());
        assert!(!node.header.paging_io_resource.is_acquired());
    }

    #[test]
    fn test_open_twice_then_close() {
        let (_driver, device) = volume();
        let share = FILE_SHARE_READ | FILE_SHARE_WRITE;

        let (first, first_fo) = open(&device, 1, FILE_GENERIC_READ, share, false).unwrap();
        let (second, second_fo) = open(&device, 1, FILE_GENERIC_READ, share, false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.open_count(), 2);
        assert_eq!(fsp_fsvol_device_extension(&device).unwrap().lock_context_table().context_count(), 1);
        // Table, two returned handles, two file objects
        assert_eq!(FileNode::reference_count(&first), 5);

        drop(second);
        assert!(!fsp_file_node_close(&first, &second_fo));
        drop(second_fo);
        assert_eq!(first.open_count(), 1);
        assert!(indexed(&device, 1));

        assert!(!fsp_file_node_close(&first, &first_fo));
        drop(first_fo);
        assert_eq!(first.open_count(), 0);
        assert!(!indexed(&device, 1));
        assert_eq!(FileNode::reference_count(&first), 1);

        drop(first);
        assert_eq!(device.extension().ref_count(), 1);
    }

    #[test]
    fn test_share_access_conflict() {
        let (_driver, device) = volume();

        let (node, _fo) = open(&device, 1, FILE_GENERIC_READ, FILE_SHARE_READ, false).unwrap();

        let status = open(&device, 1, FILE_GENERIC_WRITE, FILE_SHARE_ALL, false).err();
        assert_eq!(status, Some(STATUS_SHARING_VIOLATION));
        assert_eq!(node.open_count(), 1);

        // Attribute-only opens do not take part in share access
        let (_other, _other_fo) = open(&device, 1, FILE_READ_ATTRIBUTES, 0, false).unwrap();
        assert_eq!(node.open_count(), 2);
        assert_eq!(node.share_access().open_count, 1);
    }

    #[test]
    fn test_writable_section_requires_share_write() {
        let (_driver, device) = volume();

        let (node, _fo) = open(&device, 9, FILE_GENERIC_READ | FILE_GENERIC_WRITE, FILE_SHARE_ALL, false).unwrap();
        node.section_object_pointers.map_user_writable_view();

        let status = open(&device, 9, FILE_GENERIC_READ, FILE_SHARE_READ | FILE_SHARE_DELETE, false).err();
        assert_eq!(status, Some(STATUS_SHARING_VIOLATION));
        assert_eq!(node.open_count(), 1);

        let (_other, _other_fo) = open(&device, 9, FILE_GENERIC_READ, FILE_SHARE_ALL, false).unwrap();
        assert_eq!(node.open_count(), 2);
    }

    #[test]
    fn test_delete_pending() {
        let (_driver, device) = volume();

        let (node, first_fo) = open(&device, 3, DELETE, FILE_SHARE_ALL, true).unwrap();
        let (_same, second_fo) = open(&device, 3, FILE_GENERIC_READ, FILE_SHARE_ALL, false).unwrap();
        assert!(node.is_delete_on_close());
        assert!(!node.is_delete_pending());

        assert!(!fsp_file_node_close(&node, &first_fo));
        assert!(node.is_delete_pending());

        assert_eq!(open(&device, 3, FILE_GENERIC_READ, FILE_SHARE_ALL, false).err(), Some(STATUS_DELETE_PENDING));
        assert_eq!(node.open_count(), 1);

        assert!(fsp_file_node_close(&node, &second_fo));
        assert!(!indexed(&device, 3));
    }

    #[test]
    fn test_random_open_close_keeps_index_consistent() {
        let (_driver, device) = volume();
        let identifier = 77;
        let mut handles: Vec<(Arc<FileNode>, FileObject)> = Vec::new();
        let mut weak = None;
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;

        for _ in 0..2000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let roll = (seed >> 33) % 10;

            if roll < 5 || handles.is_empty() {
                let access = if roll % 2 == 0 { FILE_GENERIC_READ } else { FILE_READ_ATTRIBUTES };
                let (node, file_object) = open(&device, identifier, access, FILE_SHARE_ALL, false).unwrap();
                weak = Some(Arc::downgrade(&node));
                handles.push((node, file_object));
            } else {
                let index = (seed >> 17) as usize % handles.len();
                let (node, mut file_object) = handles.swap_remove(index);
                assert!(!fsp_file_node_close(&node, &file_object));
                file_object.fs_context = None;
            }

            let open_count = handles.first().map_or(0, |(node, _)| node.open_count());
            assert_eq!(open_count as usize, handles.len());
            assert_eq!(indexed(&device, identifier), open_count > 0);

            if let Some((node, _)) = handles.first() {
                // Table plus one returned handle and one file object each
                assert_eq!(FileNode::reference_count(node), 1 + 2 * handles.len());
                let data_opens = handles.iter().filter(|(_, fo)| fo.has_data_access()).count();
                assert_eq!(node.share_access().open_count as usize, data_opens);
            } else if let Some(weak) = &weak {
                assert!(weak.upgrade().is_none());
            }
        }

        for (node, file_object) in handles.drain(..) {
            fsp_file_node_close(&node, &file_object);
        }
        assert_eq!(device.extension().ref_count(), 1);
    }

    #[test]
    fn test_concurrent_open_single_entry() {
        let (_driver, device) = volume();
        let fsvol = fsp_fsvol_device_extension(&device).unwrap();

        for identifier in 0..50u64 {
            let barrier = Barrier::new(2);

            let opened: Vec<Arc<FileNode>> = std::thread::scope(|s| {
                let threads: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            let node = candidate(&device, identifier);
                            let mut file_object = FileObject::new("\\race");
                            barrier.wait();
                            fsp_file_node_open(node, &mut file_object, FILE_GENERIC_READ, FILE_SHARE_ALL, false)
                                .unwrap()
                        })
                    })
                    .collect();
                threads.into_iter().map(|t| t.join().unwrap()).collect()
            });

            assert!(Arc::ptr_eq(&opened[0], &opened[1]));
            assert_eq!(opened[0].open_count(), 2);
            // Created with 1, two admitted opens added 2
            assert_eq!(FileNode::reference_count(&opened[0]), 3);
        }

        assert_eq!(fsvol.lock_context_table().context_count(), 50);
    }

    #[test]
    fn test_file_info_cache() {
        let (driver, device) = volume();
        let node = fsp_file_node_create(&device, 0).unwrap();
        let info = FileInfo {
            file_attributes: 0x20,
            file_size: 4096,
            ..FileInfo::default()
        };

        assert_eq!(node.try_get_file_info(), None);
        node.set_file_info(&info);
        assert_eq!(node.try_get_file_info(), Some(info));

        driver.clock().advance_millis(1000);
        assert_eq!(node.try_get_file_info(), None);
        assert_eq!(node.get_file_info(), info);
    }

    #[test]
    fn test_file_info_timeout_zero_never_cached() {
        let driver = DriverObject::new("\\Driver\\Fsp");
        let params = VolumeParams {
            file_info_timeout: 0,
            ..VolumeParams::default()
        };
        let (device, _services) = mount_volume(&driver, params, None);
        let node = fsp_file_node_create(&device, 0).unwrap();

        node.set_file_info(&FileInfo::default());
        assert_eq!(node.try_get_file_info(), None);
        driver.clock().advance_millis(5);
        assert_eq!(node.try_get_file_info(), None);
    }

    #[test]
    fn test_set_sizes() {
        let driver = DriverObject::new("\\Driver\\Fsp");
        let (device, services) = mount_volume(&driver, VolumeParams::default(), None);
        let (node, file_object) = open(&device, 5, FILE_GENERIC_WRITE, 0, false).unwrap();

        node.acquire_exclusive(FileNodeAcquire::FULL);
        fsp_file_object_set_sizes(&file_object, 8192, 5000).unwrap();
        node.release(FileNodeAcquire::FULL);

        assert_eq!(node.header.allocation_size(), 8192);
        assert_eq!(node.header.file_size(), 5000);
        assert_eq!(node.header.valid_data_length(), VALID_DATA_LENGTH_DISABLED);
        assert_eq!(services.size_updates.load(Ordering::SeqCst), 1);
        assert_eq!(services.last_file_size.load(Ordering::SeqCst), 5000);
        assert_eq!(node.cc_status(), STATUS_SUCCESS);

        services.size_status.store(STATUS_INSUFFICIENT_RESOURCES.raw(), Ordering::SeqCst);
        node.acquire_exclusive(FileNodeAcquire::PGIO);
        assert_eq!(fsp_file_object_set_sizes(&file_object, 8192, 6000), Err(STATUS_INSUFFICIENT_RESOURCES));
        node.release(FileNodeAcquire::PGIO);
        assert_eq!(node.cc_status(), STATUS_INSUFFICIENT_RESOURCES);

        assert_eq!(fsp_file_object_set_sizes(&FileObject::default(), 0, 0), Err(STATUS_INVALID_PARAMETER));
    }

    #[test]
    fn test_file_desc() {
        let driver = DriverObject::new("\\Driver\\Fsp");
        let desc = fsp_file_desc_create(&driver).unwrap();
        assert_eq!(desc.user_context2, 0);

        let mut file_object = FileObject::new("\\x");
        file_object.fs_context2 = Some(desc);
        if let Some(desc) = file_object.fs_context2.take() {
            fsp_file_desc_delete(desc);
        }

        driver.pool().inject_failure(FSP_ALLOC_FILE_DESC_TAG);
        assert_eq!(fsp_file_desc_create(&driver).err(), Some(STATUS_INSUFFICIENT_RESOURCES));
    }
}
