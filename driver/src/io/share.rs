//! Share Access
//!
//! NT share access decides whether a new handle may be opened on a file
//! given the access and sharing of the handles already open.
//!
//! # NT Semantics
//!
//! Only three kinds of access participate:
//! - read: `FILE_READ_DATA` or `FILE_EXECUTE`
//! - write: `FILE_WRITE_DATA` or `FILE_APPEND_DATA`
//! - delete: `DELETE`
//!
//! An open requesting none of them (for example attributes only) never
//! conflicts and is not counted. Otherwise the open conflicts if it asks
//! for an access some existing open does not share, or if it refuses to
//! share an access some existing open holds.
//!
//! # NT Functions
//!
//! - `IoSetShareAccess` - first open of a file
//! - `IoCheckShareAccess` - later opens, optionally updating the counts
//! - `IoUpdateShareAccess` - record an open already checked
//! - `IoRemoveShareAccess` - close

use super::file::file_access::{DELETE, FILE_APPEND_DATA, FILE_EXECUTE, FILE_READ_DATA, FILE_WRITE_DATA};
use super::file::file_share::{FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE};
use super::file::FileObject;
use crate::status::{NtResult, STATUS_SHARING_VIOLATION};

/// Share access counts for one file (SHARE_ACCESS)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShareAccess {
    pub open_count: u32,
    pub readers: u32,
    pub writers: u32,
    pub deleters: u32,
    pub shared_read: u32,
    pub shared_write: u32,
    pub shared_delete: u32,
}

struct Requested {
    read: bool,
    write: bool,
    delete: bool,
    shared_read: bool,
    shared_write: bool,
    shared_delete: bool,
}

impl Requested {
    fn new(desired_access: u32, desired_share_access: u32) -> Self {
        Self {
            read: desired_access & (FILE_EXECUTE | FILE_READ_DATA) != 0,
            write: desired_access & (FILE_WRITE_DATA | FILE_APPEND_DATA) != 0,
            delete: desired_access & DELETE != 0,
            shared_read: desired_share_access & FILE_SHARE_READ != 0,
            shared_write: desired_share_access & FILE_SHARE_WRITE != 0,
            shared_delete: desired_share_access & FILE_SHARE_DELETE != 0,
        }
    }

    fn any(&self) -> bool {
        self.read || self.write || self.delete
    }

    fn record(&self, file_object: &mut FileObject) {
        file_object.read_access = self.read;
        file_object.write_access = self.write;
        file_object.delete_access = self.delete;
        file_object.shared_read = self.shared_read;
        file_object.shared_write = self.shared_write;
        file_object.shared_delete = self.shared_delete;
    }
}

fn add_open(share_access: &mut ShareAccess, file_object: &FileObject) {
    share_access.open_count += 1;
    share_access.readers += file_object.read_access as u32;
    share_access.writers += file_object.write_access as u32;
    share_access.deleters += file_object.delete_access as u32;
    share_access.shared_read += file_object.shared_read as u32;
    share_access.shared_write += file_object.shared_write as u32;
    share_access.shared_delete += file_object.shared_delete as u32;
}

/// IoSetShareAccess
pub fn io_set_share_access(
    desired_access: u32,
    desired_share_access: u32,
    file_object: &mut FileObject,
    share_access: &mut ShareAccess,
) {
    let requested = Requested::new(desired_access, desired_share_access);
    requested.record(file_object);

    *share_access = ShareAccess::default();
    if requested.any() {
        add_open(share_access, file_object);
    }
}

/// IoCheckShareAccess
///
/// On success the file object records the granted access and, if
/// `update` is set, the open is counted in `share_access`.
pub fn io_check_share_access(
    desired_access: u32,
    desired_share_access: u32,
    file_object: &mut FileObject,
    share_access: &mut ShareAccess,
    update: bool,
) -> NtResult<()> {
    let requested = Requested::new(desired_access, desired_share_access);

    file_object.read_access = requested.read;
    file_object.write_access = requested.write;
    file_object.delete_access = requested.delete;

    if !requested.any() {
        return Ok(());
    }

    let open_count = share_access.open_count;
    if (requested.read && share_access.shared_read < open_count)
        || (requested.write && share_access.shared_write < open_count)
        || (requested.delete && share_access.shared_delete < open_count)
        || (share_access.readers != 0 && !requested.shared_read)
        || (share_access.writers != 0 && !requested.shared_write)
        || (share_access.deleters != 0 && !requested.shared_delete)
    {
        return Err(STATUS_SHARING_VIOLATION);
    }

    requested.record(file_object);
    if update {
        add_open(share_access, file_object);
    }

    Ok(())
}

/// IoUpdateShareAccess
pub fn io_update_share_access(file_object: &FileObject, share_access: &mut ShareAccess) {
    if file_object.has_data_access() {
        add_open(share_access, file_object);
    }
}

/// IoRemoveShareAccess
pub fn io_remove_share_access(file_object: &FileObject, share_access: &mut ShareAccess) {
    if !file_object.has_data_access() {
        return;
    }

    debug_assert!(share_access.open_count > 0, "Removing share access from a file with no opens");
    share_access.open_count = share_access.open_count.saturating_sub(1);
    share_access.readers -= file_object.read_access as u32;
    share_access.writers -= file_object.write_access as u32;
    share_access.deleters -= file_object.delete_access as u32;
    share_access.shared_read -= file_object.shared_read as u32;
    share_access.shared_write -= file_object.shared_write as u32;
    share_access.shared_delete -= file_object.shared_delete as u32;
}
