//! File Object
//!
//! A file object is the I/O manager's per-handle state. The proxy uses it
//! to record what the handle was granted by share access and to attach
//! its own per-file and per-handle contexts:
//!
//! - `fs_context`: the shared file node
//! - `fs_context2`: the per-handle file descriptor

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use crate::fsp::file::{FileDesc, FileNode};

/// File access rights
pub mod file_access {
    /// Read data from file
    pub const FILE_READ_DATA: u32 = 0x0001;
    /// Write data to file
    pub const FILE_WRITE_DATA: u32 = 0x0002;
    /// Append data to file
    pub const FILE_APPEND_DATA: u32 = 0x0004;
    /// Read extended attributes
    pub const FILE_READ_EA: u32 = 0x0008;
    /// Write extended attributes
    pub const FILE_WRITE_EA: u32 = 0x0010;
    /// Execute file
    pub const FILE_EXECUTE: u32 = 0x0020;
    /// Read file attributes
    pub const FILE_READ_ATTRIBUTES: u32 = 0x0080;
    /// Write file attributes
    pub const FILE_WRITE_ATTRIBUTES: u32 = 0x0100;
    /// Delete the file (standard right)
    pub const DELETE: u32 = 0x0001_0000;
    /// Synchronize (standard right)
    pub const SYNCHRONIZE: u32 = 0x0010_0000;
    /// Generic read
    pub const FILE_GENERIC_READ: u32 = 0x00120089;
    /// Generic write
    pub const FILE_GENERIC_WRITE: u32 = 0x00120116;
}

/// File share modes
pub mod file_share {
    /// Allow others to read
    pub const FILE_SHARE_READ: u32 = 0x00000001;
    /// Allow others to write
    pub const FILE_SHARE_WRITE: u32 = 0x00000002;
    /// Allow others to delete
    pub const FILE_SHARE_DELETE: u32 = 0x00000004;
    /// All sharing
    pub const FILE_SHARE_ALL: u32 = 0x00000007;
}

/// File Object structure
#[derive(Default)]
pub struct FileObject {
    /// Name the file was opened with
    pub file_name: String,

    /// Access granted by share access
    pub read_access: bool,
    pub write_access: bool,
    pub delete_access: bool,

    /// Sharing granted to others by this handle
    pub shared_read: bool,
    pub shared_write: bool,
    pub shared_delete: bool,

    /// File node this handle refers to
    pub fs_context: Option<Arc<FileNode>>,

    /// Per-handle descriptor
    pub fs_context2: Option<Box<FileDesc>>,
}

impl FileObject {
    /// Create a file object for a name
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: String::from(file_name),
            ..Self::default()
        }
    }

    /// True if the handle holds read, write or delete access
    pub fn has_data_access(&self) -> bool {
        self.read_access || self.write_access || self.delete_access
    }
}
