//! File Control Block (FCB) Header
//!
//! The common FCB header sits at the start of every cached stream context
//! and is what the cache manager reads to learn a file's sizes and which
//! resources serialize it.
//!
//! The FCB header contains:
//! - File size information (allocation, file size, valid data length)
//! - The main and paging I/O resources
//! - Fast I/O eligibility
//!
//! The proxy does not track valid data length; it pins the field to
//! [`VALID_DATA_LENGTH_DISABLED`] so the cache manager never zeroes ranges
//! on its behalf.

use core::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use crate::ex::resource::EResource;

/// Valid data length value meaning "not tracked"
pub const VALID_DATA_LENGTH_DISABLED: i64 = i64::MAX;

/// Fast I/O possibility states
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastIoPossible {
    /// Fast I/O is not possible (always go through IRP path)
    FastIoIsNotPossible = 0,
    /// Fast I/O is possible (can use fast path)
    FastIoIsPossible = 1,
    /// Fast I/O may or may not be possible (need to check)
    FastIoIsQuestionable = 2,
}

/// Sizes handed to the cache manager (CC_FILE_SIZES)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CcFileSizes {
    pub allocation_size: i64,
    pub file_size: i64,
    pub valid_data_length: i64,
}

/// Common FCB Header
pub struct FsrtlCommonFcbHeader {
    /// Node type code (file system specific)
    pub node_type_code: i16,
    /// Size of the owning structure in bytes
    pub node_byte_size: i16,
    /// Fast I/O possibility state
    is_fast_io_possible: AtomicU8,
    /// Main resource for file synchronization
    pub resource: EResource,
    /// Paging I/O resource
    pub paging_io_resource: EResource,
    /// Allocated size of file
    allocation_size: AtomicI64,
    /// Current file size (logical end of file)
    file_size: AtomicI64,
    /// Valid data length
    valid_data_length: AtomicI64,
}

impl FsrtlCommonFcbHeader {
    /// Create an FCB header for a node type
    pub const fn new(node_type: i16, node_size: i16) -> Self {
        Self {
            node_type_code: node_type,
            node_byte_size: node_size,
            is_fast_io_possible: AtomicU8::new(FastIoPossible::FastIoIsQuestionable as u8),
            resource: EResource::new(),
            paging_io_resource: EResource::new(),
            allocation_size: AtomicI64::new(0),
            file_size: AtomicI64::new(0),
            valid_data_length: AtomicI64::new(VALID_DATA_LENGTH_DISABLED),
        }
    }

    /// Check if fast I/O is possible
    pub fn fast_io_possible(&self) -> FastIoPossible {
        match self.is_fast_io_possible.load(Ordering::Relaxed) {
            0 => FastIoPossible::FastIoIsNotPossible,
            1 => FastIoPossible::FastIoIsPossible,
            _ => FastIoPossible::FastIoIsQuestionable,
        }
    }

    /// Set fast I/O possibility
    pub fn set_fast_io_possible(&self, possible: FastIoPossible) {
        self.is_fast_io_possible.store(possible as u8, Ordering::Relaxed);
    }

    pub fn allocation_size(&self) -> i64 {
        self.allocation_size.load(Ordering::Acquire)
    }

    pub fn file_size(&self) -> i64 {
        self.file_size.load(Ordering::Acquire)
    }

    pub fn valid_data_length(&self) -> i64 {
        self.valid_data_length.load(Ordering::Acquire)
    }

    /// Update allocation size and file size
    ///
    /// Callers hold the paging I/O resource exclusively.
    pub fn set_sizes(&self, allocation_size: i64, file_size: i64) {
        self.allocation_size.store(allocation_size, Ordering::Release);
        self.file_size.store(file_size, Ordering::Release);
    }

    /// Current sizes in cache manager form
    pub fn cc_file_sizes(&self) -> CcFileSizes {
        CcFileSizes {
            allocation_size: self.allocation_size(),
            file_size: self.file_size(),
            valid_data_length: self.valid_data_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header() {
        let header = FsrtlCommonFcbHeader::new(0x0F01, 64);
        assert_eq!(header.valid_data_length(), VALID_DATA_LENGTH_DISABLED);
        assert_eq!(header.fast_io_possible(), FastIoPossible::FastIoIsQuestionable);
        assert!(!header.resource.is_acquired());
        assert!(!header.paging_io_resource.is_acquired());
    }

    #[test]
    fn test_set_sizes() {
        let header = FsrtlCommonFcbHeader::new(0x0F01, 64);
        header.set_sizes(4096, 100);
        assert_eq!(
            header.cc_file_sizes(),
            CcFileSizes {
                allocation_size: 4096,
                file_size: 100,
                valid_data_length: VALID_DATA_LENGTH_DISABLED,
            }
        );
    }
}
