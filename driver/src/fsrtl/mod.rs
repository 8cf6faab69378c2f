//! File System Runtime Library (fsrtl)
//!
//! - **FCB header**: sizes and resources shared with the cache manager

pub mod fcb;

pub use fcb::{CcFileSizes, FsrtlCommonFcbHeader, VALID_DATA_LENGTH_DISABLED};
