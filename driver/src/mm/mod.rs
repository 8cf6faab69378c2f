//! Memory Manager (mm)
//!
//! - **Pool**: tagged allocation with per-tag statistics and fault injection
//! - **Section**: section object pointers of cached files

pub mod pool;
pub mod section;

pub use pool::{Pool, PoolTag};
pub use section::{mm_does_file_have_user_writable_references, SectionObjectPointers};
