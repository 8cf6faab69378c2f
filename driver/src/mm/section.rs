//! Section Object Pointers
//!
//! Each file control block carries a `SECTION_OBJECT_POINTERS` structure
//! through which the memory manager tracks the sections mapped onto the
//! file. The proxy only asks one question of it: are there user-writable
//! mapped views (`MmDoesFileHaveUserWritableReferences`)? A file with such
//! views cannot be opened without `FILE_SHARE_WRITE`.

use core::sync::atomic::{AtomicU32, Ordering};

/// Section object pointers for one file
#[derive(Debug, Default)]
pub struct SectionObjectPointers {
    /// User-mode views mapped with write access
    user_writable_references: AtomicU32,
}

impl SectionObjectPointers {
    pub const fn new() -> Self {
        Self {
            user_writable_references: AtomicU32::new(0),
        }
    }

    /// Record a user view mapped for write
    pub fn map_user_writable_view(&self) {
        self.user_writable_references.fetch_add(1, Ordering::AcqRel);
    }

    /// Record removal of a user writable view
    pub fn unmap_user_writable_view(&self) {
        let previous = self
            .user_writable_references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(previous.is_ok(), "Unmapping a writable view that was never mapped");
    }

    /// Number of user writable views
    pub fn user_writable_references(&self) -> u32 {
        self.user_writable_references.load(Ordering::Acquire)
    }
}

/// MmDoesFileHaveUserWritableReferences
#[inline]
pub fn mm_does_file_have_user_writable_references(section: &SectionObjectPointers) -> bool {
    section.user_writable_references() != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_references() {
        let section = SectionObjectPointers::new();
        assert!(!mm_does_file_have_user_writable_references(&section));

        section.map_user_writable_view();
        section.map_user_writable_view();
        assert_eq!(section.user_writable_references(), 2);

        section.unmap_user_writable_view();
        assert!(mm_does_file_have_user_writable_references(&section));
        section.unmap_user_writable_view();
        assert!(!mm_does_file_have_user_writable_references(&section));
    }
}
