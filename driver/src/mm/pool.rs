//! Tagged Pool Allocation
//!
//! Every allocation the proxy makes on behalf of a kernel object goes
//! through the driver's [`Pool`] with a 4-character tag naming the
//! allocator, the way `ExAllocatePoolWithTag` is used by NT drivers.
//!
//! # Pool Tags
//!
//! - Per-tag allocation counts and byte totals for usage analysis
//! - Per-tag failure counts
//!
//! # Fault Injection
//!
//! Low-resource conditions are simulated verifier-style: a tag can be armed
//! so that one of its upcoming allocations fails with
//! `STATUS_INSUFFICIENT_RESOURCES`. Genuine exhaustion is reported where the
//! allocator can report it (`try_reserve` for buffers).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::status::{NtResult, STATUS_INSUFFICIENT_RESOURCES};

/// 4-byte pool tag, stored little-endian like NT
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolTag(pub u32);

impl PoolTag {
    /// Build a tag from its four characters
    pub const fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self(
            (bytes[0] as u32)
                | ((bytes[1] as u32) << 8)
                | ((bytes[2] as u32) << 16)
                | ((bytes[3] as u32) << 24),
        )
    }

    /// Get tag as 4 ASCII characters
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Per-tag statistics snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolTagSnapshot {
    pub tag: PoolTag,
    /// Successful allocations with this tag
    pub alloc_count: u64,
    /// Failed allocations with this tag
    pub failure_count: u64,
    /// Total bytes allocated
    pub total_bytes: u64,
}

struct FaultInjection {
    tag: PoolTag,
    /// Allocations with this tag to let through before failing
    skip: u32,
}

/// Driver pool
pub struct Pool {
    tags: spin::Mutex<Vec<PoolTagSnapshot>>,
    faults: spin::Mutex<Vec<FaultInjection>>,
    total_allocs: AtomicU64,
    total_failures: AtomicU64,
}

impl Pool {
    pub const fn new() -> Self {
        Self {
            tags: spin::Mutex::new(Vec::new()),
            faults: spin::Mutex::new(Vec::new()),
            total_allocs: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Fail the next allocation with `tag`
    pub fn inject_failure(&self, tag: PoolTag) {
        self.inject_failure_after(tag, 0);
    }

    /// Let `skip` allocations with `tag` succeed, then fail the next one
    pub fn inject_failure_after(&self, tag: PoolTag, skip: u32) {
        self.faults.lock().push(FaultInjection { tag, skip });
    }

    /// Drop all armed faults
    pub fn clear_injected_failures(&self) {
        self.faults.lock().clear();
    }

    fn should_fail(&self, tag: PoolTag) -> bool {
        let mut faults = self.faults.lock();
        let index = match faults.iter().position(|f| f.tag == tag) {
            Some(index) => index,
            None => return false,
        };

        if faults[index].skip == 0 {
            faults.remove(index);
            true
        } else {
            faults[index].skip -= 1;
            false
        }
    }

    fn record(&self, tag: PoolTag, size: usize, failed: bool) {
        if failed {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("pool: allocation of {} bytes with tag {:?} failed", size, tag);
        } else {
            self.total_allocs.fetch_add(1, Ordering::Relaxed);
        }

        let mut tags = self.tags.lock();
        let entry = match tags.iter_mut().position(|e| e.tag == tag) {
            Some(index) => &mut tags[index],
            None => {
                tags.push(PoolTagSnapshot {
                    tag,
                    alloc_count: 0,
                    failure_count: 0,
                    total_bytes: 0,
                });
                let last = tags.len() - 1;
                &mut tags[last]
            }
        };

        if failed {
            entry.failure_count += 1;
        } else {
            entry.alloc_count += 1;
            entry.total_bytes += size as u64;
        }
    }

    fn check(&self, tag: PoolTag, size: usize) -> NtResult<()> {
        if self.should_fail(tag) {
            self.record(tag, size, true);
            return Err(STATUS_INSUFFICIENT_RESOURCES);
        }
        Ok(())
    }

    /// ExAllocatePoolWithTag for a single object
    pub fn allocate<T>(&self, tag: PoolTag, value: T) -> NtResult<Box<T>> {
        let size = core::mem::size_of::<T>();
        self.check(tag, size)?;
        self.record(tag, size, false);
        Ok(Box::new(value))
    }

    /// ExAllocatePoolWithTag for a reference-counted object
    pub fn allocate_arc<T>(&self, tag: PoolTag, value: T) -> NtResult<Arc<T>> {
        let size = core::mem::size_of::<T>();
        self.check(tag, size)?;
        self.record(tag, size, false);
        Ok(Arc::new(value))
    }

    /// Zero-filled buffer of `size` bytes
    pub fn allocate_zeroed(&self, tag: PoolTag, size: usize) -> NtResult<Vec<u8>> {
        self.check(tag, size)?;

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(size).is_err() {
            self.record(tag, size, true);
            return Err(STATUS_INSUFFICIENT_RESOURCES);
        }
        buffer.resize(size, 0);

        self.record(tag, size, false);
        Ok(buffer)
    }

    /// Empty string buffer with room for `capacity` bytes
    pub fn allocate_string(&self, tag: PoolTag, capacity: usize) -> NtResult<String> {
        self.check(tag, capacity)?;

        let mut buffer = String::new();
        if buffer.try_reserve_exact(capacity).is_err() {
            self.record(tag, capacity, true);
            return Err(STATUS_INSUFFICIENT_RESOURCES);
        }

        self.record(tag, capacity, false);
        Ok(buffer)
    }

    /// Statistics for one tag
    pub fn tag_snapshot(&self, tag: PoolTag) -> Option<PoolTagSnapshot> {
        self.tags.lock().iter().find(|e| e.tag == tag).copied()
    }

    /// Total successful allocations
    pub fn alloc_count(&self) -> u64 {
        self.total_allocs.load(Ordering::Relaxed)
    }

    /// Total failed allocations
    pub fn failure_count(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::format;

    const TEST_TAG: PoolTag = PoolTag::from_bytes(b"Test");
    const OTHER_TAG: PoolTag = PoolTag::from_bytes(b"Othr");

    #[test]
    fn test_tag_encoding() {
        assert_eq!(TEST_TAG.0, 0x7473_6554);
        assert_eq!(&TEST_TAG.to_bytes(), b"Test");
        assert_eq!(format!("{:?}", TEST_TAG), "Test");
    }

    #[test]
    fn test_allocation_stats() {
        let pool = Pool::new();
        let buffer = pool.allocate_zeroed(TEST_TAG, 16).unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(buffer.iter().all(|b| *b == 0));

        let _value = pool.allocate(TEST_TAG, 7u64).unwrap();
        let snapshot = pool.tag_snapshot(TEST_TAG).unwrap();
        assert_eq!(snapshot.alloc_count, 2);
        assert_eq!(snapshot.total_bytes, 24);
        assert!(pool.tag_snapshot(OTHER_TAG).is_none());
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let pool = Pool::new();
        pool.inject_failure(TEST_TAG);

        assert!(pool.allocate(OTHER_TAG, 1u8).is_ok());
        assert_eq!(pool.allocate(TEST_TAG, 1u8).err(), Some(STATUS_INSUFFICIENT_RESOURCES));
        assert!(pool.allocate(TEST_TAG, 1u8).is_ok());
        assert_eq!(pool.failure_count(), 1);
        assert_eq!(pool.tag_snapshot(TEST_TAG).unwrap().failure_count, 1);
    }

    #[test]
    fn test_fault_injection_after_skip() {
        let pool = Pool::new();
        pool.inject_failure_after(TEST_TAG, 2);

        assert!(pool.allocate_arc(TEST_TAG, 1u8).is_ok());
        assert!(pool.allocate_string(TEST_TAG, 8).is_ok());
        assert!(pool.allocate_zeroed(TEST_TAG, 8).is_err());
        assert!(pool.allocate_zeroed(TEST_TAG, 8).is_ok());
    }
}
