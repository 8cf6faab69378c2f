//! Executive Resource (ERESOURCE) Implementation
//!
//! ERESOURCEs are reader-writer locks that may be held across blocking
//! operations by passive-level worker threads.
//!
//! # NT Semantics
//!
//! - Supports exclusive (write) and shared (read) access
//! - Exclusive waiters are preferred over new shared acquirers
//! - A hold can be handed to an owner token (`ExSetResourceOwnerPointer`)
//!   and later released by whichever thread presents that token
//!   (`ExReleaseResourceForThreadLite`)
//!
//! Holds are not tied to threads here. A hold that has not been tagged with
//! an owner is anonymous and is released with [`EResource::release`]; a
//! tagged hold is released with [`EResource::release_for_owner`]. Recursive
//! exclusive acquisition is therefore not supported.
//!
//! # Usage
//! ```
//! use fsp_driver::ex::resource::{EResource, ResourceOwner};
//!
//! let resource = EResource::new();
//!
//! // Exclusive access
//! resource.acquire_exclusive(true);
//! resource.release();
//!
//! // Hand a shared hold to an owner that releases it later
//! resource.acquire_shared(true);
//! resource.set_owner_pointer(ResourceOwner(0x1000));
//! resource.release_for_owner(ResourceOwner(0x1000));
//! ```

use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Resource flags
const RESOURCE_FLAG_EXCLUSIVE_WAITER: u32 = 0x1;
const RESOURCE_FLAG_SHARED_WAITER: u32 = 0x2;

/// Owner token for a transferred hold
///
/// NT marks owner pointers by setting the low two bits so they can never be
/// confused with a thread pointer; [`ResourceOwner::tagged`] does the same.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceOwner(pub usize);

impl ResourceOwner {
    /// Owner token derived from an arbitrary address, low bits set
    #[inline]
    pub const fn tagged(address: usize) -> Self {
        Self(address | 3)
    }
}

/// Executive Resource structure
///
/// Equivalent to NT's ERESOURCE
pub struct EResource {
    /// Count of active locks:
    /// - Positive: number of shared owners
    /// - Negative: exclusively owned
    /// - Zero: not locked
    active_count: AtomicI32,

    /// Flags (RESOURCE_FLAG_*)
    flags: AtomicU32,

    /// Number of threads waiting for shared access
    shared_waiters: AtomicU32,

    /// Number of threads waiting for exclusive access
    exclusive_waiters: AtomicU32,

    /// Holds transferred to owner tokens, one entry per hold
    owner_table: spin::Mutex<Vec<ResourceOwner>>,

    /// Statistics: number of acquisitions that had to wait
    contention_count: AtomicU32,
}

impl EResource {
    /// Create a new unowned resource
    pub const fn new() -> Self {
        Self {
            active_count: AtomicI32::new(0),
            flags: AtomicU32::new(0),
            shared_waiters: AtomicU32::new(0),
            exclusive_waiters: AtomicU32::new(0),
            owner_table: spin::Mutex::new(Vec::new()),
            contention_count: AtomicU32::new(0),
        }
    }

    /// Acquire the resource exclusively (write lock)
    ///
    /// # Arguments
    /// * `wait` - If true, wait for the resource; if false, fail immediately
    ///
    /// Returns true if acquired, false if couldn't acquire (wait=false only)
    pub fn acquire_exclusive(&self, wait: bool) -> bool {
        let mut waiting = false;

        loop {
            if self
                .active_count
                .compare_exchange_weak(0, -1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                if waiting {
                    self.stop_waiting(&self.exclusive_waiters, RESOURCE_FLAG_EXCLUSIVE_WAITER);
                }
                return true;
            }

            if self.active_count.load(Ordering::Relaxed) == 0 {
                continue;
            }

            // Resource is held - need to wait or fail
            if !wait {
                return false;
            }

            if !waiting {
                waiting = true;
                self.contention_count.fetch_add(1, Ordering::Relaxed);
                self.exclusive_waiters.fetch_add(1, Ordering::Relaxed);
                self.flags.fetch_or(RESOURCE_FLAG_EXCLUSIVE_WAITER, Ordering::Relaxed);
            }

            core::hint::spin_loop();
        }
    }

    /// Try to acquire exclusively without waiting
    pub fn try_acquire_exclusive(&self) -> bool {
        self.acquire_exclusive(false)
    }

    /// Acquire the resource in shared mode (read lock)
    ///
    /// # Arguments
    /// * `wait` - If true, wait for the resource; if false, fail immediately
    ///
    /// Returns true if acquired, false if couldn't acquire (wait=false only)
    pub fn acquire_shared(&self, wait: bool) -> bool {
        let mut waiting = false;

        loop {
            let active = self.active_count.load(Ordering::Relaxed);
            let exclusive_waiter =
                self.flags.load(Ordering::Relaxed) & RESOURCE_FLAG_EXCLUSIVE_WAITER != 0;

            if active >= 0 && !exclusive_waiter {
                if self
                    .active_count
                    .compare_exchange_weak(active, active + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    if waiting {
                        self.stop_waiting(&self.shared_waiters, RESOURCE_FLAG_SHARED_WAITER);
                    }
                    return true;
                }
                continue;
            }

            // Exclusively held, or an exclusive waiter goes first
            if !wait {
                return false;
            }

            if !waiting {
                waiting = true;
                self.contention_count.fetch_add(1, Ordering::Relaxed);
                self.shared_waiters.fetch_add(1, Ordering::Relaxed);
                self.flags.fetch_or(RESOURCE_FLAG_SHARED_WAITER, Ordering::Relaxed);
            }

            core::hint::spin_loop();
        }
    }

    /// Try to acquire shared without waiting
    pub fn try_acquire_shared(&self) -> bool {
        self.acquire_shared(false)
    }

    fn stop_waiting(&self, waiters: &AtomicU32, flag: u32) {
        if waiters.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.flags.fetch_and(!flag, Ordering::Relaxed);
        }
    }

    /// Release an anonymous hold
    ///
    /// Must be called once for each successful acquire that was not handed
    /// to an owner.
    pub fn release(&self) {
        let active = self.active_count.load(Ordering::Relaxed);
        debug_assert!(active != 0, "Releasing a resource that is not held");

        if active < 0 {
            self.active_count.store(0, Ordering::Release);
        } else if active > 0 {
            self.active_count.fetch_sub(1, Ordering::Release);
        }
    }

    /// Transfer one current hold to `owner` (ExSetResourceOwnerPointer)
    pub fn set_owner_pointer(&self, owner: ResourceOwner) {
        debug_assert!(self.is_acquired(), "Setting owner on a resource that is not held");
        self.owner_table.lock().push(owner);
    }

    /// Release a hold previously transferred to `owner`
    /// (ExReleaseResourceForThreadLite)
    ///
    /// Returns false if `owner` holds nothing.
    pub fn release_for_owner(&self, owner: ResourceOwner) -> bool {
        {
            let mut table = self.owner_table.lock();
            match table.iter().position(|o| *o == owner) {
                Some(index) => {
                    table.swap_remove(index);
                }
                None => return false,
            }
        }

        self.release();
        true
    }

    /// Check whether `owner` currently holds the resource
    pub fn is_owned_by(&self, owner: ResourceOwner) -> bool {
        self.owner_table.lock().iter().any(|o| *o == owner)
    }

    /// Check if resource is held exclusively
    #[inline]
    pub fn is_acquired_exclusive(&self) -> bool {
        self.active_count.load(Ordering::Relaxed) < 0
    }

    /// Check if resource is held (exclusively or shared)
    #[inline]
    pub fn is_acquired(&self) -> bool {
        self.active_count.load(Ordering::Relaxed) != 0
    }

    /// Check if resource is held in shared mode
    #[inline]
    pub fn is_acquired_shared(&self) -> bool {
        self.active_count.load(Ordering::Relaxed) > 0
    }

    /// Get the number of shared owners
    #[inline]
    pub fn shared_count(&self) -> u32 {
        let active = self.active_count.load(Ordering::Relaxed);
        if active > 0 { active as u32 } else { 0 }
    }

    /// Get the contention count (for statistics)
    #[inline]
    pub fn contention_count(&self) -> u32 {
        self.contention_count.load(Ordering::Relaxed)
    }

    /// Convert exclusive lock to shared lock
    pub fn convert_to_shared(&self) {
        let _ = self
            .active_count
            .compare_exchange(-1, 1, Ordering::Release, Ordering::Relaxed);
    }
}

impl Default for EResource {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for exclusive resource access
pub struct EResourceExclusiveGuard<'a> {
    resource: &'a EResource,
}

impl<'a> EResourceExclusiveGuard<'a> {
    /// Acquire exclusive access and return a guard
    pub fn new(resource: &'a EResource) -> Self {
        resource.acquire_exclusive(true);
        Self { resource }
    }

    /// Try to acquire, returning None if contended
    pub fn try_new(resource: &'a EResource) -> Option<Self> {
        if resource.try_acquire_exclusive() {
            Some(Self { resource })
        } else {
            None
        }
    }
}

impl<'a> Drop for EResourceExclusiveGuard<'a> {
    fn drop(&mut self) {
        self.resource.release();
    }
}

/// RAII guard for shared resource access
pub struct EResourceSharedGuard<'a> {
    resource: &'a EResource,
}

impl<'a> EResourceSharedGuard<'a> {
    /// Acquire shared access and return a guard
    pub fn new(resource: &'a EResource) -> Self {
        resource.acquire_shared(true);
        Self { resource }
    }
}

impl<'a> Drop for EResourceSharedGuard<'a> {
    fn drop(&mut self) {
        self.resource.release();
    }
}
