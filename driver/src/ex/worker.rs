//! Executive Work Queue (Delayed Work Queue)
//!
//! Lets code that cannot block, such as an I/O timer routine, defer work to
//! a passive-level worker thread.
//!
//! # NT Semantics
//!
//! - A work item is queued at most once; queueing an item that is already
//!   pending is a no-op
//! - `ExQueueWorkItem` is callable at DISPATCH_LEVEL and never fails for
//!   lack of memory
//!
//! To honor the last point, queue capacity is reserved up front at passive
//! level with [`WorkQueue::reserve`]. [`WorkQueue::insert`] then only ever
//! uses reserved slots and does not allocate.
//!
//! Worker threads are the host's: they call [`WorkQueue::process`] to drain
//! pending items.
//!
//! # Usage
//! ```
//! use fsp_driver::ex::worker::{WorkQueue, WorkQueueItem};
//! use std::sync::Arc;
//!
//! let queue = WorkQueue::new();
//! queue.reserve().unwrap();
//!
//! let item = Arc::new(WorkQueueItem::new(|| { /* deferred work */ }));
//! assert!(queue.insert(&item));
//! assert_eq!(queue.process(usize::MAX), 1);
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::status::{NtResult, STATUS_INSUFFICIENT_RESOURCES};

/// Work routine signature
pub type WorkerRoutine = Box<dyn Fn() + Send + Sync>;

/// Work queue item
///
/// Equivalent to NT's WORK_QUEUE_ITEM
pub struct WorkQueueItem {
    /// Work routine to execute
    worker_routine: WorkerRoutine,
    /// Flag indicating if item is queued
    queued: AtomicBool,
}

impl WorkQueueItem {
    /// Create a work queue item for a routine
    pub fn new<F>(routine: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            worker_routine: Box::new(routine),
            queued: AtomicBool::new(false),
        }
    }

    /// Check if the item is currently queued
    #[inline]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Relaxed)
    }

    /// Execute the work item
    fn execute(&self) {
        (self.worker_routine)();
    }
}

struct WorkQueueState {
    /// Queue of pending work items
    items: VecDeque<Arc<WorkQueueItem>>,
    /// Slots promised to callers of `reserve`
    reserved: usize,
}

/// Work queue
pub struct WorkQueue {
    state: spin::Mutex<WorkQueueState>,
}

impl WorkQueue {
    pub const fn new() -> Self {
        Self {
            state: spin::Mutex::new(WorkQueueState {
                items: VecDeque::new(),
                reserved: 0,
            }),
        }
    }

    /// Reserve one queue slot (passive level)
    pub fn reserve(&self) -> NtResult<()> {
        let mut state = self.state.lock();
        let wanted = state.reserved + 1;
        let additional = wanted.saturating_sub(state.items.len());
        state
            .items
            .try_reserve(additional)
            .map_err(|_| STATUS_INSUFFICIENT_RESOURCES)?;
        state.reserved = wanted;
        Ok(())
    }

    /// Give back a slot obtained with `reserve`
    pub fn unreserve(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.reserved > 0, "Unreserving a work queue slot never reserved");
        state.reserved = state.reserved.saturating_sub(1);
    }

    /// Insert a work item into the queue (ExQueueWorkItem)
    ///
    /// Callable at DISPATCH_LEVEL. Returns false if the item was already
    /// queued or no reserved slot is available.
    pub fn insert(&self, item: &Arc<WorkQueueItem>) -> bool {
        let mut state = self.state.lock();

        // Check if already queued
        if item.queued.swap(true, Ordering::AcqRel) {
            return false;
        }

        if state.items.len() >= state.reserved || state.items.len() == state.items.capacity() {
            item.queued.store(false, Ordering::Release);
            return false;
        }

        state.items.push_back(Arc::clone(item));
        true
    }

    /// Remove and return a work item from the queue
    fn remove(&self) -> Option<Arc<WorkQueueItem>> {
        let mut state = self.state.lock();
        let item = state.items.pop_front()?;
        item.queued.store(false, Ordering::Release);
        Some(item)
    }

    /// Process pending work items on the calling thread
    ///
    /// Routines run without the queue lock held and may queue work again.
    pub fn process(&self, max_items: usize) -> usize {
        let mut processed = 0;

        while processed < max_items {
            match self.remove() {
                Some(item) => {
                    item.execute();
                    processed += 1;
                }
                None => break,
            }
        }

        processed
    }

    /// Get the number of pending items
    pub fn depth(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Get the number of reserved slots
    pub fn reserved(&self) -> usize {
        self.state.lock().reserved
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
