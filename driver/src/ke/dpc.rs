//! Dispatch Level Execution
//!
//! Deferred procedure calls and I/O timer routines run at DISPATCH_LEVEL.
//! At that level code cannot block, cannot touch pageable memory and cannot
//! allocate from paged pool.
//!
//! [`DispatchLevel`] is a zero-sized token proving the caller is running in
//! that context. Only the I/O timer tick can create one, so routines that
//! are legal only at DISPATCH_LEVEL take `&DispatchLevel` and the compiler
//! keeps passive-level code from calling them by accident.

use core::marker::PhantomData;

/// Proof of execution at DISPATCH_LEVEL
///
/// Not `Send`: the token belongs to the callback invocation that created it.
pub struct DispatchLevel {
    _not_send: PhantomData<*const ()>,
}

impl DispatchLevel {
    /// Raise to DISPATCH_LEVEL for the duration of a timer callback
    #[inline]
    pub(crate) fn raise() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}
