// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Memory
//!
//! Fallible allocation for scheduler structures, and the global allocator
//! wrapper that makes allocation safe under preemption.
//!
//! # Design
//!
//! - `Box::new` aborts the process when the allocator fails. Queue nodes,
//!   control blocks and contexts are allocated through [`try_box`] instead
//!   so that exhaustion surfaces as [`Error::NoMemory`]
//! - A forced yield that lands inside the allocator suspends a thread
//!   halfway through a heap update; the next thread to allocate then
//!   corrupts the heap. [`PreemptSafeAlloc`] tracks a per-OS-thread
//!   allocator depth. A tick arriving while it is non-zero is deferred and
//!   replayed when the outermost allocator call returns
//!
//! # Usage
//!
//! Programs that enable preemption must install the wrapper:
//!
//! ```rust
//! use std::alloc::System;
//! use uthread::PreemptSafeAlloc;
//!
//! #[global_allocator]
//! static GLOBAL: PreemptSafeAlloc<System> = PreemptSafeAlloc::new(System);
//!
//! fn main() {
//!     let boxed = Box::new(5);
//!     assert_eq!(*boxed, 5);
//! }
//! ```

use core::cell::Cell;
use core::sync::atomic::{compiler_fence, Ordering};
use std::alloc::{self, GlobalAlloc, Layout, System};

use crate::err::{Error, Result};
use crate::preempt;

/// ============================================================================
/// Fallible Boxes
/// ============================================================================

/// Move `value` to the heap, reporting allocator failure
pub fn try_box<T>(value: T) -> Result<Box<T>> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(Box::new(value));
    }

    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { alloc::alloc(layout) } as *mut T;
    if ptr.is_null() {
        return Err(Error::NoMemory);
    }

    // SAFETY: ptr was allocated by the global allocator with T's layout,
    // which is what Box expects to free.
    unsafe {
        ptr.write(value);
        Ok(Box::from_raw(ptr))
    }
}

/// ============================================================================
/// Preemption-Safe Global Allocator
/// ============================================================================

thread_local! {
    /// Allocator calls in progress on this OS thread
    static ALLOC_DEPTH: Cell<u32> = const { Cell::new(0) };
    /// A tick arrived while ALLOC_DEPTH was non-zero
    static TICK_DEFERRED: Cell<bool> = const { Cell::new(false) };
}

/// Check whether the calling OS thread is inside the global allocator
pub(crate) fn in_allocator() -> bool {
    ALLOC_DEPTH.try_with(|depth| depth.get() > 0).unwrap_or(false)
}

/// Record a tick to replay once the allocator returns
pub(crate) fn defer_tick() {
    let _ = TICK_DEFERRED.try_with(|deferred| deferred.set(true));
}

/// One allocator call, counted for the tick handler
struct AllocScope;

impl AllocScope {
    fn enter() -> Self {
        let _ = ALLOC_DEPTH.try_with(|depth| depth.set(depth.get() + 1));
        // The handler runs on this thread; keep the count ahead of the heap work
        compiler_fence(Ordering::SeqCst);
        AllocScope
    }
}

impl Drop for AllocScope {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        let depth = ALLOC_DEPTH
            .try_with(|depth| {
                let left = depth.get().saturating_sub(1);
                depth.set(left);
                left
            })
            .unwrap_or(0);
        if depth != 0 {
            return;
        }

        let deferred = TICK_DEFERRED
            .try_with(|deferred| deferred.replace(false))
            .unwrap_or(false);
        if deferred && preempt::is_enabled() && !preempt::is_masked() {
            crate::sched::preempt_tick();
        }
    }
}

/// Global allocator wrapper that keeps forced yields out of `A`
///
/// Required as `#[global_allocator]` in any program that runs a scheduler
/// with preemption enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreemptSafeAlloc<A = System> {
    inner: A,
}

impl<A> PreemptSafeAlloc<A> {
    /// Wrap `inner`
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for PreemptSafeAlloc<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _scope = AllocScope::enter();
        self.inner.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let _scope = AllocScope::enter();
        self.inner.alloc_zeroed(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _scope = AllocScope::enter();
        self.inner.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let _scope = AllocScope::enter();
        self.inner.realloc(ptr, layout, new_size)
    }
}

// ============================================================================
// Tests
// ============================================================================
