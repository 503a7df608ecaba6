// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Threads
//!
//! This module provides the thread control block and the handle used to
//! refer to a thread from outside the scheduler.
//!
//! # Design
//!
//! - **TCB**: context, stack, entry closure, state and id
//! - **ThreadRef**: copyable handle; pairs the TCB address with the thread
//!   id so a handle to a reclaimed thread can be told apart from a new
//!   thread that reuses the address
//! - **ThreadId**: allocated monotonically; 0 is the bootstrap thread

pub mod context;

use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::err::Result;
use crate::mm::try_box;

use self::context::{Context, Stack};

/// ============================================================================
/// Thread ID
/// ============================================================================

/// Thread ID type
pub type ThreadId = u64;

/// Thread ID of the bootstrap (idle) thread that runs the dispatch loop
pub const TID_BOOTSTRAP: ThreadId = 0;

/// Global thread ID allocator
static TID_ALLOCATOR: TidAllocator = TidAllocator::new();

/// Thread ID allocator
struct TidAllocator {
    next: AtomicU64,
}

impl TidAllocator {
    const fn new() -> Self {
        Self {
            next: AtomicU64::new(TID_BOOTSTRAP + 1),
        }
    }

    fn allocate(&self) -> ThreadId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// ============================================================================
/// Thread State
/// ============================================================================

/// Thread state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is ready to run (in the ready queue)
    Ready = 0,

    /// Thread is the one executing
    Running = 1,

    /// Thread waits for an unblock (in the blocked queue)
    Blocked = 2,

    /// Thread has exited and awaits reclamation
    Zombie = 3,
}

impl ThreadState {
    /// Check if thread can be scheduled
    pub const fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Check if thread is alive
    pub const fn is_alive(self) -> bool {
        !self.has_exited()
    }

    /// Check if thread has exited
    pub const fn has_exited(self) -> bool {
        matches!(self, Self::Zombie)
    }
}

/// ============================================================================
/// Thread Control Block
/// ============================================================================

pub(crate) type ThreadEntry = Box<dyn FnOnce() + 'static>;

/// Thread control block
pub(crate) struct Tcb {
    pub(crate) tid: ThreadId,
    pub(crate) state: ThreadState,
    pub(crate) context: Context,

    /// None for the bootstrap thread, which runs on the caller's stack
    pub(crate) stack: Option<Stack>,

    /// Taken by the trampoline when the thread first runs
    pub(crate) entry: Option<ThreadEntry>,
}

impl Tcb {
    /// Control block for the thread that calls `run`
    pub(crate) fn bootstrap() -> Result<Box<Self>> {
        try_box(Self {
            tid: TID_BOOTSTRAP,
            state: ThreadState::Running,
            context: Context::empty()?,
            stack: None,
            entry: None,
        })
    }

    /// Control block for a new thread that starts in `trampoline`
    ///
    /// Everything allocated so far is released if a later step fails.
    pub(crate) fn new(
        entry: ThreadEntry,
        stack_size: usize,
        trampoline: extern "C" fn(),
    ) -> Result<Box<Self>> {
        let stack = Stack::new(stack_size)?;
        let mut context = Context::empty()?;
        context.init(&stack, trampoline)?;

        try_box(Self {
            tid: TID_ALLOCATOR.allocate(),
            state: ThreadState::Ready,
            context,
            stack: Some(stack),
            entry: Some(entry),
        })
    }
}

/// ============================================================================
/// Thread Handle
/// ============================================================================

/// Handle to a thread
///
/// Handles are plain values; holding one does not keep the thread alive.
/// Operations given a handle to a reclaimed thread fail with `NotFound`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRef {
    tcb: NonNull<Tcb>,
    tid: ThreadId,
}

impl ThreadRef {
    /// # Safety
    ///
    /// `tcb` must point at a live control block.
    pub(crate) unsafe fn from_tcb(tcb: NonNull<Tcb>) -> Self {
        Self {
            tcb,
            tid: (*tcb.as_ptr()).tid,
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut Tcb {
        self.tcb.as_ptr()
    }

    /// Handle to no thread at all
    #[cfg(test)]
    pub(crate) fn dangling(tid: ThreadId) -> Self {
        Self {
            tcb: NonNull::dangling(),
            tid,
        }
    }

    /// Id of the referenced thread
    pub fn tid(&self) -> ThreadId {
        self.tid
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadRef").field(&self.tid).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
