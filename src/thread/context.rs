// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Execution Context
//!
//! Stacks and saved register state for user-space threads, built on the
//! platform `ucontext` calls.
//!
//! # Design
//!
//! - A [`Stack`] is a 16-byte aligned heap block, freed on drop
//! - A [`Context`] keeps its `ucontext_t` boxed: glibc stores a pointer into
//!   the structure itself, so it must never move once saved
//! - `swapcontext` also saves and restores the signal mask, which is how a
//!   thread resumes with its own preemption state

use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};
use std::alloc::{self, Layout};
use std::io;

use crate::err::{Error, Result};
use crate::mm::try_box;

// Import logging macros
use crate::log_fatal;

/// Smallest stack a thread may be given
pub const MIN_STACK_SIZE: usize = 16 * 1024;

const STACK_ALIGN: usize = 16;

/// ============================================================================
/// Stack
/// ============================================================================

/// Exclusively owned thread stack
pub struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    /// Allocate a stack of `size` bytes
    ///
    /// # Returns
    ///
    /// - Err(InvalidArgs) if `size` is below [`MIN_STACK_SIZE`]
    /// - Err(NoMemory) if the allocation fails
    pub fn new(size: usize) -> Result<Self> {
        if size < MIN_STACK_SIZE {
            return Err(Error::InvalidArgs);
        }

        let layout = Layout::from_size_align(size, STACK_ALIGN).map_err(|_| Error::InvalidArgs)?;
        // SAFETY: layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(Error::NoMemory)?;

        Ok(Self { base, layout })
    }

    /// Lowest address of the stack
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: base was allocated with this layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// ============================================================================
/// Context
/// ============================================================================

/// Saved execution state of one thread
pub struct Context {
    uc: Box<libc::ucontext_t>,
}

impl Context {
    /// Create a blank context
    ///
    /// A blank context is only a save area: it becomes resumable once a
    /// [`Context::switch`] has stored into it.
    pub fn empty() -> Result<Self> {
        // SAFETY: ucontext_t is plain old data; all zeroes is a valid value.
        let uc = try_box(unsafe { MaybeUninit::<libc::ucontext_t>::zeroed().assume_init() })?;
        Ok(Self { uc })
    }

    /// Prepare the context to start `entry` on `stack`
    ///
    /// The new context inherits the caller's signal mask. `entry` must
    /// never return.
    pub fn init(&mut self, stack: &Stack, entry: extern "C" fn()) -> Result {
        let uc: *mut libc::ucontext_t = &mut *self.uc;

        // SAFETY: uc points at a boxed ucontext_t that outlives this call.
        unsafe {
            if libc::getcontext(uc) != 0 {
                return Err(Error::NoMemory);
            }

            (*uc).uc_stack.ss_sp = stack.base().cast();
            (*uc).uc_stack.ss_size = stack.size();
            (*uc).uc_stack.ss_flags = 0;
            (*uc).uc_link = ptr::null_mut();

            libc::makecontext(uc, entry, 0);
        }

        Ok(())
    }

    /// Save the running state into `from` and resume `to`
    ///
    /// Returns when some other thread switches back to `from`.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid, `to` must have been initialized or
    /// saved into, and the stack `to` runs on must still be allocated.
    pub unsafe fn switch(from: *mut Context, to: *const Context) {
        let from_uc: *mut libc::ucontext_t = &mut *(*from).uc;
        let to_uc: *const libc::ucontext_t = &*(*to).uc;

        if libc::swapcontext(from_uc, to_uc) != 0 {
            log_fatal!("swapcontext failed: {}", io::Error::last_os_error());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn test_stack_alloc() {
        let stack = Stack::new(MIN_STACK_SIZE).unwrap();
        assert_eq!(stack.size(), MIN_STACK_SIZE);
        assert_eq!(stack.base() as usize % STACK_ALIGN, 0);
    }

    #[test]
    fn test_stack_too_small() {
        assert!(matches!(Stack::new(MIN_STACK_SIZE - 1), Err(Error::InvalidArgs)));
    }

    thread_local! {
        static MAIN: Cell<*mut Context> = const { Cell::new(ptr::null_mut()) };
        static SIDE: Cell<*mut Context> = const { Cell::new(ptr::null_mut()) };
        static HITS: Cell<u32> = const { Cell::new(0) };
    }

    extern "C" fn side_entry() {
        loop {
            HITS.with(|h| h.set(h.get() + 1));
            let (side, main) = (SIDE.with(Cell::get), MAIN.with(Cell::get));
            unsafe { Context::switch(side, main) };
        }
    }

    #[test]
    fn test_switch_round_trip() {
        let stack = Stack::new(64 * 1024).unwrap();
        let mut main = Context::empty().unwrap();
        let mut side = Context::empty().unwrap();
        side.init(&stack, side_entry).unwrap();

        MAIN.with(|c| c.set(&mut main));
        SIDE.with(|c| c.set(&mut side));

        unsafe { Context::switch(&mut main, &side) };
        assert_eq!(HITS.with(Cell::get), 1);

        unsafe { Context::switch(&mut main, &side) };
        assert_eq!(HITS.with(Cell::get), 2);
    }
}
