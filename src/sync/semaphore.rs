// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Semaphore
//!
//! This module provides a counting semaphore for user-space threads.
//!
//! # Design
//!
//! - **Handle**: a `Semaphore` is a cheap, cloneable handle; clones share
//!   one count and one waiter queue
//! - **Fair ordering**: waiters are released in FIFO order
//! - **Hand-off**: `up` unblocks the oldest waiter, which runs at once
//! - **Critical sections**: all state changes run with preemption disabled
//! - **Waiter records**: each blocked thread queues a heap record holding
//!   its handle. The record is never trusted to point at a live thread: a
//!   thread reclaimed by `run` teardown leaves a stale record behind, which
//!   `up`, `waiters` and `destroy` recognise by handle and discard
//!
//! `up` increments the count even when it hands off to a waiter, so a
//! released waiter does not consume a unit. Callers relying on the count
//! for mutual exclusion should pair every `up` with a `down`.
//!
//! # Usage
//!
//! ```rust
//! use uthread::{sched, Semaphore};
//!
//! sched::run(false, || {
//!     let sem = Semaphore::new(0);
//!     let waiter = sem.clone();
//!
//!     sched::create(move || waiter.down().unwrap()).unwrap();
//!     sched::yield_now().unwrap();
//!
//!     assert_eq!(sem.waiters(), 1);
//!     sem.up().unwrap();
//! })
//! .unwrap();
//! ```

use core::cell::{Cell, RefCell};
use core::fmt;
use core::ptr::NonNull;
use std::rc::Rc;

use crate::err::{Error, Result};
use crate::mm::try_box;
use crate::preempt::PreemptGuard;
use crate::queue::Queue;
use crate::sched;
use crate::thread::ThreadRef;

// Import logging macros
use crate::{log_debug, log_trace};

/// ============================================================================
/// Semaphore
/// ============================================================================

/// One thread blocked in `down`
///
/// Allocated and freed by the thread that waits. When that thread is
/// reclaimed while still waiting, the semaphore frees the record instead.
struct Waiter {
    thread: ThreadRef,
}

struct Inner {
    /// Available units
    count: Cell<usize>,

    /// Records of threads blocked in `down`, oldest first
    waiters: RefCell<Queue<Waiter>>,
}

/// Counting semaphore
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<Inner>,
}

impl Semaphore {
    /// Create a semaphore holding `count` units
    pub fn new(count: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                count: Cell::new(count),
                waiters: RefCell::new(Queue::new()),
            }),
        }
    }

    /// Take a unit, blocking the calling thread until one is available
    ///
    /// # Returns
    ///
    /// - Ok(()) once a unit was taken or handed over by `up`
    /// - Err(BadState) if the semaphore is empty and the caller is not a
    ///   thread of a running scheduler
    /// - Err(NoMemory) if the caller cannot be queued
    pub fn down(&self) -> Result {
        let _guard = PreemptGuard::new();

        let count = self.inner.count.get();
        if count > 0 {
            self.inner.count.set(count - 1);
            return Ok(());
        }

        let current = sched::current()?;
        let waiter = Box::into_raw(try_box(Waiter { thread: current })?);
        if let Err(err) = self.inner.waiters.borrow_mut().enqueue(waiter) {
            // SAFETY: the record was never queued.
            drop(unsafe { Box::from_raw(waiter) });
            return Err(err);
        }
        log_trace!("thread {} waits on semaphore", current.tid());

        let result = sched::block();

        // `up` dequeued the record, unless something else woke this thread
        let _ = self.inner.waiters.borrow_mut().delete(waiter);
        // SAFETY: the record is out of the queue and nothing else frees a
        // record whose thread is still alive.
        drop(unsafe { Box::from_raw(waiter) });

        result
    }

    /// Take a unit without blocking
    ///
    /// # Returns
    ///
    /// - Ok(()) if a unit was taken
    /// - Err(Busy) if none is available
    pub fn try_down(&self) -> Result {
        let _guard = PreemptGuard::new();

        let count = self.inner.count.get();
        if count == 0 {
            return Err(Error::Busy);
        }
        self.inner.count.set(count - 1);
        Ok(())
    }

    /// Release a unit
    ///
    /// If threads are waiting, the oldest is unblocked and runs before this
    /// call returns. Records of threads that no longer exist are discarded
    /// on the way. The count is incremented in either case.
    pub fn up(&self) -> Result {
        let _guard = PreemptGuard::new();

        loop {
            let waiter = match self.inner.waiters.borrow_mut().dequeue() {
                Ok(waiter) => waiter,
                Err(_) => break,
            };
            // Copy the handle out; the woken thread frees its record
            // SAFETY: queued records are allocated until dequeued.
            let thread = unsafe { waiter.as_ref().thread };

            if sched::unblock(thread).is_ok() {
                break;
            }
            Self::forget_if_gone(waiter, thread);
        }

        self.inner.count.set(self.inner.count.get() + 1);
        Ok(())
    }

    /// Available units
    pub fn count(&self) -> usize {
        self.inner.count.get()
    }

    /// Number of threads blocked in `down`
    pub fn waiters(&self) -> usize {
        let _guard = PreemptGuard::new();
        self.prune();
        self.inner.waiters.borrow().len()
    }

    /// Release this handle
    ///
    /// Refuses while any thread waits on the semaphore, handing the
    /// semaphore back untouched together with `Busy`.
    pub fn destroy(self) -> core::result::Result<(), (Error, Semaphore)> {
        let busy = {
            let _guard = PreemptGuard::new();
            self.prune();
            !self.inner.waiters.borrow().is_empty()
        };

        if busy {
            return Err((Error::Busy, self));
        }
        Ok(())
    }

    /// Drop queued records whose thread no longer exists
    fn prune(&self) {
        self.inner.waiters.borrow_mut().iterate(|queue, waiter| {
            // SAFETY: queued records are allocated.
            let thread = unsafe { waiter.as_ref().thread };
            if sched::thread_state(thread).is_err() {
                let _ = queue.delete(waiter.as_ptr());
                Self::forget_if_gone(waiter, thread);
            }
        });
    }

    /// Free an unqueued record if its thread is gone
    ///
    /// A live thread frees its own record when it leaves `down`.
    fn forget_if_gone(waiter: NonNull<Waiter>, thread: ThreadRef) {
        if sched::thread_state(thread).is_ok() {
            return;
        }
        log_debug!("discarding waiter record of reclaimed thread {}", thread.tid());
        // SAFETY: the thread that allocated the record no longer exists and
        // the record is in no queue.
        drop(unsafe { Box::from_raw(waiter.as_ptr()) });
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("count", &self.count())
            .field("waiters", &self.waiters())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // A live waiter keeps a handle, so whatever is left is stale
        let waiters = self.waiters.get_mut();
        if !waiters.is_empty() {
            log_debug!("semaphore dropped with {} stale waiter record(s)", waiters.len());
        }
        while let Ok(waiter) = waiters.dequeue() {
            // SAFETY: the threads that allocated these records are gone.
            drop(unsafe { Box::from_raw(waiter.as_ptr()) });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
