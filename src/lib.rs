// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux User-Space Threads
//!
//! Many logical threads multiplexed over one OS thread, with optional
//! virtual-timer preemption and a counting semaphore.
//!
//! # Modules
//!
//! - [`sched`]: create, yield, block, unblock, exit and the dispatch loop
//! - [`sync`]: semaphore
//! - [`preempt`]: timer-driven preemption and critical sections
//! - [`queue`]: FIFO queue of element references
//! - [`thread`]: thread handles, states and execution contexts
//! - [`config`]: scheduler settings
//! - [`err`], [`debug`]: error codes and logging
//! - [`PreemptSafeAlloc`]: global allocator wrapper required with preemption
//!
//! # Usage
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use uthread::{sched, Semaphore};
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let out = log.clone();
//!
//! sched::run(false, move || {
//!     let sem = Semaphore::new(0);
//!     let (waiter, wlog) = (sem.clone(), out.clone());
//!
//!     sched::create(move || {
//!         waiter.down().unwrap();
//!         wlog.borrow_mut().push("acquired");
//!     })
//!     .unwrap();
//!
//!     sched::yield_now().unwrap();
//!     out.borrow_mut().push("release");
//!     sem.up().unwrap();
//! })
//! .unwrap();
//!
//! assert_eq!(*log.borrow(), ["release", "acquired"]);
//! ```
//!
//! # Platform
//!
//! Context switching uses `getcontext`/`makecontext`/`swapcontext`, so the
//! crate targets Linux with glibc.
//!
//! # Preemption
//!
//! A program that runs a scheduler with preemption enabled must install
//! [`PreemptSafeAlloc`] as its `#[global_allocator]`; otherwise a forced
//! yield can suspend a thread inside the allocator.

pub mod config;
pub mod debug;
pub mod err;
mod mm;
pub mod preempt;
pub mod queue;
pub mod sched;
pub mod sync;
pub mod thread;

// Re-exports
pub use config::SchedulerConfig;
pub use err::{Error, Result};
pub use mm::PreemptSafeAlloc;
pub use sched::{
    block, create, current, exit, run, run_with, stats, thread_state, unblock, yield_now,
    SchedStats,
};
pub use sync::Semaphore;
pub use thread::{ThreadId, ThreadRef, ThreadState};
