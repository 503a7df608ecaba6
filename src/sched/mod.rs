// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler
//!
//! This module multiplexes user-space threads over the calling OS thread.
//!
//! # Design
//!
//! - **FIFO**: ready threads run in the order they became ready
//! - **Direct hand-off**: [`unblock`] runs its target immediately, ahead of
//!   the ready queue, and the caller goes back to the ready queue
//! - **Zombie staging**: an exiting thread cannot free the stack it runs on,
//!   so it parks itself in the zombie queue and the dispatch loop, running
//!   on the caller's stack, reclaims it
//! - **Critical sections**: every change to scheduler state happens with
//!   preemption disabled, see [`PreemptGuard`]
//! - **Allocation-free switching**: [`create`] reserves a queue node per
//!   thread in every queue, so yield, block, unblock and exit never enter
//!   the allocator
//! - **One scheduler per OS thread**: the active scheduler is registered in
//!   a thread-local slot while [`run`] executes
//!
//! # Usage
//!
//! ```rust
//! use uthread::sched;
//!
//! sched::run(false, || {
//!     sched::create(|| println!("hello from a thread")).unwrap();
//!     sched::yield_now().unwrap();
//! })
//! .unwrap();
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! create ──> Ready ──dispatch──> Running ──exit──> Zombie ──reap──> freed
//!              ^                  │  │
//!              └──────yield───────┘  └──block──> Blocked ──unblock──> Running
//! ```

use core::cell::Cell;
use core::ptr::{self, NonNull};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::config::SchedulerConfig;
use crate::err::{Error, Result};
use crate::mm::try_box;
use crate::preempt::{self, PreemptGuard};
use crate::queue::Queue;
use crate::thread::context::Context;
use crate::thread::{Tcb, ThreadEntry, ThreadRef, ThreadState};

// Import logging macros
use crate::{log_debug, log_error, log_fatal, log_info, log_trace, log_warn};

type PanicPayload = Box<dyn Any + Send + 'static>;

thread_local! {
    /// Scheduler running on this OS thread, or null
    static ACTIVE: Cell<*mut Scheduler> = const { Cell::new(ptr::null_mut()) };
}

/// ============================================================================
/// Scheduler
/// ============================================================================

/// Thread counts per queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedStats {
    pub ready: usize,
    pub blocked: usize,
    pub zombie: usize,
}

/// State of one running scheduler
struct Scheduler {
    ready: Queue<Tcb>,
    blocked: Queue<Tcb>,
    zombie: Queue<Tcb>,

    /// The running thread
    current: NonNull<Tcb>,

    /// Control block of the thread that called `run`
    idle: NonNull<Tcb>,

    /// Threads not yet reclaimed, idle included
    threads: usize,

    config: SchedulerConfig,

    /// First panic caught in a thread, re-raised by `run`
    panic: Option<PanicPayload>,
}

impl Scheduler {
    fn new(config: SchedulerConfig) -> Result<Box<Self>> {
        let idle = Box::into_raw(Tcb::bootstrap()?);
        // SAFETY: Box::into_raw never returns null.
        let idle = unsafe { NonNull::new_unchecked(idle) };

        // Dropping the value on failure frees idle
        try_box(Self {
            ready: Queue::new(),
            blocked: Queue::new(),
            zombie: Queue::new(),
            current: idle,
            idle,
            threads: 1,
            config,
            panic: None,
        })
    }

    fn spawn(&mut self, entry: ThreadEntry) -> Result<ThreadRef> {
        // Every queue can hold every thread without allocating
        let threads = self.threads + 1;
        for queue in [&mut self.ready, &mut self.blocked, &mut self.zombie] {
            queue.reserve(threads - queue.len())?;
        }

        let tcb = Box::into_raw(Tcb::new(entry, self.config.stack_size_value(), thread_bootstrap)?);

        if let Err(err) = self.ready.enqueue(tcb) {
            // SAFETY: tcb was just leaked from a Box and is in no queue.
            drop(unsafe { Box::from_raw(tcb) });
            return Err(err);
        }

        self.threads = threads;

        // SAFETY: tcb is live and queued.
        let thread = unsafe { ThreadRef::from_tcb(NonNull::new_unchecked(tcb)) };
        log_debug!("created thread {}", thread.tid());
        Ok(thread)
    }

    fn stats(&self) -> SchedStats {
        SchedStats {
            ready: self.ready.len(),
            blocked: self.blocked.len(),
            zombie: self.zombie.len(),
        }
    }

    /// Locate a live thread by handle
    fn lookup(&self, thread: ThreadRef) -> Option<ThreadState> {
        let target = thread.as_ptr();

        let live = self.current.as_ptr() == target
            || self.ready.contains(target)
            || self.blocked.contains(target)
            || self.zombie.contains(target);

        // SAFETY: target is the current thread or queued, so it is live.
        (live && unsafe { (*target).tid } == thread.tid()).then(|| unsafe { (*target).state })
    }

    /// Free every exited thread
    fn reap_zombies(&mut self) {
        while let Ok(tcb) = self.zombie.dequeue() {
            // SAFETY: zombies are leaked boxes no context will resume.
            let tcb = unsafe { Box::from_raw(tcb.as_ptr()) };
            self.threads -= 1;
            log_trace!("reclaimed thread {}", tcb.tid);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.reap_zombies();

        if !self.blocked.is_empty() {
            log_warn!(
                "scheduler finished with {} thread(s) still blocked",
                self.blocked.len()
            );
        }
        for queue in [&mut self.blocked, &mut self.ready] {
            while let Ok(tcb) = queue.dequeue() {
                // SAFETY: queued threads are leaked boxes; their contexts
                // are never resumed once the dispatch loop has ended.
                drop(unsafe { Box::from_raw(tcb.as_ptr()) });
            }
        }

        // SAFETY: idle was leaked in Scheduler::new and is in no queue.
        drop(unsafe { Box::from_raw(self.idle.as_ptr()) });
    }
}

/// ============================================================================
/// Context Switching
/// ============================================================================

fn active() -> Result<*mut Scheduler> {
    let sched = ACTIVE.try_with(Cell::get).unwrap_or(ptr::null_mut());
    if sched.is_null() {
        Err(Error::BadState)
    } else {
        Ok(sched)
    }
}

/// Queue update made after the point of no return; failure is fatal
fn must(result: Result, what: &str) {
    if let Err(err) = result {
        log_fatal!("scheduler cannot {}: {}", what, err);
    }
}

/// Switch from `prev` to `next`, making `next` the running thread
///
/// # Safety
///
/// Caller holds a critical section. `prev` is the current thread and has
/// already been filed in the queue matching its new state; `next` is live
/// and in no queue.
unsafe fn switch_to(sched: *mut Scheduler, prev: NonNull<Tcb>, next: NonNull<Tcb>) {
    (*next.as_ptr()).state = ThreadState::Running;
    (*sched).current = next;

    log_trace!(
        "switch {} -> {}",
        (*prev.as_ptr()).tid,
        (*next.as_ptr()).tid
    );

    Context::switch(
        ptr::addr_of_mut!((*prev.as_ptr()).context),
        ptr::addr_of!((*next.as_ptr()).context),
    );
}

/// Hand the processor to the next ready thread
///
/// The current thread is re-queued unless it is blocked. Returns at once
/// when nothing else is ready.
///
/// # Safety
///
/// Caller holds a critical section and `sched` is the active scheduler.
unsafe fn schedule(sched: *mut Scheduler) {
    let next = match (*sched).ready.dequeue() {
        Ok(next) => next,
        Err(_) => return,
    };

    let prev = (*sched).current;
    if (*prev.as_ptr()).state != ThreadState::Blocked {
        (*prev.as_ptr()).state = ThreadState::Ready;
        must((*sched).ready.enqueue(prev.as_ptr()), "requeue the yielding thread");
    }

    switch_to(sched, prev, next);
}

/// First code every spawned thread runs
extern "C" fn thread_bootstrap() {
    // The context was captured inside a critical section
    preempt::enable();

    let entry = {
        let _guard = PreemptGuard::new();
        // SAFETY: the scheduler is active while any of its threads runs.
        active()
            .ok()
            .and_then(|sched| unsafe { (*(*sched).current.as_ptr()).entry.take() })
    };

    if let Some(entry) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            let _guard = PreemptGuard::new();
            if let Ok(sched) = active() {
                // SAFETY: critical section held.
                let sched = unsafe { &mut *sched };
                // SAFETY: current is live.
                log_error!("thread {} panicked", unsafe { (*sched.current.as_ptr()).tid });
                sched.panic.get_or_insert(payload);
            }
        }
    }

    exit();
}

/// Called from the preemption signal handler, or when the allocator
/// returns with a deferred tick
pub(crate) fn preempt_tick() {
    // Ticks landing on an OS thread without a scheduler are dropped
    let _ = yield_now();
}

/// ============================================================================
/// Public API
/// ============================================================================

/// Run a scheduler on the calling OS thread
///
/// Spawns a thread running `entry` and returns once every thread has
/// finished and been reclaimed.
///
/// # Arguments
///
/// * `preempt` - Whether a virtual timer forces yields
/// * `entry` - Body of the first thread
///
/// # Panics
///
/// If any thread panicked, the first panic is resumed here after teardown.
pub fn run<F>(preempt: bool, entry: F) -> Result
where
    F: FnOnce() + 'static,
{
    run_with(SchedulerConfig::new().preempt(preempt), entry)
}

/// Run a scheduler with explicit settings
///
/// # Returns
///
/// - Ok(()) once all threads are reclaimed
/// - Err(InvalidArgs) if `config` does not validate
/// - Err(BadState) if a scheduler already runs on this OS thread, or
///   preemption is owned by another scheduler
/// - Err(NoMemory) if the first thread cannot be created
pub fn run_with<F>(config: SchedulerConfig, entry: F) -> Result
where
    F: FnOnce() + 'static,
{
    config.validate()?;
    if active().is_ok() {
        return Err(Error::BadState);
    }

    let entry: ThreadEntry = try_box(entry)?;

    // Only a run that claimed the timer stops it
    let owner = preempt::start(config.preempt_enabled(), config.preempt_hz_value())?;
    let result = dispatch(config, entry);
    drop(owner);

    match result {
        Ok(Some(payload)) => panic::resume_unwind(payload),
        Ok(None) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Dispatch loop, run by the bootstrap thread
fn dispatch(config: SchedulerConfig, entry: ThreadEntry) -> Result<Option<PanicPayload>> {
    let sched = {
        let _guard = PreemptGuard::new();

        let sched = Box::into_raw(Scheduler::new(config)?);
        ACTIVE.with(|active| active.set(sched));

        // SAFETY: sched was just created and is only reached through this pointer.
        if let Err(err) = unsafe { (*sched).spawn(entry) } {
            ACTIVE.with(|active| active.set(ptr::null_mut()));
            // SAFETY: no thread was created, nothing else refers to sched.
            drop(unsafe { Box::from_raw(sched) });
            return Err(err);
        }

        log_info!(
            "scheduler started (preempt={}, stack={})",
            preempt::is_enabled(),
            config.stack_size_value()
        );
        sched
    };

    loop {
        let _guard = PreemptGuard::new();

        // SAFETY: critical section held; the bootstrap thread is current.
        unsafe {
            if (*sched).ready.is_empty() {
                break;
            }
            schedule(sched);
            (*sched).reap_zombies();
        }
    }

    let _guard = PreemptGuard::new();
    ACTIVE.with(|active| active.set(ptr::null_mut()));

    // SAFETY: every other thread has exited or is blocked for good, and
    // the scheduler is no longer reachable from the registration slot.
    let mut sched = unsafe { Box::from_raw(sched) };
    let panic = sched.panic.take();
    drop(sched);

    log_info!("scheduler finished");
    Ok(panic)
}

/// Spawn a thread
///
/// The thread is placed at the tail of the ready queue and first runs
/// when it reaches the head.
///
/// # Returns
///
/// - Ok(handle) on success
/// - Err(BadState) if no scheduler runs on this OS thread
/// - Err(NoMemory) if the control block, stack or context cannot be set up
pub fn create<F>(entry: F) -> Result<ThreadRef>
where
    F: FnOnce() + 'static,
{
    let _guard = PreemptGuard::new();
    let sched = active()?;

    let entry: ThreadEntry = try_box(entry)?;
    // SAFETY: critical section held.
    unsafe { (*sched).spawn(entry) }
}

/// Let the next ready thread run
///
/// Returns immediately when no other thread is ready.
pub fn yield_now() -> Result {
    let _guard = PreemptGuard::new();
    let sched = active()?;

    // SAFETY: critical section held.
    unsafe { schedule(sched) };
    Ok(())
}

/// Block the calling thread until [`unblock`] is called on it
///
/// # Returns
///
/// - Ok(()) after being unblocked
/// - Err(BadState) if called from outside a thread
///
/// A thread still blocked when every other thread has finished is never
/// resumed; `run` reclaims it on teardown.
pub fn block() -> Result {
    let _guard = PreemptGuard::new();
    let sched = active()?;

    // SAFETY: critical section held until this thread is redispatched.
    unsafe {
        let current = (*sched).current;
        if current == (*sched).idle {
            return Err(Error::BadState);
        }

        (*sched).blocked.enqueue(current.as_ptr())?;
        (*current.as_ptr()).state = ThreadState::Blocked;
        log_trace!("thread {} blocked", (*current.as_ptr()).tid);

        schedule(sched);
    }

    Ok(())
}

/// Wake a blocked thread and run it right away
///
/// The caller goes to the tail of the ready queue.
///
/// # Returns
///
/// - Ok(()) once the caller runs again
/// - Err(NotFound) if `thread` is not blocked
pub fn unblock(thread: ThreadRef) -> Result {
    let _guard = PreemptGuard::new();
    let sched = active()?;

    // SAFETY: critical section held; target is dereferenced only once it
    // is known to be in the blocked queue.
    unsafe {
        let target = thread.as_ptr();
        if !(*sched).blocked.contains(target) || (*target).tid != thread.tid() {
            return Err(Error::NotFound);
        }
        (*sched).blocked.delete(target)?;

        let prev = (*sched).current;
        (*prev.as_ptr()).state = ThreadState::Ready;
        must((*sched).ready.enqueue(prev.as_ptr()), "requeue the waking thread");

        switch_to(sched, prev, NonNull::new_unchecked(target));
    }

    Ok(())
}

/// Terminate the calling thread
///
/// Control passes to the next ready thread; the stack and control block
/// are reclaimed later by the dispatch loop.
///
/// # Panics
///
/// If called from outside a thread spawned by a running scheduler.
pub fn exit() -> ! {
    let _guard = PreemptGuard::new();
    let sched = match active() {
        Ok(sched) => sched,
        Err(_) => panic!("uthread::exit called outside a running scheduler"),
    };

    // SAFETY: critical section held; this context is never resumed.
    unsafe {
        let current = (*sched).current;
        if current == (*sched).idle {
            panic!("uthread::exit called by the dispatch thread");
        }

        must((*sched).zombie.enqueue(current.as_ptr()), "retire the exiting thread");
        (*current.as_ptr()).state = ThreadState::Zombie;
        log_trace!("thread {} exited", (*current.as_ptr()).tid);

        let next = match (*sched).ready.dequeue() {
            Ok(next) => next,
            Err(_) => log_fatal!("no thread left to run after exit"),
        };
        switch_to(sched, current, next);
    }

    unreachable!("exited thread was resumed")
}

/// Handle to the calling thread
pub fn current() -> Result<ThreadRef> {
    let _guard = PreemptGuard::new();
    let sched = active()?;

    // SAFETY: critical section held; current is live.
    Ok(unsafe { ThreadRef::from_tcb((*sched).current) })
}

/// State of a thread
///
/// # Returns
///
/// - Ok(state) for a thread not yet reclaimed
/// - Err(NotFound) if the thread is gone
pub fn thread_state(thread: ThreadRef) -> Result<ThreadState> {
    let _guard = PreemptGuard::new();
    let sched = active()?;

    // SAFETY: critical section held.
    unsafe { (*sched).lookup(thread) }.ok_or(Error::NotFound)
}

/// Queue lengths of the active scheduler
pub fn stats() -> Result<SchedStats> {
    let _guard = PreemptGuard::new();
    let sched = active()?;

    // SAFETY: critical section held.
    Ok(unsafe { (*sched).stats() })
}

// ============================================================================
// Tests
// ============================================================================
