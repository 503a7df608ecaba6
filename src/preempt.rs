// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Preemption
//!
//! This module provides timer-driven preemption and the critical sections
//! that keep it away from scheduler state.
//!
//! # Design
//!
//! - `ITIMER_VIRTUAL` raises `SIGVTALRM` every `1 / hz` seconds of consumed
//!   CPU time; the handler forces a yield on the running thread
//! - Critical sections block `SIGVTALRM` for the calling OS thread; a tick
//!   arriving inside one stays pending and is delivered on unmask
//! - Handler and timer are process-wide, so one scheduler at a time may own
//!   them; `start` hands that scheduler a `PreemptOwner` and only dropping
//!   the owner stops preemption
//! - A tick landing inside the global allocator is deferred until the
//!   allocator returns when `PreemptSafeAlloc` is the global allocator
//!
//! # Usage
//!
//! ```rust
//! use uthread::preempt::PreemptGuard;
//!
//! {
//!     let _guard = PreemptGuard::new();
//!     // no forced yield can happen here
//! }
//! ```

use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicU8, Ordering};
use std::io;

use bitflags::bitflags;

use crate::err::{Error, Result};

// Import logging macros
use crate::{log_debug, log_fatal};

/// ============================================================================
/// State
/// ============================================================================

const USEC_PER_SEC: u32 = 1_000_000;

bitflags! {
    /// Installed preemption facilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PreemptFlags: u8 {
        /// Ticks force a yield
        const ENABLED = 1 << 0;
        /// The SIGVTALRM handler is installed
        const HANDLER = 1 << 1;
        /// The virtual timer is armed
        const TIMER = 1 << 2;
    }
}

static STATE: AtomicU8 = AtomicU8::new(0);

fn flags() -> PreemptFlags {
    PreemptFlags::from_bits_truncate(STATE.load(Ordering::Acquire))
}

/// Check whether ticks currently force yields
pub fn is_enabled() -> bool {
    flags().contains(PreemptFlags::ENABLED)
}

/// ============================================================================
/// Start / Stop
/// ============================================================================

/// Proof of preemption ownership
///
/// Returned by a `start` that claimed the timer. Dropping it stops
/// preemption; nothing else does.
#[must_use]
#[derive(Debug)]
pub struct PreemptOwner {
    _private: (),
}

impl Drop for PreemptOwner {
    fn drop(&mut self) {
        stop();
    }
}

/// Start preemption
///
/// Failure of the OS to install the handler or arm the timer is fatal.
///
/// # Arguments
///
/// * `enabled` - Whether to preempt at all
/// * `hz` - Tick frequency
///
/// # Returns
///
/// - Ok(Some(owner)) once the timer is claimed and armed
/// - Ok(None) when `enabled` is false; nothing is claimed
/// - Err(InvalidArgs) if `hz` is 0 or above one tick per microsecond
/// - Err(BadState) if preemption is already started
pub fn start(enabled: bool, hz: u32) -> Result<Option<PreemptOwner>> {
    if !enabled {
        return Ok(None);
    }
    if hz == 0 || hz > USEC_PER_SEC {
        return Err(Error::InvalidArgs);
    }

    STATE
        .compare_exchange(
            0,
            PreemptFlags::ENABLED.bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map_err(|_| Error::BadState)?;

    install_handler(on_tick as extern "C" fn(libc::c_int) as libc::sighandler_t);
    STATE.fetch_or(PreemptFlags::HANDLER.bits(), Ordering::AcqRel);

    set_timer(USEC_PER_SEC / hz);
    STATE.fetch_or(PreemptFlags::TIMER.bits(), Ordering::AcqRel);

    log_debug!("preemption started at {} Hz", hz);
    Ok(Some(PreemptOwner { _private: () }))
}

/// Stop preemption
///
/// Disarms the timer, drops any pending tick and restores the default
/// `SIGVTALRM` disposition. Only the `PreemptOwner` calls this.
fn stop() {
    let prev = PreemptFlags::from_bits_truncate(STATE.swap(0, Ordering::AcqRel));

    if prev.contains(PreemptFlags::TIMER) {
        set_timer(0);
    }
    if prev.contains(PreemptFlags::HANDLER) {
        // Ignoring discards a tick still pending on any thread
        install_handler(libc::SIG_IGN);
        install_handler(libc::SIG_DFL);
    }
    if !prev.is_empty() {
        log_debug!("preemption stopped");
    }
}

fn install_handler(handler: libc::sighandler_t) {
    // SAFETY: sigaction is plain old data and fully initialized below.
    unsafe {
        let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
        action.sa_sigaction = handler;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;

        if libc::sigaction(libc::SIGVTALRM, &action, ptr::null_mut()) != 0 {
            log_fatal!("sigaction(SIGVTALRM) failed: {}", io::Error::last_os_error());
        }
    }
}

/// Arm the virtual timer with `period_usec`, or disarm it with 0
fn set_timer(period_usec: u32) {
    let interval = libc::timeval {
        tv_sec: (period_usec / USEC_PER_SEC) as libc::time_t,
        tv_usec: (period_usec % USEC_PER_SEC) as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };

    // SAFETY: timer is a valid itimerval; the old value is not requested.
    if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut()) } != 0 {
        log_fatal!("setitimer(ITIMER_VIRTUAL) failed: {}", io::Error::last_os_error());
    }
}

extern "C" fn on_tick(signum: libc::c_int) {
    if signum != libc::SIGVTALRM || !is_enabled() {
        return;
    }
    if crate::mm::in_allocator() {
        crate::mm::defer_tick();
        return;
    }

    // The forced switch makes syscalls of its own
    // SAFETY: errno is thread-local and always valid to read and write.
    let errno = unsafe { *libc::__errno_location() };
    crate::sched::preempt_tick();
    unsafe { *libc::__errno_location() = errno };
}

/// ============================================================================
/// Critical Sections
/// ============================================================================

fn tick_set() -> libc::sigset_t {
    // SAFETY: sigemptyset initializes the set before it is read.
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGVTALRM);
        set.assume_init()
    }
}

fn mask(how: libc::c_int, old: *mut libc::sigset_t) {
    let set = tick_set();
    // SAFETY: set is initialized; old is null or writable.
    let rc = unsafe { libc::pthread_sigmask(how, &set, old) };
    if rc != 0 {
        log_fatal!("pthread_sigmask failed: {}", io::Error::from_raw_os_error(rc));
    }
}

/// Block forced yields on the calling OS thread
pub fn disable() {
    mask(libc::SIG_BLOCK, ptr::null_mut());
}

/// Allow forced yields on the calling OS thread
pub fn enable() {
    mask(libc::SIG_UNBLOCK, ptr::null_mut());
}

/// Check whether forced yields are blocked on the calling OS thread
pub fn is_masked() -> bool {
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: querying with a null new set only writes `current`.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        log_fatal!("pthread_sigmask failed: {}", io::Error::from_raw_os_error(rc));
    }
    // SAFETY: pthread_sigmask succeeded and filled in `current`.
    unsafe { libc::sigismember(current.as_ptr(), libc::SIGVTALRM) == 1 }
}

/// Scoped critical section
///
/// Blocks forced yields on construction and, on drop, unblocks them again
/// unless they were already blocked. Nests freely.
#[must_use]
pub struct PreemptGuard {
    was_masked: bool,
}

impl PreemptGuard {
    pub fn new() -> Self {
        let mut old = MaybeUninit::<libc::sigset_t>::uninit();
        mask(libc::SIG_BLOCK, old.as_mut_ptr());

        // SAFETY: pthread_sigmask filled in the previous mask.
        let was_masked = unsafe { libc::sigismember(old.as_ptr(), libc::SIGVTALRM) == 1 };
        Self { was_masked }
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        if !self.was_masked {
            enable();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
