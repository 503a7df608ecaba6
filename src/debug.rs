// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Logging and Diagnostics
//!
//! This module provides the logging macros used throughout the library.
//! Records are forwarded to the [`log`] facade under the `uthread` target;
//! the library never installs a logger itself, so an application that wants
//! output installs one of its choosing.
//!
//! # Usage
//!
//! ```rust
//! use uthread::{log_debug, log_info};
//!
//! log_info!("scheduler starting, preempt={}", true);
//! log_debug!("created thread {}", 3);
//! ```
//!
//! Scheduler code only logs while preemption is disabled, so a forced yield
//! never interrupts a record half way through.

use core::fmt;

pub use log::Level as LogLevel;

/// Target used for every record emitted by this library
pub const LOG_TARGET: &str = "uthread";

/// Print a formatted message at a specific log level
///
/// # Arguments
///
/// * `level` - Log level for this message
/// * `args` - Format arguments
#[inline]
pub fn log_print(level: LogLevel, args: fmt::Arguments<'_>) {
    log::log!(target: LOG_TARGET, level, "{}", args);
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Trace, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Debug, format_args!($($arg)*))
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Info, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Warn, format_args!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::debug::log_print($crate::debug::LogLevel::Error, format_args!($($arg)*))
    };
}

/// Log a fatal error message and terminate the process
#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)*) => {
        $crate::debug::log_fatal(format_args!($($arg)*))
    };
}

/// Log a fatal error message and terminate
///
/// Used for failures the library cannot recover from, such as the OS
/// refusing to install the preemption timer. The process exits with
/// status 1.
#[inline(never)]
#[cold]
pub fn log_fatal(args: fmt::Arguments<'_>) -> ! {
    log_print(LogLevel::Error, format_args!("FATAL: {}", args));
    eprintln!("uthread: fatal: {}", args);
    std::process::exit(1);
}
