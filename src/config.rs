// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler Configuration
//!
//! This module provides the settings a scheduler is started with.
//!
//! # Design
//!
//! - Builder-style setters, checked once by [`SchedulerConfig::validate`]
//! - Options can be given as a whitespace-separated `key=value` string
//! - A key without a value means `true`
//! - Unknown keys are logged and ignored
//!
//! # Usage
//!
//! ```rust
//! use uthread::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::new()
//!     .preempt(true)
//!     .stack_size(64 * 1024);
//!
//! let parsed = SchedulerConfig::parse("uthread.preempt uthread.preempt_hz=250").unwrap();
//! assert_eq!(parsed.preempt_hz_value(), 250);
//! ```

use crate::err::{Error, Result};
use crate::thread::context::MIN_STACK_SIZE;

// Import logging macros
use crate::log_warn;

/// ============================================================================
/// Defaults
/// ============================================================================

/// Default preemption frequency
pub const DEFAULT_PREEMPT_HZ: u32 = 100;

/// Highest accepted preemption frequency (one tick per microsecond)
pub const MAX_PREEMPT_HZ: u32 = 1_000_000;

/// Default stack size for spawned threads
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Environment variable read by [`SchedulerConfig::from_env`]
pub const ENV_OPTIONS: &str = "UTHREAD_OPTIONS";

/// ============================================================================
/// SchedulerConfig
/// ============================================================================

/// Settings for one run of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Whether the virtual timer forces yields
    preempt: bool,
    /// Timer ticks per second of consumed CPU time
    preempt_hz: u32,
    /// Stack size for every spawned thread
    stack_size: usize,
}

impl SchedulerConfig {
    /// Create a configuration with default settings
    pub const fn new() -> Self {
        Self {
            preempt: false,
            preempt_hz: DEFAULT_PREEMPT_HZ,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Enable or disable timer-driven preemption
    pub const fn preempt(mut self, enabled: bool) -> Self {
        self.preempt = enabled;
        self
    }

    /// Set the preemption frequency
    pub const fn preempt_hz(mut self, hz: u32) -> Self {
        self.preempt_hz = hz;
        self
    }

    /// Set the stack size of spawned threads
    pub const fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub const fn preempt_enabled(&self) -> bool {
        self.preempt
    }

    pub const fn preempt_hz_value(&self) -> u32 {
        self.preempt_hz
    }

    pub const fn stack_size_value(&self) -> usize {
        self.stack_size
    }

    /// Check that every setting is in range
    ///
    /// # Returns
    ///
    /// - Ok(()) if usable
    /// - Err(InvalidArgs) if the frequency is 0 or above [`MAX_PREEMPT_HZ`],
    ///   or the stack is smaller than [`MIN_STACK_SIZE`]
    pub fn validate(&self) -> Result {
        if self.preempt_hz == 0 || self.preempt_hz > MAX_PREEMPT_HZ {
            return Err(Error::InvalidArgs);
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }

    /// Parse an option string
    ///
    /// Recognized keys are `uthread.preempt`, `uthread.preempt_hz` and
    /// `uthread.stack_size`. Stack sizes accept a `k`/`K` or `m`/`M` suffix.
    ///
    /// # Arguments
    ///
    /// * `options` - Whitespace-separated `key=value` pairs
    pub fn parse(options: &str) -> Result<Self> {
        let mut config = Self::new();

        for entry in options.split_whitespace() {
            let (key, value) = entry.split_once('=').unwrap_or((entry, ""));

            match key {
                "uthread.preempt" => config.preempt = parse_bool(value)?,
                "uthread.preempt_hz" => {
                    config.preempt_hz = value.parse().map_err(|_| Error::InvalidArgs)?
                }
                "uthread.stack_size" => config.stack_size = parse_size(value)?,
                _ => log_warn!("ignoring unknown option '{}'", key),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Read options from the `UTHREAD_OPTIONS` environment variable
    ///
    /// Falls back to the defaults when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(ENV_OPTIONS) {
            Ok(options) => Self::parse(&options),
            Err(_) => Ok(Self::new()),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An empty value counts as `true`, like a bare key
fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "" | "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(Error::InvalidArgs),
    }
}

fn parse_size(value: &str) -> Result<usize> {
    let (digits, shift) = match value.as_bytes().last() {
        Some(b'k' | b'K') => (&value[..value.len() - 1], 10),
        Some(b'm' | b'M') => (&value[..value.len() - 1], 20),
        _ => (value, 0),
    };

    let base: usize = digits.parse().map_err(|_| Error::InvalidArgs)?;
    base.checked_mul(1usize << shift).ok_or(Error::InvalidArgs)
}

// ============================================================================
// Tests
// ============================================================================
