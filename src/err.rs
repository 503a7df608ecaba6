// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error Codes
//!
//! This module provides the error type and status codes used throughout
//! the thread library. Every fallible operation returns [`Result`]; callers
//! that need the raw integer form (0 for success, negative for failure) can
//! convert with [`Error::to_status`] or [`to_status`].

use core::fmt;

/// Raw status code
pub type Status = i32;

/// Success status code
pub const OK: Status = 0;

/// Result type for operations that can fail
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Error codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An argument was absent or out of range
    InvalidArgs = -2,

    /// The operation is not valid in the current state
    /// (no running scheduler, nested run, preemption already owned)
    BadState = -4,

    /// Allocation of a control block, stack or queue node failed
    NoMemory = -6,

    /// The element or thread is not where it was expected, or the queue is empty
    NotFound = -8,

    /// The resource is in use
    Busy = -9,
}

impl Error {
    /// Convert error to status code
    pub const fn to_status(self) -> Status {
        self as Status
    }

    /// Convert status code to error
    ///
    /// Returns `None` for [`OK`] and for codes this library never produces.
    pub const fn from_status(status: Status) -> Option<Self> {
        match status {
            -2 => Some(Error::InvalidArgs),
            -4 => Some(Error::BadState),
            -6 => Some(Error::NoMemory),
            -8 => Some(Error::NotFound),
            -9 => Some(Error::Busy),
            _ => None,
        }
    }

    /// Short description of the error
    pub const fn as_str(self) -> &'static str {
        match self {
            Error::InvalidArgs => "invalid arguments",
            Error::BadState => "bad state",
            Error::NoMemory => "out of memory",
            Error::NotFound => "not found",
            Error::Busy => "resource busy",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.to_status())
    }
}

impl std::error::Error for Error {}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

/// Collapse a result into its status code
pub fn to_status<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => OK,
        Err(err) => err.to_status(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for err in [
            Error::InvalidArgs,
            Error::BadState,
            Error::NoMemory,
            Error::NotFound,
            Error::Busy,
        ] {
            assert!(err.to_status() < 0);
            assert_eq!(Error::from_status(err.to_status()), Some(err));
        }
    }

    #[test]
    fn test_unknown_status() {
        assert_eq!(Error::from_status(OK), None);
        assert_eq!(Error::from_status(-1000), None);
    }

    #[test]
    fn test_to_status() {
        let ok: Result<u32> = Ok(7);
        let err: Result<u32> = Err(Error::NotFound);
        assert_eq!(to_status(&ok), OK);
        assert_eq!(to_status(&err), -8);
        assert_eq!(Status::from(Error::NoMemory), -6);
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::Busy.to_string(), "resource busy (-9)");
    }
}
