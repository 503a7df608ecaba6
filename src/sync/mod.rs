// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synchronization Primitives
//!
//! Primitives built on the scheduler's block and unblock operations.
//!
//! # Primitives
//!
//! - **Semaphore**: counting semaphore with FIFO waiters

pub mod semaphore;

// Re-exports
pub use semaphore::*;
