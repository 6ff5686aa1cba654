// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A minimal spinlock, used as the lowest-level mutual-exclusion primitive
//! underneath the portable `Mutex`/`Semaphore` types exposed by the core.

#![cfg_attr(not(test), no_std)]

mod backoff;
mod mutex;

pub use backoff::Backoff;
pub use mutex::{Mutex, MutexGuard};

/// Marker type which indicates that the Guard type for a lock is not `Send`.
#[expect(dead_code, reason = "inner pointer is unused")]
pub(crate) struct GuardNoSend(*mut ());
unsafe impl Sync for GuardNoSend {}
