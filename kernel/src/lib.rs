// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Portable runtime substrate for embedded applications.
//!
//! `kit-core` links the same application code against bare-metal
//! microcontrollers, cooperative RTOS kernels, multicore MCUs, and hosted
//! desktop targets by swapping the [`platform`] backend. The rest of the
//! crate — event loop, software timers, periodic scheduler, watchdog
//! supervisor, thread abstraction — is platform-neutral.
//!
//! Retargeting to a new platform means implementing [`platform::Backend`]
//! and nothing else.

pub mod error;
pub mod platform;
pub mod shutdown;
pub mod startup;
pub mod sync;
pub mod thread;
pub mod timer;
pub mod event_loop;
pub mod periodic;
pub mod watchdog;
pub mod trace;

#[cfg(test)]
mod test_support;

pub use error::{Error, ErrorKind};
pub use platform::Backend;

/// Runs startup hooks and prepares the primitive singletons.
///
/// Must precede every other call into this crate except static container
/// construction (which is zero-init and therefore safe before `initialize`).
pub fn initialize() {
    startup::run_all();
}

/// Starts the scheduler. Semantics are backend-specific, see [`platform::Backend::enable_scheduling`].
pub fn enable_scheduling() -> ! {
    platform::current().enable_scheduling()
}

/// Reports whether preemption/multi-core scheduling is live.
pub fn is_scheduling_enabled() -> bool {
    platform::current().is_scheduling_enabled()
}

/// Cooperative sleep: on backends with simulated time this advances the virtual clock instead
/// of blocking the native thread. Identical to [`sleep_in_real_time`] otherwise.
pub fn sleep(ms: u32) {
    platform::current().sleep(ms);
}

/// Real-time sleep: always blocks the native thread, regardless of simulated-time mode.
pub fn sleep_in_real_time(ms: u32) {
    platform::current().sleep(ms);
}
