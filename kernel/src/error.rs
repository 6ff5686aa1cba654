// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fatal-error taxonomy and the production/test dispatch split.
//!
//! Most of the invariants this crate enforces (double-insertion into a
//! list, TLS index exhaustion, watchdog trip, ...) are programming errors,
//! not recoverable conditions. On production targets the handler calls
//! [`crate::shutdown::failure`], which never returns. Test builds install a
//! counting handler instead so assertions can observe that a violation was
//! in fact reported.

use core::sync::atomic::{AtomicU32, AtomicPtr, Ordering};

/// The taxonomy of fatal error kinds, each mapping to a [`crate::shutdown`] exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Intrusive-list invariant violation (double-insert, detached `next`, ...).
    #[error("container invariant violated")]
    Container,
    /// Primitive creation failure or internal assertion in thread/mutex/sema/TLS.
    #[error("OS abstraction layer failure")]
    Osal,
    /// Pool/allocator failure.
    #[error("memory failure")]
    Memory,
    /// Event-queue drop due to overflow.
    #[error("event queue overflow")]
    FsmEventOverflow,
    /// Intentional or detected supervisor failure.
    #[error("watchdog failure")]
    Watchdog,
    /// Reserved: generic assertion failure.
    #[error("assertion failure")]
    Assert,
    /// Reserved: unspecified failure.
    #[error("unspecified failure")]
    Failure,
    /// Reserved: stream I/O failure.
    #[error("stream I/O failure")]
    StreamIo,
    /// Reserved: driver failure.
    #[error("driver failure")]
    Driver,
    /// Reserved: inter-thread communication failure.
    #[error("inter-thread communication failure")]
    Itc,
    /// Reserved: data model failure.
    #[error("data model failure")]
    DataModel,
}

impl ErrorKind {
    /// The numeric exit code passed to [`crate::shutdown::failure`].
    pub const fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Container => 1,
            ErrorKind::Osal => 2,
            ErrorKind::Memory => 3,
            ErrorKind::FsmEventOverflow => 4,
            ErrorKind::Watchdog => 5,
            ErrorKind::Assert => 6,
            ErrorKind::Failure => 7,
            ErrorKind::StreamIo => 8,
            ErrorKind::Driver => 9,
            ErrorKind::Itc => 10,
            ErrorKind::DataModel => 11,
        }
    }
}

/// Error type returned by the small number of this crate's operations that
/// are genuinely recoverable (e.g. backend primitive creation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

/// One counter per [`ErrorKind`], incremented by the test fatal-error handler.
#[derive(Debug, Default)]
pub struct FaultCounters {
    counters: [AtomicU32; 11],
}

impl FaultCounters {
    pub const fn new() -> Self {
        // AtomicU32::new is const; array-repeat requires Copy, so spell it out.
        Self {
            counters: [
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
            ],
        }
    }

    pub fn count(&self, kind: ErrorKind) -> u32 {
        self.counters[kind as usize].load(Ordering::Relaxed)
    }

    fn bump(&self, kind: ErrorKind) {
        self.counters[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for c in &self.counters {
            c.store(0, Ordering::Relaxed);
        }
    }
}

static TEST_COUNTERS: FaultCounters = FaultCounters::new();

/// Test-only accessor for the fault counters bumped by [`fatal`] while the
/// test handler is installed via [`set_test_mode`].
pub fn test_counters() -> &'static FaultCounters {
    &TEST_COUNTERS
}

type Handler = fn(ErrorKind);

fn production_handler(kind: ErrorKind) {
    crate::shutdown::failure(kind.exit_code());
}

fn test_handler(kind: ErrorKind) {
    TEST_COUNTERS.bump(kind);
}

static HANDLER: AtomicPtr<()> = AtomicPtr::new(production_handler as *mut ());

/// Switches the fatal-error handler to the counting test handler, or back to
/// the production handler (which calls [`crate::shutdown::failure`] and
/// never returns). Intended for `#[cfg(test)]` setup only.
pub fn set_test_mode(enabled: bool) {
    let f: Handler = if enabled { test_handler } else { production_handler };
    HANDLER.store(f as *mut (), Ordering::SeqCst);
}

/// Reports a fatal error of `kind`. On production targets this never
/// returns. In test mode it bumps a counter and returns so the caller can
/// report `false`/`None` and the test harness can assert on the counter.
pub fn fatal(kind: ErrorKind) {
    let ptr = HANDLER.load(Ordering::SeqCst);
    // SAFETY: only ever stored from `set_test_mode`/the initializer above,
    // both of which store a valid `Handler` function pointer.
    let f: Handler = unsafe { core::mem::transmute(ptr) };
    f(kind);
}
