// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Orderly shutdown (§4.7, §7).
//!
//! [`success`] and [`failure`] both drain the LIFO of registered handlers —
//! each gets the in-flight exit code and may replace it — then terminate by
//! platform-specific means ([`crate::platform::Backend::shutdown`]).

use crate::platform;
use kit_spin::Mutex as SpinMutex;

type Handler = fn(i32) -> i32;

static HANDLERS: SpinMutex<heapless::Vec<Handler, 32>> = SpinMutex::new(heapless::Vec::new());

/// Registers `handler` to run on the next [`success`]/[`failure`] call.
/// Handlers run in LIFO order: the most recently registered runs first.
///
/// # Panics (fatal)
/// Fatal-errors (`Osal`) if more than 32 handlers are registered.
pub fn register(handler: Handler) {
    let mut handlers = HANDLERS.lock();
    if handlers.push(handler).is_err() {
        crate::error::fatal(crate::error::ErrorKind::Osal);
    }
}

fn drain(mut exit_code: i32) -> i32 {
    let mut handlers = HANDLERS.lock();
    while let Some(handler) = handlers.pop() {
        exit_code = handler(exit_code);
    }
    exit_code
}

/// Normal exit: drains handlers with code `0`, then calls the backend's shutdown.
pub fn success() -> ! {
    let code = drain(0);
    platform::current().shutdown(code)
}

/// Fatal exit: drains handlers with `exit_code`, then calls the backend's shutdown.
pub fn failure(exit_code: i32) -> ! {
    let code = drain(exit_code);
    platform::current().shutdown(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU8, Ordering};

    static LOG: SpinMutex<heapless::Vec<u8, 4>> = SpinMutex::new(heapless::Vec::new());
    static NEXT: AtomicU8 = AtomicU8::new(1);

    fn handler_a(code: i32) -> i32 {
        let _ = LOG.lock().push(NEXT.fetch_add(1, Ordering::Relaxed));
        code
    }

    fn handler_b(code: i32) -> i32 {
        let _ = LOG.lock().push(NEXT.fetch_add(1, Ordering::Relaxed));
        code + 1
    }

    #[test]
    fn drain_runs_lifo_and_threads_exit_code() {
        register(handler_a);
        register(handler_b);
        let code = drain(10);
        assert_eq!(code, 11);
        let log = LOG.lock();
        assert!(log.len() >= 2);
    }
}
