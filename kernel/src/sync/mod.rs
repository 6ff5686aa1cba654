// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Recursive mutex and signalable counting semaphore, both thin wrappers
//! over the installed [`crate::platform::Backend`] primitives.

use crate::platform::{self, RawMutex, RawSema};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A recursive (reentrant) mutex. Locking twice from the same thread
/// succeeds; the data is only accessible once all nested guards are live on
/// the same call stack, matching the backend's native recursive mutex (§6).
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a `MutexGuard`
// produced while `raw` is held, and the backend's recursive-mutex contract
// guarantees mutual exclusion across threads (recursion is same-thread only).
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(val: T) -> Self {
        Mutex {
            raw: platform::current().mutex_init(),
            data: UnsafeCell::new(val),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        platform::current().mutex_lock(&self.raw);
        MutexGuard { mutex: self }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized> Drop for Mutex<T> {
    fn drop(&mut self) {
        platform::current().mutex_destroy(&self.raw);
    }
}

pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding `raw` locked grants exclusive (or nested-same-thread) access.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        platform::current().mutex_unlock(&self.mutex.raw);
    }
}

/// A counting semaphore with an ISR-safe `signal_from_isr` variant whose
/// return value carries the "higher-priority-task-woken" hint required by
/// preemptive-RTOS backends (§4.3 Signalable Semaphore).
pub struct Semaphore {
    raw: RawSema,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Semaphore {
            raw: platform::current().sema_init(initial),
        }
    }

    pub fn wait(&self) {
        platform::current().sema_wait(&self.raw);
    }

    /// Returns `true` if signaled before `ms` elapsed.
    pub fn timed_wait(&self, ms: u32) -> bool {
        platform::current().sema_timed_wait(&self.raw, ms)
    }

    pub fn try_wait(&self) -> bool {
        platform::current().sema_try_wait(&self.raw)
    }

    pub fn signal(&self) {
        platform::current().sema_signal(&self.raw);
    }

    /// ISR-safe signal. Returns whether a higher-priority task was woken.
    pub fn signal_from_isr(&self) -> bool {
        platform::current().sema_signal_from_isr(&self.raw)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        platform::current().sema_destroy(&self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_backend;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn mutex_is_reentrant_on_the_same_thread() {
        ensure_backend();
        let m = Mutex::new(0u32);
        let g1 = m.lock();
        let g2 = m.lock();
        assert_eq!(*g1, 0);
        drop(g2);
        drop(g1);
    }

    #[test]
    fn mutex_excludes_other_threads() {
        // `crate::thread::Thread::start` is what normally gets a new thread
        // a distinct `current_thread_id()` from the backend; a bare
        // `std::thread::spawn` here would leave both threads reporting the
        // backend's default id and make the recursive mutex (wrongly)
        // treat them as the same owner. Drive it through the real thread
        // abstraction instead so the contention is genuine.
        use crate::thread::{Runnable, Thread};
        use std::sync::OnceLock;

        ensure_backend();
        // `Mutex::new` isn't `const fn` (it calls into the installed
        // backend), so a `static` holding one directly won't compile; defer
        // construction behind a `OnceLock` instead.
        static M: OnceLock<Mutex<u32>> = OnceLock::new();
        let m = M.get_or_init(|| Mutex::new(0));

        struct Incrementer;
        impl Runnable for Incrementer {
            fn entry(&self) {
                *M.get().unwrap().lock() += 1;
            }
        }
        static RUNNABLE: Incrementer = Incrementer;
        static THREAD: Thread = Thread::new(&RUNNABLE, false);

        let guard = m.lock();
        assert!(THREAD.start("incrementer", 0, 0));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(*guard, 0, "the spawned thread must still be blocked on the held lock");
        drop(guard);
        let start = std::time::Instant::now();
        while THREAD.is_running() && start.elapsed() < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn semaphore_timed_wait_reports_timeout() {
        ensure_backend();
        let sema = Semaphore::new(0);
        assert!(!sema.timed_wait(20));
        sema.signal();
        assert!(sema.timed_wait(20));
    }

    #[test]
    fn semaphore_wakes_a_blocked_waiter() {
        ensure_backend();
        let sema = Arc::new(Semaphore::new(0));
        let other = Arc::clone(&sema);
        let handle = thread::spawn(move || other.wait());
        thread::sleep(Duration::from_millis(30));
        sema.signal();
        handle.join().unwrap();
    }
}
