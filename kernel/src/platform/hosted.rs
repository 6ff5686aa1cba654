// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Hosted (Windows/POSIX) backend: preemptive, multi-threaded, built on `std`.

#![cfg(feature = "std")]

use super::{Backend, ExecutionModel, NativeThreadId, RawMutex, RawSema};
use crate::thread::TLS_SLOTS;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

thread_local! {
    static TLS: Cell<[usize; TLS_SLOTS]> = const { Cell::new([0; TLS_SLOTS]) };
    static THIS_THREAD_ID: Cell<Option<NativeThreadId>> = const { Cell::new(None) };
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

struct RecursiveMutexInner {
    owner: Mutex<Option<(NativeThreadId, u32)>>,
    cv: Condvar,
}

struct CountingSemaInner {
    count: Mutex<u32>,
    cv: Condvar,
}

/// Hosted backend: any number of preemptively scheduled `std::thread`s.
pub struct HostedBackend {
    epoch: Instant,
    scheduling_enabled: AtomicBool,
    watchdog_last_kick: AtomicU64,
}

impl HostedBackend {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            scheduling_enabled: AtomicBool::new(false),
            watchdog_last_kick: AtomicU64::new(0),
        }
    }
}

impl Default for HostedBackend {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all mutable state is behind `std::sync` primitives or atomics.
unsafe impl Sync for HostedBackend {}

impl Backend for HostedBackend {
    fn execution_model(&self) -> ExecutionModel {
        ExecutionModel::Preemptive
    }

    fn thread_native_create(
        &self,
        trampoline: fn(*mut ()),
        arg: *mut (),
        name: &str,
        _priority: u8,
        stack_size: usize,
    ) -> Option<NativeThreadId> {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        // SAFETY: `arg` is handed to us by the caller (`Thread::create`) and
        // is valid for the lifetime of the spawned thread by that caller's
        // contract; we only move the raw pointer across the thread boundary.
        struct SendPtr(*mut ());
        unsafe impl Send for SendPtr {}
        let arg = SendPtr(arg);

        let mut builder = std::thread::Builder::new().name(name.to_string());
        if stack_size > 0 {
            builder = builder.stack_size(stack_size);
        }
        let spawned = builder.spawn(move || {
            let arg = arg;
            THIS_THREAD_ID.with(|c| c.set(Some(id)));
            trampoline(arg.0);
        });
        match spawned {
            Ok(handle) => {
                // Detach: the core tracks liveness itself via `Runnable::is_running`.
                std::mem::drop(handle);
                Some(id)
            }
            Err(_) => None,
        }
    }

    fn thread_native_destroy(&self, _id: NativeThreadId) {
        // Native resources for a detached std::thread are reclaimed by the
        // OS once the trampoline returns; nothing to do here.
    }

    fn thread_native_set_priority(&self, _id: NativeThreadId, _priority: u8) {
        // `std::thread` has no portable priority API.
    }

    fn current_thread_id(&self) -> Option<NativeThreadId> {
        THIS_THREAD_ID.with(|c| c.get())
    }

    fn mutex_init(&self) -> RawMutex {
        let inner = Box::new(RecursiveMutexInner {
            owner: Mutex::new(None),
            cv: Condvar::new(),
        });
        RawMutex(Box::into_raw(inner) as usize)
    }

    fn mutex_lock(&self, m: &RawMutex) {
        let inner = unsafe { &*(m.0 as *const RecursiveMutexInner) };
        let id = self.current_thread_id().unwrap_or(0);
        let mut guard = inner.owner.lock().unwrap();
        loop {
            match *guard {
                Some((owner, count)) if owner == id => {
                    *guard = Some((owner, count + 1));
                    return;
                }
                None => {
                    *guard = Some((id, 1));
                    return;
                }
                Some(_) => {
                    guard = inner.cv.wait(guard).unwrap();
                }
            }
        }
    }

    fn mutex_unlock(&self, m: &RawMutex) {
        let inner = unsafe { &*(m.0 as *const RecursiveMutexInner) };
        let mut guard = inner.owner.lock().unwrap();
        match *guard {
            Some((owner, count)) if count > 1 => *guard = Some((owner, count - 1)),
            Some(_) => {
                *guard = None;
                inner.cv.notify_one();
            }
            None => unreachable!("unlock of an unlocked recursive mutex"),
        }
    }

    fn mutex_destroy(&self, m: &RawMutex) {
        // SAFETY: `m.0` was produced by `Box::into_raw` in `mutex_init` and
        // is destroyed at most once, by contract of `Mutex::drop`.
        unsafe { drop(Box::from_raw(m.0 as *mut RecursiveMutexInner)) };
    }

    fn sema_init(&self, initial: u32) -> RawSema {
        let inner = Box::new(CountingSemaInner {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        });
        RawSema(Box::into_raw(inner) as usize)
    }

    fn sema_wait(&self, s: &RawSema) {
        let inner = unsafe { &*(s.0 as *const CountingSemaInner) };
        let mut count = inner.count.lock().unwrap();
        while *count == 0 {
            count = inner.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn sema_timed_wait(&self, s: &RawSema, ms: u32) -> bool {
        let inner = unsafe { &*(s.0 as *const CountingSemaInner) };
        let deadline = Instant::now() + Duration::from_millis(u64::from(ms));
        let mut count = inner.count.lock().unwrap();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, timeout_result) = inner.cv.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if timeout_result.timed_out() && *count == 0 {
                return false;
            }
        }
    }

    fn sema_try_wait(&self, s: &RawSema) -> bool {
        let inner = unsafe { &*(s.0 as *const CountingSemaInner) };
        let mut count = inner.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    fn sema_signal(&self, s: &RawSema) {
        let inner = unsafe { &*(s.0 as *const CountingSemaInner) };
        let mut count = inner.count.lock().unwrap();
        *count += 1;
        inner.cv.notify_one();
    }

    fn sema_signal_from_isr(&self, s: &RawSema) -> bool {
        // Hosted targets have no ISR context; behave like a plain signal.
        self.sema_signal(s);
        false
    }

    fn sema_destroy(&self, s: &RawSema) {
        // SAFETY: see `mutex_destroy`; same single-owner contract.
        unsafe { drop(Box::from_raw(s.0 as *mut CountingSemaInner)) };
    }

    unsafe fn tls_array_ref(&self) -> &mut [usize; TLS_SLOTS] {
        TLS.with(|c| {
            let ptr = c.as_ptr();
            // SAFETY: `ptr` addresses thread-local storage for the calling
            // thread only; the caller contract forbids retaining the
            // reference across a context switch, so no other thread can
            // alias it for the reference's lifetime.
            unsafe { &mut *ptr }
        })
    }

    fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms_64() as u32
    }

    fn elapsed_ms_64(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn is_scheduling_enabled(&self) -> bool {
        self.scheduling_enabled.load(Ordering::Acquire)
    }

    fn enable_scheduling(&self) -> ! {
        // Hosted scheduling is always live; `enable_scheduling` just flips
        // the flag and parks the calling thread forever (it has no
        // Runnable of its own, unlike `CooperativeMain`).
        self.scheduling_enabled.store(true, Ordering::Release);
        loop {
            std::thread::park();
        }
    }

    fn shutdown(&self, exit_code: i32) -> ! {
        std::process::exit(exit_code);
    }

    fn watchdog_enable(&self) {
        self.watchdog_last_kick.store(self.elapsed_ms_64(), Ordering::Relaxed);
    }

    fn watchdog_kick(&self) {
        self.watchdog_last_kick.store(self.elapsed_ms_64(), Ordering::Relaxed);
    }

    fn watchdog_trip(&self) {
        // A real hosted watchdog has no hardware reset; abort to make the
        // trip observable and terminal, matching the "terminal" contract.
        kit_abort::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_backend;

    #[test]
    fn elapsed_ms_is_monotonic_and_roughly_tracks_sleep() {
        let backend = ensure_backend();
        let before = backend.elapsed_ms_64();
        backend.sleep(20);
        let after = backend.elapsed_ms_64();
        assert!(after >= before + 15, "before={before} after={after}");
    }

    #[test]
    fn tls_array_is_distinct_per_thread() {
        let backend = ensure_backend();
        unsafe { backend.tls_array_ref()[1] = 42 };
        let seen_from_other_thread = std::thread::scope(|scope| {
            scope
                .spawn(|| unsafe { backend.tls_array_ref()[1] })
                .join()
                .unwrap()
        });
        assert_eq!(seen_from_other_thread, 0, "a fresh thread starts with zeroed TLS");
        assert_eq!(unsafe { backend.tls_array_ref()[1] }, 42, "this thread's slot is unaffected");
    }

    #[test]
    fn raw_mutex_round_trips_through_init_lock_unlock_destroy() {
        let backend = ensure_backend();
        let m = backend.mutex_init();
        backend.mutex_lock(&m);
        backend.mutex_lock(&m);
        backend.mutex_unlock(&m);
        backend.mutex_unlock(&m);
        backend.mutex_destroy(&m);
    }

    #[test]
    fn raw_sema_try_wait_respects_the_count() {
        let backend = ensure_backend();
        let s = backend.sema_init(1);
        assert!(backend.sema_try_wait(&s));
        assert!(!backend.sema_try_wait(&s));
        backend.sema_signal(&s);
        assert!(backend.sema_try_wait(&s));
        backend.sema_destroy(&s);
    }
}
