// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Thread abstraction and thread-local storage.
//!
//! A [`Thread`] is constructed once, normally in a `static`, and later
//! [`Thread::start`]ed. Splitting construction from starting (rather than
//! the single fallible `create` the specification describes) lets a
//! `no_std`/no-allocator target own the `Thread`'s storage statically; the
//! backend only ever sees a `&'static Thread`.

use crate::error::{fatal, ErrorKind};
use crate::platform::{self, ExecutionModel};
use crate::sync::Semaphore;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kit_container::{Linked, Links, List};
use kit_spin::Mutex as SpinMutex;

/// Lazily constructs a [`Semaphore`] on first use.
///
/// `Thread`s are meant to live in `static`s, but creating a `Semaphore`
/// needs the platform backend, which is only installed at runtime — so the
/// semaphore itself can't be built in a `const fn`. This defers it to the
/// thread's first signal/wait.
struct LazySema {
    inited: AtomicBool,
    init_lock: SpinMutex<()>,
    cell: UnsafeCell<MaybeUninit<Semaphore>>,
}

// SAFETY: `cell` is only written once, under `init_lock`, before `inited`
// is published with `Release`; all readers observe it via `Acquire`.
unsafe impl Sync for LazySema {}

impl LazySema {
    const fn new() -> Self {
        LazySema {
            inited: AtomicBool::new(false),
            init_lock: SpinMutex::new(()),
            cell: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    fn get(&self) -> &Semaphore {
        if !self.inited.load(Ordering::Acquire) {
            let _guard = self.init_lock.lock();
            if !self.inited.load(Ordering::Acquire) {
                // SAFETY: exclusive writer, guarded by `init_lock`.
                unsafe { (*self.cell.get()).write(Semaphore::new(0)) };
                self.inited.store(true, Ordering::Release);
            }
        }
        // SAFETY: `inited` observed true implies the write above happened-before.
        unsafe { (*self.cell.get()).assume_init_ref() }
    }
}

/// Number of TLS slots per thread (§4 TLS slot).
pub const TLS_SLOTS: usize = 8;

/// User code run on a [`Thread`]. `entry` is called exactly once on the
/// owning thread; `please_stop` is a cooperative request with a no-op
/// default, the Runnable must poll for it.
pub trait Runnable: Sync {
    fn entry(&self);

    fn please_stop(&self) {}
}

/// A thread handle. Construct with [`Thread::new`] (const, storable in a
/// `static`), start with [`Thread::start`].
pub struct Thread {
    runnable: &'static dyn Runnable,
    sema: LazySema,
    native_id: AtomicUsize,
    is_running: AtomicBool,
    allow_sim_time: bool,
    links: Links<Thread>,
}

// SAFETY: `links` is only ever touched while holding `ACTIVE_LIST`'s mutex.
unsafe impl Sync for Thread {}

unsafe impl Linked for Thread {
    type Handle = &'static Thread;

    fn into_ptr(handle: &'static Thread) -> NonNull<Thread> {
        NonNull::from(handle)
    }

    unsafe fn from_ptr(ptr: NonNull<Thread>) -> &'static Thread {
        // SAFETY: all `Thread`s entered into `ACTIVE_LIST` are `&'static`.
        unsafe { &*ptr.as_ptr() }
    }

    unsafe fn links(ptr: NonNull<Thread>) -> NonNull<Links<Thread>> {
        // SAFETY: `links` is a plain field, no aliasing beyond the list's own bookkeeping.
        unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr.as_ptr()).links)) }
    }
}

static ACTIVE_LIST: SpinMutex<List<Thread>> = SpinMutex::new(List::new());

impl Thread {
    /// Constructs a thread around `runnable`, not yet started. Usable in a
    /// `const` context so the whole `Thread` can live in a `static`.
    pub const fn new(runnable: &'static dyn Runnable, allow_sim_time: bool) -> Self {
        Thread {
            runnable,
            sema: LazySema::new(),
            native_id: AtomicUsize::new(0),
            is_running: AtomicBool::new(false),
            allow_sim_time,
            links: Links::new(),
        }
    }

    /// Starts the thread (§4.6 create). Returns `false` if the backend
    /// cannot create another thread — e.g. bare-metal with its single slot
    /// already taken, or multicore MCU with all cores already bound.
    pub fn start(&'static self, name: &str, priority: u8, stack_size: usize) -> bool {
        fn trampoline(arg: *mut ()) {
            // SAFETY: `arg` always points at the `&'static Thread` passed by `start`.
            let thread: &'static Thread = unsafe { &*(arg as *const Thread) };
            thread.run();
        }

        let backend = platform::current();
        match backend.execution_model() {
            ExecutionModel::CooperativeMain => {
                // `enable_scheduling` runs the single Runnable inline; `start`
                // just records it and returns success without spawning.
                self.native_id.store(1, Ordering::Release);
                true
            }
            _ => {
                let ptr = self as *const Thread as *mut ();
                match backend.thread_native_create(trampoline as fn(*mut ()), ptr, name, priority, stack_size) {
                    Some(id) => {
                        self.native_id.store(id.wrapping_add(1), Ordering::Release);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    fn run(&'static self) {
        self.is_running.store(true, Ordering::Release);
        {
            let mut list = ACTIVE_LIST.lock();
            list.push_back(self);
        }
        set_current(self);
        self.runnable.entry();
        {
            let mut list = ACTIVE_LIST.lock();
            list.remove(NonNull::from(self));
        }
        self.is_running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn please_stop(&self) {
        self.runnable.please_stop();
    }

    pub fn allow_sim_time(&self) -> bool {
        self.allow_sim_time
    }

    /// Requests termination; if `grace_ms > 0` waits up to that long for
    /// `is_running()` to clear before giving up and releasing native
    /// resources regardless.
    pub fn destroy(&'static self, grace_ms: u32) {
        if self.is_running() {
            self.please_stop();
            if grace_ms > 0 {
                let backend = platform::current();
                let start = backend.elapsed_ms();
                while self.is_running() && backend.elapsed_ms().wrapping_sub(start) < grace_ms {
                    backend.sleep(1);
                }
            }
        }
        let id = self.native_id.load(Ordering::Acquire);
        if id != 0 {
            backend_destroy(id - 1);
        }
    }

    pub(crate) fn semaphore(&self) -> &Semaphore {
        self.sema.get()
    }

    /// The current native thread's owning `Thread`, fatal-erroring (`OSAL`)
    /// if called from a thread this crate did not start.
    pub fn get_current() -> &'static Thread {
        match Self::try_get_current() {
            Some(t) => t,
            None => {
                fatal(ErrorKind::Osal);
                panic!("Thread::get_current called from a foreign thread");
            }
        }
    }

    pub fn try_get_current() -> Option<&'static Thread> {
        current()
    }

    pub fn wait() {
        Self::get_current().semaphore().wait();
    }

    pub fn try_wait() -> bool {
        Self::get_current().semaphore().try_wait()
    }

    pub fn timed_wait(ms: u32) -> bool {
        Self::get_current().semaphore().timed_wait(ms)
    }

    /// Calls `f` for every thread currently within `entry`, under the
    /// global active-list traversal lock.
    pub fn traverse(mut f: impl FnMut(&Thread)) {
        let list = ACTIVE_LIST.lock();
        for t in list.iter() {
            f(t);
        }
    }
}

fn backend_destroy(id: usize) {
    platform::current().thread_native_destroy(id);
}

// Current-thread lookup: a thin per-native-thread pointer kept in TLS slot 0.
static CURRENT_TLS: Tls = Tls::reserved(0);

fn set_current(thread: &'static Thread) {
    CURRENT_TLS.set(thread as *const Thread as usize);
}

fn current() -> Option<&'static Thread> {
    let raw = CURRENT_TLS.get();
    if raw == 0 {
        None
    } else {
        // SAFETY: only ever set in `set_current` to a `&'static Thread`.
        Some(unsafe { &*(raw as *const Thread) })
    }
}

static NEXT_TLS_INDEX: AtomicUsize = AtomicUsize::new(1);

/// A process-wide monotonic TLS index into each thread's slot array.
/// Reads before the owning thread's first [`Tls::set`] return `0`.
pub struct Tls {
    index: usize,
}

impl Tls {
    /// Allocates the next free index. Fatal (`OSAL`) if [`TLS_SLOTS`] is exhausted.
    pub fn new() -> Self {
        let index = NEXT_TLS_INDEX.fetch_add(1, Ordering::Relaxed);
        if index >= TLS_SLOTS {
            fatal(ErrorKind::Osal);
        }
        Tls { index }
    }

    /// Reserves a specific slot index. Used once, internally, for the
    /// current-thread pointer (slot 0) so it is stable across TLS exhaustion.
    const fn reserved(index: usize) -> Self {
        Tls { index }
    }

    pub fn get(&self) -> usize {
        // SAFETY: call is confined to the body of this method; the
        // reference does not outlive it.
        unsafe { platform::current().tls_array_ref()[self.index] }
    }

    pub fn set(&self, value: usize) {
        // SAFETY: see `get`.
        unsafe { platform::current().tls_array_ref()[self.index] = value };
    }
}

impl Default for Tls {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::const_assert!(TLS_SLOTS >= 1);
