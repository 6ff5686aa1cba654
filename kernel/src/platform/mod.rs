// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Platform backend contract.
//!
//! Everything above this module is platform-neutral; everything below is
//! implemented once per target. An application selects a backend at link
//! time (normally via the `std` feature, which pulls in [`hosted`]) and
//! installs it with [`set_backend`] before calling [`crate::initialize`].

mod hosted;

pub use hosted::HostedBackend;

use kit_spin::Mutex as SpinMutex;

/// Opaque native thread handle, backend-defined.
pub type NativeThreadId = usize;

/// Execution model a backend supports, used by [`crate::thread::Thread::create`]
/// to decide whether a new thread can be created at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Hosted or cooperative-RTOS: any number of preemptively scheduled threads.
    Preemptive,
    /// Multicore MCU: exactly one thread per physical core.
    PinnedCore { core_count: u8 },
    /// Bare-metal: exactly one thread, the main entry Runnable, run inline.
    CooperativeMain,
}

/// The platform backend contract (§6). One implementation per target;
/// consumed exclusively through [`current`].
///
/// All methods that can fail a fatal precondition (e.g. creating a mutex on
/// an exhausted static pool) report it via [`crate::error::fatal`] rather
/// than returning `Result`, matching the "OSAL" fatal-error kind.
pub trait Backend: Sync {
    /// This backend's execution model, consulted by `Thread::create`.
    fn execution_model(&self) -> ExecutionModel;

    /// Spawns a native thread running `trampoline(arg)`. Returns `None` if
    /// the backend cannot create another thread (e.g. bare-metal with the
    /// single slot already taken).
    fn thread_native_create(
        &self,
        trampoline: fn(*mut ()),
        arg: *mut (),
        name: &str,
        priority: u8,
        stack_size: usize,
    ) -> Option<NativeThreadId>;

    /// Releases native resources for a thread that has returned from its trampoline.
    fn thread_native_destroy(&self, id: NativeThreadId);

    fn thread_native_set_priority(&self, id: NativeThreadId, priority: u8);

    /// Identifies the calling native thread, or `None` if called from a
    /// thread this backend did not create (e.g. a foreign callback).
    fn current_thread_id(&self) -> Option<NativeThreadId>;

    /// Raw recursive-mutex primitives. `token` is backend-defined storage
    /// sized to fit any backend's native mutex (see [`crate::sync::Mutex`]).
    fn mutex_init(&self) -> RawMutex;
    fn mutex_lock(&self, m: &RawMutex);
    fn mutex_unlock(&self, m: &RawMutex);
    fn mutex_destroy(&self, m: &RawMutex);

    /// Raw counting-semaphore primitives.
    fn sema_init(&self, initial: u32) -> RawSema;
    fn sema_wait(&self, s: &RawSema);
    /// Returns `true` if the semaphore was signaled before `ms` elapsed.
    fn sema_timed_wait(&self, s: &RawSema, ms: u32) -> bool;
    fn sema_try_wait(&self, s: &RawSema) -> bool;
    fn sema_signal(&self, s: &RawSema);
    /// ISR-safe signal. Returns whether a higher-priority task was woken,
    /// a hint preemptive-RTOS backends use to request an immediate
    /// reschedule on return from the interrupt.
    fn sema_signal_from_isr(&self, s: &RawSema) -> bool;
    fn sema_destroy(&self, s: &RawSema);

    /// Returns the calling native thread's TLS slot array.
    ///
    /// # Safety
    /// The returned reference is only valid for the duration of the call
    /// and must not be retained across a context switch.
    unsafe fn tls_array_ref(&self) -> &mut [usize; crate::thread::TLS_SLOTS];

    fn elapsed_ms(&self) -> u32;
    fn elapsed_ms_64(&self) -> u64;

    /// Blocks the current native thread. On bare-metal this is a busy-wait.
    fn sleep(&self, ms: u32);

    fn is_scheduling_enabled(&self) -> bool;
    /// Starts the scheduler. Never returns on `CooperativeMain` and
    /// `PinnedCore` core-0 backends.
    fn enable_scheduling(&self) -> !;

    /// Exits the process (hosted) or halts the target (bare-metal / RTOS).
    fn shutdown(&self, exit_code: i32) -> !;

    fn watchdog_enable(&self);
    fn watchdog_kick(&self);
    /// Forces the hardware watchdog to fire. Terminal: never returns on
    /// real hardware, but test backends may return for assertions.
    fn watchdog_trip(&self);
}

/// Backend-defined opaque mutex storage. Hosted backends box a native mutex
/// behind this; bare-metal backends may leave it zero-sized.
#[derive(Debug)]
pub struct RawMutex(pub(crate) usize);

/// Backend-defined opaque semaphore storage.
#[derive(Debug)]
pub struct RawSema(pub(crate) usize);

static BACKEND: SpinMutex<Option<&'static dyn Backend>> = SpinMutex::new(None);

/// Installs the platform backend. Must be called exactly once, before
/// [`crate::initialize`]. Fatal-errors (`OSAL`) if called twice.
pub fn set_backend(backend: &'static dyn Backend) {
    let mut slot = BACKEND.lock();
    if slot.is_some() {
        crate::error::fatal(crate::error::ErrorKind::Osal);
        return;
    }
    *slot = Some(backend);
}

/// Returns the installed backend.
///
/// # Panics (fatal)
/// Calls [`crate::error::fatal`] with [`crate::error::ErrorKind::Osal`] if
/// no backend has been installed yet. In test mode (where `fatal` returns)
/// this then panics outright, since there is genuinely no backend to hand
/// back to the caller.
pub fn current() -> &'static dyn Backend {
    match *BACKEND.lock() {
        Some(b) => b,
        None => {
            crate::error::fatal(crate::error::ErrorKind::Osal);
            panic!("no platform backend installed");
        }
    }
}
