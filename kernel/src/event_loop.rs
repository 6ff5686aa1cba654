// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cooperative run-to-completion event loop (§4.3).
//!
//! One iteration: block on the thread's signal semaphore for up to
//! `tick_period_ms`, run due timers, then dispatch one atomic snapshot of
//! the pending-flags word to every subscribed [`EventFlagGroup`] whose mask
//! intersects it. Optional mailbox drain and periodic-scheduler execution
//! compose around this core (`process_messages`, `execute_scheduler`).

use crate::periodic::PeriodicScheduler;
use crate::sync::Semaphore;
use crate::timer::TimerManager;
use crate::watchdog::WatchedEventLoop;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use heapless::Vec as HVec;

const MAX_FLAG_GROUPS: usize = 8;

/// A subscriber to a subset of the event loop's 32-bit pending-flags word.
#[derive(Debug)]
pub struct EventFlagGroup {
    mask: u32,
    callback: fn(changed_bits: u32, context: *mut ()),
    context: *mut (),
}

// SAFETY: `context` is only ever dereferenced inside `callback`, which the
// owner of this `EventFlagGroup` supplied for exactly this pointer.
unsafe impl Sync for EventFlagGroup {}

impl EventFlagGroup {
    pub const fn new(mask: u32, callback: fn(u32, *mut ()), context: *mut ()) -> Self {
        EventFlagGroup { mask, callback, context }
    }
}

/// Optional inter-thread message dispatch composed into an [`EventLoop`].
/// The concrete queue is application-defined; this crate only defines the
/// interface the loop drives (§4.3 "Composition with messages").
pub trait Mailbox: Sync {
    /// `true` if a message is queued without blocking.
    fn has_pending_message(&self) -> bool;
    /// Dispatches exactly the messages queued as of entry; returns once drained.
    fn process_messages(&self);
}

/// Optional idle hook invoked after periodic-scheduler execution, once per
/// loop iteration, with `(now, at_least_one_interval_ran)`.
pub type IdleHook = fn(now_ms: u64, at_least_one_interval_ran: bool);

/// A cooperative event loop bound to one thread's signal semaphore.
///
/// Meant to live in a `static`, so every piece of setup state (subscribed
/// groups, attached mailbox/scheduler/watchdog) is interior-mutable and
/// registered through a `&self` method, mirroring [`Timer`](crate::timer::Timer)
/// and [`Thread`](crate::thread::Thread).
pub struct EventLoop {
    timers: &'static TimerManager,
    semaphore: &'static Semaphore,
    pending_flags: AtomicU32,
    tick_period_ms: u32,
    run: AtomicBool,
    groups: kit_spin::Mutex<HVec<&'static EventFlagGroup, MAX_FLAG_GROUPS>>,
    mailbox: core::cell::Cell<Option<&'static dyn Mailbox>>,
    scheduler: core::cell::Cell<Option<&'static PeriodicScheduler>>,
    idle: core::cell::Cell<Option<IdleHook>>,
    watchdog: core::cell::Cell<Option<&'static WatchedEventLoop>>,
    now_ms_fn: fn() -> u64,
}

// SAFETY: all setup fields (`mailbox`, `scheduler`, `idle`, `watchdog`) are
// written once during single-threaded setup, before `start_event_loop` is
// called; `groups` is behind its own spinlock; everything else is atomic.
unsafe impl Sync for EventLoop {}

impl EventLoop {
    pub const fn new(
        timers: &'static TimerManager,
        semaphore: &'static Semaphore,
        tick_period_ms: u32,
        now_ms_fn: fn() -> u64,
    ) -> Self {
        EventLoop {
            timers,
            semaphore,
            pending_flags: AtomicU32::new(0),
            tick_period_ms,
            run: AtomicBool::new(true),
            groups: kit_spin::Mutex::new(HVec::new()),
            mailbox: core::cell::Cell::new(None),
            scheduler: core::cell::Cell::new(None),
            idle: core::cell::Cell::new(None),
            watchdog: core::cell::Cell::new(None),
            now_ms_fn,
        }
    }

    /// Subscribes a flag group. Intended for setup before
    /// [`EventLoop::start_event_loop`], though safe to call any time.
    ///
    /// # Panics (fatal)
    /// Fatal-errors (`Osal`) once [`MAX_FLAG_GROUPS`] subscribers are registered.
    pub fn subscribe(&self, group: &'static EventFlagGroup) {
        if self.groups.lock().push(group).is_err() {
            crate::error::fatal(crate::error::ErrorKind::Osal);
        }
    }

    pub fn attach_mailbox(&self, mailbox: &'static dyn Mailbox) {
        self.mailbox.set(Some(mailbox));
    }

    pub fn attach_scheduler(&self, scheduler: &'static PeriodicScheduler) {
        self.scheduler.set(Some(scheduler));
    }

    pub fn attach_watchdog(&self, watchdog: &'static WatchedEventLoop) {
        self.watchdog.set(Some(watchdog));
    }

    pub fn set_idle_hook(&self, hook: IdleHook) {
        self.idle.set(Some(hook));
    }

    /// Atomically ORs `bit_index` into the pending-flags word and wakes the
    /// bound thread. Any number of calls before the loop wakes coalesce
    /// into exactly one wake-up (§8 round-trip property).
    pub fn signal_event(&self, bit_index: u32) {
        self.signal_multiple_events(1u32 << bit_index);
    }

    pub fn signal_multiple_events(&self, mask: u32) {
        self.pending_flags.fetch_or(mask, Ordering::AcqRel);
        self.semaphore.signal();
    }

    /// Cooperative stop request: clears `run` and wakes the loop so it can observe it.
    pub fn please_stop(&self) {
        self.run.store(false, Ordering::Release);
        self.semaphore.signal();
    }

    pub fn start_event_loop(&self) {
        self.timers.start_manager();
        if let Some(wd) = self.watchdog.get() {
            wd.start_watcher();
        }
    }

    pub fn stop_event_loop(&self) {
        if let Some(wd) = self.watchdog.get() {
            wd.stop_watcher();
        }
    }

    /// One core iteration. If `skip_wait` is false, blocks on the thread
    /// semaphore for up to `tick_period_ms`; always runs due timers, then
    /// dispatches one snapshot of `pending_flags` to subscribed groups in
    /// registration order. Returns the `run` flag.
    pub fn wait_and_process_events(&self, skip_wait: bool) -> bool {
        if !skip_wait {
            self.semaphore.timed_wait(self.tick_period_ms);
        }

        self.timers.process_timers();

        let bits = self.pending_flags.swap(0, Ordering::AcqRel);
        if bits != 0 {
            for group in self.groups.lock().iter() {
                let changed = group.mask & bits;
                if changed != 0 {
                    (group.callback)(changed, group.context);
                }
            }
        }

        if let Some(wd) = self.watchdog.get() {
            wd.monitor();
        }

        self.run.load(Ordering::Acquire)
    }

    /// Runs periodic intervals, then the idle hook, if attached. Call after
    /// `wait_and_process_events` and before any mailbox drain (§4.3
    /// "Composition with periodic scheduling").
    pub fn execute_scheduler(&self) {
        let Some(scheduler) = self.scheduler.get() else { return };
        let now = (self.now_ms_fn)();
        let ran = scheduler.run(now);
        if let Some(idle) = self.idle.get() {
            idle(now, ran);
        }
    }

    /// Drives one full iteration of the mailbox-composed loop:
    /// `wait_and_process_events`, then `execute_scheduler`, then drains the
    /// mailbox if attached and `run` is still set. `skip_wait` lets the
    /// caller stay responsive when a message already arrived mid-iteration.
    pub fn run_iteration(&self, skip_wait: bool) -> bool {
        let run = self.wait_and_process_events(skip_wait);
        self.execute_scheduler();
        if run {
            if let Some(mailbox) = self.mailbox.get() {
                mailbox.process_messages();
            }
        }
        run
    }

    /// Runs iterations until `please_stop` is observed. The trampoline most
    /// `Runnable::entry` implementations delegate to.
    pub fn run_forever(&self) {
        let mut skip_wait = false;
        loop {
            let run = self.run_iteration(skip_wait);
            if !run {
                break;
            }
            skip_wait = self.mailbox.get().is_some_and(|m| m.has_pending_message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32 as Counter;

    static CALLBACK_BITS: Counter = Counter::new(0);
    static CALLBACK_COUNT: Counter = Counter::new(0);

    fn group_cb(changed: u32, _ctx: *mut ()) {
        CALLBACK_BITS.store(changed, Ordering::Relaxed);
        CALLBACK_COUNT.fetch_add(1, Ordering::Relaxed);
    }

    /// Exercises the snapshot-and-dispatch logic `wait_and_process_events`
    /// uses, without needing a platform-backed `Semaphore`: two bits set
    /// before a single drain must reach the subscribed group as one
    /// callback with both bits set (§8 event-flag coalescing).
    #[test]
    fn coalesces_multiple_signals_into_one_callback() {
        static GROUP: EventFlagGroup = EventFlagGroup::new(0x05, group_cb, core::ptr::null_mut());
        CALLBACK_COUNT.store(0, Ordering::Relaxed);

        let mut groups: HVec<&'static EventFlagGroup, MAX_FLAG_GROUPS> = HVec::new();
        groups.push(&GROUP).unwrap();

        let pending = AtomicU32::new(0);
        pending.fetch_or(1 << 0, Ordering::AcqRel);
        pending.fetch_or(1 << 2, Ordering::AcqRel);
        let bits = pending.swap(0, Ordering::AcqRel);
        for group in &groups {
            let changed = group.mask & bits;
            if changed != 0 {
                (group.callback)(changed, group.context);
            }
        }
        assert_eq!(CALLBACK_COUNT.load(Ordering::Relaxed), 1);
        assert_eq!(CALLBACK_BITS.load(Ordering::Relaxed), 0x05);
    }
}
