// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Software timer manager (§4.2).
//!
//! Two lists, `counters` (the list being walked by `process_timers`) and
//! `pending_attach` (timers armed from inside a callback during that walk).
//! A callback that re-arms itself or another timer mutates `pending_attach`
//! only, so `counters` is never mutated while it's being iterated —
//! `tick_complete` drains `pending_attach` into `counters` afterwards.

use core::cell::Cell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use kit_container::{Linked, Links, List};
use kit_spin::Mutex as SpinMutex;

/// A software countdown timer. Lives in a `static` and is armed against a
/// [`TimerManager`]; deleting a `Timer` while armed is undefined, callers
/// must [`Timer::stop`] first (§4 Software Timer lifecycle).
pub struct Timer {
    manager: &'static TimerManager,
    callback: fn(&'static Timer, *mut ()),
    context: *mut (),
    countdown_ms: Cell<u32>,
    links: Links<Timer>,
}

// SAFETY: `context` is only ever dereferenced by the callback the caller
// supplied for exactly this pointer; the `Timer` itself carries no other
// unsynchronized mutable state reachable from multiple threads (`countdown_ms`
// is only touched while the manager's list mutex is held).
unsafe impl Sync for Timer {}

// SAFETY: see the `Sync` impl above; `Timer` holds no thread-affine state.
unsafe impl Send for Timer {}

unsafe impl Linked for Timer {
    type Handle = &'static Timer;

    fn into_ptr(handle: &'static Timer) -> NonNull<Timer> {
        NonNull::from(handle)
    }

    unsafe fn from_ptr(ptr: NonNull<Timer>) -> &'static Timer {
        // SAFETY: every `Timer` entered into a manager's lists is `&'static`.
        unsafe { &*ptr.as_ptr() }
    }

    unsafe fn links(ptr: NonNull<Timer>) -> NonNull<Links<Timer>> {
        // SAFETY: `links` is a plain field.
        unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr.as_ptr()).links)) }
    }
}

impl Timer {
    /// Constructs a detached timer. `context` is passed back to `callback`
    /// verbatim on expiry; it is the caller's responsibility that it stays
    /// valid for as long as the timer may fire.
    pub const fn new(
        manager: &'static TimerManager,
        callback: fn(&'static Timer, *mut ()),
        context: *mut (),
    ) -> Self {
        Timer {
            manager,
            callback,
            context,
            countdown_ms: Cell::new(0),
            links: Links::new(),
        }
    }

    /// (Re)arms the timer for `duration_ms`. Detaches first if already
    /// armed, so `start; stop; start(d)` and a bare `start(d)` are equivalent.
    pub fn start(&'static self, duration_ms: u32) {
        self.manager.detach(self);
        self.countdown_ms.set(duration_ms);
        self.manager.attach(self);
    }

    /// Detaches the timer if armed. Returns whether it was present.
    pub fn stop(&'static self) -> bool {
        self.manager.detach(self)
    }

    fn fire(&'static self) {
        (self.callback)(self, self.context);
    }
}

struct TimerLists {
    counters: List<Timer>,
    pending_attach: List<Timer>,
    in_tick_call: bool,
}

/// Drives a set of [`Timer`]s from a host tick source. `process_timers`
/// should be called once per event-loop iteration.
pub struct TimerManager {
    lists: SpinMutex<TimerLists>,
    mark_ms: AtomicU32,
    started: AtomicBool,
    now_fn: fn() -> u32,
}

impl TimerManager {
    /// `now_fn` supplies the current tick in milliseconds; production code
    /// passes `crate::platform::Backend::elapsed_ms`, tests inject a virtual clock.
    pub const fn new(now_fn: fn() -> u32) -> Self {
        TimerManager {
            lists: SpinMutex::new(TimerLists {
                counters: List::new(),
                pending_attach: List::new(),
                in_tick_call: false,
            }),
            mark_ms: AtomicU32::new(0),
            started: AtomicBool::new(false),
            now_fn,
        }
    }

    /// Records the initial mark. Idempotent-safe to call once before the
    /// first `process_timers`.
    pub fn start_manager(&self) {
        self.mark_ms.store((self.now_fn)(), Ordering::Relaxed);
        self.started.store(true, Ordering::Release);
    }

    fn attach(&self, timer: &'static Timer) {
        let mut lists = self.lists.lock();
        if lists.in_tick_call {
            lists.pending_attach.push_back(timer);
        } else {
            lists.counters.push_back(timer);
        }
    }

    fn detach(&self, timer: &'static Timer) -> bool {
        let mut lists = self.lists.lock();
        let ptr = NonNull::from(timer);
        if lists.counters.remove(ptr).is_some() {
            return true;
        }
        lists.pending_attach.remove(ptr).is_some()
    }

    /// Advances every armed timer by `now - mark` (modular-unsigned, so a
    /// 32-bit millisecond counter rolling over is tolerated), fires every
    /// timer whose countdown reached zero, then drains `pending_attach`.
    ///
    /// A timer that re-arms itself from inside its own callback lands on
    /// `pending_attach` and therefore does not fire again within this pass.
    pub fn process_timers(&self) {
        let now = (self.now_fn)();
        let mark = self.mark_ms.load(Ordering::Relaxed);
        let delta = now.wrapping_sub(mark);

        self.lists.lock().in_tick_call = true;

        loop {
            let expired = {
                let mut lists = self.lists.lock();
                let found = lists
                    .counters
                    .iter()
                    .find(|t| t.countdown_ms.get() <= delta)
                    .map(|t| NonNull::from(t));
                match found {
                    Some(ptr) => lists.counters.remove(ptr),
                    None => None,
                }
            };
            match expired {
                Some(timer) => timer.fire(),
                None => break,
            }
        }

        {
            let lists = self.lists.lock();
            for t in lists.counters.iter() {
                t.countdown_ms.set(t.countdown_ms.get() - delta);
            }
        }

        self.mark_ms.store(now, Ordering::Relaxed);
        self.tick_complete();
    }

    fn tick_complete(&self) {
        let mut lists = self.lists.lock();
        lists.in_tick_call = false;
        let TimerLists { pending_attach, counters, .. } = &mut *lists;
        pending_attach.move_into(counters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32 as Clock, AtomicU32, Ordering};

    static VIRTUAL_NOW: Clock = Clock::new(0);
    fn virtual_now() -> u32 {
        VIRTUAL_NOW.load(Ordering::Relaxed)
    }
    fn advance(ms: u32) {
        VIRTUAL_NOW.fetch_add(ms, Ordering::Relaxed);
    }

    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);
    static LAST_FIRE_AT: AtomicU32 = AtomicU32::new(0);

    fn single_shot_cb(_t: &'static Timer, _ctx: *mut ()) {
        FIRE_COUNT.fetch_add(1, Ordering::Relaxed);
        LAST_FIRE_AT.store(virtual_now(), Ordering::Relaxed);
    }

    #[test]
    fn single_shot_fires_once_at_expiry() {
        VIRTUAL_NOW.store(0, Ordering::Relaxed);
        FIRE_COUNT.store(0, Ordering::Relaxed);
        static MANAGER: TimerManager = TimerManager::new(virtual_now);
        static TIMER: Timer = Timer::new(&MANAGER, single_shot_cb, core::ptr::null_mut());

        MANAGER.start_manager();
        TIMER.start(100);

        advance(99);
        MANAGER.process_timers();
        assert_eq!(FIRE_COUNT.load(Ordering::Relaxed), 0);

        advance(1);
        MANAGER.process_timers();
        assert_eq!(FIRE_COUNT.load(Ordering::Relaxed), 1);
        assert_eq!(LAST_FIRE_AT.load(Ordering::Relaxed), 100);
    }

    static REARM_COUNT: AtomicU32 = AtomicU32::new(0);

    fn rearm_cb(t: &'static Timer, _ctx: *mut ()) {
        REARM_COUNT.fetch_add(1, Ordering::Relaxed);
        t.start(50);
    }

    #[test]
    fn rearm_inside_callback_does_not_refire_same_pass() {
        VIRTUAL_NOW.store(0, Ordering::Relaxed);
        REARM_COUNT.store(0, Ordering::Relaxed);
        static MANAGER: TimerManager = TimerManager::new(virtual_now);
        static TIMER: Timer = Timer::new(&MANAGER, rearm_cb, core::ptr::null_mut());

        MANAGER.start_manager();
        TIMER.start(100);

        advance(100);
        MANAGER.process_timers();
        assert_eq!(REARM_COUNT.load(Ordering::Relaxed), 1, "first 100ms expiry fires once");

        // Re-armed for 50ms starting at t=100. A pass at t=140 (delta 40 since
        // the 50ms re-arm) must not fire it yet — it lands on `pending_attach`
        // during the expiry pass, so it is not even visible to `counters`
        // until `tick_complete`, and then needs its own countdown to elapse.
        advance(40);
        MANAGER.process_timers();
        assert_eq!(REARM_COUNT.load(Ordering::Relaxed), 1, "not yet due");

        // A further 20ms (60ms total since re-arm) crosses the 50ms mark.
        advance(20);
        MANAGER.process_timers();
        assert_eq!(REARM_COUNT.load(Ordering::Relaxed), 2, "second expiry near +150ms total");
    }

    #[test]
    fn start_stop_start_equals_bare_start() {
        VIRTUAL_NOW.store(0, Ordering::Relaxed);
        FIRE_COUNT.store(0, Ordering::Relaxed);
        static MANAGER: TimerManager = TimerManager::new(virtual_now);
        static TIMER: Timer = Timer::new(&MANAGER, single_shot_cb, core::ptr::null_mut());

        MANAGER.start_manager();
        TIMER.start(100);
        TIMER.stop();
        TIMER.start(100);

        advance(100);
        MANAGER.process_timers();
        assert_eq!(FIRE_COUNT.load(Ordering::Relaxed), 1);
    }
}
