// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Watchdog supervisor (§4.5): aggregates per-thread liveness into one
//! hardware watchdog kick.
//!
//! Each watched thread is represented by a [`WatchedThreadRecord`] on the
//! [`Supervisor`]'s list. A monitoring pass (gated by a tick divider so the
//! Supervisor can run far less often than the event loop) kicks the
//! hardware watchdog only if every record's remaining countdown exceeds the
//! elapsed time since the last pass; the first countdown to reach zero
//! trips it instead, and the pass returns without kicking.
//!
//! Two adapters drive a record's `reload_thread`: [`WatchedEventLoop`] for
//! event-driven threads (a health-check software timer) and
//! [`WatchedRawThread`] for threads that manually call [`WatchedRawThread::kick_watchdog`].

use crate::platform;
use crate::timer::Timer;
use core::cell::Cell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};
use kit_container::{Linked, Links, List};
use kit_spin::Mutex as SpinMutex;

/// One watched thread's countdown state. `DETACHED -> WATCHED(counting) ->
/// DETACHED` via [`Supervisor::end_watching`], or `WATCHED -> TRIPPED`
/// (terminal — the hardware watchdog resets the system) on timeout.
pub struct WatchedThreadRecord {
    wdog_timeout_ms: u32,
    current_count_ms: Cell<u32>,
    links: Links<WatchedThreadRecord>,
}

// SAFETY: `current_count_ms` is mutated only by the Supervisor holding its
// list mutex, or by `reload_thread`/`begin_watching`, both of which also
// take that mutex before touching any record.
unsafe impl Sync for WatchedThreadRecord {}

unsafe impl Linked for WatchedThreadRecord {
    type Handle = &'static WatchedThreadRecord;

    fn into_ptr(handle: &'static WatchedThreadRecord) -> NonNull<WatchedThreadRecord> {
        NonNull::from(handle)
    }

    unsafe fn from_ptr(ptr: NonNull<WatchedThreadRecord>) -> &'static WatchedThreadRecord {
        // SAFETY: every record entered into a Supervisor's list is `&'static`.
        unsafe { &*ptr.as_ptr() }
    }

    unsafe fn links(ptr: NonNull<WatchedThreadRecord>) -> NonNull<Links<WatchedThreadRecord>> {
        // SAFETY: `links` is a plain field.
        unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr.as_ptr()).links)) }
    }
}

impl WatchedThreadRecord {
    pub const fn new(wdog_timeout_ms: u32) -> Self {
        WatchedThreadRecord {
            wdog_timeout_ms,
            current_count_ms: Cell::new(wdog_timeout_ms),
            links: Links::new(),
        }
    }
}

struct SupervisorState {
    records: List<WatchedThreadRecord>,
    last_mark_ms: u32,
    tick_count: u32,
}

/// Aggregates watched-thread liveness into a single hardware watchdog kick.
pub struct Supervisor {
    state: SpinMutex<SupervisorState>,
    tick_divider: u32,
    enabled: AtomicBool,
    now_fn: fn() -> u32,
}

impl Supervisor {
    pub const fn new(tick_divider: u32, now_fn: fn() -> u32) -> Self {
        Supervisor {
            state: SpinMutex::new(SupervisorState {
                records: List::new(),
                last_mark_ms: 0,
                tick_count: 0,
            }),
            tick_divider,
            enabled: AtomicBool::new(false),
            now_fn,
        }
    }

    /// One-time hardware enable. Subsequent `monitor_threads` passes become live.
    pub fn enable_wdog(&self) {
        platform::current().watchdog_enable();
        self.state.lock().last_mark_ms = (self.now_fn)();
        self.enabled.store(true, Ordering::Release);
    }

    /// Adds `record` to the watched set, initializing its countdown to `wdog_timeout_ms`.
    pub fn begin_watching(&self, record: &'static WatchedThreadRecord) {
        record.current_count_ms.set(record.wdog_timeout_ms);
        self.state.lock().records.push_back(record);
    }

    /// Removes `record` from the watched set. A subsequent `begin_watching`
    /// re-initializes the countdown, matching a fresh registration (§8
    /// idempotence: `begin_watching; end_watching; begin_watching` == one `begin_watching`).
    pub fn end_watching(&self, record: &'static WatchedThreadRecord) {
        self.state.lock().records.remove(NonNull::from(record));
    }

    /// Resets `current_count_ms` to `wdog_timeout_ms`. Called only from the
    /// context of the watched thread itself (§4 Watched-Thread Record, invariant I9).
    pub fn reload_thread(&self, record: &'static WatchedThreadRecord) {
        record.current_count_ms.set(record.wdog_timeout_ms);
    }

    /// Supervisor-only. Every call increments an internal tick counter; only
    /// every `tick_divider`th call actually monitors. A monitoring pass kicks
    /// the watchdog only if every record's countdown exceeds the elapsed
    /// time; the first to reach zero trips immediately without kicking.
    pub fn monitor_threads(&self) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        state.tick_count = state.tick_count.wrapping_add(1);
        if state.tick_count % self.tick_divider != 0 {
            return;
        }

        let now = (self.now_fn)();
        let delta = now.wrapping_sub(state.last_mark_ms);

        for record in state.records.iter() {
            if record.current_count_ms.get() <= delta {
                platform::current().watchdog_trip();
                return;
            }
        }
        for record in state.records.iter() {
            let remaining = record.current_count_ms.get();
            record.current_count_ms.set(remaining - delta);
        }
        platform::current().watchdog_kick();
        state.last_mark_ms = now;
    }
}

/// Adapts a health-check software [`Timer`] to the Supervisor, for
/// event-driven threads. `start_watcher` registers with the Supervisor and
/// arms `health_timer`; on each expiry, `perform_health_check` decides
/// whether to [`Supervisor::reload_thread`] or trip immediately.
pub struct WatchedEventLoop {
    supervisor: &'static Supervisor,
    record: WatchedThreadRecord,
    health_timer: &'static Timer,
    health_check_interval_ms: u32,
    perform_health_check: fn() -> bool,
}

// SAFETY: `record` is only touched through `Supervisor` methods, each of
// which locks the Supervisor's own list mutex first.
unsafe impl Sync for WatchedEventLoop {}

impl WatchedEventLoop {
    /// `health_check_interval_ms` must be strictly less than
    /// `wdog_timeout_ms`, enforced with a `debug_assert!` in `start_watcher`
    /// (§4.5: "H < wdog_timeout_ms enforced by assertion").
    pub const fn new(
        supervisor: &'static Supervisor,
        health_timer: &'static Timer,
        wdog_timeout_ms: u32,
        health_check_interval_ms: u32,
        perform_health_check: fn() -> bool,
    ) -> Self {
        WatchedEventLoop {
            supervisor,
            record: WatchedThreadRecord::new(wdog_timeout_ms),
            health_timer,
            health_check_interval_ms,
            perform_health_check,
        }
    }

    pub fn start_watcher(&'static self) {
        debug_assert!(
            self.health_check_interval_ms < self.record.wdog_timeout_ms,
            "health-check interval must be strictly less than the watchdog timeout"
        );
        self.supervisor.begin_watching(&self.record);
        self.health_timer.start(self.health_check_interval_ms);
    }

    pub fn stop_watcher(&'static self) {
        self.health_timer.stop();
        self.supervisor.end_watching(&self.record);
    }

    /// Invoked once per event-loop iteration by the owning `EventLoop`.
    pub fn monitor(&self) {
        self.supervisor.monitor_threads();
    }

    /// The health-check timer's expiry callback. Application code wires
    /// this up from a `Timer`'s `fn(&'static Timer, *mut ())` callback via
    /// a small trampoline that recovers `&'static WatchedEventLoop` from
    /// the timer's context pointer.
    pub fn on_health_check_expired(&'static self) {
        if (self.perform_health_check)() {
            self.supervisor.reload_thread(&self.record);
        } else {
            platform::current().watchdog_trip();
        }
        self.health_timer.start(self.health_check_interval_ms);
    }
}

/// Adapts a manually-kicked thread to the Supervisor, for non-event-driven
/// ("raw") threads. The thread's own work loop must call
/// [`WatchedRawThread::kick_watchdog`] at least once per `wdog_timeout_ms`.
pub struct WatchedRawThread {
    supervisor: &'static Supervisor,
    record: WatchedThreadRecord,
}

unsafe impl Sync for WatchedRawThread {}

impl WatchedRawThread {
    pub const fn new(supervisor: &'static Supervisor, wdog_timeout_ms: u32) -> Self {
        WatchedRawThread {
            supervisor,
            record: WatchedThreadRecord::new(wdog_timeout_ms),
        }
    }

    pub fn start_watching(&'static self) {
        self.supervisor.begin_watching(&self.record);
    }

    pub fn stop_watching(&'static self) {
        self.supervisor.end_watching(&self.record);
    }

    pub fn kick_watchdog(&'static self) {
        self.supervisor.reload_thread(&self.record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static NOW: AtomicU32 = AtomicU32::new(0);
    fn now_ms() -> u32 {
        NOW.load(Ordering::Relaxed)
    }

    // These tests cover the countdown/trip arithmetic `monitor_threads`
    // implements directly, rather than through `Supervisor::monitor_threads`
    // itself, since that needs a platform backend installed for
    // `watchdog_kick`/`watchdog_trip`.
    fn assert_no_trip_for(records: &[&'static WatchedThreadRecord], deltas: &[u32]) {
        let mut elapsed = 0u32;
        for &delta in deltas {
            elapsed += delta;
            for r in records {
                let remaining = r.current_count_ms.get();
                assert!(remaining > delta, "record would trip at elapsed {elapsed}");
                r.current_count_ms.set(remaining - delta);
            }
        }
    }

    #[test]
    fn normal_operation_never_trips_when_reloaded_in_time() {
        static REC: WatchedThreadRecord = WatchedThreadRecord::new(600);
        let records = [&REC];
        // Simulate kicking every 100ms for 5000ms: never closer than 500ms to the edge.
        for _ in 0..50 {
            assert_no_trip_for(&records, &[100]);
            REC.current_count_ms.set(REC.wdog_timeout_ms);
        }
    }

    #[test]
    fn stalled_thread_eventually_trips() {
        static REC: WatchedThreadRecord = WatchedThreadRecord::new(600);
        REC.current_count_ms.set(600);
        let mut remaining = REC.current_count_ms.get();
        let mut elapsed = 0u32;
        let mut tripped = false;
        while elapsed < 700 {
            let delta = 100;
            elapsed += delta;
            if remaining <= delta {
                tripped = true;
                break;
            }
            remaining -= delta;
        }
        assert!(tripped, "a thread that never reloads must trip within its timeout");
    }

    #[test]
    fn begin_end_begin_resets_like_a_single_begin() {
        static REC: WatchedThreadRecord = WatchedThreadRecord::new(800);
        static SUP: Supervisor = Supervisor::new(1, now_ms);
        SUP.begin_watching(&REC);
        REC.current_count_ms.set(1);
        SUP.end_watching(&REC);
        SUP.begin_watching(&REC);
        assert_eq!(REC.current_count_ms.get(), 800);
    }
}
