// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Deterministic, slippage-reporting periodic scheduler (§4.4).
//!
//! Each interval fires on the boundary `floor(now/duration)*duration`
//! rather than `duration` ms after the previous firing, so firings stay
//! aligned to a fixed grid even if the loop occasionally runs late. A late
//! pass that crosses more than one boundary fires the callback once (not
//! once per missed boundary) and reports the slippage.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::Vec as HVec;

const MAX_INTERVALS: usize = 8;

/// Reports that interval `ctx` missed its deadline: the boundary it should
/// have fired on (`missed_boundary`) versus `now`.
pub type SlippageReporter = fn(context: *mut (), now: u64, missed_boundary: u64);

/// One periodic callback, firing on a deterministic grid of `duration_ms`.
pub struct Interval {
    callback: fn(now: u64, boundary: u64, context: *mut ()),
    context: *mut (),
    duration_ms: u64,
    time_marker: Cell<u64>,
    initialized: AtomicBool,
}

// SAFETY: `context` is only ever passed to `callback`/the slippage reporter
// the owner supplied for exactly this pointer; `time_marker` is only
// touched from the scheduler's single-threaded `run`.
unsafe impl Sync for Interval {}

impl Interval {
    pub const fn new(
        duration_ms: u64,
        callback: fn(u64, u64, *mut ()),
        context: *mut (),
    ) -> Self {
        Interval {
            callback,
            context,
            duration_ms,
            time_marker: Cell::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    fn boundary(&self, now: u64) -> u64 {
        (now / self.duration_ms) * self.duration_ms
    }
}

/// Composes a fixed set of [`Interval`]s with an injected "now" source.
pub struct PeriodicScheduler {
    intervals: kit_spin::Mutex<HVec<&'static Interval, MAX_INTERVALS>>,
    reporter: Option<SlippageReporter>,
}

impl PeriodicScheduler {
    pub const fn new() -> Self {
        PeriodicScheduler { intervals: kit_spin::Mutex::new(HVec::new()), reporter: None }
    }

    pub const fn with_reporter(reporter: SlippageReporter) -> Self {
        PeriodicScheduler { intervals: kit_spin::Mutex::new(HVec::new()), reporter: Some(reporter) }
    }

    /// Registers an interval. Safe to call any time, though normally done
    /// once during setup before [`PeriodicScheduler::begin_loop`].
    ///
    /// # Panics (fatal)
    /// Fatal-errors (`Osal`) once [`MAX_INTERVALS`] intervals are registered.
    pub fn add_interval(&self, interval: &'static Interval) {
        if self.intervals.lock().push(interval).is_err() {
            crate::error::fatal(crate::error::ErrorKind::Osal);
        }
    }

    /// Aligns every interval's `time_marker` to its current boundary, so
    /// the first firing lands on a natural grid point (possibly sooner than
    /// a full `duration_ms` away — documented, not a bug).
    pub fn begin_loop(&self, now: u64) {
        for interval in self.intervals.lock().iter() {
            interval.time_marker.set(interval.boundary(now));
            interval.initialized.store(true, Ordering::Relaxed);
        }
    }

    /// Evaluates every interval against `now`. Returns whether at least one fired.
    pub fn run(&self, now: u64) -> bool {
        let mut any_ran = false;
        for interval in self.intervals.lock().iter() {
            if !interval.initialized.load(Ordering::Relaxed) {
                interval.time_marker.set(interval.boundary(now));
                interval.initialized.store(true, Ordering::Relaxed);
                continue;
            }
            let boundary = interval.boundary(now);
            let marker = interval.time_marker.get();
            if boundary == marker {
                continue;
            }
            if boundary == marker + interval.duration_ms {
                (interval.callback)(now, boundary, interval.context);
                interval.time_marker.set(boundary);
                any_ran = true;
            } else if boundary > marker + interval.duration_ms {
                // The callback itself is invoked with the *first* boundary
                // this pass missed (`marker + duration`), not the current
                // one — when more than one period is skipped in a single
                // jump these differ, and the callback only ever sees the
                // deadline it was due at, never a boundary further ahead
                // (see DESIGN.md for the worked example this follows).
                // `time_marker` still advances all the way to `boundary`,
                // so the next call treats this pass as caught up.
                let missed = marker + interval.duration_ms;
                (interval.callback)(now, missed, interval.context);
                interval.time_marker.set(boundary);
                any_ran = true;
                if let Some(reporter) = self.reporter {
                    reporter(interval.context, now, missed);
                }
            }
        }
        any_ran
    }
}

impl Default for PeriodicScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, AtomicU64};

    static APPLE_FIRES: AtomicU32 = AtomicU32::new(0);
    static APPLE_LAST: AtomicU64 = AtomicU64::new(0);
    static ORANGE_FIRES: AtomicU32 = AtomicU32::new(0);
    static CHERRY_FIRES: AtomicU32 = AtomicU32::new(0);
    static CHERRY_LAST: AtomicU64 = AtomicU64::new(0);
    static SLIPS: AtomicU32 = AtomicU32::new(0);

    fn apple_cb(_now: u64, boundary: u64, _ctx: *mut ()) {
        APPLE_FIRES.fetch_add(1, Ordering::Relaxed);
        APPLE_LAST.store(boundary, Ordering::Relaxed);
    }
    fn orange_cb(_now: u64, _boundary: u64, _ctx: *mut ()) {
        ORANGE_FIRES.fetch_add(1, Ordering::Relaxed);
    }
    fn cherry_cb(_now: u64, boundary: u64, _ctx: *mut ()) {
        CHERRY_FIRES.fetch_add(1, Ordering::Relaxed);
        CHERRY_LAST.store(boundary, Ordering::Relaxed);
    }
    fn reporter(_ctx: *mut (), _now: u64, _missed: u64) {
        SLIPS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn apple_orange_cherry_slippage_scenario() {
        APPLE_FIRES.store(0, Ordering::Relaxed);
        ORANGE_FIRES.store(0, Ordering::Relaxed);
        CHERRY_FIRES.store(0, Ordering::Relaxed);
        SLIPS.store(0, Ordering::Relaxed);

        static APPLE: Interval = Interval::new(10, apple_cb, 0xCAFE as *mut ());
        static ORANGE: Interval = Interval::new(20, orange_cb, 0xBEEF as *mut ());
        static CHERRY: Interval = Interval::new(7, cherry_cb, 0xFEED as *mut ());
        static SCHED: PeriodicScheduler = PeriodicScheduler::with_reporter(reporter);

        SCHED.add_interval(&APPLE);
        SCHED.add_interval(&ORANGE);
        SCHED.add_interval(&CHERRY);
        SCHED.begin_loop(5);

        SCHED.run(10);
        assert_eq!(APPLE_FIRES.load(Ordering::Relaxed), 1);
        assert_eq!(APPLE_LAST.load(Ordering::Relaxed), 10);
        assert_eq!(ORANGE_FIRES.load(Ordering::Relaxed), 0, "orange's 20ms boundary hasn't passed yet");
        assert_eq!(CHERRY_FIRES.load(Ordering::Relaxed), 1);
        assert_eq!(CHERRY_LAST.load(Ordering::Relaxed), 7);
        assert_eq!(SLIPS.load(Ordering::Relaxed), 0);

        // Slip a single interval for both apple and cherry.
        SCHED.run(30);
        assert_eq!(APPLE_FIRES.load(Ordering::Relaxed), 2);
        assert_eq!(APPLE_LAST.load(Ordering::Relaxed), 20);
        assert_eq!(ORANGE_FIRES.load(Ordering::Relaxed), 1);
        assert_eq!(CHERRY_FIRES.load(Ordering::Relaxed), 2);
        assert_eq!(CHERRY_LAST.load(Ordering::Relaxed), 14);
        assert_eq!(SLIPS.load(Ordering::Relaxed), 2, "both apple and cherry slipped");

        // Caught up: every interval lands exactly on its next boundary.
        SCHED.run(40);
        assert_eq!(APPLE_FIRES.load(Ordering::Relaxed), 3);
        assert_eq!(APPLE_LAST.load(Ordering::Relaxed), 40);
        assert_eq!(ORANGE_FIRES.load(Ordering::Relaxed), 2);
        assert_eq!(CHERRY_FIRES.load(Ordering::Relaxed), 3);
        assert_eq!(CHERRY_LAST.load(Ordering::Relaxed), 35);
        assert_eq!(SLIPS.load(Ordering::Relaxed), 2, "no new slippage once caught up");

        // A bigger jump slips both again.
        SCHED.run(70);
        assert_eq!(APPLE_FIRES.load(Ordering::Relaxed), 4);
        assert_eq!(APPLE_LAST.load(Ordering::Relaxed), 50);
        assert_eq!(ORANGE_FIRES.load(Ordering::Relaxed), 3);
        assert_eq!(CHERRY_FIRES.load(Ordering::Relaxed), 4);
        assert_eq!(CHERRY_LAST.load(Ordering::Relaxed), 42);
        assert_eq!(SLIPS.load(Ordering::Relaxed), 4);

        // Back on the grid: boundaries line up again, no further slippage.
        SCHED.run(80);
        assert_eq!(APPLE_FIRES.load(Ordering::Relaxed), 5);
        assert_eq!(APPLE_LAST.load(Ordering::Relaxed), 80);
        assert_eq!(ORANGE_FIRES.load(Ordering::Relaxed), 4);
        assert_eq!(CHERRY_FIRES.load(Ordering::Relaxed), 5);
        assert_eq!(CHERRY_LAST.load(Ordering::Relaxed), 77);
        assert_eq!(SLIPS.load(Ordering::Relaxed), 4, "no new slippage");
    }
}
