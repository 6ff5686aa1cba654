// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Leveled startup hooks (§4.7).
//!
//! A hook self-registers at construction time into a level-partitioned
//! list; [`run_all`] (called from [`crate::initialize`]) drains the lists
//! in `TEST_INFRA -> SYSTEM -> MIDDLE_WARE -> APPLICATION` order.

use kit_spin::Mutex as SpinMutex;

/// Startup ordering level. Hooks within the same level run in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    TestInfra,
    System,
    MiddleWare,
    Application,
}

const LEVELS: [Level; 4] = [Level::TestInfra, Level::System, Level::MiddleWare, Level::Application];

type Hook = fn(Level);

struct Registry {
    hooks: heapless::Vec<(Level, Hook), 64>,
}

static REGISTRY: SpinMutex<Registry> = SpinMutex::new(Registry {
    hooks: heapless::Vec::new(),
});

/// Registers `hook` to run at `level` during [`crate::initialize`].
///
/// Intended to be called from a `ctor`-style static initializer or from
/// explicit application setup code before `initialize()` runs.
///
/// # Panics (fatal)
/// Fatal-errors (`Osal`) if more than 64 hooks are registered.
pub fn register(level: Level, hook: Hook) {
    let mut reg = REGISTRY.lock();
    if reg.hooks.push((level, hook)).is_err() {
        crate::error::fatal(crate::error::ErrorKind::Osal);
    }
}

/// Runs every registered hook, level by level, in registration order within a level.
pub fn run_all() {
    // Wire the container crate's violation handler into our fatal-error
    // taxonomy once, before anything can touch an intrusive list.
    kit_container::set_violation_handler(|_msg| {
        crate::error::fatal(crate::error::ErrorKind::Container);
    });

    let reg = REGISTRY.lock();
    for &level in &LEVELS {
        for &(hook_level, hook) in reg.hooks.iter() {
            if hook_level == level {
                hook(level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU8, Ordering};

    static ORDER: AtomicU8 = AtomicU8::new(0);
    static SEEN: SpinMutex<heapless::Vec<Level, 4>> = SpinMutex::new(heapless::Vec::new());

    fn record(level: Level) {
        ORDER.fetch_add(1, Ordering::Relaxed);
        let _ = SEEN.lock().push(level);
    }

    #[test]
    fn hooks_run_in_level_order() {
        register(Level::Application, record);
        register(Level::TestInfra, record);
        register(Level::System, record);
        run_all();
        let seen = SEEN.lock();
        let positions: heapless::Vec<Level, 4> = seen.clone();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }
}
