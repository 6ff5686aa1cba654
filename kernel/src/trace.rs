// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Diagnostic trace subsystem (§6 Trace format, §5 two-mutex policy).
//!
//! This crate doesn't implement its own formatter or output sink — that's
//! peripheral plumbing per the specification's non-goals. Instead it
//! layers a runtime info-level filter and a named-subsection gate on top of
//! the [`log`] facade, so an application's chosen `log::Log` implementation
//! (a UART writer on bare metal, `env_logger` when hosted) does the actual
//! formatting and I/O.

use core::sync::atomic::{AtomicU8, Ordering};
use kit_spin::Mutex as SpinMutex;

/// Runtime trace verbosity, from least to most detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum InfoLevel {
    None = 0,
    Brief = 1,
    Info = 2,
    Verbose = 3,
    Max = 4,
}

impl InfoLevel {
    const fn from_u8(v: u8) -> InfoLevel {
        match v {
            0 => InfoLevel::None,
            1 => InfoLevel::Brief,
            2 => InfoLevel::Info,
            3 => InfoLevel::Verbose,
            _ => InfoLevel::Max,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(InfoLevel::Info as u8);

/// Sets the runtime info level. Configurable independently of the
/// build-time `log` max-level filter.
pub fn set_level(level: InfoLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> InfoLevel {
    InfoLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

const MAX_SUBSECTIONS: usize = 16;

/// Named subsection enablement, e.g. `"timer"`, `"watchdog.*"` (a trailing
/// `*` matches any suffix, so `"watchdog.*"` enables `"watchdog.apple"`).
static ENABLED_SUBSECTIONS: SpinMutex<heapless::Vec<heapless::String<32>, MAX_SUBSECTIONS>> =
    SpinMutex::new(heapless::Vec::new());

/// Enables tracing for `name`, or for every subsection matching `name` if
/// it ends in `*`.
///
/// # Panics (fatal)
/// Fatal-errors (`Osal`) if more than [`MAX_SUBSECTIONS`] names are registered,
/// or if `name` doesn't fit the 32-byte subsection name buffer.
pub fn enable_subsection(name: &str) {
    let mut entry = heapless::String::new();
    if entry.push_str(name).is_err() {
        crate::error::fatal(crate::error::ErrorKind::Osal);
        return;
    }
    if ENABLED_SUBSECTIONS.lock().push(entry).is_err() {
        crate::error::fatal(crate::error::ErrorKind::Osal);
    }
}

/// Whether `name` is enabled, either exactly or via a `prefix*` wildcard
/// registered with [`enable_subsection`].
pub fn is_subsection_enabled(name: &str) -> bool {
    ENABLED_SUBSECTIONS.lock().iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            name.starts_with(prefix)
        } else {
            pattern.as_str() == name
        }
    })
}

/// Location fields carried by [`trace!`] (§6: `{FILE,LINE,FUNC}`).
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
}

/// Emits a trace line through [`log`] if `level` is enabled and (when
/// `section` is `Some`) that subsection is enabled. The thread name is
/// filled in by the `log::Log` implementation from its own record target,
/// matching how the teacher's logging is layered.
pub fn emit(min_level: InfoLevel, section: Option<&str>, loc: Location, args: core::fmt::Arguments<'_>) {
    if level() < min_level {
        return;
    }
    if let Some(section) = section {
        if !is_subsection_enabled(section) {
            return;
        }
    }
    log::log!(log::Level::Info, "[{}:{}] {}", loc.file, loc.line, args);
}

/// Emits a trace line at [`InfoLevel::Info`] with no subsection gate,
/// capturing the call site automatically.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::trace::emit(
            $crate::trace::InfoLevel::Info,
            None,
            $crate::trace::Location { file: file!(), line: line!() },
            core::format_args!($($arg)*),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_subsection_matches_prefix() {
        enable_subsection("watchdog.*");
        assert!(is_subsection_enabled("watchdog.apple"));
        assert!(!is_subsection_enabled("timer.apple"));
    }

    #[test]
    fn exact_subsection_matches_only_itself() {
        enable_subsection("timer");
        assert!(is_subsection_enabled("timer"));
        assert!(!is_subsection_enabled("timer.sub"));
    }

    #[test]
    fn level_ordering_gates_emit() {
        set_level(InfoLevel::Brief);
        assert!(level() < InfoLevel::Verbose);
        set_level(InfoLevel::Info);
    }
}
