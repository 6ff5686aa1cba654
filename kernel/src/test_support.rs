// Copyright 2025 Kit Authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Shared test-only backend installation.
//!
//! `cargo test` runs every `#[test]` in one process, but
//! [`crate::platform::set_backend`] fatal-errors if called twice. Any test
//! module that needs a live [`crate::platform::Backend`] (rather than
//! injecting its own "now" function, as the timer/periodic/watchdog tests
//! do) should call [`ensure_backend`] instead of constructing one directly.

use crate::platform::{self, HostedBackend};
use std::sync::OnceLock;

static BACKEND: OnceLock<&'static HostedBackend> = OnceLock::new();

/// Installs the shared [`HostedBackend`] at most once, across however many
/// test modules call this, and returns it. `set_backend` is only ever
/// invoked from inside `get_or_init`'s once-only initializer, since calling
/// it twice fatal-errors (and the production fatal handler exits the whole
/// `cargo test` process, not just the calling test). The backend is
/// intentionally leaked: it must outlive every test, and this module never
/// runs outside `cargo test`.
pub fn ensure_backend() -> &'static HostedBackend {
    *BACKEND.get_or_init(|| {
        let backend: &'static HostedBackend = Box::leak(Box::new(HostedBackend::new()));
        platform::set_backend(backend);
        backend
    })
}
