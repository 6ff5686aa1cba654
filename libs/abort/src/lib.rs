#![cfg_attr(not(test), no_std)]

//! Lowest-level, unconditional halt.
//!
//! This is the ultimate fallback reachable from `no_std` targets that have
//! no hosted process to exit: disable interrupts and spin forever. Hosted
//! targets get the real thing, `std::process::abort`.

#[inline(never)]
pub fn abort() -> ! {
    cfg_if::cfg_if! {
        if #[cfg(not(target_os = "none"))] {
            extern crate std;
            std::process::abort();
        } else {
            loop {
                core::hint::spin_loop();
            }
        }
    }
}
