//! Signal-driven teardown (§5, §9 "signal-driven teardown").
//!
//! A `ctrlc`-installed handler does exactly one thing: flip a shared
//! `AtomicBool`. No device or thread teardown happens inside the handler
//! itself; the coordinator observes the flag on its own thread and performs
//! ordinary, deterministic cleanup (joining sampler threads, dropping MSR
//! file descriptors) on its way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Installs the `SIGINT`/`SIGTERM` handler and returns the flag it sets.
/// Installing twice in one process is a programmer error in `ctrlc`
/// (it returns `Err`); we only ever call this once, from `main`.
pub fn install() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .expect("failed to install signal handler");
    shutdown
}
