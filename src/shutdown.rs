//! Stop request flag raised by SIGINT/SIGTERM.
//!
//! The first signal only raises the flag so the running upload can finish;
//! the handler then restores the default disposition, so a second signal
//! terminates the process right away.

use std::sync::atomic::{AtomicBool, Ordering};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn on_signal(signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
    }
}

#[cfg(unix)]
pub fn install() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    tracing::debug!("stop signal handlers installed");
}

#[cfg(not(unix))]
pub fn install() {}
