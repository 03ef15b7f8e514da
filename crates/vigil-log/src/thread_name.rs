//! Per-thread human-readable names used to tag log lines.
//!
//! Each thread owns exactly one name slot. The slot stays empty until the
//! first `get_thread_name()` or `set_thread_name()` on that thread, and its
//! string is dropped together with the thread's locals. No other thread can
//! reach the slot, so nothing here locks.

use std::cell::RefCell;
use std::fmt::{self, Write};

thread_local! {
    static THREAD_NAME: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Stand-in used when the slot cannot be reached: during thread teardown, or
/// from a fault handler that interrupted this thread mid-update.
pub const UNAVAILABLE: &str = "?";

/// Returns the calling thread's name, assigning its numeric OS thread id on
/// first use.
pub fn get_thread_name() -> String {
    THREAD_NAME
        .try_with(|slot| match slot.try_borrow_mut() {
            Ok(mut slot) => slot
                .get_or_insert_with(|| os_thread_id().to_string())
                .clone(),
            Err(_) => UNAVAILABLE.to_string(),
        })
        .unwrap_or_else(|_| UNAVAILABLE.to_string())
}

/// Renders and installs a new name for the calling thread, dropping the
/// previous one. Prefer the [`set_thread_name!`](crate::set_thread_name)
/// macro.
pub fn set_thread_name(args: fmt::Arguments<'_>) -> String {
    let mut name = String::new();
    // A failing Display impl leaves whatever rendered before it.
    let _ = name.write_fmt(args);

    let _ = THREAD_NAME.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = Some(name.clone());
        }
    });
    name
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn os_thread_id() -> u64 {
    nix::unistd::gettid().as_raw() as u64
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn os_thread_id() -> u64 {
    // SAFETY: pthread_self has no preconditions.
    (unsafe { libc::pthread_self() }) as usize as u64
}
