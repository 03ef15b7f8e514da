//! End-to-end crash tests.
//!
//! Each test re-runs this test binary as a child with `VIGIL_CRASH_CHILD` set,
//! so the child takes the real fault handler and fatal path and dies.

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};

const CHILD_ENV: &str = "VIGIL_CRASH_CHILD";

fn run_child(test_name: &str) -> Output {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test_name, "--test-threads=1", "--nocapture"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap()
}

fn is_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

#[test]
fn child_segv() {
    if !is_child() {
        return;
    }
    vigil_log::install_fault_handlers().unwrap();
    vigil_log::set_thread_name!("crasher");
    // Deliberate fault at an unmapped address.
    unsafe { std::ptr::read_volatile(0x10 as *const u8) };
}

#[test]
fn child_fatal() {
    if !is_child() {
        return;
    }
    vigil_log::set_thread_name!("fatal-{}", 1);
    vigil_log::log_fatal!("invariant broken: {}", "queue underflow");
}

/// Index of the first line ending with `suffix`.
fn line_ending_with(stderr: &str, suffix: &str) -> Option<usize> {
    stderr.lines().position(|l| l.ends_with(suffix))
}

/// The header follows `after`, and at least one frame line follows the header.
#[cfg(target_os = "linux")]
fn assert_trace_after(stderr: &str, thread: &str, after: usize) {
    let header = line_ending_with(stderr, &format!("[{thread}] Fatal error detected at:"))
        .unwrap_or_else(|| panic!("trace header missing:\n{stderr}"));
    assert!(header > after, "header before the fatal line:\n{stderr}");
    let frame = stderr
        .lines()
        .nth(header + 1)
        .unwrap_or_else(|| panic!("no frames after header:\n{stderr}"));
    assert!(frame.contains(&format!("[{thread}] 0x")), "{stderr}");
}

#[test]
fn test_segv_is_decoded_and_aborts() {
    if is_child() {
        return;
    }
    let output = run_child("child_segv");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{stderr}");
    let fault_line = line_ending_with(
        &stderr,
        "[crasher] Terminating due to signal 11 Segmentation fault. address not mapped to object (0x10)",
    )
    .unwrap_or_else(|| panic!("fault line missing:\n{stderr}"));
    #[cfg(target_os = "linux")]
    assert_trace_after(&stderr, "crasher", fault_line);
    #[cfg(not(target_os = "linux"))]
    let _ = fault_line;
}

#[test]
fn test_fatal_log_dumps_stack_and_aborts() {
    if is_child() {
        return;
    }
    let output = run_child("child_fatal");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{stderr}");
    let fatal_line = line_ending_with(&stderr, "[fatal-1] invariant broken: queue underflow")
        .unwrap_or_else(|| panic!("fatal line missing:\n{stderr}"));
    #[cfg(target_os = "linux")]
    assert_trace_after(&stderr, "fatal-1", fatal_line);
    #[cfg(not(target_os = "linux"))]
    let _ = fatal_line;
}

#[cfg(target_os = "linux")]
#[test]
fn test_segv_trace_starts_outside_the_logger() {
    if is_child() {
        return;
    }
    let output = run_child("child_segv");
    let stderr = String::from_utf8_lossy(&output.stderr);
    let header = line_ending_with(&stderr, "[crasher] Fatal error detected at:")
        .unwrap_or_else(|| panic!("trace header missing:\n{stderr}"));

    let frames: Vec<&str> = stderr.lines().skip(header + 1).collect();
    assert!(!frames.is_empty(), "{stderr}");
    for frame in &frames {
        assert!(!frame.contains("SymbolizedBacktrace"), "{stderr}");
        assert!(!frame.contains("FatalPath"), "{stderr}");
    }
    assert!(frames.iter().any(|f| f.contains("child_segv")), "{stderr}");
}
