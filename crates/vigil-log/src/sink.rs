//! Destinations for formatted lines.

use libc::c_void;

use crate::Level;

/// Local line destination; the process logger writes to [`Stderr`].
pub trait LineSink: Send + Sync {
    /// `line` is one complete, newline-terminated log line.
    fn write_line(&self, line: &[u8]);
}

/// Writes each line to fd 2 with a single `write(2)`, so lines from
/// concurrent threads interleave whole or not at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stderr;

impl LineSink for Stderr {
    fn write_line(&self, line: &[u8]) {
        // Short writes and errors are dropped: there is nowhere left to report them.
        // SAFETY: pointer and length come from a live slice borrowed for the call.
        unsafe {
            libc::write(
                libc::STDERR_FILENO,
                line.as_ptr() as *const c_void,
                line.len(),
            );
        }
    }
}

/// Subscribed clients that want a copy of log lines.
///
/// The logger only consults and feeds this sink. Implementations own their
/// concurrency, and `broadcast` may be called from a fault handler.
pub trait ClientSink: Send + Sync {
    /// Whether any client currently wants lines of `level`.
    fn wants(&self, level: Level) -> bool;

    /// Delivers a formatted line with the severity it was logged at.
    fn broadcast(&self, level: Level, line: &str);
}

/// No clients, ever.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClients;

impl ClientSink for NoClients {
    fn wants(&self, _level: Level) -> bool {
        false
    }

    fn broadcast(&self, _level: Level, _line: &str) {}
}
