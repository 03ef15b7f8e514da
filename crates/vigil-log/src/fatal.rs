//! What happens after a fatal line has been written: dump the stack, then die.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Level, Logger};

/// Frames captured for a fatal trace.
pub const MAX_FRAMES: usize = 24;

pub const FATAL_HEADER: &str = "Fatal error detected at:";

/// Source of symbolized stack frames, innermost first.
pub trait StackCapture: Send + Sync {
    /// At most `max_frames` frames, or `None` when the platform cannot unwind.
    fn capture(&self, max_frames: usize) -> Option<Vec<String>>;
}

/// Ends the process.
pub trait Terminate: Send + Sync {
    fn terminate(&self) -> !;
}

/// Walks the current thread's stack with the `backtrace` crate.
///
/// Frames belonging to the logger itself (the unwinder, the fatal path, the
/// dispatcher and the fault handler) are dropped, so the budget goes to the
/// caller's frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolizedBacktrace;

impl StackCapture for SymbolizedBacktrace {
    fn capture(&self, max_frames: usize) -> Option<Vec<String>> {
        let mut frames = Vec::with_capacity(max_frames);
        if max_frames == 0 {
            return Some(frames);
        }
        backtrace::trace(|frame| {
            let ip = frame.ip();
            let mut described = None;
            let mut internal = false;
            backtrace::resolve_frame(frame, |symbol| {
                if described.is_some() {
                    return;
                }
                let mut text = format!("{ip:p}");
                if let Some(name) = symbol.name() {
                    internal = is_internal_frame(&format!("{name:#}"));
                    text.push_str(&format!(" {name}"));
                }
                if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                    text.push_str(&format!(" ({}:{line})", file.display()));
                }
                described = Some(text);
            });
            if internal {
                // Everything above a logger frame is logger machinery too.
                frames.clear();
                return true;
            }
            frames.push(described.unwrap_or_else(|| format!("{ip:p}")));
            frames.len() < max_frames
        });
        Some(frames)
    }
}

const INTERNAL_PREFIXES: [&str; 4] = [
    "backtrace::",
    "vigil_log::fatal::",
    "vigil_log::logger::",
    "vigil_log::fault::",
];

/// Whether a demangled symbol (without hash) belongs to the unwinder or the
/// logger's own fatal machinery. Trait impls render as `<Type as Trait>::f`.
fn is_internal_frame(name: &str) -> bool {
    let name = name.trim_start_matches('<');
    INTERNAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// `abort()`: no unwinding, no destructors, no atexit hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Abort;

impl Terminate for Abort {
    fn terminate(&self) -> ! {
        std::process::abort()
    }
}

pub(crate) struct FatalPath {
    stack: Arc<dyn StackCapture>,
    terminate: Arc<dyn Terminate>,
    pub(crate) in_progress: AtomicBool,
}

impl FatalPath {
    pub(crate) fn new(stack: Arc<dyn StackCapture>, terminate: Arc<dyn Terminate>) -> Self {
        Self {
            stack,
            terminate,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Logs the trace through `logger` at error severity and terminates.
    pub(crate) fn run(&self, logger: &Logger) -> ! {
        // A fault while tracing lands here again: stop immediately.
        if self.in_progress.swap(true, Ordering::SeqCst) {
            self.terminate.terminate();
        }

        if let Some(frames) = self.stack.capture(MAX_FRAMES) {
            logger.log(Level::Error, format_args!("{FATAL_HEADER}"));
            for frame in &frames {
                logger.log(Level::Error, format_args!("{frame}"));
            }
        }
        self.terminate.terminate()
    }
}
