//! The logging entry point and the process-wide logger.
//!
//! Every call checks two gates before doing any work:
//!
//! 1. stderr: the message's level is at or below the configured threshold;
//! 2. clients: the [`ClientSink`] wants this level.
//!
//! When neither passes the call returns without formatting. Otherwise the line
//! is rendered once, handed to each sink that passed, and a fatal call then
//! runs the fatal path, which never returns.

use chrono::Local;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Arc;

use crate::fatal::{Abort, FatalPath, StackCapture, SymbolizedBacktrace, Terminate};
use crate::line::format_line;
use crate::sink::{ClientSink, LineSink, NoClients, Stderr};
use crate::thread_name::get_thread_name;
use crate::{Level, LogError};

static LOGGER: OnceCell<Logger> = OnceCell::new();

/// Installs `logger` as the process logger. Call once at startup, before
/// anything logs; the first log call otherwise installs the default logger.
pub fn init(logger: Logger) -> Result<(), LogError> {
    LOGGER.set(logger).map_err(|_| LogError::AlreadyInstalled)
}

/// The process logger.
pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(Logger::default)
}

/// Logs through the process logger. Prefer the [`vlog!`](crate::vlog) family
/// of macros.
pub fn log(level: Level, args: fmt::Arguments<'_>) {
    logger().log(level, args);
}

pub struct Logger {
    threshold: AtomicI8,
    stderr: Arc<dyn LineSink>,
    clients: Arc<dyn ClientSink>,
    fatal: FatalPath,
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::default()
    }

    /// Current stderr threshold.
    pub fn level(&self) -> Level {
        Level::from_i8(self.threshold.load(Ordering::Relaxed))
    }

    /// Meant for startup and config reloads; in-flight calls may see either value.
    pub fn set_level(&self, level: Level) {
        self.threshold.store(level.as_i8(), Ordering::Relaxed);
    }

    /// Whether a message at `level` would reach any sink.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level() || self.clients.wants(level)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        // Gates see the raw level: Fatal sits below every threshold.
        let to_stderr = level <= self.level();
        let to_clients = self.clients.wants(level);
        if !(to_stderr || to_clients) {
            return;
        }

        let line = format_line(Local::now(), &get_thread_name(), args);

        if to_stderr {
            self.stderr.write_line(line.as_bytes());
        }
        if to_clients {
            self.clients.broadcast(level, line.as_str());
        }
        if level.is_fatal() {
            self.fatal.run(self);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        LoggerBuilder::default().build()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Logger`]. Defaults: threshold `Error`, stderr, no clients,
/// `backtrace` frames, `abort()`.
pub struct LoggerBuilder {
    level: Level,
    stderr: Arc<dyn LineSink>,
    clients: Arc<dyn ClientSink>,
    stack: Arc<dyn StackCapture>,
    terminate: Arc<dyn Terminate>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self {
            level: Level::default(),
            stderr: Arc::new(Stderr),
            clients: Arc::new(NoClients),
            stack: Arc::new(SymbolizedBacktrace),
            terminate: Arc::new(Abort),
        }
    }
}

impl LoggerBuilder {
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn stderr(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.stderr = sink;
        self
    }

    pub fn clients(mut self, sink: Arc<dyn ClientSink>) -> Self {
        self.clients = sink;
        self
    }

    pub fn stack_capture(mut self, stack: Arc<dyn StackCapture>) -> Self {
        self.stack = stack;
        self
    }

    pub fn terminate(mut self, terminate: Arc<dyn Terminate>) -> Self {
        self.terminate = terminate;
        self
    }

    pub fn build(self) -> Logger {
        Logger {
            threshold: AtomicI8::new(self.level.as_i8()),
            stderr: self.stderr,
            clients: self.clients,
            fatal: FatalPath::new(self.stack, self.terminate),
        }
    }
}
