//! # vigil-log
//!
//! Process-wide logging and crash diagnostics for a long-running daemon.
//!
//! - [`log`] / [`vlog!`]: leveled, timestamped, thread-tagged lines sent to
//!   stderr and to subscribed clients ([`ClientSink`]).
//! - [`Level::Fatal`]: after the line is written, the stack is dumped and the
//!   process aborts.
//! - [`install_fault_handlers`]: SIGILL/SIGFPE/SIGSEGV/SIGBUS become fatal
//!   lines with a decoded reason.
//! - [`get_thread_name`] / [`set_thread_name!`]: per-thread tags.
//!
//! # Usage
//!
//! ```ignore
//! use vigil_log::{Level, Logger};
//!
//! vigil_log::init(Logger::builder().level(Level::Info).build())?;
//! vigil_log::install_fault_handlers()?;
//! vigil_log::set_thread_name!("main");
//! vigil_log::log_info!("listening on {}", path.display());
//! ```

pub mod bridge;
mod error;
pub mod fatal;
pub mod fault;
mod level;
pub mod line;
mod logger;
pub mod sink;
mod thread_name;

pub use error::LogError;
pub use fault::install_fault_handlers;
pub use level::Level;
pub use logger::{init, log, logger, Logger, LoggerBuilder};
pub use sink::{ClientSink, LineSink, NoClients, Stderr};
pub use thread_name::{get_thread_name, set_thread_name};

/// Logs at an explicit level through the process logger.
#[macro_export]
macro_rules! vlog {
    ($level:expr, $($arg:tt)+) => {
        $crate::log($level, format_args!($($arg)+))
    };
}

/// Logs, dumps the stack and aborts.
#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)+) => {
        $crate::vlog!($crate::Level::Fatal, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => {
        $crate::vlog!($crate::Level::Error, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => {
        $crate::vlog!($crate::Level::Warn, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => {
        $crate::vlog!($crate::Level::Info, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => {
        $crate::vlog!($crate::Level::Debug, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)+) => {
        $crate::vlog!($crate::Level::Trace, $($arg)+)
    };
}

/// Names the calling thread: `set_thread_name!("worker-{}", id)`.
#[macro_export]
macro_rules! set_thread_name {
    ($($arg:tt)+) => {
        $crate::set_thread_name(format_args!($($arg)+))
    };
}
