//! Routes `tracing` events through a [`Logger`].
//!
//! Code in the rest of the workspace logs with `tracing::info!(key = value,
//! "message")`. [`VigilLayer`] turns each event into one line of the form
//! `message key=value ...` and hands it to the logger, so `tracing` output
//! gets the same gates, thread tags and sinks as direct `vlog!` calls.

use std::fmt::{self, Write};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::{Level, LogError, Logger};

pub struct VigilLayer {
    logger: &'static Logger,
}

impl VigilLayer {
    pub fn new(logger: &'static Logger) -> Self {
        Self { logger }
    }

    /// Layer feeding the process logger.
    pub fn process() -> Self {
        Self::new(crate::logger())
    }
}

impl<S: Subscriber> Layer<S> for VigilLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = Level::from(*event.metadata().level());
        if !self.logger.enabled(level) {
            return;
        }
        let mut fields = EventFields::default();
        event.record(&mut fields);
        self.logger.log(level, format_args!("{fields}"));
    }
}

#[derive(Default)]
struct EventFields {
    message: String,
    rest: String,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.rest, " {}={:?}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.rest, " {}={:?}", field.name(), value);
        }
    }
}

impl fmt::Display for EventFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        f.write_str(&self.rest)
    }
}

/// `EnvFilter` directive for a threshold; `RUST_LOG` takes precedence.
pub fn filter_directive(level: Level) -> &'static str {
    match level {
        Level::Fatal | Level::Off => "off",
        other => other.as_str(),
    }
}

/// Installs a global `tracing` subscriber that feeds the process logger.
///
/// `default_directive` applies when `RUST_LOG` is unset. The logger applies
/// its own gates afterwards, so the directive only needs to let through what
/// any sink might want.
pub fn init_tracing(default_directive: &str) -> Result<(), LogError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(VigilLayer::process())
        .try_init()?;
    Ok(())
}
