//! # vigil-daemon
//!
//! Startup wiring for `vigild`: process logger, fault handlers, the `tracing`
//! bridge and the subscriber socket.

pub mod subscribers;

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tracing::info;
use vigil_config::Config;
use vigil_log::Logger;

pub use subscribers::Subscribers;

/// `tracing` directive when `RUST_LOG` is unset. The process logger applies
/// the configured threshold on top of it.
pub const TRACING_DIRECTIVE: &str = "warn,vigil_daemon=trace,vigil_config=trace";

/// Installs the process logger and fault handlers, and names the calling
/// thread. Call from `main` before any other thread exists.
pub fn init_logging(config: &Config, subscribers: Arc<Subscribers>) -> Result<()> {
    vigil_log::init(
        Logger::builder()
            .level(config.logging.level)
            .clients(subscribers)
            .build(),
    )?;
    vigil_log::set_thread_name!("{}", config.logging.thread_name);
    if config.logging.fault_handlers {
        vigil_log::install_fault_handlers()?;
    }
    vigil_log::bridge::init_tracing(TRACING_DIRECTIVE)?;
    Ok(())
}

/// Multi-threaded runtime whose threads name themselves `rt-<n>`.
pub fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .on_thread_start(|| {
            let n = NEXT.fetch_add(1, Ordering::Relaxed);
            vigil_log::set_thread_name!("rt-{}", n);
        })
        .build()
}

/// Binds the subscriber socket, replacing a stale one.
pub fn bind(socket: &Path) -> std::io::Result<UnixListener> {
    if socket.exists() {
        std::fs::remove_file(socket)?;
    }
    UnixListener::bind(socket)
}

/// Serves subscribers until Ctrl-C.
pub async fn run(config: Config, subscribers: Arc<Subscribers>) -> Result<()> {
    let socket = config.daemon.socket.clone();
    let listener = bind(&socket)?;
    info!(socket = %socket.display(), "Listening for log subscribers");

    let heartbeat = (config.daemon.heartbeat_secs > 0).then(|| {
        tokio::spawn(heartbeat(
            Duration::from_secs(config.daemon.heartbeat_secs),
            Arc::clone(&subscribers),
        ))
    });

    tokio::select! {
        result = subscribers::serve(listener, subscribers) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Some(heartbeat) = heartbeat {
        heartbeat.abort();
    }
    if let Err(e) = std::fs::remove_file(&socket) {
        tracing::debug!(error = %e, "Socket already gone");
    }
    info!("Daemon stopped");
    Ok(())
}

async fn heartbeat(every: Duration, subscribers: Arc<Subscribers>) {
    let started = Instant::now();
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        info!(
            uptime_secs = started.elapsed().as_secs(),
            subscribers = subscribers.count(),
            "Heartbeat"
        );
    }
}
