use nix::errno::Errno;
use nix::sys::signal::Signal;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("unknown log level: {0:?}")]
    UnknownLevel(String),
    #[error("process logger already installed")]
    AlreadyInstalled,
    #[error("failed to install {signal} handler: {source}")]
    Sigaction {
        signal: Signal,
        #[source]
        source: Errno,
    },
    #[error("tracing bridge: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
}
