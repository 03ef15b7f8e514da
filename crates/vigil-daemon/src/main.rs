use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nix::sys::signal::{raise, Signal};
use std::path::PathBuf;
use std::sync::Arc;

use vigil_config::Config;
use vigil_daemon::Subscribers;
use vigil_log::Level;

#[derive(Parser)]
#[command(name = "vigild")]
#[command(version, about = "vigil daemon: crash-safe logging with live subscribers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Start {
        /// Stderr threshold, overriding config
        #[arg(short, long)]
        level: Option<Level>,

        /// Subscriber socket path, overriding config
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Stream log lines from a running daemon
    Tail {
        /// Most verbose level to receive
        #[arg(short, long, default_value = "info")]
        level: Level,

        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,

    /// Raise a fault signal to exercise the crash path
    Crash {
        #[arg(long, value_enum, default_value = "segv")]
        signal: Fault,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Fault {
    Segv,
    Bus,
    Fpe,
    Ill,
}

impl From<Fault> for Signal {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Segv => Signal::SIGSEGV,
            Fault::Bus => Signal::SIGBUS,
            Fault::Fpe => Signal::SIGFPE,
            Fault::Ill => Signal::SIGILL,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Start {
        level: None,
        socket: None,
    }) {
        Commands::Start { level, socket } => start(level, socket),
        Commands::Tail { level, socket } => {
            let socket = socket.unwrap_or_else(|| vigil_config::config().daemon.socket.clone());
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(vigil_daemon::subscribers::tail(&socket, level))
        }
        Commands::Config => {
            print!("{}", Config::load()?.to_toml()?);
            Ok(())
        }
        Commands::Crash { signal } => crash(signal.into()),
    }
}

fn start(level: Option<Level>, socket: Option<PathBuf>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(level) = level {
        config.logging.level = level;
    }
    if let Some(socket) = socket {
        config.daemon.socket = socket;
    }

    // Logging and fault handlers go in while this is the only thread.
    let subscribers = Arc::new(Subscribers::new(config.daemon.max_subscribers));
    vigil_daemon::init_logging(&config, Arc::clone(&subscribers))?;
    tracing::info!(level = %config.logging.level, "vigild starting");

    let runtime = vigil_daemon::build_runtime()?;
    runtime.block_on(vigil_daemon::run(config, subscribers))
}

fn crash(signal: Signal) -> Result<()> {
    vigil_log::install_fault_handlers()?;
    vigil_log::set_thread_name!("crash");
    vigil_log::log_error!("Raising {} on purpose", signal);
    raise(signal)?;
    bail!("{signal} was delivered but the process survived")
}
