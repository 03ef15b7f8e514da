//! Live log subscribers over a Unix socket.
//!
//! Protocol: the client connects and sends one line naming the most verbose
//! level it wants (`"debug\n"`). The daemon then streams every log line at
//! that severity or worse until either side hangs up. Fatal lines go to every
//! subscriber. A subscriber that falls behind skips the lines it missed; the
//! count is reported once, when it disconnects. Logging each lag event would
//! feed more lines into the channel it is already behind on.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use vigil_log::{ClientSink, Level};

/// Lines buffered per subscriber before it starts skipping.
pub const CHANNEL_CAPACITY: usize = 1024;

/// One slot per threshold from `Off` to `Trace`.
const SLOTS: usize = Level::Trace as usize + 1;

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub line: Arc<str>,
}

#[derive(Debug, thiserror::Error)]
#[error("too many subscribers (limit {limit})")]
pub struct TooManySubscribers {
    pub limit: usize,
}

/// The daemon's [`ClientSink`]: counts subscribers per requested level and
/// fans lines out through a broadcast channel.
pub struct Subscribers {
    per_level: [AtomicUsize; SLOTS],
    total: AtomicUsize,
    limit: usize,
    tx: broadcast::Sender<LogRecord>,
}

impl Subscribers {
    pub fn new(limit: usize) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            per_level: std::array::from_fn(|_| AtomicUsize::new(0)),
            total: AtomicUsize::new(0),
            limit,
            tx,
        }
    }

    pub fn count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Registers a subscriber for lines at `level` or worse.
    pub fn subscribe(self: &Arc<Self>, level: Level) -> Result<Subscription, TooManySubscribers> {
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .map_err(|_| TooManySubscribers { limit: self.limit })?;

        let level = level.max(Level::Off);
        // Receiver first, so nothing wanted is broadcast before it exists.
        let rx = self.tx.subscribe();
        self.per_level[slot(level)].fetch_add(1, Ordering::SeqCst);
        Ok(Subscription {
            level,
            rx,
            owner: Arc::clone(self),
            skipped: 0,
        })
    }
}

fn slot(level: Level) -> usize {
    level.max(Level::Off).as_i8() as usize
}

impl ClientSink for Subscribers {
    fn wants(&self, level: Level) -> bool {
        if level.is_fatal() {
            return self.count() > 0;
        }
        self.per_level[slot(level)..]
            .iter()
            .any(|n| n.load(Ordering::Relaxed) > 0)
    }

    fn broadcast(&self, level: Level, line: &str) {
        // No receivers is not an error.
        let _ = self.tx.send(LogRecord {
            level,
            line: Arc::from(line),
        });
    }
}

/// A registered subscriber; unregisters on drop.
pub struct Subscription {
    level: Level,
    rx: broadcast::Receiver<LogRecord>,
    owner: Arc<Subscribers>,
    skipped: u64,
}

impl Subscription {
    pub fn level(&self) -> Level {
        self.level
    }

    /// Lines dropped because this subscriber fell behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next line this subscriber wants; `None` once the sink is gone.
    pub async fn recv(&mut self) -> Option<LogRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) if record.level <= self.level => return Some(record),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.skipped += skipped;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.owner.per_level[slot(self.level)].fetch_sub(1, Ordering::SeqCst);
        self.owner.total.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accepts subscribers until the listener fails.
pub async fn serve(listener: UnixListener, subscribers: Arc<Subscribers>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let subscribers = Arc::clone(&subscribers);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, subscribers).await {
                        debug!(error = %e, "Subscriber connection ended");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
            }
        }
    }
}

async fn handle_client(stream: UnixStream, subscribers: Arc<Subscribers>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request = String::new();
    if reader.read_line(&mut request).await? == 0 {
        return Ok(());
    }
    let level: Level = match request.parse() {
        Ok(level) => level,
        Err(e) => {
            warn!(error = %e, "Rejecting subscriber");
            write.write_all(format!("error: {e}\n").as_bytes()).await?;
            return Ok(());
        }
    };
    let mut subscription = match subscribers.subscribe(level) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Rejecting subscriber");
            write.write_all(format!("error: {e}\n").as_bytes()).await?;
            return Ok(());
        }
    };
    info!(level = %level, "Subscriber connected");

    // Anything the client sends after the request is ignored; EOF means it left.
    let mut scratch = String::new();
    loop {
        tokio::select! {
            record = subscription.recv() => match record {
                Some(record) => write.write_all(record.line.as_bytes()).await?,
                None => return Ok(()),
            },
            read = reader.read_line(&mut scratch) => {
                if read? == 0 {
                    info!(skipped = subscription.skipped(), "Subscriber disconnected");
                    return Ok(());
                }
                scratch.clear();
            }
        }
    }
}

/// Client side of the protocol: prints lines at `level` or worse until the
/// daemon goes away.
pub async fn tail(socket: &std::path::Path, level: Level) -> Result<()> {
    let mut stream = UnixStream::connect(socket).await?;
    stream.write_all(format!("{level}\n").as_bytes()).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut stream, &mut stdout).await?;
    Ok(())
}
