//! Integration tests for the process logger and its public sinks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use vigil_log::{ClientSink, Level, LineSink, LogError, Logger};

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl Lines {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl LineSink for Lines {
    fn write_line(&self, line: &[u8]) {
        self.0
            .lock()
            .unwrap()
            .push(String::from_utf8(line.to_vec()).unwrap());
    }
}

/// Subscribers that only want warnings and worse.
#[derive(Default)]
struct WarnClients {
    received: AtomicUsize,
}

impl ClientSink for WarnClients {
    fn wants(&self, level: Level) -> bool {
        level <= Level::Warn
    }

    fn broadcast(&self, _level: Level, line: &str) {
        assert!(line.ends_with('\n'));
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_process_logger_end_to_end() {
    let stderr = Arc::new(Lines::default());
    let clients = Arc::new(WarnClients::default());
    vigil_log::init(
        Logger::builder()
            .level(Level::Info)
            .stderr(stderr.clone())
            .clients(clients.clone())
            .build(),
    )
    .unwrap();

    assert!(matches!(
        vigil_log::init(Logger::default()),
        Err(LogError::AlreadyInstalled)
    ));

    vigil_log::set_thread_name!("main");
    vigil_log::log_info!("listening on {}", "/tmp/vigild.sock");
    vigil_log::log_warn!("slow client");
    vigil_log::log_debug!("not shown");

    let lines = stderr.take();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(": [main] listening on /tmp/vigild.sock\n"));
    assert!(lines[1].ends_with(": [main] slow client\n"));
    assert_eq!(clients.received.load(Ordering::SeqCst), 1);

    vigil_log::logger().set_level(Level::Debug);
    vigil_log::vlog!(Level::Debug, "now shown");
    assert_eq!(stderr.take().len(), 1);

    // Every thread tags its own lines.
    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                vigil_log::set_thread_name!("worker-{}", i);
                vigil_log::log_error!("from worker");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let mut tags: Vec<String> = stderr
        .take()
        .iter()
        .map(|l| l.split(" [").nth(1).unwrap().split(']').next().unwrap().to_string())
        .collect();
    tags.sort();
    assert_eq!(tags, ["worker-0", "worker-1", "worker-2", "worker-3"]);
}

#[test]
fn test_timestamp_prefix_shape() {
    let stderr = Arc::new(Lines::default());
    let logger = Logger::builder().stderr(stderr.clone()).build();
    logger.log(Level::Error, format_args!("x"));

    let line = &stderr.take()[0];
    // 2024-05-01T13:37:09,042: [
    let (stamp, _) = line.split_once(": [").unwrap();
    let (seconds, millis) = stamp.split_once(',').unwrap();
    assert_eq!(millis.len(), 3);
    assert!(millis.chars().all(|c| c.is_ascii_digit()));
    assert!(chrono::NaiveDateTime::parse_from_str(seconds, "%Y-%m-%dT%H:%M:%S").is_ok());
}

#[test]
fn test_long_message_still_one_line() {
    let stderr = Arc::new(Lines::default());
    let logger = Logger::builder().stderr(stderr.clone()).build();
    let huge = "z".repeat(10_000);
    logger.log(Level::Error, format_args!("{huge}\n"));

    let line = &stderr.take()[0];
    assert_eq!(line.len(), vigil_log::line::LINE_CAPACITY - 1);
    assert!(line.ends_with("z\n"));
    assert_eq!(line.matches('\n').count(), 1);
}
