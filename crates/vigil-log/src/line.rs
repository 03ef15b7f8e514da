//! Fixed-capacity rendering of a single log line.
//!
//! A line looks like `2024-05-01T13:37:00,042: [worker-3] message\n`. It is
//! rendered into a stack buffer that never grows: once the buffer is full the
//! rest of the message is dropped, the prefix always survives, and
//! [`LineBuffer::finish`] guarantees exactly one trailing newline.

use chrono::{DateTime, Local};
use std::fmt::{self, Write};

/// Total buffer size, including the NUL terminator.
pub const LINE_CAPACITY: usize = 4096;

/// Local time, second precision, then milliseconds after a comma.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S,%3f";

pub struct LineBuffer {
    buf: [u8; LINE_CAPACITY],
    len: usize,
    truncated: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; LINE_CAPACITY],
            len: 0,
            truncated: false,
        }
    }

    /// Largest number of text bytes the buffer holds.
    pub const fn text_capacity() -> usize {
        LINE_CAPACITY - 1
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == Self::text_capacity()
    }

    /// True once any input was dropped for lack of room.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only whole chars are ever copied in.
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    /// Copies as much of `s` as fits, cut on a char boundary, and returns the
    /// number of bytes written. After the first cut every later write is
    /// dropped so the text never has holes.
    pub fn push_str(&mut self, s: &str) -> usize {
        if self.truncated {
            return 0;
        }
        let room = Self::text_capacity() - self.len;
        let mut n = s.len().min(room);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        self.buf[self.len] = 0;
        if n < s.len() {
            self.truncated = true;
        }
        n
    }

    /// Ensures the text ends in a newline without growing the buffer. A full
    /// buffer gives up its last char for it.
    pub fn finish(&mut self) {
        if self.as_bytes().last() == Some(&b'\n') {
            return;
        }
        if self.is_full() {
            self.len = self.as_str().char_indices().last().map_or(0, |(i, _)| i);
        }
        self.buf[self.len] = b'\n';
        self.len += 1;
        self.buf[self.len] = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Truncation is not an error for the caller.
        self.push_str(s);
        Ok(())
    }
}

impl fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuffer")
            .field("text", &self.as_str())
            .field("truncated", &self.truncated)
            .finish()
    }
}

/// Renders `<timestamp>: [<thread_name>] <message>` plus the trailing newline.
pub fn format_line(now: DateTime<Local>, thread_name: &str, args: fmt::Arguments<'_>) -> LineBuffer {
    let mut line = LineBuffer::new();
    let _ = write!(line, "{}: [{}] ", now.format(TIMESTAMP_FORMAT), thread_name);
    let _ = line.write_fmt(args);
    line.finish();
    line
}
