// logger.rs
//
// Raw byte ring for debug text. Drop-oldest on overflow so the newest
// output always survives; drained to the debug UART in bounded chunks.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::platform;
use crate::types::LOG_BUFFER_SIZE;

/// Bytes overwritten before they were ever exported.
pub static DROPPED_BYTES: AtomicU32 = AtomicU32::new(0);

/// Upper bound for one formatted log line.
pub const MAX_LINE_LEN: usize = 128;

pub struct ByteLog {
    buf: [u8; LOG_BUFFER_SIZE],
    head: usize,
    tail: usize,
    count: usize,
    initialized: bool,
}

impl ByteLog {
    pub const fn new() -> Self {
        Self {
            buf: [0; LOG_BUFFER_SIZE],
            head: 0,
            tail: 0,
            count: 0,
            initialized: false,
        }
    }

    fn push_byte(&mut self, b: u8) {
        if self.count == LOG_BUFFER_SIZE {
            self.tail = (self.tail + 1) % LOG_BUFFER_SIZE;
            self.count -= 1;
            DROPPED_BYTES.fetch_add(1, Ordering::Relaxed);
        }
        self.buf[self.head] = b;
        self.head = (self.head + 1) % LOG_BUFFER_SIZE;
        self.count += 1;
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        for &b in data {
            self.push_byte(b);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Drain into `out`, oldest first. Returns bytes copied.
    pub fn export(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() && self.count > 0 {
            out[copied] = self.buf[self.tail];
            self.tail = (self.tail + 1) % LOG_BUFFER_SIZE;
            self.count -= 1;
            copied += 1;
        }
        copied
    }
}

static LOG: Mutex<CriticalSectionRawMutex, RefCell<ByteLog>> =
    Mutex::new(RefCell::new(ByteLog::new()));

pub fn init() {
    LOG.lock(|l| {
        let mut l = l.borrow_mut();
        *l = ByteLog::new();
        l.initialized = true;
    });
}

pub fn write_bytes(data: &[u8]) {
    if data.is_empty() {
        return;
    }
    LOG.lock(|l| {
        let mut l = l.borrow_mut();
        if l.initialized {
            l.write_bytes(data);
        }
    });
}

pub fn write_str(s: &str) {
    write_bytes(s.as_bytes());
}

/// Format one line into the ring. Lines that do not fit a bounded buffer
/// are dropped rather than split.
pub fn log_line(args: core::fmt::Arguments<'_>) {
    use core::fmt::Write;
    let mut line: heapless::String<MAX_LINE_LEN> = heapless::String::new();
    if write!(line, "{}", args).is_err() {
        DROPPED_BYTES.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let _ = line.push('\n');
    write_bytes(line.as_bytes());
}

pub fn count() -> usize {
    LOG.lock(|l| l.borrow().count())
}

pub fn export(out: &mut [u8]) -> usize {
    LOG.lock(|l| {
        let mut l = l.borrow_mut();
        if !l.initialized {
            return 0;
        }
        l.export(out)
    })
}

/// Drain everything to the debug character sink.
pub fn flush_debug() {
    let mut chunk = [0u8; 128];
    loop {
        let n = export(&mut chunk);
        if n == 0 {
            break;
        }
        for &b in &chunk[..n] {
            platform::debug_putchar(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_in_order() {
        let mut log = ByteLog::new();
        log.write_bytes(b"hello");
        let mut out = [0u8; 8];
        let n = log.export(&mut out);
        assert_eq!(&out[..n], b"hello");
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut log = ByteLog::new();
        for i in 0..(LOG_BUFFER_SIZE + 4) {
            log.write_bytes(&[(i % 251) as u8]);
        }
        assert_eq!(log.count(), LOG_BUFFER_SIZE);
        let mut out = [0u8; 1];
        log.export(&mut out);
        // First four bytes were overwritten.
        assert_eq!(out[0], 4);
    }

    #[test]
    fn partial_export_keeps_rest() {
        let mut log = ByteLog::new();
        log.write_bytes(b"abcdef");
        let mut out = [0u8; 4];
        assert_eq!(log.export(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(log.count(), 2);
        let mut rest = [0u8; 4];
        assert_eq!(log.export(&mut rest), 2);
        assert_eq!(&rest[..2], b"ef");
    }
}
