// event_log.rs
//
// Fixed-capacity event ring. 256 entries, oldest overwritten. This is the
// on-board record of what happened; FDIR, mode changes and EPS state
// changes all write here, and the entries are exportable for downlink.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::String;

use crate::time;
use crate::types::{Severity, Subsystem, EVENT_LOG_CAPACITY};

pub const EVENT_MSG_MAX_LEN: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct EventEntry {
    pub timestamp_ms: u32,
    pub severity: Severity,
    pub subsystem: Subsystem,
    pub event_id: u16,
    pub message: String<EVENT_MSG_MAX_LEN>,
}

pub struct EventLog {
    entries: [EventEntry; EVENT_LOG_CAPACITY],
    write_index: usize,
    count: usize,
    initialized: bool,
}

impl EventLog {
    pub const fn new() -> Self {
        const EMPTY: EventEntry = EventEntry {
            timestamp_ms: 0,
            severity: Severity::Debug,
            subsystem: Subsystem::Boot,
            event_id: 0,
            message: String::new(),
        };
        Self {
            entries: [EMPTY; EVENT_LOG_CAPACITY],
            write_index: 0,
            count: 0,
            initialized: false,
        }
    }

    pub fn write(
        &mut self,
        timestamp_ms: u32,
        severity: Severity,
        subsystem: Subsystem,
        event_id: u16,
        message: &str,
    ) {
        let entry = &mut self.entries[self.write_index];
        entry.timestamp_ms = timestamp_ms;
        entry.severity = severity;
        entry.subsystem = subsystem;
        entry.event_id = event_id;
        entry.message.clear();
        // Truncate to capacity, backing off to a char boundary.
        let mut take = message.len().min(EVENT_MSG_MAX_LEN);
        while !message.is_char_boundary(take) {
            take -= 1;
        }
        let _ = entry.message.push_str(&message[..take]);

        self.write_index = (self.write_index + 1) % EVENT_LOG_CAPACITY;
        if self.count < EVENT_LOG_CAPACITY {
            self.count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Entry by logical index, oldest first.
    pub fn get(&self, index: usize) -> Option<&EventEntry> {
        if index >= self.count {
            return None;
        }
        let actual = if self.count < EVENT_LOG_CAPACITY {
            index
        } else {
            (self.write_index + index) % EVENT_LOG_CAPACITY
        };
        Some(&self.entries[actual])
    }

    pub fn latest(&self) -> Option<&EventEntry> {
        if self.count == 0 {
            return None;
        }
        let idx = (self.write_index + EVENT_LOG_CAPACITY - 1) % EVENT_LOG_CAPACITY;
        Some(&self.entries[idx])
    }

    pub fn count_by_severity(&self, min_severity: Severity) -> usize {
        (0..self.count)
            .filter_map(|i| self.get(i))
            .filter(|e| e.severity >= min_severity)
            .count()
    }

    pub fn count_by_subsystem(&self, subsystem: Subsystem) -> usize {
        (0..self.count)
            .filter_map(|i| self.get(i))
            .filter(|e| e.subsystem == subsystem)
            .count()
    }

    /// Copy entries at or above `min_severity` into `out`, oldest first.
    /// Returns the number exported.
    pub fn export(&self, out: &mut [EventEntry], min_severity: Severity) -> usize {
        let mut exported = 0;
        for i in 0..self.count {
            if exported == out.len() {
                break;
            }
            if let Some(entry) = self.get(i) {
                if entry.severity >= min_severity {
                    out[exported] = entry.clone();
                    exported += 1;
                }
            }
        }
        exported
    }

    pub fn clear(&mut self) {
        self.write_index = 0;
        self.count = 0;
    }
}

static LOG: Mutex<CriticalSectionRawMutex, RefCell<EventLog>> =
    Mutex::new(RefCell::new(EventLog::new()));

pub fn init() {
    LOG.lock(|l| {
        let mut l = l.borrow_mut();
        *l = EventLog::new();
        l.initialized = true;
    });
}

pub fn write(severity: Severity, subsystem: Subsystem, event_id: u16, message: &str) {
    let now = time::now_ms();
    LOG.lock(|l| {
        let mut l = l.borrow_mut();
        if l.initialized {
            l.write(now, severity, subsystem, event_id, message);
        }
    });
}

pub fn debug(subsystem: Subsystem, message: &str) {
    write(Severity::Debug, subsystem, 0, message);
}

pub fn info(subsystem: Subsystem, message: &str) {
    write(Severity::Info, subsystem, 0, message);
}

pub fn warning(subsystem: Subsystem, message: &str) {
    write(Severity::Warning, subsystem, 0, message);
}

pub fn error(subsystem: Subsystem, event_id: u16, message: &str) {
    write(Severity::Error, subsystem, event_id, message);
}

pub fn critical(subsystem: Subsystem, event_id: u16, message: &str) {
    write(Severity::Critical, subsystem, event_id, message);
}

pub fn count() -> usize {
    LOG.lock(|l| l.borrow().count())
}

pub fn latest() -> Option<EventEntry> {
    LOG.lock(|l| l.borrow().latest().cloned())
}

pub fn get(index: usize) -> Option<EventEntry> {
    LOG.lock(|l| l.borrow().get(index).cloned())
}

pub fn count_by_severity(min_severity: Severity) -> usize {
    LOG.lock(|l| l.borrow().count_by_severity(min_severity))
}

pub fn count_by_subsystem(subsystem: Subsystem) -> usize {
    LOG.lock(|l| l.borrow().count_by_subsystem(subsystem))
}

pub fn export(out: &mut [EventEntry], min_severity: Severity) -> usize {
    LOG.lock(|l| l.borrow().export(out, min_severity))
}

pub fn clear() {
    LOG.lock(|l| l.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> EventLog {
        let mut log = EventLog::new();
        for i in 0..n {
            log.write(i as u32, Severity::Info, Subsystem::Core, i as u16, "evt");
        }
        log
    }

    #[test]
    fn writes_and_counts() {
        let log = filled(5);
        assert_eq!(log.count(), 5);
        assert_eq!(log.get(0).unwrap().event_id, 0);
        assert_eq!(log.latest().unwrap().event_id, 4);
    }

    #[test]
    fn ring_overwrites_oldest() {
        let log = filled(EVENT_LOG_CAPACITY + 10);
        assert_eq!(log.count(), EVENT_LOG_CAPACITY);
        // Oldest surviving entry is #10.
        assert_eq!(log.get(0).unwrap().event_id, 10);
        assert_eq!(
            log.latest().unwrap().event_id,
            (EVENT_LOG_CAPACITY + 9) as u16
        );
    }

    #[test]
    fn severity_filter() {
        let mut log = EventLog::new();
        log.write(0, Severity::Debug, Subsystem::Core, 0, "d");
        log.write(1, Severity::Warning, Subsystem::Eps, 1, "w");
        log.write(2, Severity::Error, Subsystem::Eps, 2, "e");
        assert_eq!(log.count_by_severity(Severity::Warning), 2);
        assert_eq!(log.count_by_subsystem(Subsystem::Eps), 2);
    }

    #[test]
    fn export_respects_capacity_and_filter() {
        let mut log = EventLog::new();
        for i in 0..8 {
            let sev = if i % 2 == 0 {
                Severity::Info
            } else {
                Severity::Error
            };
            log.write(i, sev, Subsystem::Core, i as u16, "x");
        }
        let mut out: [EventEntry; 3] = Default::default();
        let n = log.export(&mut out, Severity::Error);
        assert_eq!(n, 3);
        assert_eq!(out[0].event_id, 1);
        assert_eq!(out[2].event_id, 5);
    }

    #[test]
    fn long_message_truncates() {
        let mut log = EventLog::new();
        let long = "0123456789012345678901234567890123456789";
        log.write(0, Severity::Info, Subsystem::Core, 0, long);
        assert_eq!(log.latest().unwrap().message.len(), EVENT_MSG_MAX_LEN);
    }

    #[test]
    fn clear_resets() {
        let mut log = filled(20);
        log.clear();
        assert_eq!(log.count(), 0);
        assert!(log.latest().is_none());
    }
}
