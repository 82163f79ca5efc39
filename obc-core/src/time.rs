// time.rs
//
// On-board time. Uptime comes straight from the platform's monotonic
// millisecond counter; UTC is an optional base set by a ground time-sync,
// propagated with a drift correction in ppm.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::platform;
use crate::types::{FswError, FswResult};

/// Seconds plus microseconds. Subseconds are microseconds everywhere in the
/// core; the 16-bit fine-time field of the TM header truncates this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timestamp {
    pub seconds: u32,
    pub subseconds: u32,
}

/// Calendar time against the 2000-01-01 00:00:00 epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Convert seconds since the 2000-01-01 epoch to calendar time.
pub fn seconds_to_datetime(total_seconds: u32) -> DateTime {
    let mut days = total_seconds / 86_400;
    let mut remaining = total_seconds % 86_400;

    let hour = (remaining / 3_600) as u8;
    remaining %= 3_600;
    let minute = (remaining / 60) as u8;
    let second = (remaining % 60) as u8;

    let mut year: u16 = 2000;
    loop {
        let year_days = if is_leap_year(year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }

    let mut month: u8 = 1;
    loop {
        let mut month_days = DAYS_IN_MONTH[(month - 1) as usize];
        if month == 2 && is_leap_year(year) {
            month_days = 29;
        }
        if days < month_days {
            break;
        }
        days -= month_days;
        month += 1;
    }

    DateTime {
        year,
        month,
        day: (days + 1) as u8,
        hour,
        minute,
        second,
        microsecond: 0,
    }
}

/// Signed difference `a - b` in milliseconds. Subseconds are microseconds.
pub fn diff_ms(a: Timestamp, b: Timestamp) -> i64 {
    let ds = i64::from(a.seconds) - i64::from(b.seconds);
    let dus = i64::from(a.subseconds) - i64::from(b.subseconds);
    ds * 1000 + dus / 1000
}

/// UTC bookkeeping. Uptime queries never touch this; only sync state lives
/// here.
#[derive(Debug, Clone, Copy)]
pub struct TimeKeeper {
    utc_base: Timestamp,
    sync_uptime_s: u32,
    drift_ppm: i32,
    synced: bool,
    met_s: u32,
    initialized: bool,
}

impl TimeKeeper {
    pub const fn new() -> Self {
        Self {
            utc_base: Timestamp {
                seconds: 0,
                subseconds: 0,
            },
            sync_uptime_s: 0,
            drift_ppm: 0,
            synced: false,
            met_s: 0,
            initialized: false,
        }
    }

    pub fn sync_utc(&mut self, utc: Timestamp, now_s: u32) {
        self.utc_base = utc;
        self.sync_uptime_s = now_s;
        self.synced = true;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn utc(&self, now_s: u32, now_ms: u32) -> FswResult<Timestamp> {
        if !self.synced {
            return Err(FswError::NotReady);
        }
        let mut elapsed = now_s.wrapping_sub(self.sync_uptime_s);
        if self.drift_ppm != 0 {
            let correction = (i64::from(elapsed) * i64::from(self.drift_ppm)) / 1_000_000;
            elapsed = elapsed.wrapping_add(correction as u32);
        }
        Ok(Timestamp {
            seconds: self.utc_base.seconds.wrapping_add(elapsed),
            subseconds: (now_ms % 1000) * 1000,
        })
    }

    pub fn set_drift_ppm(&mut self, ppm: i32) {
        self.drift_ppm = ppm;
    }

    pub fn drift_ppm(&self) -> i32 {
        self.drift_ppm
    }

    pub fn met_s(&self) -> u32 {
        self.met_s
    }

    pub fn set_met_s(&mut self, met: u32) {
        self.met_s = met;
    }
}

static KEEPER: Mutex<CriticalSectionRawMutex, RefCell<TimeKeeper>> =
    Mutex::new(RefCell::new(TimeKeeper::new()));

pub fn init() {
    KEEPER.lock(|k| {
        let mut k = k.borrow_mut();
        *k = TimeKeeper::new();
        k.initialized = true;
    });
}

/// Uptime in milliseconds. Pure platform read, no lock in the hierarchy.
pub fn now_ms() -> u32 {
    platform::time_ms()
}

/// Uptime in whole seconds.
pub fn now_s() -> u32 {
    now_ms() / 1000
}

/// Uptime-based timestamp, used for TM headers.
pub fn timestamp() -> Timestamp {
    let ms = now_ms();
    Timestamp {
        seconds: ms / 1000,
        subseconds: (ms % 1000) * 1000,
    }
}

pub fn sync_utc(utc: Timestamp) {
    let uptime_s = now_s();
    KEEPER.lock(|k| {
        let mut k = k.borrow_mut();
        if k.initialized {
            k.sync_utc(utc, uptime_s);
        }
    });
}

pub fn is_synced() -> bool {
    KEEPER.lock(|k| k.borrow().synced)
}

/// Fails with `NotReady` before the first ground sync.
pub fn get_utc() -> FswResult<Timestamp> {
    let (s, ms) = (now_s(), now_ms());
    KEEPER.lock(|k| k.borrow().utc(s, ms))
}

pub fn get_datetime() -> FswResult<DateTime> {
    let utc = get_utc()?;
    let mut dt = seconds_to_datetime(utc.seconds);
    dt.microsecond = utc.subseconds;
    Ok(dt)
}

pub fn set_drift_correction(ppm: i32) {
    KEEPER.lock(|k| {
        let mut k = k.borrow_mut();
        if k.initialized {
            k.set_drift_ppm(ppm);
        }
    });
}

pub fn drift_correction() -> i32 {
    KEEPER.lock(|k| k.borrow().drift_ppm)
}

pub fn met_s() -> u32 {
    KEEPER.lock(|k| k.borrow().met_s)
}

pub fn set_met_s(met: u32) {
    KEEPER.lock(|k| {
        let mut k = k.borrow_mut();
        if k.initialized {
            k.set_met_s(met);
        }
    });
}
