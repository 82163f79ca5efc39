// boot.rs
//
// Persistent boot record and boot-time mode selection. The record lives in
// reset-surviving storage (backup RAM / .noinit) behind the platform hooks;
// this module owns its layout, validation and the counters that drive the
// reset-loop interlock.

use crate::platform::{self, BOOT_RECORD_LEN};
use crate::snapshot::SnapshotCell;
use crate::types::{ResetCause, SystemMode};

pub const BOOT_MAGIC: u32 = 0xB007_C0DE;
const CHECKSUM_SENTINEL: u32 = 0xDEAD_BEEF;

/// Watchdog resets at or above this count force Safe at boot.
pub const SAFE_BOOT_THRESHOLD: u32 = 3;

/// Reset-surviving boot record. 32-byte packed layout, little-endian:
/// `magic | boot_count | rc_watchdog | rc_brownout | rc_software |
/// last_cause u8 pad[3] | requested_mode u8 pad[3] | checksum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    pub magic: u32,
    pub boot_count: u32,
    pub reset_count_watchdog: u32,
    pub reset_count_brownout: u32,
    pub reset_count_software: u32,
    pub last_reset_cause: ResetCause,
    /// Mode the previous image asked to come back up in. Only honoured
    /// across software resets; anything else resets it to Boot.
    pub requested_mode: SystemMode,
    pub checksum: u32,
}

impl BootRecord {
    /// A zeroed record, as written after corruption is detected.
    pub fn fresh() -> Self {
        let mut rec = Self {
            magic: BOOT_MAGIC,
            boot_count: 0,
            reset_count_watchdog: 0,
            reset_count_brownout: 0,
            reset_count_software: 0,
            last_reset_cause: ResetCause::Unknown,
            requested_mode: SystemMode::Boot,
            checksum: 0,
        };
        rec.seal();
        rec
    }

    pub fn to_bytes(&self) -> [u8; BOOT_RECORD_LEN] {
        let mut raw = [0u8; BOOT_RECORD_LEN];
        raw[0..4].copy_from_slice(&self.magic.to_le_bytes());
        raw[4..8].copy_from_slice(&self.boot_count.to_le_bytes());
        raw[8..12].copy_from_slice(&self.reset_count_watchdog.to_le_bytes());
        raw[12..16].copy_from_slice(&self.reset_count_brownout.to_le_bytes());
        raw[16..20].copy_from_slice(&self.reset_count_software.to_le_bytes());
        raw[20] = self.last_reset_cause as u8;
        raw[24] = self.requested_mode as u8;
        raw[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        raw
    }

    pub fn from_bytes(raw: &[u8; BOOT_RECORD_LEN]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            magic: word(0),
            boot_count: word(4),
            reset_count_watchdog: word(8),
            reset_count_brownout: word(12),
            reset_count_software: word(16),
            last_reset_cause: ResetCause::from_u8(raw[20]).unwrap_or(ResetCause::Unknown),
            requested_mode: SystemMode::from_u8(raw[24]).unwrap_or(SystemMode::Boot),
            checksum: word(28),
        }
    }

    fn checksum_of(raw: &[u8; BOOT_RECORD_LEN]) -> u32 {
        let sum: u32 = raw[..BOOT_RECORD_LEN - 4]
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
        sum ^ CHECKSUM_SENTINEL
    }

    /// Recompute and store the checksum. Call after any field change.
    pub fn seal(&mut self) {
        self.checksum = Self::checksum_of(&self.to_bytes());
    }

    pub fn validate(raw: &[u8; BOOT_RECORD_LEN]) -> bool {
        let rec = Self::from_bytes(raw);
        rec.magic == BOOT_MAGIC && rec.checksum == Self::checksum_of(raw)
    }

    /// Latch the reset cause into the record: bump the per-cause counter,
    /// bump the boot counter, and drop `requested_mode` unless this was a
    /// software reset.
    pub fn register_reset(&mut self, cause: ResetCause) {
        self.last_reset_cause = cause;
        match cause {
            ResetCause::Watchdog => self.reset_count_watchdog += 1,
            ResetCause::BrownOut => self.reset_count_brownout += 1,
            ResetCause::Software => self.reset_count_software += 1,
            _ => {}
        }
        if cause != ResetCause::Software {
            self.requested_mode = SystemMode::Boot;
        }
        self.boot_count = self.boot_count.wrapping_add(1);
        self.seal();
    }

    /// Initial-mode decision. Interlocks first (safe-mode strap, watchdog
    /// reset loop), then the per-cause table.
    pub fn select_mode(&self, safe_pin_asserted: bool) -> SystemMode {
        if safe_pin_asserted {
            return SystemMode::Safe;
        }
        if self.reset_count_watchdog >= SAFE_BOOT_THRESHOLD {
            return SystemMode::Safe;
        }
        match self.last_reset_cause {
            ResetCause::Watchdog => SystemMode::Recovery,
            ResetCause::BrownOut => SystemMode::LowPower,
            ResetCause::PowerOn => SystemMode::Detumble,
            ResetCause::Software => {
                if self.requested_mode != SystemMode::Boot {
                    self.requested_mode
                } else {
                    SystemMode::Nominal
                }
            }
            _ => SystemMode::Safe,
        }
    }

    /// Clear the loop counters once FDIR has handled a reset loop.
    pub fn clear_counters(&mut self) {
        self.reset_count_watchdog = 0;
        self.reset_count_brownout = 0;
        self.seal();
    }
}

/// Result of the boot-time record update.
#[derive(Debug, Clone, Copy)]
pub struct BootReport {
    pub cause: ResetCause,
    pub mode: SystemMode,
    pub boot_count: u32,
    pub record_was_valid: bool,
}

static RECORD: SnapshotCell<Option<BootRecord>> = SnapshotCell::new(None);

/// Load, validate and update the persistent record, then pick the initial
/// mode. Runs exactly once, before anything else in the supervisor.
pub fn initialize() -> BootReport {
    let mut raw = [0u8; BOOT_RECORD_LEN];
    platform::persistent_load(&mut raw);

    let record_was_valid = BootRecord::validate(&raw);
    let mut rec = if record_was_valid {
        BootRecord::from_bytes(&raw)
    } else {
        BootRecord::fresh()
    };

    let cause = platform::reset_cause();
    rec.register_reset(cause);

    let mode = rec.select_mode(platform::safe_mode_pin_asserted());

    platform::persistent_store(&rec.to_bytes());
    RECORD.set(Some(rec));

    BootReport {
        cause,
        mode,
        boot_count: rec.boot_count,
        record_was_valid,
    }
}

pub fn record() -> Option<BootRecord> {
    RECORD.get()
}

pub fn boot_count() -> u32 {
    RECORD.get().map_or(0, |r| r.boot_count)
}

pub fn reset_cause() -> ResetCause {
    RECORD.get().map_or(ResetCause::Unknown, |r| r.last_reset_cause)
}

pub fn clear_counters() {
    if let Some(mut rec) = RECORD.get() {
        rec.clear_counters();
        platform::persistent_store(&rec.to_bytes());
        RECORD.set(Some(rec));
    }
}

/// Record the mode the next image should come up in. Written right before a
/// commanded software reset; honoured only if the reset cause really is
/// Software.
pub fn set_requested_mode(mode: SystemMode) {
    if let Some(mut rec) = RECORD.get() {
        rec.requested_mode = mode;
        rec.seal();
        platform::persistent_store(&rec.to_bytes());
        RECORD.set(Some(rec));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_validates() {
        let rec = BootRecord::fresh();
        assert!(BootRecord::validate(&rec.to_bytes()));
        assert_eq!(rec.boot_count, 0);
        assert_eq!(rec.last_reset_cause, ResetCause::Unknown);
    }

    #[test]
    fn byte_roundtrip() {
        let mut rec = BootRecord::fresh();
        rec.boot_count = 42;
        rec.reset_count_watchdog = 2;
        rec.last_reset_cause = ResetCause::Watchdog;
        rec.requested_mode = SystemMode::Nominal;
        rec.seal();
        let parsed = BootRecord::from_bytes(&rec.to_bytes());
        assert_eq!(parsed, rec);
    }

    #[test]
    fn any_byte_corruption_invalidates() {
        let mut rec = BootRecord::fresh();
        rec.boot_count = 7;
        rec.seal();
        let good = rec.to_bytes();
        for i in 0..BOOT_RECORD_LEN {
            let mut bad = good;
            bad[i] ^= 0x5A;
            assert!(!BootRecord::validate(&bad), "corruption at byte {} accepted", i);
        }
    }

    #[test]
    fn register_reset_bumps_cause_counters() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::Watchdog);
        rec.register_reset(ResetCause::BrownOut);
        rec.register_reset(ResetCause::Software);
        rec.register_reset(ResetCause::PowerOn);
        assert_eq!(rec.reset_count_watchdog, 1);
        assert_eq!(rec.reset_count_brownout, 1);
        assert_eq!(rec.reset_count_software, 1);
        assert_eq!(rec.boot_count, 4);
        assert!(BootRecord::validate(&rec.to_bytes()));
    }

    #[test]
    fn requested_mode_survives_software_reset_only() {
        let mut rec = BootRecord::fresh();
        rec.requested_mode = SystemMode::Nominal;
        rec.register_reset(ResetCause::Software);
        assert_eq!(rec.requested_mode, SystemMode::Nominal);
        rec.register_reset(ResetCause::PowerOn);
        assert_eq!(rec.requested_mode, SystemMode::Boot);
    }

    #[test]
    fn cold_boot_selects_detumble() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::PowerOn);
        assert_eq!(rec.boot_count, 1);
        assert_eq!(rec.select_mode(false), SystemMode::Detumble);
    }

    #[test]
    fn third_watchdog_reset_selects_safe() {
        let mut rec = BootRecord::fresh();
        rec.reset_count_watchdog = 2;
        rec.seal();
        rec.register_reset(ResetCause::Watchdog);
        assert_eq!(rec.reset_count_watchdog, 3);
        assert_eq!(rec.select_mode(false), SystemMode::Safe);
    }

    #[test]
    fn first_watchdog_reset_selects_recovery() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::Watchdog);
        assert_eq!(rec.select_mode(false), SystemMode::Recovery);
    }

    #[test]
    fn brownout_selects_low_power() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::BrownOut);
        assert_eq!(rec.select_mode(false), SystemMode::LowPower);
    }

    #[test]
    fn software_reset_honours_requested_mode() {
        let mut rec = BootRecord::fresh();
        rec.requested_mode = SystemMode::LowPower;
        rec.register_reset(ResetCause::Software);
        assert_eq!(rec.select_mode(false), SystemMode::LowPower);

        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::Software);
        assert_eq!(rec.select_mode(false), SystemMode::Nominal);
    }

    #[test]
    fn safe_pin_overrides_everything() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::PowerOn);
        assert_eq!(rec.select_mode(true), SystemMode::Safe);
    }

    #[test]
    fn unknown_cause_selects_safe() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::Pin);
        assert_eq!(rec.select_mode(false), SystemMode::Safe);
    }

    #[test]
    fn clear_counters_keeps_boot_count() {
        let mut rec = BootRecord::fresh();
        rec.register_reset(ResetCause::Watchdog);
        rec.register_reset(ResetCause::Watchdog);
        rec.clear_counters();
        assert_eq!(rec.reset_count_watchdog, 0);
        assert_eq!(rec.reset_count_brownout, 0);
        assert_eq!(rec.boot_count, 2);
        assert!(BootRecord::validate(&rec.to_bytes()));
    }
}
