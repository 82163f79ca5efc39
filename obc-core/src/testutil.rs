//! Shared fixtures for tests that exercise the process-wide singletons.
//!
//! The singleton tests mutate global state, so they serialize themselves on
//! `serial()`; struct-level tests elsewhere stay lock-free and parallel.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::eps::{BatteryReadings, EpsSensors, Rail, SolarPanel, NUM_SOLAR_PANELS, RAIL_COUNT};
use crate::platform::{Platform, BOOT_RECORD_LEN};
use crate::types::{ResetCause, Subsystem};

pub fn serial() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Deterministic in-memory platform: settable clock, recorded side effects.
pub struct TestPlatform {
    now_ms: AtomicU32,
    cause: AtomicU32,
    safe_pin: AtomicBool,
    pub watchdog_kicks: AtomicU32,
    pub reset_requested: AtomicBool,
    pub rails: [AtomicBool; RAIL_COUNT],
    pub radio_frames: AtomicU32,
    persistent: Mutex<CriticalSectionRawMutex, RefCell<[u8; BOOT_RECORD_LEN]>>,
}

impl TestPlatform {
    pub const fn new() -> Self {
        Self {
            now_ms: AtomicU32::new(0),
            cause: AtomicU32::new(ResetCause::PowerOn as u32),
            safe_pin: AtomicBool::new(false),
            watchdog_kicks: AtomicU32::new(0),
            reset_requested: AtomicBool::new(false),
            rails: [const { AtomicBool::new(false) }; RAIL_COUNT],
            radio_frames: AtomicU32::new(0),
            persistent: Mutex::new(RefCell::new([0; BOOT_RECORD_LEN])),
        }
    }

    pub fn reset(&self) {
        self.now_ms.store(0, Ordering::Relaxed);
        self.cause
            .store(ResetCause::PowerOn as u32, Ordering::Relaxed);
        self.safe_pin.store(false, Ordering::Relaxed);
        self.watchdog_kicks.store(0, Ordering::Relaxed);
        self.reset_requested.store(false, Ordering::Relaxed);
        for rail in &self.rails {
            rail.store(false, Ordering::Relaxed);
        }
        self.radio_frames.store(0, Ordering::Relaxed);
        self.persistent
            .lock(|p| *p.borrow_mut() = [0; BOOT_RECORD_LEN]);
    }

    pub fn set_time_ms(&self, ms: u32) {
        self.now_ms.store(ms, Ordering::Relaxed);
    }

    pub fn advance_ms(&self, ms: u32) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set_cause(&self, cause: ResetCause) {
        self.cause.store(cause as u32, Ordering::Relaxed);
    }

    pub fn set_safe_pin(&self, asserted: bool) {
        self.safe_pin.store(asserted, Ordering::Relaxed);
    }

    pub fn write_persistent(&self, raw: [u8; BOOT_RECORD_LEN]) {
        self.persistent.lock(|p| *p.borrow_mut() = raw);
    }

    pub fn read_persistent(&self) -> [u8; BOOT_RECORD_LEN] {
        self.persistent.lock(|p| *p.borrow())
    }

    pub fn rail_on(&self, rail: Rail) -> bool {
        self.rails[rail as usize].load(Ordering::Relaxed)
    }
}

impl Platform for TestPlatform {
    fn time_ms(&self) -> u32 {
        self.now_ms.load(Ordering::Relaxed)
    }

    fn watchdog_kick(&self) {
        self.watchdog_kicks.fetch_add(1, Ordering::Relaxed);
    }

    fn reset_cause(&self) -> ResetCause {
        ResetCause::from_u8(self.cause.load(Ordering::Relaxed) as u8).unwrap_or(ResetCause::Unknown)
    }

    fn reset_software(&self) {
        self.reset_requested.store(true, Ordering::Relaxed);
    }

    fn reset_subsystem(&self, _subsys: Subsystem) {}

    fn safe_mode_pin_asserted(&self) -> bool {
        self.safe_pin.load(Ordering::Relaxed)
    }

    fn power_enable_rail(&self, rail: u8) {
        if let Some(slot) = self.rails.get(rail as usize) {
            slot.store(true, Ordering::Relaxed);
        }
    }

    fn power_disable_rail(&self, rail: u8) {
        if let Some(slot) = self.rails.get(rail as usize) {
            slot.store(false, Ordering::Relaxed);
        }
    }

    fn debug_putchar(&self, _byte: u8) {}

    fn persistent_load(&self, buf: &mut [u8; BOOT_RECORD_LEN]) {
        self.persistent.lock(|p| *buf = *p.borrow());
    }

    fn persistent_store(&self, buf: &[u8; BOOT_RECORD_LEN]) {
        self.persistent.lock(|p| *p.borrow_mut() = *buf);
    }

    fn radio_tx(&self, _frame: &[u8]) {
        self.radio_frames.fetch_add(1, Ordering::Relaxed);
    }
}

pub static TEST_PLATFORM: TestPlatform = TestPlatform::new();

/// Scriptable EPS provider: one shared SOC knob plus fixed panels.
pub struct TestSensors {
    pub soc: AtomicU32,
    pub sunlit: AtomicBool,
}

impl TestSensors {
    pub const fn new() -> Self {
        Self {
            soc: AtomicU32::new(80),
            sunlit: AtomicBool::new(true),
        }
    }

    pub fn set_soc(&self, soc: u8) {
        self.soc.store(u32::from(soc), Ordering::Relaxed);
    }
}

impl EpsSensors for TestSensors {
    fn battery(&self) -> BatteryReadings {
        BatteryReadings {
            soc_percent: self.soc.load(Ordering::Relaxed) as u8,
            ..Default::default()
        }
    }

    fn panels(&self) -> [SolarPanel; NUM_SOLAR_PANELS] {
        let mut panels = [SolarPanel::default(); NUM_SOLAR_PANELS];
        if self.sunlit.load(Ordering::Relaxed) {
            for p in panels.iter_mut().take(3) {
                *p = SolarPanel {
                    voltage_mv: 2400,
                    current_ma: 200,
                    power_mw: 480,
                    illuminated: true,
                };
            }
        }
        panels
    }

    fn rail_current_ma(&self, _rail: Rail) -> u16 {
        50
    }
}

pub static TEST_SENSORS: TestSensors = TestSensors::new();
