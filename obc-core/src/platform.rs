// platform.rs
use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::types::{ResetCause, Subsystem};

/// Size of the reset-surviving boot record, in bytes.
pub const BOOT_RECORD_LEN: usize = 32;

/// The hardware surface the core depends on. One implementation per board
/// (backup-domain RAM, IWDG, rail switches); the SITL binary and the test
/// fixtures provide in-memory ones.
///
/// Every hook must be callable from the supervisor tick without blocking.
pub trait Platform: Sync {
    /// Monotonic milliseconds since power-up. Wraps at 2^32.
    fn time_ms(&self) -> u32;

    fn watchdog_kick(&self);

    /// Cause of the most recent reset, read from hardware status registers.
    fn reset_cause(&self) -> ResetCause;

    /// Request an immediate software reset. Flight implementations do not
    /// return; host implementations record the request instead.
    fn reset_software(&self);

    fn reset_subsystem(&self, subsys: Subsystem);

    /// Hardware safe-mode strap, sampled once during boot.
    fn safe_mode_pin_asserted(&self) -> bool;

    fn power_enable_rail(&self, rail: u8);
    fn power_disable_rail(&self, rail: u8);

    fn debug_putchar(&self, byte: u8);

    /// Read/write the 32-byte boot record from reset-surviving storage.
    fn persistent_load(&self, buf: &mut [u8; BOOT_RECORD_LEN]);
    fn persistent_store(&self, buf: &[u8; BOOT_RECORD_LEN]);

    /// Hand a framed buffer (beacon or dequeued TM) to the radio. Transport
    /// is opaque to the core.
    fn radio_tx(&self, frame: &[u8]);
}

static PLATFORM: Mutex<CriticalSectionRawMutex, Cell<Option<&'static dyn Platform>>> =
    Mutex::new(Cell::new(None));

/// Install the board implementation. Called exactly once, first thing in
/// supervisor boot; every hook below is a safe no-op until then.
pub fn register(p: &'static dyn Platform) {
    PLATFORM.lock(|cell| cell.set(Some(p)));
}

fn with<R>(default: R, f: impl FnOnce(&'static dyn Platform) -> R) -> R {
    match PLATFORM.lock(|cell| cell.get()) {
        Some(p) => f(p),
        None => default,
    }
}

pub fn time_ms() -> u32 {
    with(0, |p| p.time_ms())
}

pub fn watchdog_kick() {
    with((), |p| p.watchdog_kick());
}

pub fn reset_cause() -> ResetCause {
    with(ResetCause::Unknown, |p| p.reset_cause())
}

pub fn reset_software() {
    with((), |p| p.reset_software());
}

pub fn reset_subsystem(subsys: Subsystem) {
    with((), |p| p.reset_subsystem(subsys));
}

pub fn safe_mode_pin_asserted() -> bool {
    with(false, |p| p.safe_mode_pin_asserted())
}

pub fn power_enable_rail(rail: u8) {
    with((), |p| p.power_enable_rail(rail));
}

pub fn power_disable_rail(rail: u8) {
    with((), |p| p.power_disable_rail(rail));
}

pub fn debug_putchar(byte: u8) {
    with((), |p| p.debug_putchar(byte));
}

pub fn persistent_load(buf: &mut [u8; BOOT_RECORD_LEN]) {
    with((), |p| p.persistent_load(buf));
}

pub fn persistent_store(buf: &[u8; BOOT_RECORD_LEN]) {
    with((), |p| p.persistent_store(buf));
}

pub fn radio_tx(frame: &[u8]) {
    with((), |p| p.radio_tx(frame));
}
