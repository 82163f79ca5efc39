// supervisor.rs
//
// Boot wiring and the supervisor loop. `boot()` runs the persistent-record
// update, picks the initial mode and brings every singleton up in a fixed
// order; `tick()` is the 10 ms heartbeat the host loop (RTOS task or SITL)
// drives. The watchdog is kicked every tick even when no job fires.

use crate::blackboard;
use crate::eps::EpsSensors;
use crate::logging::{event_log, logger};
use crate::platform::Platform;
use crate::types::{Subsystem, SystemMode};
use crate::{beacon, boot, ccsds, eps, fdir, health, mode, platform, sched, telecommand, telemetry, time};

/// Supervisor tick period. The host loop calls `tick(TICK_MS)` at 100 Hz.
pub const TICK_MS: u32 = 10;

// Job cadences.
const MODE_PERIOD_MS: u32 = 200;
const HEALTH_PERIOD_MS: u32 = 200;
const HEALTH_SAFE_PERIOD_MS: u32 = 500;
const FDIR_PERIOD_MS: u32 = 500;
const EPS_PERIOD_MS: u32 = 1000;
const TC_PERIOD_MS: u32 = 50;
const TM_PERIOD_MS: u32 = 200;
const BEACON_PERIOD_MS: u32 = 1000;

fn on_mode_entry(mode: SystemMode) {
    if mode == SystemMode::Safe {
        eps::load_shed();
    }
}

/// Full boot sequence. Returns the mode the spacecraft came up in.
pub fn boot(p: &'static dyn Platform, sensors: &'static dyn EpsSensors) -> SystemMode {
    platform::register(p);

    // Persistent record first: validates, latches the reset cause, bumps
    // the counters and picks the initial mode.
    let report = boot::initialize();

    event_log::init();
    logger::init();
    time::init();
    health::init();
    mode::init(report.mode);
    fdir::init();
    eps::init(sensors);
    ccsds::init();
    telecommand::init();
    telemetry::init();
    beacon::init();
    sched::init();

    mode::set_entry_callback(on_mode_entry);

    blackboard::SYSTEM.update(|s| {
        s.mode = report.mode;
        s.boot_count = report.boot_count;
        s.reset_cause = report.cause;
    });

    // Safe mode slows the health cadence; everything else is fixed.
    let health_period = if report.mode == SystemMode::Safe {
        HEALTH_SAFE_PERIOD_MS
    } else {
        HEALTH_PERIOD_MS
    };

    let _ = sched::register(mode::process, MODE_PERIOD_MS);
    let _ = sched::register(health::periodic, health_period);
    let _ = sched::register(fdir::periodic, FDIR_PERIOD_MS);
    let _ = sched::register(eps::periodic, EPS_PERIOD_MS);
    let _ = sched::register(telecommand::periodic, TC_PERIOD_MS);
    let _ = sched::register(telemetry::periodic, TM_PERIOD_MS);
    let _ = sched::register(beacon::periodic, BEACON_PERIOD_MS);

    if !report.record_was_valid {
        event_log::warning(Subsystem::Boot, "boot record reinitialized");
    }
    event_log::info(Subsystem::Boot, "boot complete");
    crate::info!(
        "boot complete: mode {}, boot count {}",
        mode::mode_name(report.mode),
        report.boot_count
    );

    report.mode
}

/// One supervisor heartbeat: advance the job table, then kick the watchdog
/// regardless of whether anything fired.
pub fn tick(elapsed_ms: u32) {
    let _ = sched::step(elapsed_ms);
    platform::watchdog_kick();
}

#[cfg(test)]
mod tests;
