use core::sync::atomic::Ordering;

use super::*;
use crate::boot::BootRecord;
use crate::eps::Rail;
use crate::fdir::FaultType;
use crate::testutil::{serial, TEST_PLATFORM, TEST_SENSORS};
use crate::types::ResetCause;

fn bring_up() -> SystemMode {
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);
    boot(&TEST_PLATFORM, &TEST_SENSORS)
}

#[test]
fn cold_boot_enters_detumble() {
    let _guard = serial();
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);
    TEST_PLATFORM.set_cause(ResetCause::PowerOn);

    let initial = boot(&TEST_PLATFORM, &TEST_SENSORS);
    assert_eq!(initial, SystemMode::Detumble);

    let state = mode::state();
    assert_eq!(state.current, SystemMode::Detumble);
    assert_eq!(state.entry_time_s, 0);
    assert_eq!(state.timeout_s, mode::DETUMBLE_TIMEOUT_S);
    assert_eq!(boot::boot_count(), 1);
}

#[test]
fn third_watchdog_reset_boots_safe() {
    let _guard = serial();
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);

    // A valid record from two previous watchdog resets.
    let mut rec = BootRecord::fresh();
    rec.boot_count = 2;
    rec.reset_count_watchdog = 2;
    rec.seal();
    TEST_PLATFORM.write_persistent(rec.to_bytes());
    TEST_PLATFORM.set_cause(ResetCause::Watchdog);

    let initial = boot(&TEST_PLATFORM, &TEST_SENSORS);
    assert_eq!(initial, SystemMode::Safe);
    let stored = boot::record().unwrap();
    assert_eq!(stored.reset_count_watchdog, 3);
    assert_eq!(stored.boot_count, 3);
}

#[test]
fn first_watchdog_reset_boots_recovery_and_flags_nothing() {
    let _guard = serial();
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);
    TEST_PLATFORM.set_cause(ResetCause::Watchdog);

    let initial = boot(&TEST_PLATFORM, &TEST_SENSORS);
    assert_eq!(initial, SystemMode::Recovery);

    // boot_count is 1, so no reset loop is reported.
    fdir::periodic();
    assert!(!fdir::is_fault_active(FaultType::ResetLoop));
}

#[test]
fn watchdog_reset_loop_reported_by_fdir() {
    let _guard = serial();
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);

    let mut rec = BootRecord::fresh();
    rec.boot_count = 2;
    rec.reset_count_watchdog = 1;
    rec.seal();
    TEST_PLATFORM.write_persistent(rec.to_bytes());
    TEST_PLATFORM.set_cause(ResetCause::Watchdog);

    boot(&TEST_PLATFORM, &TEST_SENSORS);
    assert_eq!(boot::boot_count(), 3);

    fdir::periodic();
    assert!(fdir::is_fault_active(FaultType::ResetLoop));
}

#[test]
fn corrupted_record_is_reinitialized() {
    let _guard = serial();
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);

    let mut rec = BootRecord::fresh();
    rec.boot_count = 40;
    rec.seal();
    let mut raw = rec.to_bytes();
    raw[5] ^= 0xFF;
    TEST_PLATFORM.write_persistent(raw);
    TEST_PLATFORM.set_cause(ResetCause::PowerOn);

    boot(&TEST_PLATFORM, &TEST_SENSORS);
    // History was lost; the fresh record counted this boot only.
    assert_eq!(boot::boot_count(), 1);
    // And the stored copy is valid again.
    assert!(BootRecord::validate(&TEST_PLATFORM.read_persistent()));
}

#[test]
fn eps_critical_path_sheds_rails_and_reports() {
    let _guard = serial();
    bring_up();
    TEST_SENSORS.set_soc(9);

    // Step past one EPS period.
    for _ in 0..100 {
        TEST_PLATFORM.advance_ms(TICK_MS);
        tick(TICK_MS);
    }

    assert!(eps::is_critical());
    assert!(!eps::is_rail_enabled(Rail::Sensors5v));
    assert!(!eps::is_rail_enabled(Rail::Actuators12v));
    assert!(!eps::is_rail_enabled(Rail::Payload));
    assert!(eps::is_rail_enabled(Rail::Core3v3));
    assert!(!TEST_PLATFORM.rail_on(Rail::Sensors5v));
    assert!(fdir::is_fault_active(FaultType::PowerCritical));
}

#[test]
fn low_battery_requests_low_power_mode() {
    let _guard = serial();
    let initial = bring_up();
    assert_eq!(initial, SystemMode::Detumble);
    TEST_SENSORS.set_soc(18);

    for _ in 0..150 {
        TEST_PLATFORM.advance_ms(TICK_MS);
        tick(TICK_MS);
    }

    // Detumble -> LowPower is a legal transition, executed by mode.process.
    assert_eq!(mode::current(), SystemMode::LowPower);
    assert!(eps::is_low_power());
}

#[test]
fn tick_always_kicks_watchdog() {
    let _guard = serial();
    bring_up();

    let before = TEST_PLATFORM.watchdog_kicks.load(Ordering::Relaxed);
    for _ in 0..10 {
        tick(TICK_MS);
    }
    assert!(TEST_PLATFORM.watchdog_kicks.load(Ordering::Relaxed) >= before + 10);
}

#[test]
fn housekeeping_flows_to_the_queue() {
    let _guard = serial();
    bring_up();

    for _ in 0..110 {
        TEST_PLATFORM.advance_ms(TICK_MS);
        tick(TICK_MS);
    }
    // System, Power and ADCS HK are all due within the first second.
    assert!(telemetry::queue_count() >= 3);
    let pkt = telemetry::dequeue_packet().unwrap();
    assert_eq!(pkt.secondary.service_type, ccsds::pus::HOUSEKEEPING);
}

#[test]
fn beacon_radiates_on_safe_cadence() {
    let _guard = serial();
    TEST_PLATFORM.reset();
    TEST_SENSORS.set_soc(80);
    TEST_PLATFORM.set_safe_pin(true);

    let initial = boot(&TEST_PLATFORM, &TEST_SENSORS);
    assert_eq!(initial, SystemMode::Safe);

    // 11 simulated seconds: one safe-cadence beacon (10 s interval).
    for _ in 0..1100 {
        TEST_PLATFORM.advance_ms(TICK_MS);
        tick(TICK_MS);
    }
    assert!(TEST_PLATFORM.radio_frames.load(Ordering::Relaxed) >= 1);
    assert!(beacon::tx_count() >= 1);
}

#[test]
fn detumble_timeout_forces_safe() {
    let _guard = serial();
    let initial = bring_up();
    assert_eq!(initial, SystemMode::Detumble);

    // Jump past the 1800 s timeout and let mode.process run.
    TEST_PLATFORM.set_time_ms(mode::DETUMBLE_TIMEOUT_S * 1000 + 1000);
    for _ in 0..30 {
        tick(TICK_MS);
    }
    assert_eq!(mode::current(), SystemMode::Safe);
}
