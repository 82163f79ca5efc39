//! Software-in-the-loop bridge for the OBC supervisor core.
//!
//! Runs the full supervisor against an in-memory platform at 100 Hz,
//! feeding it a scripted battery discharge/recharge profile so the whole
//! power-policy arc (nominal -> low power -> critical load shed ->
//! recovery) plays out in a couple of minutes on a desk.

use std::io::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::sleep;
use std::time::Duration;

use obc_core::ccsds;
use obc_core::eps::{BatteryReadings, EpsSensors, Rail, SolarPanel, NUM_SOLAR_PANELS};
use obc_core::mode;
use obc_core::platform::{Platform, BOOT_RECORD_LEN};
use obc_core::telecommand;
use obc_core::telemetry;
use obc_core::types::{ResetCause, Subsystem};
use obc_core::{eps, supervisor};

/// In-memory board: a settable millisecond clock and recorded side effects.
struct SitlPlatform {
    now_ms: AtomicU32,
    watchdog_kicks: AtomicU32,
    radio_bytes: AtomicU32,
    radio_frames: AtomicU32,
    persistent: std::sync::Mutex<[u8; BOOT_RECORD_LEN]>,
    debug_line: std::sync::Mutex<String>,
}

impl SitlPlatform {
    const fn new() -> Self {
        Self {
            now_ms: AtomicU32::new(0),
            watchdog_kicks: AtomicU32::new(0),
            radio_bytes: AtomicU32::new(0),
            radio_frames: AtomicU32::new(0),
            persistent: std::sync::Mutex::new([0; BOOT_RECORD_LEN]),
            debug_line: std::sync::Mutex::new(String::new()),
        }
    }

    fn advance_ms(&self, ms: u32) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Platform for SitlPlatform {
    fn time_ms(&self) -> u32 {
        self.now_ms.load(Ordering::Relaxed)
    }

    fn watchdog_kick(&self) {
        self.watchdog_kicks.fetch_add(1, Ordering::Relaxed);
    }

    fn reset_cause(&self) -> ResetCause {
        ResetCause::PowerOn
    }

    fn reset_software(&self) {
        log::error!("software reset requested, ending simulation");
        std::process::exit(0);
    }

    fn reset_subsystem(&self, subsys: Subsystem) {
        log::warn!("subsystem reset: {:?}", subsys);
    }

    fn safe_mode_pin_asserted(&self) -> bool {
        false
    }

    fn power_enable_rail(&self, rail: u8) {
        log::info!("rail {} on", rail);
    }

    fn power_disable_rail(&self, rail: u8) {
        log::info!("rail {} off", rail);
    }

    fn debug_putchar(&self, byte: u8) {
        let mut line = self.debug_line.lock().unwrap();
        if byte == b'\n' {
            log::debug!("dbg: {}", line);
            line.clear();
        } else {
            line.push(byte as char);
        }
    }

    fn persistent_load(&self, buf: &mut [u8; BOOT_RECORD_LEN]) {
        *buf = *self.persistent.lock().unwrap();
    }

    fn persistent_store(&self, buf: &[u8; BOOT_RECORD_LEN]) {
        *self.persistent.lock().unwrap() = *buf;
    }

    fn radio_tx(&self, frame: &[u8]) {
        self.radio_frames.fetch_add(1, Ordering::Relaxed);
        self.radio_bytes
            .fetch_add(frame.len() as u32, Ordering::Relaxed);
        log::debug!("radio tx {} bytes", frame.len());
    }
}

/// Scripted battery arc, keyed on simulated uptime:
/// 60 % at power-up, draining to 8 %, four seconds of critical, then a
/// recharge back to 80 %.
struct ProfileSensors {
    now_ms: &'static AtomicU32,
}

impl ProfileSensors {
    fn soc_at(&self, t_s: u32) -> u8 {
        match t_s {
            0..=104 => (60 - t_s / 2).max(8) as u8,
            105..=109 => 8,
            _ => (8 + (t_s - 110) * 2).min(80) as u8,
        }
    }
}

impl EpsSensors for ProfileSensors {
    fn battery(&self) -> BatteryReadings {
        let t_s = self.now_ms.load(Ordering::Relaxed) / 1000;
        let soc = self.soc_at(t_s);
        BatteryReadings {
            voltage_mv: 3300 + u16::from(soc) * 10,
            current_ma: if t_s >= 110 { 250 } else { -180 },
            soc_percent: soc,
            temperature_c: 12,
            capacity_mah: 5200,
        }
    }

    fn panels(&self) -> [SolarPanel; NUM_SOLAR_PANELS] {
        let t_s = self.now_ms.load(Ordering::Relaxed) / 1000;
        let mut panels = [SolarPanel::default(); NUM_SOLAR_PANELS];
        // In sunlight only during the recharge leg.
        if t_s >= 110 {
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

    fn rail_current_ma(&self, rail: Rail) -> u16 {
        match rail {
            Rail::Core3v3 => 60,
            Rail::Sensors5v => 80,
            Rail::Actuators12v => 150,
            Rail::Comms3v3 => 90,
            Rail::Payload => 120,
        }
    }
}

static PLATFORM: SitlPlatform = SitlPlatform::new();
static SENSORS: ProfileSensors = ProfileSensors {
    now_ms: &PLATFORM.now_ms,
};

fn uplink_ping() {
    let mut pkt = ccsds::build_tc(ccsds::Apid::System as u16, ccsds::pus::TEST, 1);
    pkt.finalize();
    let mut wire = [0u8; ccsds::MAX_PACKET_LEN];
    let len = pkt.serialize(&mut wire).expect("ping frame fits");
    if telecommand::submit_frame(&wire[..len]).is_err() {
        log::warn!("uplink channel full, ping dropped");
    }
}

fn uplink_mode_change(target: obc_core::SystemMode) {
    let mut pkt = ccsds::build_tc(ccsds::Apid::System as u16, ccsds::pus::FUNCTION_MGMT, 1);
    pkt.set_data(&[target as u8]).expect("one byte fits");
    pkt.finalize();
    let mut wire = [0u8; ccsds::MAX_PACKET_LEN];
    let len = pkt.serialize(&mut wire).expect("mode frame fits");
    if telecommand::submit_frame(&wire[..len]).is_err() {
        log::warn!("uplink channel full, mode change dropped");
    }
}

fn main() {
    env_logger::init();
    println!("OBC SITL: booting supervisor...");

    let initial = supervisor::boot(&PLATFORM, &SENSORS);
    println!(
        "Boot complete: mode {:?}, boot count {}",
        initial,
        obc_core::boot::boot_count()
    );

    let mut downlinked: u32 = 0;
    let mut injected_ping = false;
    let mut injected_mode = false;

    loop {
        PLATFORM.advance_ms(supervisor::TICK_MS);
        supervisor::tick(supervisor::TICK_MS);

        let t_ms = PLATFORM.time_ms();

        // Scripted ground contacts.
        if t_ms >= 5_000 && !injected_ping {
            injected_ping = true;
            uplink_ping();
        }
        if t_ms >= 8_000 && !injected_mode {
            injected_mode = true;
            uplink_mode_change(obc_core::SystemMode::Nominal);
        }

        // Radio task stand-in: drain the TM queue onto the "air".
        while let Some(pkt) = telemetry::dequeue_packet() {
            let mut wire = [0u8; ccsds::MAX_PACKET_LEN];
            if let Ok(len) = pkt.serialize(&mut wire) {
                PLATFORM.radio_tx(&wire[..len]);
                downlinked += 1;
            }
        }

        if t_ms % 1000 == 0 {
            // Drain the on-board byte ring out the debug port.
            obc_core::logging::logger::flush_debug();

            let battery = eps::battery();
            print!(
                "\rt={:>4}s | mode {:<9} | soc {:>3}% | rails C:{} S:{} A:{} R:{} P:{} | tm {:>4} | beacons {:>3}  ",
                t_ms / 1000,
                format!("{:?}", mode::current()),
                battery.soc_percent,
                u8::from(eps::is_rail_enabled(Rail::Core3v3)),
                u8::from(eps::is_rail_enabled(Rail::Sensors5v)),
                u8::from(eps::is_rail_enabled(Rail::Actuators12v)),
                u8::from(eps::is_rail_enabled(Rail::Comms3v3)),
                u8::from(eps::is_rail_enabled(Rail::Payload)),
                downlinked,
                obc_core::beacon::tx_count(),
            );
            std::io::stdout().flush().ok();
        }

        sleep(Duration::from_millis(1));
    }
}
