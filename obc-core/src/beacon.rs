// beacon.rs
//
// Unidirectional status broadcast, independent of the TM queue. The frame
// is a packed 46-byte layout any ground-segment decoder (or amateur
// operator) can unpack without PUS tooling: little-endian fields, CCITT CRC
// over the first 44 bytes. Cadence tightens as the spacecraft degrades.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::ccsds;
use crate::eps::BatteryState;
use crate::types::SystemMode;
use crate::{blackboard, boot, platform, time};

pub const CALLSIGN_LEN: usize = 8;
pub const FRAME_LEN: usize = 46;
pub const EMERGENCY_FRAME_LEN: usize = 16;

pub const NORMAL_INTERVAL_MS: u32 = 30_000;
pub const SAFE_INTERVAL_MS: u32 = 10_000;
pub const EMERGENCY_INTERVAL_MS: u32 = 5_000;
pub const MIN_INTERVAL_MS: u32 = 1_000;
pub const MAX_INTERVAL_MS: u32 = 300_000;

pub const FRAME_VERSION: u8 = 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameType {
    Health = 0,
    Status = 1,
    Emergency = 2,
    Custom = 3,
}

// Emergency code bitmask.
pub const EMERGENCY_POWER: u8 = 0x01;
pub const EMERGENCY_ATTITUDE: u8 = 0x02;
pub const EMERGENCY_THERMAL: u8 = 0x04;
pub const EMERGENCY_COMMS: u8 = 0x08;
pub const EMERGENCY_FDIR: u8 = 0x10;

const DEFAULT_CALLSIGN: &[u8] = b"OBC-3U";

/// Everything a health frame carries, gathered from the blackboard.
#[derive(Debug, Clone, Copy)]
pub struct BeaconInputs {
    pub uptime_s: u32,
    pub mode: SystemMode,
    pub health_flags: u8,
    pub reset_count: u8,
    pub fault_flags: u8,
    pub battery: BatteryState,
    pub solar_mw: u16,
    pub quat_q15: [i16; 4],
    pub temps_c: [i8; 4],
    pub rssi_dbm: i8,
    pub rx_24h: u8,
    pub tx_24h: u8,
    pub link_margin_db: u8,
}

pub struct Beacon {
    callsign: [u8; CALLSIGN_LEN],
    interval_ms: u32,
    last_tx_ms: u32,
    tx_count: u32,
    sequence: u16,
    enabled: bool,
    initialized: bool,
}

impl Beacon {
    pub const fn new() -> Self {
        let mut callsign = [0u8; CALLSIGN_LEN];
        let mut i = 0;
        while i < DEFAULT_CALLSIGN.len() {
            callsign[i] = DEFAULT_CALLSIGN[i];
            i += 1;
        }
        Self {
            callsign,
            interval_ms: NORMAL_INTERVAL_MS,
            last_tx_ms: 0,
            tx_count: 0,
            sequence: 0,
            enabled: true,
            initialized: false,
        }
    }

    pub fn set_callsign(&mut self, callsign: &str) {
        self.callsign = [0u8; CALLSIGN_LEN];
        let bytes = callsign.as_bytes();
        let take = bytes.len().min(CALLSIGN_LEN);
        self.callsign[..take].copy_from_slice(&bytes[..take]);
    }

    pub fn callsign(&self) -> [u8; CALLSIGN_LEN] {
        self.callsign
    }

    /// Clamped to [1 s, 300 s].
    pub fn set_interval_ms(&mut self, interval_ms: u32) {
        self.interval_ms = interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Effective cadence for the current mode. Safe and Recovery beacons
    /// run faster regardless of the configured interval.
    pub fn effective_interval_ms(&self, mode: SystemMode) -> u32 {
        match mode {
            SystemMode::Safe => SAFE_INTERVAL_MS,
            SystemMode::Recovery => EMERGENCY_INTERVAL_MS,
            _ => self.interval_ms,
        }
    }

    pub fn due(&self, now_ms: u32, mode: SystemMode) -> bool {
        self.enabled && now_ms.wrapping_sub(self.last_tx_ms) >= self.effective_interval_ms(mode)
    }

    pub fn mark_sent(&mut self, now_ms: u32) {
        self.last_tx_ms = now_ms;
        self.tx_count += 1;
    }

    /// Pack a health frame. Little-endian fields, CRC over bytes 0..44.
    pub fn build_frame(&mut self, inputs: &BeaconInputs) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0..8].copy_from_slice(&self.callsign);
        frame[8] = FrameType::Health as u8;
        frame[9] = FRAME_VERSION;
        frame[10..12].copy_from_slice(&self.sequence.to_le_bytes());
        self.sequence = self.sequence.wrapping_add(1);

        frame[12..16].copy_from_slice(&inputs.uptime_s.to_le_bytes());
        frame[16] = inputs.mode as u8;
        frame[17] = inputs.health_flags;
        frame[18] = inputs.reset_count;
        frame[19] = inputs.fault_flags;

        frame[20..22].copy_from_slice(&inputs.battery.voltage_mv.to_le_bytes());
        frame[22..24].copy_from_slice(&inputs.battery.current_ma.to_le_bytes());
        frame[24] = inputs.battery.soc_percent;
        frame[25] = inputs.battery.temperature_c as u8;
        frame[26..28].copy_from_slice(&inputs.solar_mw.to_le_bytes());

        for (i, q) in inputs.quat_q15.iter().enumerate() {
            frame[28 + i * 2..30 + i * 2].copy_from_slice(&q.to_le_bytes());
        }

        for (i, t) in inputs.temps_c.iter().enumerate() {
            frame[36 + i] = *t as u8;
        }

        frame[40] = inputs.rssi_dbm as u8;
        frame[41] = inputs.rx_24h;
        frame[42] = inputs.tx_24h;
        frame[43] = inputs.link_margin_db;

        let crc = ccsds::crc16(&frame[..FRAME_LEN - 2]);
        frame[44..46].copy_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Pack the short emergency frame:
    /// `callsign[8] | code | sequence | timestamp_s u32 | crc16`.
    pub fn build_emergency(&mut self, code: u8, timestamp_s: u32) -> [u8; EMERGENCY_FRAME_LEN] {
        let mut frame = [0u8; EMERGENCY_FRAME_LEN];
        frame[0..8].copy_from_slice(&self.callsign);
        frame[8] = code;
        frame[9] = (self.sequence & 0xFF) as u8;
        self.sequence = self.sequence.wrapping_add(1);
        frame[10..14].copy_from_slice(&timestamp_s.to_le_bytes());
        let crc = ccsds::crc16(&frame[..EMERGENCY_FRAME_LEN - 2]);
        frame[14..16].copy_from_slice(&crc.to_le_bytes());
        frame
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    pub fn last_tx_ms(&self) -> u32 {
        self.last_tx_ms
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

static BEACON: Mutex<CriticalSectionRawMutex, RefCell<Beacon>> =
    Mutex::new(RefCell::new(Beacon::new()));

pub fn init() {
    BEACON.lock(|b| {
        let mut b = b.borrow_mut();
        *b = Beacon::new();
        b.initialized = true;
    });
}

fn gather_inputs() -> BeaconInputs {
    let sys = blackboard::SYSTEM.get();
    let power = blackboard::POWER.get();
    let adcs = blackboard::ADCS.get();
    let comms = blackboard::COMMS.get();
    let thermal = blackboard::THERMAL.get();

    BeaconInputs {
        uptime_s: time::now_s(),
        mode: sys.mode,
        health_flags: sys.health as u8,
        reset_count: boot::boot_count().min(u32::from(u8::MAX)) as u8,
        fault_flags: sys.fault_flags,
        battery: power.battery,
        solar_mw: power.budget.generation_mw,
        quat_q15: adcs.quat_q15,
        temps_c: [
            thermal.obc_c,
            power.battery.temperature_c,
            thermal.comms_c,
            thermal.payload_c,
        ],
        rssi_dbm: comms.rssi_dbm,
        rx_24h: comms.rx_24h,
        tx_24h: comms.tx_24h,
        link_margin_db: comms.link_margin_db,
    }
}

/// Supervisor job: transmit when the mode-dependent cadence elapses.
pub fn periodic() {
    let now = time::now_ms();
    let mode = blackboard::SYSTEM.get().mode;

    let due = BEACON.lock(|b| {
        let b = b.borrow();
        b.initialized && b.due(now, mode)
    });
    if due {
        transmit_now();
    }
}

/// Build and radiate one health frame immediately.
pub fn transmit_now() {
    let inputs = gather_inputs();
    let now = time::now_ms();
    let frame = BEACON.lock(|b| {
        let mut b = b.borrow_mut();
        if !b.initialized {
            return None;
        }
        let frame = b.build_frame(&inputs);
        b.mark_sent(now);
        Some(frame)
    });
    if let Some(frame) = frame {
        platform::radio_tx(&frame);
    }
}

/// Radiate an emergency frame carrying a bitmask of emergency codes.
pub fn transmit_emergency(code: u8) {
    let now_s = time::now_s();
    let frame = BEACON.lock(|b| {
        let mut b = b.borrow_mut();
        if !b.initialized {
            return None;
        }
        let frame = b.build_emergency(code, now_s);
        b.tx_count += 1;
        Some(frame)
    });
    if let Some(frame) = frame {
        platform::radio_tx(&frame);
    }
}

pub fn set_callsign(callsign: &str) {
    BEACON.lock(|b| {
        let mut b = b.borrow_mut();
        if b.initialized {
            b.set_callsign(callsign);
        }
    });
}

pub fn set_interval_ms(interval_ms: u32) {
    BEACON.lock(|b| {
        let mut b = b.borrow_mut();
        if b.initialized {
            b.set_interval_ms(interval_ms);
        }
    });
}

pub fn enable() {
    BEACON.lock(|b| b.borrow_mut().enabled = true);
}

pub fn disable() {
    BEACON.lock(|b| b.borrow_mut().enabled = false);
}

pub fn is_enabled() -> bool {
    BEACON.lock(|b| b.borrow().enabled)
}

pub fn tx_count() -> u32 {
    BEACON.lock(|b| b.borrow().tx_count)
}

pub fn last_tx_ms() -> u32 {
    BEACON.lock(|b| b.borrow().last_tx_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> BeaconInputs {
        BeaconInputs {
            uptime_s: 3600,
            mode: SystemMode::Nominal,
            health_flags: 0,
            reset_count: 4,
            fault_flags: 0b0000_0101,
            battery: BatteryState {
                voltage_mv: 3850,
                current_ma: -120,
                soc_percent: 76,
                temperature_c: 11,
                capacity_mah: 5200,
                remaining_mah: 3952,
            },
            solar_mw: 1440,
            quat_q15: [i16::MAX, 0, 0, 0],
            temps_c: [25, 11, 24, 19],
            rssi_dbm: -82,
            rx_24h: 12,
            tx_24h: 200,
            link_margin_db: 9,
        }
    }

    #[test]
    fn frame_is_46_bytes_with_valid_crc() {
        let mut beacon = Beacon::new();
        let frame = beacon.build_frame(&inputs());
        assert_eq!(frame.len(), FRAME_LEN);
        let crc = u16::from_le_bytes([frame[44], frame[45]]);
        assert_eq!(crc, ccsds::crc16(&frame[..44]));
    }

    #[test]
    fn frame_field_packing() {
        let mut beacon = Beacon::new();
        let frame = beacon.build_frame(&inputs());
        assert_eq!(&frame[0..6], b"OBC-3U");
        assert_eq!(frame[8], FrameType::Health as u8);
        assert_eq!(frame[9], FRAME_VERSION);
        assert_eq!(u16::from_le_bytes([frame[10], frame[11]]), 0);
        assert_eq!(u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]), 3600);
        assert_eq!(frame[16], SystemMode::Nominal as u8);
        assert_eq!(frame[18], 4);
        assert_eq!(frame[19], 0b0000_0101);
        assert_eq!(u16::from_le_bytes([frame[20], frame[21]]), 3850);
        assert_eq!(i16::from_le_bytes([frame[22], frame[23]]), -120);
        assert_eq!(frame[24], 76);
        assert_eq!(frame[25] as i8, 11);
        assert_eq!(u16::from_le_bytes([frame[26], frame[27]]), 1440);
        assert_eq!(i16::from_le_bytes([frame[28], frame[29]]), i16::MAX);
        assert_eq!(frame[40] as i8, -82);
        assert_eq!(frame[43], 9);
    }

    #[test]
    fn sequence_increments_per_frame() {
        let mut beacon = Beacon::new();
        let a = beacon.build_frame(&inputs());
        let b = beacon.build_frame(&inputs());
        assert_eq!(u16::from_le_bytes([a[10], a[11]]), 0);
        assert_eq!(u16::from_le_bytes([b[10], b[11]]), 1);
    }

    #[test]
    fn cadence_tracks_mode() {
        let beacon = Beacon::new();
        assert_eq!(
            beacon.effective_interval_ms(SystemMode::Nominal),
            NORMAL_INTERVAL_MS
        );
        assert_eq!(beacon.effective_interval_ms(SystemMode::Safe), SAFE_INTERVAL_MS);
        assert_eq!(
            beacon.effective_interval_ms(SystemMode::Recovery),
            EMERGENCY_INTERVAL_MS
        );
    }

    #[test]
    fn due_respects_interval_and_enable() {
        let mut beacon = Beacon::new();
        assert!(beacon.due(NORMAL_INTERVAL_MS, SystemMode::Nominal));
        beacon.mark_sent(NORMAL_INTERVAL_MS);
        assert!(!beacon.due(NORMAL_INTERVAL_MS + 1, SystemMode::Nominal));
        // Safe mode beacons sooner.
        assert!(beacon.due(NORMAL_INTERVAL_MS + SAFE_INTERVAL_MS, SystemMode::Safe));
        beacon.set_enabled(false);
        assert!(!beacon.due(u32::MAX, SystemMode::Nominal));
    }

    #[test]
    fn interval_setter_clamps() {
        let mut beacon = Beacon::new();
        beacon.set_interval_ms(10);
        assert_eq!(beacon.interval_ms(), MIN_INTERVAL_MS);
        beacon.set_interval_ms(10_000_000);
        assert_eq!(beacon.interval_ms(), MAX_INTERVAL_MS);
        beacon.set_interval_ms(45_000);
        assert_eq!(beacon.interval_ms(), 45_000);
    }

    #[test]
    fn emergency_frame_layout() {
        let mut beacon = Beacon::new();
        beacon.set_callsign("XX1YYZ");
        let frame = beacon.build_emergency(EMERGENCY_POWER | EMERGENCY_FDIR, 7200);
        assert_eq!(frame.len(), EMERGENCY_FRAME_LEN);
        assert_eq!(&frame[0..6], b"XX1YYZ");
        assert_eq!(frame[8], 0x11);
        assert_eq!(u32::from_le_bytes([frame[10], frame[11], frame[12], frame[13]]), 7200);
        let crc = u16::from_le_bytes([frame[14], frame[15]]);
        assert_eq!(crc, ccsds::crc16(&frame[..14]));
    }

    #[test]
    fn callsign_truncates_to_eight() {
        let mut beacon = Beacon::new();
        beacon.set_callsign("CALLSIGN-TOO-LONG");
        assert_eq!(&beacon.callsign(), b"CALLSIGN");
    }
}
