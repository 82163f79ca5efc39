// blackboard.rs
//
// Shared status snapshots. Producers (the supervisor jobs) publish here
// after releasing their own locks; consumers (telemetry generators, beacon
// assembly) read only these cells, so packet building never reaches into
// another component's lock.

use crate::eps::EpsTelemetry;
use crate::health::HealthStatus;
use crate::snapshot::SnapshotCell;
use crate::types::{ResetCause, SystemMode};

/// Supervisor-level status: mode, health roll-up, boot bookkeeping and the
/// active-fault bitmask (first eight fault types).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSnapshot {
    pub mode: SystemMode,
    pub health: HealthStatus,
    pub boot_count: u32,
    pub reset_cause: ResetCause,
    pub error_count: u16,
    pub warning_count: u16,
    pub fault_flags: u8,
}

/// Attitude snapshot published by the ADCS task. Identity quaternion until
/// the first update.
#[derive(Debug, Clone, Copy)]
pub struct AdcsSnapshot {
    /// Unit quaternion, w-x-y-z, Q15.
    pub quat_q15: [i16; 4],
    /// Body rates in millidegrees per second.
    pub rate_mdps: [i16; 3],
    pub mode: u8,
    pub status: u8,
    pub error_angle_mdeg: u16,
}

impl Default for AdcsSnapshot {
    fn default() -> Self {
        Self {
            quat_q15: [i16::MAX, 0, 0, 0],
            rate_mdps: [0; 3],
            mode: 0,
            status: 0,
            error_angle_mdeg: 0,
        }
    }
}

/// Link statistics published by the radio task.
#[derive(Debug, Clone, Copy)]
pub struct CommsSnapshot {
    pub rx_packets: u32,
    pub tx_packets: u32,
    pub rssi_dbm: i8,
    pub snr_db: i8,
    pub crc_errors: u16,
    pub rx_24h: u8,
    pub tx_24h: u8,
    pub link_margin_db: u8,
}

impl Default for CommsSnapshot {
    fn default() -> Self {
        Self {
            rx_packets: 0,
            tx_packets: 0,
            rssi_dbm: -80,
            snr_db: 10,
            crc_errors: 0,
            rx_24h: 0,
            tx_24h: 0,
            link_margin_db: 10,
        }
    }
}

/// Spot temperatures published by the thermal sampling task.
#[derive(Debug, Clone, Copy)]
pub struct ThermalSnapshot {
    pub obc_c: i8,
    pub battery_c: i8,
    pub comms_c: i8,
    pub payload_c: i8,
}

impl Default for ThermalSnapshot {
    fn default() -> Self {
        Self {
            obc_c: 25,
            battery_c: 25,
            comms_c: 25,
            payload_c: 25,
        }
    }
}

pub static SYSTEM: SnapshotCell<SystemSnapshot> = SnapshotCell::new(SystemSnapshot {
    mode: SystemMode::Boot,
    health: HealthStatus::Ok,
    boot_count: 0,
    reset_cause: ResetCause::Unknown,
    error_count: 0,
    warning_count: 0,
    fault_flags: 0,
});

pub static POWER: SnapshotCell<EpsTelemetry> = SnapshotCell::new(EpsTelemetry::new());

pub static ADCS: SnapshotCell<AdcsSnapshot> = SnapshotCell::new(AdcsSnapshot {
    quat_q15: [i16::MAX, 0, 0, 0],
    rate_mdps: [0; 3],
    mode: 0,
    status: 0,
    error_angle_mdeg: 0,
});

pub static COMMS: SnapshotCell<CommsSnapshot> = SnapshotCell::new(CommsSnapshot {
    rx_packets: 0,
    tx_packets: 0,
    rssi_dbm: -80,
    snr_db: 10,
    crc_errors: 0,
    rx_24h: 0,
    tx_24h: 0,
    link_margin_db: 10,
});

pub static THERMAL: SnapshotCell<ThermalSnapshot> = SnapshotCell::new(ThermalSnapshot {
    obc_c: 25,
    battery_c: 25,
    comms_c: 25,
    payload_c: 25,
});
