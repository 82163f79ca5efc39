// fdir.rs
//
// Fault detection, isolation and recovery. Faults are reported by any
// subsystem; the periodic pass matches active faults against the rule table
// and dispatches recovery actions. Actions that reach into other components
// (mode force, load shed, resets) are collected under the lock and executed
// after it is released, so FDIR never holds its own lock while calling out.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::blackboard;
use crate::logging::event_log;
use crate::types::{Subsystem, SystemMode, SUBSYSTEM_COUNT};
use crate::{boot, eps, mode, platform, telemetry, time};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultType {
    #[default]
    None = 0,
    WatchdogTimeout = 1,
    Brownout = 2,
    ResetLoop = 3,
    SensorInvalid = 4,
    ActuatorFail = 5,
    BusError = 6,
    MemoryError = 7,
    CommLoss = 8,
    PowerCritical = 9,
    ThermalLimit = 10,
    AttitudeLost = 11,
}

pub const FAULT_COUNT: usize = 12;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryAction {
    #[default]
    None = 0,
    Retry = 1,
    Isolate = 2,
    ResetSubsys = 3,
    SafeMode = 4,
    SystemReset = 5,
    PayloadOff = 6,
    LoadShed = 7,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FaultRecord {
    pub fault: FaultType,
    pub subsystem: Subsystem,
    pub timestamp_ms: u32,
    pub occurrence_count: u32,
    pub active: bool,
    pub last_action: RecoveryAction,
}

#[derive(Debug, Clone, Copy)]
pub struct FdirRule {
    pub fault: FaultType,
    pub threshold_count: u32,
    /// Reserved for rate-limited rule variants. The baseline dispatch uses
    /// cumulative occurrence counts only and never consults this field.
    pub window_ms: u32,
    pub action: RecoveryAction,
}

pub const RULES: [FdirRule; 11] = [
    FdirRule { fault: FaultType::WatchdogTimeout, threshold_count: 1, window_ms: 0, action: RecoveryAction::SystemReset },
    FdirRule { fault: FaultType::Brownout, threshold_count: 2, window_ms: 60_000, action: RecoveryAction::LoadShed },
    FdirRule { fault: FaultType::ResetLoop, threshold_count: 3, window_ms: 60_000, action: RecoveryAction::SafeMode },
    FdirRule { fault: FaultType::SensorInvalid, threshold_count: 3, window_ms: 10_000, action: RecoveryAction::Isolate },
    FdirRule { fault: FaultType::ActuatorFail, threshold_count: 2, window_ms: 5_000, action: RecoveryAction::Isolate },
    FdirRule { fault: FaultType::BusError, threshold_count: 5, window_ms: 1_000, action: RecoveryAction::ResetSubsys },
    FdirRule { fault: FaultType::MemoryError, threshold_count: 1, window_ms: 0, action: RecoveryAction::SafeMode },
    FdirRule { fault: FaultType::CommLoss, threshold_count: 10, window_ms: 60_000, action: RecoveryAction::Retry },
    FdirRule { fault: FaultType::PowerCritical, threshold_count: 1, window_ms: 0, action: RecoveryAction::LoadShed },
    FdirRule { fault: FaultType::ThermalLimit, threshold_count: 1, window_ms: 0, action: RecoveryAction::PayloadOff },
    FdirRule { fault: FaultType::AttitudeLost, threshold_count: 1, window_ms: 0, action: RecoveryAction::SafeMode },
];

/// Boot counter at or above this, with a watchdog reset cause, is a loop.
pub const RESET_LOOP_THRESHOLD: u32 = 3;

pub fn find_rule(fault: FaultType) -> Option<&'static FdirRule> {
    RULES.iter().find(|r| r.fault == fault)
}

/// True when the boot history indicates the watchdog is resetting us in a
/// loop.
pub fn detect_reset_loop(cause: crate::types::ResetCause, boot_count: u32) -> bool {
    cause == crate::types::ResetCause::Watchdog && boot_count >= RESET_LOOP_THRESHOLD
}

/// A recovery dispatch owed after a periodic pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAction {
    pub fault: FaultType,
    pub action: RecoveryAction,
    pub subsystem: Subsystem,
}

pub struct Fdir {
    records: [FaultRecord; FAULT_COUNT],
    isolated: [bool; SUBSYSTEM_COUNT],
    initialized: bool,
}

impl Fdir {
    pub const fn new() -> Self {
        const EMPTY: FaultRecord = FaultRecord {
            fault: FaultType::None,
            subsystem: Subsystem::Core,
            timestamp_ms: 0,
            occurrence_count: 0,
            active: false,
            last_action: RecoveryAction::None,
        };
        Self {
            records: [EMPTY; FAULT_COUNT],
            isolated: [false; SUBSYSTEM_COUNT],
            initialized: false,
        }
    }

    pub fn report(&mut self, now_ms: u32, fault: FaultType, subsystem: Subsystem) {
        let rec = &mut self.records[fault as usize];
        rec.fault = fault;
        rec.subsystem = subsystem;
        rec.timestamp_ms = now_ms;
        rec.occurrence_count += 1;
        rec.active = true;
    }

    pub fn clear(&mut self, fault: FaultType) {
        self.records[fault as usize].active = false;
    }

    pub fn is_active(&self, fault: FaultType) -> bool {
        self.records[fault as usize].active
    }

    pub fn count(&self, fault: FaultType) -> u32 {
        self.records[fault as usize].occurrence_count
    }

    pub fn record(&self, fault: FaultType) -> FaultRecord {
        self.records[fault as usize]
    }

    /// Match every active fault against its rule; return the actions owed
    /// and remember them as `last_action`.
    pub fn collect_actions(&mut self) -> Vec<PendingAction, FAULT_COUNT> {
        let mut pending = Vec::new();
        for rec in self.records.iter_mut() {
            if !rec.active {
                continue;
            }
            if let Some(rule) = find_rule(rec.fault) {
                if rec.occurrence_count >= rule.threshold_count {
                    rec.last_action = rule.action;
                    let _ = pending.push(PendingAction {
                        fault: rec.fault,
                        action: rule.action,
                        subsystem: rec.subsystem,
                    });
                }
            }
        }
        pending
    }

    pub fn isolate(&mut self, subsystem: Subsystem) {
        self.isolated[subsystem as usize] = true;
    }

    pub fn restore(&mut self, subsystem: Subsystem) {
        self.isolated[subsystem as usize] = false;
    }

    pub fn is_isolated(&self, subsystem: Subsystem) -> bool {
        self.isolated[subsystem as usize]
    }

    /// Bitmask of the first eight fault types, for the beacon.
    pub fn active_mask(&self) -> u8 {
        let mut mask = 0u8;
        for (i, rec) in self.records.iter().enumerate().take(8) {
            if rec.active {
                mask |= 1 << i;
            }
        }
        mask
    }
}

static FDIR: Mutex<CriticalSectionRawMutex, RefCell<Fdir>> = Mutex::new(RefCell::new(Fdir::new()));

pub fn init() {
    FDIR.lock(|f| {
        let mut f = f.borrow_mut();
        *f = Fdir::new();
        f.initialized = true;
    });
}

/// Record a fault occurrence: bump the counter, mark active, log an error
/// event and downlink an event report.
pub fn report_fault(fault: FaultType, subsystem: Subsystem) {
    let now = time::now_ms();
    let reported = FDIR.lock(|f| {
        let mut f = f.borrow_mut();
        if !f.initialized {
            return false;
        }
        f.report(now, fault, subsystem);
        true
    });
    if reported {
        crate::warn!("fault {} on subsystem {}", fault as u8, subsystem as u8);
        event_log::error(subsystem, fault as u16, "fault reported");
        telemetry::send_event(fault as u16, &[subsystem as u8]);
        publish_fault_mask();
    }
}

pub fn clear_fault(fault: FaultType) {
    let cleared = FDIR.lock(|f| {
        let mut f = f.borrow_mut();
        if !f.initialized {
            return false;
        }
        f.clear(fault);
        true
    });
    if cleared {
        telemetry::send_event(0x0300 | fault as u16, &[]);
        publish_fault_mask();
    }
}

pub fn is_fault_active(fault: FaultType) -> bool {
    FDIR.lock(|f| f.borrow().is_active(fault))
}

pub fn fault_count(fault: FaultType) -> u32 {
    FDIR.lock(|f| f.borrow().count(fault))
}

pub fn fault_record(fault: FaultType) -> FaultRecord {
    FDIR.lock(|f| f.borrow().record(fault))
}

pub fn is_isolated(subsystem: Subsystem) -> bool {
    FDIR.lock(|f| f.borrow().is_isolated(subsystem))
}

/// Supervisor job. Detects reset loops, then dispatches the recovery action
/// of every active fault whose counter has reached its rule's threshold.
pub fn periodic() {
    let initialized = FDIR.lock(|f| f.borrow().initialized);
    if !initialized {
        return;
    }

    if detect_reset_loop(boot::reset_cause(), boot::boot_count()) {
        report_fault(FaultType::ResetLoop, Subsystem::Boot);
    }

    let pending = FDIR.lock(|f| f.borrow_mut().collect_actions());
    for p in &pending {
        execute_action(p.action, p.subsystem);
    }
}

fn execute_action(action: RecoveryAction, subsystem: Subsystem) {
    match action {
        RecoveryAction::None | RecoveryAction::Retry => {}
        RecoveryAction::Isolate => isolate_subsystem(subsystem),
        RecoveryAction::ResetSubsys => platform::reset_subsystem(subsystem),
        RecoveryAction::SafeMode => mode::force(SystemMode::Safe),
        RecoveryAction::SystemReset => platform::reset_software(),
        RecoveryAction::PayloadOff => {
            let _ = eps::disable_rail(eps::Rail::Payload);
        }
        RecoveryAction::LoadShed => eps::load_shed(),
    }
}

/// Run one fault's recovery action immediately, outside the periodic pass.
pub fn execute_recovery(fault: FaultType) {
    let rec = fault_record(fault);
    if let Some(rule) = find_rule(fault) {
        execute_action(rule.action, rec.subsystem);
    }
}

pub fn isolate_subsystem(subsystem: Subsystem) {
    FDIR.lock(|f| {
        let mut f = f.borrow_mut();
        if f.initialized {
            f.isolate(subsystem);
        }
    });
    event_log::warning(subsystem, "subsystem isolated");
    telemetry::send_event(0x0100 | subsystem as u16, &[]);
}

pub fn restore_subsystem(subsystem: Subsystem) {
    FDIR.lock(|f| {
        let mut f = f.borrow_mut();
        if f.initialized {
            f.restore(subsystem);
        }
    });
    event_log::info(subsystem, "subsystem restored");
    telemetry::send_event(0x0200 | subsystem as u16, &[]);
}

/// Called once ground has confirmed a reset loop is resolved.
pub fn reset_loop_handled() {
    boot::clear_counters();
    clear_fault(FaultType::ResetLoop);
}

/// Emergency entry into Safe, with the reason on the event log.
pub fn force_safe_mode(reason: &str) {
    event_log::critical(Subsystem::Fdir, 0, reason);
    mode::force(SystemMode::Safe);
}

fn publish_fault_mask() {
    let mask = FDIR.lock(|f| f.borrow().active_mask());
    blackboard::SYSTEM.update(|s| s.fault_flags = mask);
}
