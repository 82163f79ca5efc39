// health.rs
//
// Task heartbeat supervision plus threshold checks over the basic platform
// vitals. The periodic pass is also the designated watchdog feeder: it runs
// from the known-good supervisor loop, so a hung loop stops the kicks and
// the hardware watchdog takes over.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::blackboard;
use crate::platform;
use crate::time;
use crate::types::{FswError, FswResult, Subsystem, MAX_MONITORED_TASKS, SUBSYSTEM_COUNT};

pub const TEMP_MIN_C: i16 = -40;
pub const TEMP_MAX_C: i16 = 85;
pub const CPU_WARNING_PERCENT: u8 = 80;
pub const STACK_WARNING_BYTES: u32 = 128;
pub const VOLTAGE_MIN_MV: u16 = 3000;
pub const VOLTAGE_MAX_MV: u16 = 4200;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HealthStatus {
    #[default]
    Ok = 0,
    Warning = 1,
    Critical = 2,
}

/// Platform vitals fed in by whoever samples them (SITL, ADC task).
#[derive(Debug, Clone, Copy)]
pub struct HealthReadings {
    pub temperature_c: i16,
    pub voltage_mv: u16,
    pub cpu_load_percent: u8,
    pub min_stack_bytes: u32,
}

impl Default for HealthReadings {
    fn default() -> Self {
        Self {
            temperature_c: 25,
            voltage_mv: 3700,
            cpu_load_percent: 0,
            min_stack_bytes: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MonitoredTask {
    name: &'static str,
    timeout_ms: u32,
    last_heartbeat_ms: u32,
    registered: bool,
    alive: bool,
}

const TASK_EMPTY: MonitoredTask = MonitoredTask {
    name: "",
    timeout_ms: 0,
    last_heartbeat_ms: 0,
    registered: false,
    alive: false,
};

pub struct HealthMonitor {
    tasks: [MonitoredTask; MAX_MONITORED_TASKS],
    readings: HealthReadings,
    overall: HealthStatus,
    error_counts: [u32; SUBSYSTEM_COUNT],
    warning_counts: [u32; SUBSYSTEM_COUNT],
    error_total: u32,
    warning_total: u32,
    initialized: bool,
}

impl HealthMonitor {
    pub const fn new() -> Self {
        Self {
            tasks: [TASK_EMPTY; MAX_MONITORED_TASKS],
            readings: HealthReadings {
                temperature_c: 25,
                voltage_mv: 3700,
                cpu_load_percent: 0,
                min_stack_bytes: u32::MAX,
            },
            overall: HealthStatus::Ok,
            error_counts: [0; SUBSYSTEM_COUNT],
            warning_counts: [0; SUBSYSTEM_COUNT],
            error_total: 0,
            warning_total: 0,
            initialized: false,
        }
    }

    pub fn register_task(
        &mut self,
        task_id: usize,
        name: &'static str,
        timeout_ms: u32,
        now_ms: u32,
    ) -> FswResult<()> {
        if task_id >= MAX_MONITORED_TASKS || timeout_ms == 0 {
            return Err(FswError::InvalidParam);
        }
        self.tasks[task_id] = MonitoredTask {
            name,
            timeout_ms,
            last_heartbeat_ms: now_ms,
            registered: true,
            alive: true,
        };
        Ok(())
    }

    pub fn heartbeat(&mut self, task_id: usize, now_ms: u32) {
        if task_id >= MAX_MONITORED_TASKS {
            return;
        }
        let task = &mut self.tasks[task_id];
        if task.registered {
            task.last_heartbeat_ms = now_ms;
            task.alive = true;
        }
    }

    pub fn is_task_alive(&self, task_id: usize) -> bool {
        task_id < MAX_MONITORED_TASKS && self.tasks[task_id].alive
    }

    pub fn task_name(&self, task_id: usize) -> Option<&'static str> {
        let task = self.tasks.get(task_id)?;
        task.registered.then_some(task.name)
    }

    pub fn set_readings(&mut self, readings: HealthReadings) {
        self.readings = readings;
    }

    pub fn readings(&self) -> HealthReadings {
        self.readings
    }

    pub fn overall(&self) -> HealthStatus {
        self.overall
    }

    /// One supervision pass: expire heartbeats, then apply the vital
    /// thresholds. A dead task or an out-of-range bus voltage is Critical;
    /// everything else degrades to Warning at most.
    pub fn periodic(&mut self, now_ms: u32) -> HealthStatus {
        let mut status = HealthStatus::Ok;

        for task in self.tasks.iter_mut() {
            if !task.registered {
                continue;
            }
            let elapsed = now_ms.wrapping_sub(task.last_heartbeat_ms);
            if elapsed > task.timeout_ms {
                task.alive = false;
                status = HealthStatus::Critical;
            }
        }

        if self.readings.temperature_c < TEMP_MIN_C || self.readings.temperature_c > TEMP_MAX_C {
            if status == HealthStatus::Ok {
                status = HealthStatus::Warning;
            }
        }

        if self.readings.voltage_mv < VOLTAGE_MIN_MV || self.readings.voltage_mv > VOLTAGE_MAX_MV {
            status = HealthStatus::Critical;
        }

        if self.readings.cpu_load_percent > CPU_WARNING_PERCENT && status == HealthStatus::Ok {
            status = HealthStatus::Warning;
        }

        if self.readings.min_stack_bytes < STACK_WARNING_BYTES && status == HealthStatus::Ok {
            status = HealthStatus::Warning;
        }

        self.overall = status;
        status
    }

    pub fn increment_error(&mut self, subsystem: Subsystem) {
        self.error_counts[subsystem as usize] += 1;
        self.error_total += 1;
    }

    pub fn increment_warning(&mut self, subsystem: Subsystem) {
        self.warning_counts[subsystem as usize] += 1;
        self.warning_total += 1;
    }

    pub fn error_count(&self, subsystem: Subsystem) -> u32 {
        self.error_counts[subsystem as usize]
    }

    pub fn warning_count(&self, subsystem: Subsystem) -> u32 {
        self.warning_counts[subsystem as usize]
    }

    pub fn totals(&self) -> (u32, u32) {
        (self.error_total, self.warning_total)
    }
}

static MONITOR: Mutex<CriticalSectionRawMutex, RefCell<HealthMonitor>> =
    Mutex::new(RefCell::new(HealthMonitor::new()));

pub fn init() {
    MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        *m = HealthMonitor::new();
        m.initialized = true;
    });
}

pub fn register_task(task_id: usize, name: &'static str, timeout_ms: u32) -> FswResult<()> {
    let now = time::now_ms();
    MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        if !m.initialized {
            return Err(FswError::NotReady);
        }
        m.register_task(task_id, name, timeout_ms, now)
    })
}

/// Heartbeat refresh, called by each monitored task from its own loop.
pub fn update_task(task_id: usize) {
    let now = time::now_ms();
    MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        if m.initialized {
            m.heartbeat(task_id, now);
        }
    });
}

/// Supervisor job. Always kicks the watchdog, even when degraded: the kick
/// proves the supervisor loop itself still runs.
pub fn periodic() {
    let now = time::now_ms();
    let result = MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        if !m.initialized {
            return None;
        }
        let status = m.periodic(now);
        Some((status, m.error_total, m.warning_total))
    });

    if let Some((status, errors, warnings)) = result {
        blackboard::SYSTEM.update(|s| {
            s.health = status;
            s.error_count = errors.min(u32::from(u16::MAX)) as u16;
            s.warning_count = warnings.min(u32::from(u16::MAX)) as u16;
        });
    }

    platform::watchdog_kick();
}

pub fn status() -> HealthStatus {
    MONITOR.lock(|m| m.borrow().overall)
}

pub fn readings() -> HealthReadings {
    MONITOR.lock(|m| m.borrow().readings)
}

pub fn set_readings(readings: HealthReadings) {
    MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        if m.initialized {
            m.set_readings(readings);
        }
    });
}

pub fn is_task_alive(task_id: usize) -> bool {
    MONITOR.lock(|m| m.borrow().is_task_alive(task_id))
}

pub fn increment_error(subsystem: Subsystem) {
    MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        if m.initialized {
            m.increment_error(subsystem);
        }
    });
}

pub fn increment_warning(subsystem: Subsystem) {
    MONITOR.lock(|m| {
        let mut m = m.borrow_mut();
        if m.initialized {
            m.increment_warning(subsystem);
        }
    });
}

pub fn error_count(subsystem: Subsystem) -> u32 {
    MONITOR.lock(|m| m.borrow().error_count(subsystem))
}

pub fn warning_count(subsystem: Subsystem) -> u32 {
    MONITOR.lock(|m| m.borrow().warning_count(subsystem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_monitor_is_ok() {
        let mut m = HealthMonitor::new();
        assert_eq!(m.periodic(0), HealthStatus::Ok);
    }

    #[test]
    fn missed_heartbeat_is_critical() {
        let mut m = HealthMonitor::new();
        m.register_task(0, "adcs", 1000, 0).unwrap();
        assert_eq!(m.periodic(500), HealthStatus::Ok);
        assert!(m.is_task_alive(0));
        assert_eq!(m.periodic(1001), HealthStatus::Critical);
        assert!(!m.is_task_alive(0));
    }

    #[test]
    fn heartbeat_keeps_task_alive() {
        let mut m = HealthMonitor::new();
        m.register_task(3, "comms", 500, 0).unwrap();
        for t in (0..5000).step_by(200) {
            m.heartbeat(3, t);
            assert_eq!(m.periodic(t + 100), HealthStatus::Ok);
        }
    }

    #[test]
    fn temperature_out_of_range_is_warning() {
        let mut m = HealthMonitor::new();
        m.set_readings(HealthReadings {
            temperature_c: 90,
            ..Default::default()
        });
        assert_eq!(m.periodic(0), HealthStatus::Warning);
        m.set_readings(HealthReadings {
            temperature_c: -41,
            ..Default::default()
        });
        assert_eq!(m.periodic(0), HealthStatus::Warning);
    }

    #[test]
    fn voltage_out_of_range_is_critical() {
        let mut m = HealthMonitor::new();
        m.set_readings(HealthReadings {
            voltage_mv: 2900,
            ..Default::default()
        });
        assert_eq!(m.periodic(0), HealthStatus::Critical);
        m.set_readings(HealthReadings {
            voltage_mv: 4300,
            ..Default::default()
        });
        assert_eq!(m.periodic(0), HealthStatus::Critical);
    }

    #[test]
    fn cpu_and_stack_warnings_do_not_mask_critical() {
        let mut m = HealthMonitor::new();
        m.set_readings(HealthReadings {
            cpu_load_percent: 95,
            voltage_mv: 2500,
            ..Default::default()
        });
        assert_eq!(m.periodic(0), HealthStatus::Critical);
    }

    #[test]
    fn stack_low_is_warning() {
        let mut m = HealthMonitor::new();
        m.set_readings(HealthReadings {
            min_stack_bytes: 64,
            ..Default::default()
        });
        assert_eq!(m.periodic(0), HealthStatus::Warning);
    }

    #[test]
    fn per_subsystem_counters() {
        let mut m = HealthMonitor::new();
        m.increment_error(Subsystem::Eps);
        m.increment_error(Subsystem::Eps);
        m.increment_warning(Subsystem::Comms);
        assert_eq!(m.error_count(Subsystem::Eps), 2);
        assert_eq!(m.warning_count(Subsystem::Comms), 1);
        assert_eq!(m.totals(), (2, 1));
    }

    #[test]
    fn register_rejects_bad_params() {
        let mut m = HealthMonitor::new();
        assert_eq!(
            m.register_task(MAX_MONITORED_TASKS, "x", 100, 0),
            Err(FswError::InvalidParam)
        );
        assert_eq!(m.register_task(0, "x", 0, 0), Err(FswError::InvalidParam));
    }
}
