// eps.rs
//
// Electrical power system policy. Readings come from an opaque sensor
// provider; the periodic pass recomputes the power budget and walks the SOC
// thresholds, shedding load and requesting LowPower as the battery drains.
// Rail bookkeeping is logical state here; the actual switches are platform
// hooks, driven only after the EPS lock is released.

use core::cell::Cell;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::blackboard;
use crate::fdir::{self, FaultType};
use crate::logging::event_log;
use crate::types::{FswError, FswResult, Subsystem, SystemMode};
use crate::{mode, platform};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rail {
    /// OBC core supply. Never switched off.
    Core3v3 = 0,
    Sensors5v = 1,
    Actuators12v = 2,
    Comms3v3 = 3,
    Payload = 4,
}

pub const RAIL_COUNT: usize = 5;

pub const BATTERY_CRITICAL_SOC: u8 = 10;
pub const BATTERY_LOW_SOC: u8 = 20;
pub const BATTERY_NOMINAL_SOC: u8 = 50;
pub const BATTERY_FULL_SOC: u8 = 95;

pub const NUM_SOLAR_PANELS: usize = 6;

/// Generation below this is treated as eclipse.
pub const ECLIPSE_THRESHOLD_MW: u16 = 50;

/// Largest single load accepted while in low-power mode.
pub const LOW_POWER_LOAD_LIMIT_MW: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryState {
    pub voltage_mv: u16,
    /// Positive while charging.
    pub current_ma: i16,
    pub soc_percent: u8,
    pub temperature_c: i8,
    pub capacity_mah: u32,
    pub remaining_mah: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SolarPanel {
    pub voltage_mv: u16,
    pub current_ma: u16,
    pub power_mw: u16,
    pub illuminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerBudget {
    pub generation_mw: u16,
    pub consumption_mw: u16,
    pub balance_mw: i16,
    pub positive: bool,
}

/// Raw battery readings from the provider; `remaining_mah` is derived here.
#[derive(Debug, Clone, Copy)]
pub struct BatteryReadings {
    pub voltage_mv: u16,
    pub current_ma: i16,
    pub soc_percent: u8,
    pub temperature_c: i8,
    pub capacity_mah: u32,
}

impl Default for BatteryReadings {
    fn default() -> Self {
        Self {
            voltage_mv: 3700,
            current_ma: 0,
            soc_percent: 80,
            temperature_c: 25,
            capacity_mah: 5200,
        }
    }
}

/// Opaque sensor provider. Flight wires this to the battery monitor and
/// panel current sensors; the SITL feeds a scripted profile.
pub trait EpsSensors: Sync {
    fn battery(&self) -> BatteryReadings;
    fn panels(&self) -> [SolarPanel; NUM_SOLAR_PANELS];
    fn rail_current_ma(&self, rail: Rail) -> u16;
}

/// Full EPS state snapshot, published to the blackboard every pass.
#[derive(Debug, Clone, Copy)]
pub struct EpsTelemetry {
    pub battery: BatteryState,
    pub panels: [SolarPanel; NUM_SOLAR_PANELS],
    pub budget: PowerBudget,
    pub rail_enabled: [bool; RAIL_COUNT],
    pub rail_current_ma: [u16; RAIL_COUNT],
    pub low_power_mode: bool,
    pub critical_power: bool,
}

impl EpsTelemetry {
    pub const fn new() -> Self {
        Self {
            battery: BatteryState {
                voltage_mv: 0,
                current_ma: 0,
                soc_percent: 0,
                temperature_c: 0,
                capacity_mah: 0,
                remaining_mah: 0,
            },
            panels: [SolarPanel {
                voltage_mv: 0,
                current_ma: 0,
                power_mw: 0,
                illuminated: false,
            }; NUM_SOLAR_PANELS],
            budget: PowerBudget {
                generation_mw: 0,
                consumption_mw: 0,
                balance_mw: 0,
                positive: false,
            },
            rail_enabled: [false; RAIL_COUNT],
            rail_current_ma: [0; RAIL_COUNT],
            low_power_mode: false,
            critical_power: false,
        }
    }
}

/// Rail switch changes owed to the platform after a state update.
pub type RailChanges = Vec<(Rail, bool), RAIL_COUNT>;

/// Side effects of one periodic pass, dispatched by the caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EpsDirective {
    pub report_power_critical: bool,
    pub request_low_power: bool,
}

pub struct Eps {
    telemetry: EpsTelemetry,
    initialized: bool,
}

impl Eps {
    pub const fn new() -> Self {
        Self {
            telemetry: EpsTelemetry::new(),
            initialized: false,
        }
    }

    /// Power-up rail configuration: essentials on, actuators and payload
    /// off until a mode asks for them.
    pub fn init(&mut self) -> RailChanges {
        let mut changes = RailChanges::new();
        self.telemetry = EpsTelemetry::new();
        for (rail, on) in [
            (Rail::Core3v3, true),
            (Rail::Sensors5v, true),
            (Rail::Comms3v3, true),
            (Rail::Actuators12v, false),
            (Rail::Payload, false),
        ] {
            self.telemetry.rail_enabled[rail as usize] = on;
            let _ = changes.push((rail, on));
        }
        self.initialized = true;
        changes
    }

    pub fn telemetry(&self) -> EpsTelemetry {
        self.telemetry
    }

    pub fn is_rail_enabled(&self, rail: Rail) -> bool {
        self.telemetry.rail_enabled[rail as usize]
    }

    pub fn set_rail(&mut self, rail: Rail, on: bool) -> FswResult<()> {
        if !on && rail == Rail::Core3v3 {
            return Err(FswError::Permission);
        }
        self.telemetry.rail_enabled[rail as usize] = on;
        Ok(())
    }

    fn disable_into(&mut self, rail: Rail, changes: &mut RailChanges) {
        if self.set_rail(rail, false).is_ok() {
            let _ = changes.push((rail, false));
        }
    }

    fn enable_into(&mut self, rail: Rail, changes: &mut RailChanges) {
        if self.set_rail(rail, true).is_ok() {
            let _ = changes.push((rail, true));
        }
    }

    /// Shed everything non-essential: payload, actuators, sensors.
    pub fn load_shed(&mut self) -> RailChanges {
        let mut changes = RailChanges::new();
        self.disable_into(Rail::Payload, &mut changes);
        self.disable_into(Rail::Actuators12v, &mut changes);
        self.disable_into(Rail::Sensors5v, &mut changes);
        self.telemetry.low_power_mode = true;
        changes
    }

    pub fn enter_low_power(&mut self) -> RailChanges {
        let mut changes = RailChanges::new();
        self.telemetry.low_power_mode = true;
        self.disable_into(Rail::Actuators12v, &mut changes);
        self.disable_into(Rail::Payload, &mut changes);
        changes
    }

    pub fn exit_low_power(&mut self) -> RailChanges {
        let mut changes = RailChanges::new();
        self.telemetry.low_power_mode = false;
        self.enable_into(Rail::Actuators12v, &mut changes);
        changes
    }

    /// Restore shed loads, but only once the battery has recovered.
    pub fn restore_loads(&mut self) -> RailChanges {
        let mut changes = RailChanges::new();
        if self.telemetry.battery.soc_percent >= BATTERY_NOMINAL_SOC {
            self.enable_into(Rail::Sensors5v, &mut changes);
            self.enable_into(Rail::Actuators12v, &mut changes);
            self.telemetry.low_power_mode = false;
        }
        changes
    }

    fn refresh(
        &mut self,
        battery: BatteryReadings,
        panels: [SolarPanel; NUM_SOLAR_PANELS],
        rail_currents: [u16; RAIL_COUNT],
    ) {
        self.telemetry.battery = BatteryState {
            voltage_mv: battery.voltage_mv,
            current_ma: battery.current_ma,
            soc_percent: battery.soc_percent.min(100),
            temperature_c: battery.temperature_c,
            capacity_mah: battery.capacity_mah,
            remaining_mah: battery.capacity_mah * u32::from(battery.soc_percent.min(100)) / 100,
        };

        self.telemetry.panels = panels;
        let generation: u32 = panels.iter().map(|p| u32::from(p.power_mw)).sum();

        let mut consumption: u32 = 0;
        for i in 0..RAIL_COUNT {
            if self.telemetry.rail_enabled[i] {
                self.telemetry.rail_current_ma[i] = rail_currents[i];
                // All rails metered at the 3.3 V bus side.
                consumption += u32::from(rail_currents[i]) * 3300 / 1000;
            } else {
                self.telemetry.rail_current_ma[i] = 0;
            }
        }

        let generation = generation.min(u32::from(u16::MAX)) as u16;
        let consumption = consumption.min(u32::from(u16::MAX)) as u16;
        let balance = i32::from(generation) - i32::from(consumption);
        self.telemetry.budget = PowerBudget {
            generation_mw: generation,
            consumption_mw: consumption,
            balance_mw: balance.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
            positive: balance > 0,
        };
    }

    /// One policy pass over fresh readings. Returns the rail switches and
    /// the cross-component effects owed.
    pub fn periodic(
        &mut self,
        battery: BatteryReadings,
        panels: [SolarPanel; NUM_SOLAR_PANELS],
        rail_currents: [u16; RAIL_COUNT],
    ) -> (RailChanges, EpsDirective) {
        let mut changes = RailChanges::new();
        let mut directive = EpsDirective::default();

        self.refresh(battery, panels, rail_currents);

        let soc = self.telemetry.battery.soc_percent;
        if soc <= BATTERY_CRITICAL_SOC {
            self.telemetry.critical_power = true;
            directive.report_power_critical = true;
            changes.extend(self.load_shed());
        } else if soc <= BATTERY_LOW_SOC {
            if !self.telemetry.low_power_mode {
                changes.extend(self.enter_low_power());
                directive.request_low_power = true;
            }
        } else if soc >= BATTERY_NOMINAL_SOC {
            if self.telemetry.low_power_mode {
                changes.extend(self.exit_low_power());
            }
            self.telemetry.critical_power = false;
        }

        (changes, directive)
    }

    pub fn can_support_load(&self, power_mw: u16) -> bool {
        if self.telemetry.critical_power {
            return false;
        }
        if self.telemetry.low_power_mode {
            return power_mw < LOW_POWER_LOAD_LIMIT_MW;
        }
        i32::from(self.telemetry.budget.balance_mw) + i32::from(power_mw) > 0
    }
}

static EPS: Mutex<CriticalSectionRawMutex, RefCell<Eps>> = Mutex::new(RefCell::new(Eps::new()));

static SENSORS: Mutex<CriticalSectionRawMutex, Cell<Option<&'static dyn EpsSensors>>> =
    Mutex::new(Cell::new(None));

fn apply_rail_changes(changes: &RailChanges) {
    for &(rail, on) in changes {
        if on {
            platform::power_enable_rail(rail as u8);
        } else {
            platform::power_disable_rail(rail as u8);
        }
    }
}

pub fn init(sensors: &'static dyn EpsSensors) {
    SENSORS.lock(|cell| cell.set(Some(sensors)));
    let changes = EPS.lock(|e| e.borrow_mut().init());
    apply_rail_changes(&changes);
    publish();
}

/// Supervisor job: sample the provider, run the policy, drive the switches
/// and hand the cross-component effects to FDIR and the mode manager.
pub fn periodic() {
    let Some(sensors) = SENSORS.lock(|cell| cell.get()) else {
        return;
    };
    let battery = sensors.battery();
    let panels = sensors.panels();
    let mut rail_currents = [0u16; RAIL_COUNT];
    for (i, slot) in rail_currents.iter_mut().enumerate() {
        *slot = sensors.rail_current_ma(rail_from_index(i));
    }

    let result = EPS.lock(|e| {
        let mut e = e.borrow_mut();
        if !e.initialized {
            return None;
        }
        Some(e.periodic(battery, panels, rail_currents))
    });

    let Some((changes, directive)) = result else {
        return;
    };

    apply_rail_changes(&changes);
    if directive.report_power_critical {
        crate::error!("battery critical, shedding load");
        event_log::critical(Subsystem::Eps, 0, "battery critical, shedding load");
        fdir::report_fault(FaultType::PowerCritical, Subsystem::Eps);
    }
    if directive.request_low_power {
        crate::warn!("battery low, entering low power");
        event_log::warning(Subsystem::Eps, "battery low, entering low power");
        let _ = mode::request(SystemMode::LowPower);
    }
    publish();
}

fn rail_from_index(i: usize) -> Rail {
    match i {
        0 => Rail::Core3v3,
        1 => Rail::Sensors5v,
        2 => Rail::Actuators12v,
        3 => Rail::Comms3v3,
        _ => Rail::Payload,
    }
}

fn publish() {
    let telemetry = EPS.lock(|e| e.borrow().telemetry);
    blackboard::POWER.set(telemetry);
}

pub fn enable_rail(rail: Rail) -> FswResult<()> {
    EPS.lock(|e| {
        let mut e = e.borrow_mut();
        if !e.initialized {
            return Err(FswError::NotReady);
        }
        e.set_rail(rail, true)
    })?;
    platform::power_enable_rail(rail as u8);
    Ok(())
}

pub fn disable_rail(rail: Rail) -> FswResult<()> {
    EPS.lock(|e| {
        let mut e = e.borrow_mut();
        if !e.initialized {
            return Err(FswError::NotReady);
        }
        e.set_rail(rail, false)
    })?;
    platform::power_disable_rail(rail as u8);
    Ok(())
}

pub fn is_rail_enabled(rail: Rail) -> bool {
    EPS.lock(|e| e.borrow().is_rail_enabled(rail))
}

pub fn telemetry() -> EpsTelemetry {
    EPS.lock(|e| e.borrow().telemetry)
}

pub fn battery() -> BatteryState {
    EPS.lock(|e| e.borrow().telemetry.battery)
}

pub fn soc() -> u8 {
    EPS.lock(|e| e.borrow().telemetry.battery.soc_percent)
}

pub fn is_charging() -> bool {
    EPS.lock(|e| e.borrow().telemetry.battery.current_ma > 0)
}

pub fn solar_power_mw() -> u16 {
    EPS.lock(|e| e.borrow().telemetry.budget.generation_mw)
}

pub fn in_eclipse() -> bool {
    solar_power_mw() < ECLIPSE_THRESHOLD_MW
}

pub fn budget() -> PowerBudget {
    EPS.lock(|e| e.borrow().telemetry.budget)
}

pub fn can_support_load(power_mw: u16) -> bool {
    EPS.lock(|e| e.borrow().can_support_load(power_mw))
}

pub fn is_low_power() -> bool {
    EPS.lock(|e| e.borrow().telemetry.low_power_mode)
}

pub fn is_critical() -> bool {
    EPS.lock(|e| e.borrow().telemetry.critical_power)
}

pub fn load_shed() {
    let changes = EPS.lock(|e| {
        let mut e = e.borrow_mut();
        if !e.initialized {
            return RailChanges::new();
        }
        e.load_shed()
    });
    apply_rail_changes(&changes);
    publish();
}

pub fn restore_loads() {
    let changes = EPS.lock(|e| {
        let mut e = e.borrow_mut();
        if !e.initialized {
            return RailChanges::new();
        }
        e.restore_loads()
    });
    apply_rail_changes(&changes);
    publish();
}
