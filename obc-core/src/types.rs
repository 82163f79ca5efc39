// types.rs

/// Milliseconds since boot on the platform's monotonic clock.
/// 32 bits wrap after ~49.7 days; elapsed-time comparisons use
/// wrapping arithmetic so a wrap inside one uptime is harmless.
pub type TimeMs = u32;

/// Operational modes of the spacecraft.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemMode {
    #[default]
    Boot = 0,
    Safe = 1,
    Detumble = 2,
    Nominal = 3,
    LowPower = 4,
    Recovery = 5,
}

pub const MODE_COUNT: usize = 6;

impl SystemMode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Boot),
            1 => Some(Self::Safe),
            2 => Some(Self::Detumble),
            3 => Some(Self::Nominal),
            4 => Some(Self::LowPower),
            5 => Some(Self::Recovery),
            _ => None,
        }
    }
}

/// Hardware reset cause, latched once at boot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetCause {
    #[default]
    Unknown = 0,
    PowerOn = 1,
    Pin = 2,
    Watchdog = 3,
    Software = 4,
    BrownOut = 5,
    LowPower = 6,
}

impl ResetCause {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Unknown),
            1 => Some(Self::PowerOn),
            2 => Some(Self::Pin),
            3 => Some(Self::Watchdog),
            4 => Some(Self::Software),
            5 => Some(Self::BrownOut),
            6 => Some(Self::LowPower),
            _ => None,
        }
    }
}

/// Logical subsystems, used for fault attribution and event tagging.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subsystem {
    #[default]
    Boot = 0,
    Rtos = 1,
    Core = 2,
    Mode = 3,
    Health = 4,
    Fdir = 5,
    Eps = 6,
    Adcs = 7,
    Comms = 8,
    Payload = 9,
    Data = 10,
    Time = 11,
}

pub const SUBSYSTEM_COUNT: usize = 12;

/// Event severity for the on-board event log.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    #[default]
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

/// Uniform error taxonomy for every fallible operation in the core.
/// All failures are values; nothing in flight code panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FswError {
    Error,
    Timeout,
    InvalidParam,
    NoMemory,
    Busy,
    NotReady,
    NotFound,
    Permission,
    Crc,
    Overflow,
    Underflow,
    Bus,
    Hardware,
}

pub type FswResult<T> = Result<T, FswError>;

// Hard resource caps. Every collection in the core is a fixed-capacity
// array sized by one of these; growth past a cap is NoMemory/Overflow,
// never an allocation.
pub const MAX_SCHED_JOBS: usize = 16;
pub const MAX_MONITORED_TASKS: usize = 16;
pub const EVENT_LOG_CAPACITY: usize = 256;
pub const LOG_BUFFER_SIZE: usize = 1024;
pub const TM_MAX_DEFINITIONS: usize = 32;
pub const TM_QUEUE_SIZE: usize = 16;
pub const TC_MAX_HANDLERS: usize = 64;
pub const TC_HISTORY_SIZE: usize = 16;
pub const TC_SAFE_LIST_SIZE: usize = 16;
