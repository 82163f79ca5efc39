// mode.rs
//
// System mode state machine. Transitions are requested (table-checked) or
// forced (FDIR/interlock paths), and executed on the next `process` pass so
// every change happens from the supervisor tick, never from a caller's
// context. Detumble and Recovery carry timeouts that force Safe.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::blackboard;
use crate::logging::event_log;
use crate::time;
use crate::types::{FswError, FswResult, Subsystem, SystemMode};

pub const DETUMBLE_TIMEOUT_S: u32 = 1800;
pub const RECOVERY_TIMEOUT_S: u32 = 3600;

/// Entry/exit notification. Must not block and must not call back into the
/// mode manager.
pub type ModeHook = fn(SystemMode);

/// The complete set of legal transitions. Anything not listed (including
/// every self-transition) is refused by `request`.
const ALLOWED_TRANSITIONS: &[(SystemMode, SystemMode)] = &[
    // Boot fans out everywhere except straight to Nominal; the spacecraft
    // has to pass through Detumble or Safe first.
    (SystemMode::Boot, SystemMode::Safe),
    (SystemMode::Boot, SystemMode::Detumble),
    (SystemMode::Boot, SystemMode::LowPower),
    (SystemMode::Boot, SystemMode::Recovery),
    (SystemMode::Safe, SystemMode::Detumble),
    (SystemMode::Safe, SystemMode::Nominal),
    (SystemMode::Safe, SystemMode::LowPower),
    (SystemMode::Detumble, SystemMode::Safe),
    (SystemMode::Detumble, SystemMode::Nominal),
    (SystemMode::Detumble, SystemMode::LowPower),
    (SystemMode::Nominal, SystemMode::Safe),
    (SystemMode::Nominal, SystemMode::Detumble),
    (SystemMode::Nominal, SystemMode::LowPower),
    (SystemMode::Nominal, SystemMode::Recovery),
    (SystemMode::LowPower, SystemMode::Safe),
    (SystemMode::LowPower, SystemMode::Detumble),
    (SystemMode::LowPower, SystemMode::Nominal),
    (SystemMode::Recovery, SystemMode::Safe),
    (SystemMode::Recovery, SystemMode::Detumble),
    (SystemMode::Recovery, SystemMode::Nominal),
];

pub fn can_transition(from: SystemMode, to: SystemMode) -> bool {
    if from == to {
        return false;
    }
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

fn timeout_for(mode: SystemMode) -> u32 {
    match mode {
        SystemMode::Detumble => DETUMBLE_TIMEOUT_S,
        SystemMode::Recovery => RECOVERY_TIMEOUT_S,
        _ => 0,
    }
}

pub fn mode_name(mode: SystemMode) -> &'static str {
    match mode {
        SystemMode::Boot => "BOOT",
        SystemMode::Safe => "SAFE",
        SystemMode::Detumble => "DETUMBLE",
        SystemMode::Nominal => "NOMINAL",
        SystemMode::LowPower => "LOW_POWER",
        SystemMode::Recovery => "RECOVERY",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeState {
    pub current: SystemMode,
    pub previous: SystemMode,
    pub requested: SystemMode,
    pub entry_time_s: u32,
    pub timeout_s: u32,
    pub transition_pending: bool,
    pub forced_override: bool,
}

/// An executed transition, reported back so the caller can fire hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SystemMode,
    pub to: SystemMode,
    pub forced: bool,
}

pub struct ModeManager {
    state: ModeState,
    entry_hook: Option<ModeHook>,
    exit_hook: Option<ModeHook>,
    initialized: bool,
}

impl ModeManager {
    pub const fn new() -> Self {
        Self {
            state: ModeState {
                current: SystemMode::Boot,
                previous: SystemMode::Boot,
                requested: SystemMode::Boot,
                entry_time_s: 0,
                timeout_s: 0,
                transition_pending: false,
                forced_override: false,
            },
            entry_hook: None,
            exit_hook: None,
            initialized: false,
        }
    }

    pub fn init(&mut self, initial: SystemMode, now_s: u32) {
        self.state = ModeState {
            current: initial,
            previous: SystemMode::Boot,
            requested: initial,
            entry_time_s: now_s,
            timeout_s: timeout_for(initial),
            transition_pending: false,
            forced_override: false,
        };
        self.initialized = true;
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    /// Table-checked transition request, executed on the next `process`.
    pub fn request(&mut self, mode: SystemMode) -> FswResult<()> {
        if !can_transition(self.state.current, mode) {
            return Err(FswError::Permission);
        }
        self.state.requested = mode;
        self.state.transition_pending = true;
        self.state.forced_override = false;
        Ok(())
    }

    /// Bypass the table. FDIR and the boot interlocks use this.
    pub fn force(&mut self, mode: SystemMode) {
        self.state.requested = mode;
        self.state.transition_pending = true;
        self.state.forced_override = true;
    }

    /// Timeout check plus execution of any pending transition.
    pub fn process(&mut self, now_s: u32) -> Option<Transition> {
        if self.state.timeout_s > 0 {
            let elapsed = now_s.wrapping_sub(self.state.entry_time_s);
            if elapsed >= self.state.timeout_s {
                self.state.requested = SystemMode::Safe;
                self.state.transition_pending = true;
                self.state.forced_override = true;
            }
        }

        if !self.state.transition_pending {
            return None;
        }

        let transition = Transition {
            from: self.state.current,
            to: self.state.requested,
            forced: self.state.forced_override,
        };
        self.state.previous = self.state.current;
        self.state.current = self.state.requested;
        self.state.entry_time_s = now_s;
        self.state.timeout_s = timeout_for(self.state.current);
        self.state.transition_pending = false;
        self.state.forced_override = false;
        Some(transition)
    }

    pub fn time_in_mode(&self, now_s: u32) -> u32 {
        now_s.wrapping_sub(self.state.entry_time_s)
    }

    pub fn is_timeout(&self, now_s: u32) -> bool {
        self.state.timeout_s > 0 && self.time_in_mode(now_s) >= self.state.timeout_s
    }
}

static MANAGER: Mutex<CriticalSectionRawMutex, RefCell<ModeManager>> =
    Mutex::new(RefCell::new(ModeManager::new()));

pub fn init(initial: SystemMode) {
    let now_s = time::now_s();
    MANAGER.lock(|m| {
        let mut m = m.borrow_mut();
        *m = ModeManager::new();
        m.init(initial, now_s);
    });
    blackboard::SYSTEM.update(|s| s.mode = initial);
}

pub fn current() -> SystemMode {
    MANAGER.lock(|m| m.borrow().state.current)
}

pub fn previous() -> SystemMode {
    MANAGER.lock(|m| m.borrow().state.previous)
}

pub fn state() -> ModeState {
    MANAGER.lock(|m| m.borrow().state)
}

pub fn request(mode: SystemMode) -> FswResult<()> {
    MANAGER.lock(|m| {
        let mut m = m.borrow_mut();
        if !m.initialized {
            return Err(FswError::NotReady);
        }
        m.request(mode)
    })
}

pub fn force(mode: SystemMode) {
    MANAGER.lock(|m| {
        let mut m = m.borrow_mut();
        if m.initialized {
            m.force(mode);
        }
    });
}

/// Supervisor job: executes pending transitions and fires the hooks with no
/// mode lock held.
pub fn process() {
    let now_s = time::now_s();
    let (transition, exit_hook, entry_hook) = MANAGER.lock(|m| {
        let mut m = m.borrow_mut();
        if !m.initialized {
            return (None, None, None);
        }
        (m.process(now_s), m.exit_hook, m.entry_hook)
    });

    if let Some(t) = transition {
        if let Some(hook) = exit_hook {
            hook(t.from);
        }
        crate::info!("mode {} -> {}", mode_name(t.from), mode_name(t.to));
        blackboard::SYSTEM.update(|s| s.mode = t.to);
        event_log::info(Subsystem::Mode, mode_name(t.to));
        if let Some(hook) = entry_hook {
            hook(t.to);
        }
    }
}

pub fn time_in_mode() -> u32 {
    let now_s = time::now_s();
    MANAGER.lock(|m| m.borrow().time_in_mode(now_s))
}

pub fn is_timeout() -> bool {
    let now_s = time::now_s();
    MANAGER.lock(|m| m.borrow().is_timeout(now_s))
}

pub fn set_entry_callback(hook: ModeHook) {
    MANAGER.lock(|m| m.borrow_mut().entry_hook = Some(hook));
}

pub fn set_exit_callback(hook: ModeHook) {
    MANAGER.lock(|m| m.borrow_mut().exit_hook = Some(hook));
}

#[cfg(test)]
mod tests;
