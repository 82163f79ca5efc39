// telecommand.rs
//
// Telecommand reception and dispatch. Raw frames are pushed into a bounded
// uplink channel (by the radio ISR or the SITL) and drained by the periodic
// job: parse, validate, authorize, ack, execute, ack again. In Safe mode
// only safe-listed commands run; Elevated and Critical commands go through
// the authentication hook whenever a key has been loaded.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::blackboard;
use crate::ccsds::{self, Apid, TcPacket, MAX_DATA_LEN, MAX_PACKET_LEN};
use crate::telemetry::{self, TmPriority};
use crate::time::{self, Timestamp};
use crate::types::{
    FswError, FswResult, SystemMode, TC_HISTORY_SIZE, TC_MAX_HANDLERS, TC_SAFE_LIST_SIZE,
};
use crate::{boot, mode, platform};

pub const AUTH_KEY_MAX_LEN: usize = 16;
pub const TC_RESPONSE_MAX_LEN: usize = 256;

/// Length of the keyed trailer checked by the baseline auth hook.
pub const AUTH_TAG_LEN: usize = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcAuthLevel {
    #[default]
    None = 0,
    Basic = 1,
    Elevated = 2,
    Critical = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcStatus {
    #[default]
    Accepted = 0,
    Executed = 1,
    Failed = 2,
    RejectedInvalid = 3,
    RejectedAuth = 4,
}

/// Command implementation: `(data) -> status`, response written in place.
/// Runs from the supervisor tick with no locks held.
pub type TcHandler = fn(&[u8], &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus;

#[derive(Clone, Copy)]
pub struct TcDefinition {
    pub service_type: u8,
    pub service_subtype: u8,
    pub auth_level: TcAuthLevel,
    pub handler: TcHandler,
    pub name: &'static str,
    /// Advisory execution budget; the handler itself is responsible for
    /// honouring it.
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcRecord {
    pub sequence: u16,
    pub service_type: u8,
    pub service_subtype: u8,
    pub timestamp_ms: u32,
    pub status: TcStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcStats {
    pub accepted: u32,
    pub rejected: u32,
    pub executed: u32,
}

pub struct Telecommand {
    handlers: [Option<TcDefinition>; TC_MAX_HANDLERS],
    history: [TcRecord; TC_HISTORY_SIZE],
    history_idx: usize,
    auth_key: [u8; AUTH_KEY_MAX_LEN],
    auth_key_len: usize,
    safe_list: [(u8, u8); TC_SAFE_LIST_SIZE],
    safe_list_count: usize,
    stats: TcStats,
    initialized: bool,
}

impl Telecommand {
    pub const fn new() -> Self {
        Self {
            handlers: [None; TC_MAX_HANDLERS],
            history: [TcRecord {
                sequence: 0,
                service_type: 0,
                service_subtype: 0,
                timestamp_ms: 0,
                status: TcStatus::Accepted,
            }; TC_HISTORY_SIZE],
            history_idx: 0,
            auth_key: [0; AUTH_KEY_MAX_LEN],
            auth_key_len: 0,
            safe_list: [(0, 0); TC_SAFE_LIST_SIZE],
            safe_list_count: 0,
            stats: TcStats {
                accepted: 0,
                rejected: 0,
                executed: 0,
            },
            initialized: false,
        }
    }

    pub fn find(&self, service_type: u8, service_subtype: u8) -> Option<TcDefinition> {
        self.handlers.iter().flatten().copied().find(|h| {
            h.service_type == service_type && h.service_subtype == service_subtype
        })
    }

    pub fn register(&mut self, def: TcDefinition) -> FswResult<()> {
        if self.find(def.service_type, def.service_subtype).is_some() {
            return Err(FswError::Busy);
        }
        for slot in self.handlers.iter_mut() {
            if slot.is_none() {
                *slot = Some(def);
                return Ok(());
            }
        }
        Err(FswError::NoMemory)
    }

    pub fn add_to_safe_list(&mut self, service_type: u8, service_subtype: u8) -> FswResult<()> {
        if self.safe_list_count >= TC_SAFE_LIST_SIZE {
            return Err(FswError::NoMemory);
        }
        self.safe_list[self.safe_list_count] = (service_type, service_subtype);
        self.safe_list_count += 1;
        Ok(())
    }

    pub fn is_safe(&self, service_type: u8, service_subtype: u8) -> bool {
        self.safe_list[..self.safe_list_count]
            .iter()
            .any(|&(s, st)| s == service_type && st == service_subtype)
    }

    pub fn set_auth_key(&mut self, key: &[u8]) -> FswResult<()> {
        if key.is_empty() || key.len() > AUTH_KEY_MAX_LEN {
            return Err(FswError::InvalidParam);
        }
        self.auth_key = [0; AUTH_KEY_MAX_LEN];
        self.auth_key[..key.len()].copy_from_slice(key);
        self.auth_key_len = key.len();
        Ok(())
    }

    pub fn auth_key_set(&self) -> bool {
        self.auth_key_len > 0
    }

    /// Verify a command's keyed trailer: the last two data bytes must be
    /// the CCITT CRC of the key followed by the rest of the data. This is
    /// the seam where a real MAC goes; fail-open only when no key is set.
    pub fn verify_auth(&self, pkt: &TcPacket) -> bool {
        if self.auth_key_len == 0 {
            return true;
        }
        if pkt.data.len() < AUTH_TAG_LEN {
            return false;
        }
        let (body, tag) = pkt.data.split_at(pkt.data.len() - AUTH_TAG_LEN);
        let mut digest: Vec<u8, { AUTH_KEY_MAX_LEN + MAX_DATA_LEN }> = Vec::new();
        let _ = digest.extend_from_slice(&self.auth_key[..self.auth_key_len]);
        let _ = digest.extend_from_slice(body);
        let expected = ccsds::crc16(&digest);
        tag == expected.to_be_bytes()
    }

    /// Authorization policy for a validated command.
    pub fn authorize(&self, pkt: &TcPacket, required: TcAuthLevel, current_mode: SystemMode) -> bool {
        if required == TcAuthLevel::None {
            return true;
        }
        if current_mode == SystemMode::Safe
            && !self.is_safe(pkt.secondary.service_type, pkt.secondary.service_subtype)
        {
            return false;
        }
        if self.auth_key_set() && required >= TcAuthLevel::Elevated {
            return self.verify_auth(pkt);
        }
        true
    }

    pub fn record(&mut self, pkt: &TcPacket, now_ms: u32, status: TcStatus) {
        self.history[self.history_idx] = TcRecord {
            sequence: pkt.primary.sequence(),
            service_type: pkt.secondary.service_type,
            service_subtype: pkt.secondary.service_subtype,
            timestamp_ms: now_ms,
            status,
        };
        self.history_idx = (self.history_idx + 1) % TC_HISTORY_SIZE;
    }

    pub fn last_record(&self) -> TcRecord {
        let idx = (self.history_idx + TC_HISTORY_SIZE - 1) % TC_HISTORY_SIZE;
        self.history[idx]
    }

    pub fn stats(&self) -> TcStats {
        self.stats
    }
}

static TELECOMMAND: Mutex<CriticalSectionRawMutex, RefCell<Telecommand>> =
    Mutex::new(RefCell::new(Telecommand::new()));

/// Uplink frames land here (radio ISR side) and are drained by `periodic`.
type UplinkFrame = Vec<u8, MAX_PACKET_LEN>;
static UPLINK: Channel<CriticalSectionRawMutex, UplinkFrame, 4> = Channel::new();

/// Register the built-in command set and the Safe-mode allow list.
pub fn init() {
    // Drop anything still sitting in the uplink channel.
    while UPLINK.try_receive().is_ok() {}
    TELECOMMAND.lock(|t| {
        let mut t = t.borrow_mut();
        *t = Telecommand::new();

        let builtins = [
            TcDefinition {
                service_type: ccsds::pus::TEST,
                service_subtype: 1,
                auth_level: TcAuthLevel::None,
                handler: handler_ping,
                name: "Ping",
                timeout_ms: 1000,
            },
            TcDefinition {
                service_type: ccsds::pus::TEST,
                service_subtype: 2,
                auth_level: TcAuthLevel::None,
                handler: handler_connection_test,
                name: "Connection Test",
                timeout_ms: 5000,
            },
            TcDefinition {
                service_type: ccsds::pus::FUNCTION_MGMT,
                service_subtype: 1,
                auth_level: TcAuthLevel::Elevated,
                handler: handler_mode_change,
                name: "Mode Change",
                timeout_ms: 5000,
            },
            TcDefinition {
                service_type: ccsds::pus::FUNCTION_MGMT,
                service_subtype: 4,
                auth_level: TcAuthLevel::Critical,
                handler: handler_reset,
                name: "System Reset",
                timeout_ms: 10_000,
            },
            TcDefinition {
                service_type: ccsds::pus::HOUSEKEEPING,
                service_subtype: 5,
                auth_level: TcAuthLevel::Basic,
                handler: handler_enable_hk,
                name: "Enable HK",
                timeout_ms: 1000,
            },
            TcDefinition {
                service_type: ccsds::pus::HOUSEKEEPING,
                service_subtype: 6,
                auth_level: TcAuthLevel::Basic,
                handler: handler_disable_hk,
                name: "Disable HK",
                timeout_ms: 1000,
            },
            TcDefinition {
                service_type: ccsds::pus::TIME_MGMT,
                service_subtype: 1,
                auth_level: TcAuthLevel::Elevated,
                handler: handler_time_sync,
                name: "Time Sync",
                timeout_ms: 2000,
            },
        ];
        for def in builtins {
            let _ = t.register(def);
        }

        let _ = t.add_to_safe_list(ccsds::pus::TEST, 1);
        let _ = t.add_to_safe_list(ccsds::pus::TEST, 2);
        let _ = t.add_to_safe_list(ccsds::pus::HOUSEKEEPING, 5);
        let _ = t.add_to_safe_list(ccsds::pus::HOUSEKEEPING, 6);

        t.initialized = true;
    });
}

pub fn register(def: TcDefinition) -> FswResult<()> {
    TELECOMMAND.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.register(def)
    })
}

/// Hand a raw uplink frame to the pipeline. Safe to call from an ISR-fed
/// context; fails with `Overflow` when the channel is full.
pub fn submit_frame(raw: &[u8]) -> FswResult<()> {
    let mut frame = UplinkFrame::new();
    frame
        .extend_from_slice(raw)
        .map_err(|_| FswError::Overflow)?;
    UPLINK.try_send(frame).map_err(|_| FswError::Overflow)
}

/// Supervisor job: drain the uplink channel.
pub fn periodic() {
    while let Ok(frame) = UPLINK.try_receive() {
        match ccsds::parse_tc(&frame) {
            Ok(pkt) => {
                process(&pkt);
            }
            Err(_) => {
                blackboard::COMMS.update(|c| c.crc_errors = c.crc_errors.saturating_add(1));
            }
        }
    }
}

pub fn validate(pkt: &TcPacket) -> bool {
    if !ccsds::validate_tc(pkt) {
        return false;
    }
    TELECOMMAND.lock(|t| {
        t.borrow()
            .find(pkt.secondary.service_type, pkt.secondary.service_subtype)
            .is_some()
    })
}

/// Full dispatch of one parsed TC. Returns the final status; acceptance and
/// completion acks are queued as service-1 reports along the way.
pub fn process(pkt: &TcPacket) -> TcStatus {
    let now = time::now_ms();

    if !validate(pkt) {
        crate::warn!(
            "tc {}/{} rejected: invalid",
            pkt.secondary.service_type,
            pkt.secondary.service_subtype
        );
        TELECOMMAND.lock(|t| {
            let mut t = t.borrow_mut();
            if t.initialized {
                t.stats.rejected += 1;
                t.record(pkt, now, TcStatus::RejectedInvalid);
            }
        });
        return TcStatus::RejectedInvalid;
    }

    // validate() guarantees the handler exists.
    let Some(def) = TELECOMMAND.lock(|t| {
        t.borrow()
            .find(pkt.secondary.service_type, pkt.secondary.service_subtype)
    }) else {
        return TcStatus::RejectedInvalid;
    };

    let current_mode = mode::current();
    let authorized =
        TELECOMMAND.lock(|t| t.borrow().authorize(pkt, def.auth_level, current_mode));
    if !authorized {
        crate::warn!(
            "tc {}/{} rejected: not authorized",
            pkt.secondary.service_type,
            pkt.secondary.service_subtype
        );
        TELECOMMAND.lock(|t| {
            let mut t = t.borrow_mut();
            t.stats.rejected += 1;
            t.record(pkt, now, TcStatus::RejectedAuth);
        });
        return TcStatus::RejectedAuth;
    }

    TELECOMMAND.lock(|t| t.borrow_mut().stats.accepted += 1);
    send_ack(pkt.primary.sequence(), TcStatus::Accepted);

    // Handler runs with no TC lock held; dispatch is serialized by the
    // supervisor tick itself.
    let mut response: Vec<u8, TC_RESPONSE_MAX_LEN> = Vec::new();
    let status = (def.handler)(&pkt.data, &mut response);

    TELECOMMAND.lock(|t| {
        let mut t = t.borrow_mut();
        if status == TcStatus::Executed {
            t.stats.executed += 1;
        }
        t.record(pkt, now, status);
    });
    send_ack(pkt.primary.sequence(), status);

    status
}

/// Queue a service-1 verification report:
/// `sequence u16 | status u8 | 0 | uptime_ms u32`, big-endian.
fn send_ack(sequence: u16, status: TcStatus) {
    let subtype = match status {
        TcStatus::Accepted => 1,
        TcStatus::Executed => 7,
        _ => 8,
    };
    let mut payload: Vec<u8, 8> = Vec::new();
    let _ = payload.extend_from_slice(&sequence.to_be_bytes());
    let _ = payload.push(status as u8);
    let _ = payload.push(0);
    let _ = payload.extend_from_slice(&time::now_ms().to_be_bytes());

    let mut pkt = ccsds::build_tm_now(
        Apid::System as u16,
        ccsds::pus::REQUEST_VERIFICATION,
        subtype,
    );
    if pkt.set_data(&payload).is_ok() {
        pkt.finalize();
        let _ = telemetry::queue_packet(pkt, TmPriority::High);
    }
}

pub fn set_auth_key(key: &[u8]) -> FswResult<()> {
    TELECOMMAND.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.set_auth_key(key)
    })
}

pub fn add_to_safe_list(service_type: u8, service_subtype: u8) -> FswResult<()> {
    TELECOMMAND.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.add_to_safe_list(service_type, service_subtype)
    })
}

pub fn is_safe(service_type: u8, service_subtype: u8) -> bool {
    TELECOMMAND.lock(|t| t.borrow().is_safe(service_type, service_subtype))
}

pub fn stats() -> TcStats {
    TELECOMMAND.lock(|t| t.borrow().stats())
}

pub fn last_record() -> TcRecord {
    TELECOMMAND.lock(|t| t.borrow().last_record())
}

// Built-in handlers.

fn handler_ping(_data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    let _ = resp.extend_from_slice(b"PONG");
    TcStatus::Executed
}

fn handler_connection_test(data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    if !data.is_empty() && data.len() <= 200 {
        let _ = resp.extend_from_slice(data);
    }
    TcStatus::Executed
}

fn handler_mode_change(data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    let Some(&raw) = data.first() else {
        return TcStatus::Failed;
    };
    let Some(target) = SystemMode::from_u8(raw) else {
        return TcStatus::Failed;
    };

    let result = mode::request(target);
    let _ = resp.push(u8::from(result.is_ok()));
    let _ = resp.push(mode::current() as u8);
    if result.is_ok() {
        TcStatus::Executed
    } else {
        TcStatus::Failed
    }
}

fn handler_reset(_data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    let _ = resp.push(1);
    // Come back up in the mode we are leaving.
    boot::set_requested_mode(mode::current());
    platform::reset_software();
    TcStatus::Executed
}

fn handler_enable_hk(data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    if data.len() < 2 {
        return TcStatus::Failed;
    }
    let packet_id = u16::from_be_bytes([data[0], data[1]]);
    let result = telemetry::enable(packet_id);
    let _ = resp.push(u8::from(result.is_ok()));
    if result.is_ok() {
        TcStatus::Executed
    } else {
        TcStatus::Failed
    }
}

fn handler_disable_hk(data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    if data.len() < 2 {
        return TcStatus::Failed;
    }
    let packet_id = u16::from_be_bytes([data[0], data[1]]);
    let result = telemetry::disable(packet_id);
    let _ = resp.push(u8::from(result.is_ok()));
    if result.is_ok() {
        TcStatus::Executed
    } else {
        TcStatus::Failed
    }
}

fn handler_time_sync(data: &[u8], resp: &mut Vec<u8, TC_RESPONSE_MAX_LEN>) -> TcStatus {
    if data.len() < 6 {
        return TcStatus::Failed;
    }
    let seconds = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let subseconds = u32::from(u16::from_be_bytes([data[4], data[5]]));
    time::sync_utc(Timestamp {
        seconds,
        subseconds,
    });

    match time::get_utc() {
        Ok(utc) => {
            let _ = resp.extend_from_slice(&utc.seconds.to_be_bytes());
            TcStatus::Executed
        }
        Err(_) => TcStatus::Failed,
    }
}
