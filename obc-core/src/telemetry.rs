// telemetry.rs
//
// Housekeeping collection and the downlink queue. Registered definitions
// run their generator on schedule and the resulting packets land in a
// 16-slot priority queue; the radio drains it highest-priority-first.
// Generators read only blackboard snapshots, so packet building never
// reaches into another component's lock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::blackboard;
use crate::ccsds::{self, Apid, TmPacket, MAX_DATA_LEN};
use crate::time;
use crate::types::{FswError, FswResult, TM_MAX_DEFINITIONS, TM_QUEUE_SIZE};

pub const HK_DEFAULT_PERIOD_MS: u32 = 1000;
pub const HK_MIN_PERIOD_MS: u32 = 100;

/// Subtype of the periodic housekeeping report (PUS service 3).
pub const HK_REPORT_SUBTYPE: u8 = 25;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TmPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TmType {
    #[default]
    Housekeeping = 0,
    Event = 1,
    Dump = 2,
    Diagnostic = 3,
}

/// Payload producer. Must be lock-free: read blackboard cells, write bytes.
pub type TmGenerator = fn(&mut Vec<u8, MAX_DATA_LEN>);

#[derive(Clone, Copy)]
pub struct TmDefinition {
    pub packet_id: u16,
    pub apid: u16,
    pub kind: TmType,
    pub priority: TmPriority,
    pub period_ms: u32,
    pub last_sent_ms: u32,
    pub enabled: bool,
    pub generator: TmGenerator,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TmStats {
    pub packets_generated: u32,
    pub packets_queued: u32,
    pub packets_sent: u32,
    pub queue_overflows: u32,
}

struct QueueEntry {
    packet: TmPacket,
    priority: TmPriority,
    valid: bool,
}

const QUEUE_EMPTY: QueueEntry = QueueEntry {
    packet: TmPacket::empty(),
    priority: TmPriority::Low,
    valid: false,
};

pub struct Telemetry {
    definitions: [Option<TmDefinition>; TM_MAX_DEFINITIONS],
    queue: [QueueEntry; TM_QUEUE_SIZE],
    queue_count: usize,
    queue_tail: usize,
    stats: TmStats,
    initialized: bool,
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            definitions: [None; TM_MAX_DEFINITIONS],
            queue: [QUEUE_EMPTY; TM_QUEUE_SIZE],
            queue_count: 0,
            queue_tail: 0,
            stats: TmStats {
                packets_generated: 0,
                packets_queued: 0,
                packets_sent: 0,
                queue_overflows: 0,
            },
            initialized: false,
        }
    }

    fn find(&self, packet_id: u16) -> Option<usize> {
        self.definitions
            .iter()
            .position(|d| matches!(d, Some(def) if def.packet_id == packet_id))
    }

    pub fn register(&mut self, def: TmDefinition) -> FswResult<()> {
        if self.find(def.packet_id).is_some() {
            return Err(FswError::Busy);
        }
        for slot in self.definitions.iter_mut() {
            if slot.is_none() {
                *slot = Some(def);
                return Ok(());
            }
        }
        Err(FswError::NoMemory)
    }

    pub fn set_enabled(&mut self, packet_id: u16, enabled: bool) -> FswResult<()> {
        let idx = self.find(packet_id).ok_or(FswError::NotFound)?;
        if let Some(def) = self.definitions[idx].as_mut() {
            def.enabled = enabled;
        }
        Ok(())
    }

    pub fn is_enabled(&self, packet_id: u16) -> bool {
        self.find(packet_id)
            .and_then(|i| self.definitions[i])
            .is_some_and(|d| d.enabled)
    }

    pub fn set_period(&mut self, packet_id: u16, period_ms: u32) -> FswResult<()> {
        if period_ms < HK_MIN_PERIOD_MS {
            return Err(FswError::InvalidParam);
        }
        let idx = self.find(packet_id).ok_or(FswError::NotFound)?;
        if let Some(def) = self.definitions[idx].as_mut() {
            def.period_ms = period_ms;
        }
        Ok(())
    }

    /// Run every due housekeeping generator and queue the result.
    pub fn collect_due(&mut self, now_ms: u32) {
        for i in 0..TM_MAX_DEFINITIONS {
            let Some(def) = self.definitions[i] else {
                continue;
            };
            if !def.enabled || def.kind != TmType::Housekeeping {
                continue;
            }
            if now_ms.wrapping_sub(def.last_sent_ms) < def.period_ms {
                continue;
            }

            let mut payload: Vec<u8, MAX_DATA_LEN> = Vec::new();
            (def.generator)(&mut payload);
            if !payload.is_empty() {
                let mut pkt =
                    ccsds::build_tm_now(def.apid, ccsds::pus::HOUSEKEEPING, HK_REPORT_SUBTYPE);
                if pkt.set_data(&payload).is_ok() {
                    pkt.finalize();
                    self.stats.packets_generated += 1;
                    let _ = self.queue_packet(pkt, def.priority);
                }
            }
            if let Some(def) = self.definitions[i].as_mut() {
                def.last_sent_ms = now_ms;
            }
        }
    }

    /// Queue a finalized packet. When full, a High or Critical packet
    /// evicts the lowest-priority entry strictly below its own priority;
    /// otherwise the overflow is counted and reported.
    pub fn queue_packet(&mut self, packet: TmPacket, priority: TmPriority) -> FswResult<()> {
        if self.queue_count >= TM_QUEUE_SIZE {
            if priority >= TmPriority::High {
                let mut victim: Option<usize> = None;
                for (i, entry) in self.queue.iter().enumerate() {
                    if entry.valid && entry.priority < priority {
                        match victim {
                            Some(v) if self.queue[v].priority <= entry.priority => {}
                            _ => victim = Some(i),
                        }
                    }
                }
                if let Some(v) = victim {
                    self.queue[v].valid = false;
                    self.queue_count -= 1;
                }
            }
            if self.queue_count >= TM_QUEUE_SIZE {
                self.stats.queue_overflows += 1;
                return Err(FswError::Overflow);
            }
        }

        // Tail rotates; eviction holes are reused as the scan passes them.
        let mut slot = self.queue_tail;
        while self.queue[slot].valid {
            slot = (slot + 1) % TM_QUEUE_SIZE;
        }
        self.queue[slot] = QueueEntry {
            packet,
            priority,
            valid: true,
        };
        self.queue_tail = (slot + 1) % TM_QUEUE_SIZE;
        self.queue_count += 1;
        self.stats.packets_queued += 1;
        Ok(())
    }

    /// Remove and return the highest-priority packet. Ties resolve to the
    /// first valid entry by scan index.
    pub fn dequeue_packet(&mut self) -> Option<TmPacket> {
        if self.queue_count == 0 {
            return None;
        }
        let mut best: Option<usize> = None;
        for (i, entry) in self.queue.iter().enumerate() {
            if !entry.valid {
                continue;
            }
            match best {
                Some(b) if self.queue[b].priority >= entry.priority => {}
                _ => best = Some(i),
            }
        }
        let idx = best?;
        self.queue[idx].valid = false;
        self.queue_count -= 1;
        self.stats.packets_sent += 1;
        Some(self.queue[idx].packet.clone())
    }

    pub fn queue_count(&self) -> usize {
        self.queue_count
    }

    pub fn stats(&self) -> TmStats {
        self.stats
    }
}

static TELEMETRY: Mutex<CriticalSectionRawMutex, RefCell<Telemetry>> =
    Mutex::new(RefCell::new(Telemetry::new()));

/// Register the standard housekeeping set and arm the pipeline.
pub fn init() {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        *t = Telemetry::new();

        let standard = [
            (1u16, Apid::System as u16, HK_DEFAULT_PERIOD_MS, gen_system_hk as TmGenerator),
            (2, Apid::Power as u16, HK_DEFAULT_PERIOD_MS, gen_power_hk as TmGenerator),
            (3, Apid::Adcs as u16, HK_DEFAULT_PERIOD_MS, gen_adcs_hk as TmGenerator),
            (4, Apid::Comms as u16, 5000, gen_comms_hk as TmGenerator),
        ];
        for (packet_id, apid, period_ms, generator) in standard {
            let _ = t.register(TmDefinition {
                packet_id,
                apid,
                kind: TmType::Housekeeping,
                priority: TmPriority::Normal,
                period_ms,
                last_sent_ms: 0,
                enabled: true,
                generator,
            });
        }

        t.initialized = true;
    });
}

pub fn register(def: TmDefinition) -> FswResult<()> {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.register(def)
    })
}

/// Supervisor job: emit every housekeeping packet that has come due.
pub fn periodic() {
    let now = time::now_ms();
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if t.initialized {
            t.collect_due(now);
        }
    });
}

pub fn enable(packet_id: u16) -> FswResult<()> {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.set_enabled(packet_id, true)
    })
}

pub fn disable(packet_id: u16) -> FswResult<()> {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.set_enabled(packet_id, false)
    })
}

pub fn set_period(packet_id: u16, period_ms: u32) -> FswResult<()> {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.set_period(packet_id, period_ms)
    })
}

pub fn queue_packet(packet: TmPacket, priority: TmPriority) -> FswResult<()> {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return Err(FswError::NotReady);
        }
        t.queue_packet(packet, priority)
    })
}

/// Next packet for the radio, highest priority first.
pub fn dequeue_packet() -> Option<TmPacket> {
    TELEMETRY.lock(|t| {
        let mut t = t.borrow_mut();
        if !t.initialized {
            return None;
        }
        t.dequeue_packet()
    })
}

pub fn queue_count() -> usize {
    TELEMETRY.lock(|t| t.borrow().queue_count())
}

pub fn stats() -> TmStats {
    TELEMETRY.lock(|t| t.borrow().stats())
}

/// Emit an event report (service 5 subtype 5) at High priority:
/// `event_id u16 | uptime_ms u32 | data...`, all big-endian.
pub fn send_event(event_id: u16, data: &[u8]) {
    let mut payload: Vec<u8, MAX_DATA_LEN> = Vec::new();
    let _ = payload.extend_from_slice(&event_id.to_be_bytes());
    let _ = payload.extend_from_slice(&time::now_ms().to_be_bytes());
    if payload.len() + data.len() <= MAX_DATA_LEN {
        let _ = payload.extend_from_slice(data);
    }

    let mut pkt = ccsds::build_tm_now(Apid::System as u16, ccsds::pus::EVENT_REPORTING, 5);
    if pkt.set_data(&payload).is_ok() {
        pkt.finalize();
        let _ = queue_packet(pkt, TmPriority::High);
    }
}

// Standard housekeeping generators. All inputs come from the blackboard.

/// System HK: uptime, mode, health, boot bookkeeping, error counters.
pub fn gen_system_hk(out: &mut Vec<u8, MAX_DATA_LEN>) {
    let sys = blackboard::SYSTEM.get();
    let _ = out.extend_from_slice(&time::now_s().to_be_bytes());
    let _ = out.push(sys.mode as u8);
    let _ = out.push(sys.health as u8);
    let _ = out.extend_from_slice(&sys.boot_count.to_be_bytes());
    let _ = out.push(sys.reset_cause as u8);
    let _ = out.push(sys.fault_flags);
    let _ = out.extend_from_slice(&sys.error_count.to_be_bytes());
    let _ = out.extend_from_slice(&sys.warning_count.to_be_bytes());
}

/// Power HK: battery, budget and rail states.
pub fn gen_power_hk(out: &mut Vec<u8, MAX_DATA_LEN>) {
    let power = blackboard::POWER.get();
    let _ = out.extend_from_slice(&power.battery.voltage_mv.to_be_bytes());
    let _ = out.extend_from_slice(&power.battery.current_ma.to_be_bytes());
    let _ = out.push(power.battery.soc_percent);
    let _ = out.push(power.battery.temperature_c as u8);
    let _ = out.extend_from_slice(&power.budget.generation_mw.to_be_bytes());
    let _ = out.extend_from_slice(&power.budget.consumption_mw.to_be_bytes());
    let _ = out.extend_from_slice(&power.budget.balance_mw.to_be_bytes());
    let mut rail_bits = 0u8;
    for (i, &on) in power.rail_enabled.iter().enumerate() {
        if on {
            rail_bits |= 1 << i;
        }
    }
    let _ = out.push(rail_bits);
    let _ = out.push(u8::from(power.low_power_mode));
    let _ = out.push(u8::from(power.critical_power));
}

/// ADCS HK: attitude quaternion, body rates, controller state.
pub fn gen_adcs_hk(out: &mut Vec<u8, MAX_DATA_LEN>) {
    let adcs = blackboard::ADCS.get();
    for q in adcs.quat_q15 {
        let _ = out.extend_from_slice(&q.to_be_bytes());
    }
    for r in adcs.rate_mdps {
        let _ = out.extend_from_slice(&r.to_be_bytes());
    }
    let _ = out.push(adcs.mode);
    let _ = out.push(adcs.status);
    let _ = out.extend_from_slice(&adcs.error_angle_mdeg.to_be_bytes());
}

/// Comms HK: link statistics.
pub fn gen_comms_hk(out: &mut Vec<u8, MAX_DATA_LEN>) {
    let comms = blackboard::COMMS.get();
    let _ = out.extend_from_slice(&comms.rx_packets.to_be_bytes());
    let _ = out.extend_from_slice(&comms.tx_packets.to_be_bytes());
    let _ = out.push(comms.rssi_dbm as u8);
    let _ = out.push(comms.snr_db as u8);
    let _ = out.extend_from_slice(&comms.crc_errors.to_be_bytes());
}
