// ccsds.rs
//
// CCSDS Space Packet / ECSS-PUS codec. Headers are serialized field by
// field, big-endian; nothing on the wire depends on host layout. The CRC is
// CRC-16/CCITT-FALSE over every byte preceding it, and each APID carries
// its own 14-bit sequence counter.

use core::cell::RefCell;

use crc::{Crc, CRC_16_IBM_3740};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::time::{self, Timestamp};
use crate::types::{FswError, FswResult};

pub const PRIMARY_HDR_LEN: usize = 6;
pub const SEC_HDR_LEN: usize = 10;
pub const CRC_LEN: usize = 2;
pub const MAX_DATA_LEN: usize = 256;
pub const MAX_PACKET_LEN: usize = PRIMARY_HDR_LEN + SEC_HDR_LEN + MAX_DATA_LEN + CRC_LEN;

pub const VERSION: u16 = 0;
const TYPE_TM: u16 = 0;
const TYPE_TC: u16 = 1;
const SEC_HDR_PRESENT: u16 = 1;
const SEQ_STANDALONE: u16 = 0b11;

pub const APID_MAX: u16 = 2047;
pub const SEQUENCE_MODULO: u16 = 0x4000;

/// Application process IDs in use on this mission.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Apid {
    Idle = 0,
    System = 1,
    Health = 2,
    Power = 3,
    Adcs = 4,
    Comms = 5,
    Payload = 6,
    Time = 7,
    Fdir = 8,
    File = 9,
}

/// PUS service types (ECSS-E-ST-70-41C subset).
pub mod pus {
    pub const REQUEST_VERIFICATION: u8 = 1;
    pub const HOUSEKEEPING: u8 = 3;
    pub const EVENT_REPORTING: u8 = 5;
    pub const FUNCTION_MGMT: u8 = 8;
    pub const TIME_MGMT: u8 = 9;
    pub const TEST: u8 = 17;
}

/// CRC-16/CCITT-FALSE: init 0xFFFF, poly 0x1021, MSB-first, no final XOR.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PrimaryHeader {
    /// version(3) | type(1) | sec_hdr(1) | apid(11)
    pub packet_id: u16,
    /// seq_flags(2) | seq_count(14)
    pub sequence_ctrl: u16,
    /// Total length after the primary header, minus one.
    pub packet_length: u16,
}

impl PrimaryHeader {
    pub fn version(&self) -> u16 {
        self.packet_id >> 13
    }

    pub fn is_tc(&self) -> bool {
        (self.packet_id >> 12) & 1 == TYPE_TC
    }

    pub fn apid(&self) -> u16 {
        self.packet_id & 0x07FF
    }

    pub fn sequence(&self) -> u16 {
        self.sequence_ctrl & 0x3FFF
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TmSecondaryHeader {
    pub coarse_time: u32,
    pub fine_time: u16,
    pub service_type: u8,
    pub service_subtype: u8,
    pub destination_id: u8,
    pub spare: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TcSecondaryHeader {
    pub service_type: u8,
    pub service_subtype: u8,
    pub source_id: u8,
    pub spare: u8,
    pub scheduled_time: u32,
    pub ack_flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmPacket {
    pub primary: PrimaryHeader,
    pub secondary: TmSecondaryHeader,
    pub data: Vec<u8, MAX_DATA_LEN>,
    pub crc: u16,
}

impl TmPacket {
    pub const fn empty() -> Self {
        Self {
            primary: PrimaryHeader {
                packet_id: 0,
                sequence_ctrl: 0,
                packet_length: 0,
            },
            secondary: TmSecondaryHeader {
                coarse_time: 0,
                fine_time: 0,
                service_type: 0,
                service_subtype: 0,
                destination_id: 0,
                spare: 0,
            },
            data: Vec::new(),
            crc: 0,
        }
    }

    pub fn set_data(&mut self, data: &[u8]) -> FswResult<()> {
        self.data.clear();
        self.data
            .extend_from_slice(data)
            .map_err(|_| FswError::Overflow)
    }

    /// Fix up the length field and compute the trailing CRC. Must be the
    /// last step before serialization.
    pub fn finalize(&mut self) {
        self.primary.packet_length = (SEC_HDR_LEN + self.data.len() + CRC_LEN - 1) as u16;
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = self.serialize_body(&mut buf);
        self.crc = crc16(&buf[..len]);
    }

    pub fn total_len(&self) -> usize {
        PRIMARY_HDR_LEN + SEC_HDR_LEN + self.data.len() + CRC_LEN
    }

    fn serialize_body(&self, buf: &mut [u8]) -> usize {
        let mut off = 0;
        buf[off..off + 2].copy_from_slice(&self.primary.packet_id.to_be_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.primary.sequence_ctrl.to_be_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.primary.packet_length.to_be_bytes());
        off += 2;
        buf[off..off + 4].copy_from_slice(&self.secondary.coarse_time.to_be_bytes());
        off += 4;
        buf[off..off + 2].copy_from_slice(&self.secondary.fine_time.to_be_bytes());
        off += 2;
        buf[off] = self.secondary.service_type;
        buf[off + 1] = self.secondary.service_subtype;
        buf[off + 2] = self.secondary.destination_id;
        buf[off + 3] = self.secondary.spare;
        off += 4;
        buf[off..off + self.data.len()].copy_from_slice(&self.data);
        off + self.data.len()
    }

    /// Wire encoding. Fails with `Overflow` if `buf` is too small.
    pub fn serialize(&self, buf: &mut [u8]) -> FswResult<usize> {
        let total = self.total_len();
        if buf.len() < total {
            return Err(FswError::Overflow);
        }
        let off = self.serialize_body(buf);
        buf[off..off + 2].copy_from_slice(&self.crc.to_be_bytes());
        Ok(total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcPacket {
    pub primary: PrimaryHeader,
    pub secondary: TcSecondaryHeader,
    pub data: Vec<u8, MAX_DATA_LEN>,
    pub crc: u16,
}

impl TcPacket {
    pub const fn empty() -> Self {
        Self {
            primary: PrimaryHeader {
                packet_id: 0,
                sequence_ctrl: 0,
                packet_length: 0,
            },
            secondary: TcSecondaryHeader {
                service_type: 0,
                service_subtype: 0,
                source_id: 0,
                spare: 0,
                scheduled_time: 0,
                ack_flags: 0,
            },
            data: Vec::new(),
            crc: 0,
        }
    }

    pub fn set_data(&mut self, data: &[u8]) -> FswResult<()> {
        self.data.clear();
        self.data
            .extend_from_slice(data)
            .map_err(|_| FswError::Overflow)
    }

    pub fn finalize(&mut self) {
        self.primary.packet_length = (SEC_HDR_LEN + self.data.len() + CRC_LEN - 1) as u16;
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = self.serialize_body(&mut buf);
        self.crc = crc16(&buf[..len]);
    }

    pub fn total_len(&self) -> usize {
        PRIMARY_HDR_LEN + SEC_HDR_LEN + self.data.len() + CRC_LEN
    }

    fn serialize_body(&self, buf: &mut [u8]) -> usize {
        let mut off = 0;
        buf[off..off + 2].copy_from_slice(&self.primary.packet_id.to_be_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.primary.sequence_ctrl.to_be_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.primary.packet_length.to_be_bytes());
        off += 2;
        buf[off] = self.secondary.service_type;
        buf[off + 1] = self.secondary.service_subtype;
        buf[off + 2] = self.secondary.source_id;
        buf[off + 3] = self.secondary.spare;
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.secondary.scheduled_time.to_be_bytes());
        off += 4;
        buf[off..off + 2].copy_from_slice(&self.secondary.ack_flags.to_be_bytes());
        off += 2;
        buf[off..off + self.data.len()].copy_from_slice(&self.data);
        off + self.data.len()
    }

    pub fn serialize(&self, buf: &mut [u8]) -> FswResult<usize> {
        let total = self.total_len();
        if buf.len() < total {
            return Err(FswError::Overflow);
        }
        let off = self.serialize_body(buf);
        buf[off..off + 2].copy_from_slice(&self.crc.to_be_bytes());
        Ok(total)
    }
}

/// Per-APID 14-bit sequence counters.
pub struct SequenceCounters {
    counts: [u16; (APID_MAX + 1) as usize],
}

impl SequenceCounters {
    pub const fn new() -> Self {
        Self {
            counts: [0; (APID_MAX + 1) as usize],
        }
    }

    /// Current value for `apid`, post-incremented modulo 2^14.
    pub fn next(&mut self, apid: u16) -> u16 {
        if apid > APID_MAX {
            return 0;
        }
        let seq = self.counts[apid as usize];
        self.counts[apid as usize] = (seq + 1) % SEQUENCE_MODULO;
        seq
    }
}

static SEQUENCES: Mutex<CriticalSectionRawMutex, RefCell<SequenceCounters>> =
    Mutex::new(RefCell::new(SequenceCounters::new()));

pub fn init() {
    SEQUENCES.lock(|s| *s.borrow_mut() = SequenceCounters::new());
}

pub fn next_sequence(apid: u16) -> u16 {
    SEQUENCES.lock(|s| s.borrow_mut().next(apid))
}

/// Build a TM header with an explicit sequence number and timestamp.
pub fn build_tm(apid: u16, service: u8, subtype: u8, sequence: u16, ts: Timestamp) -> TmPacket {
    let mut pkt = TmPacket::empty();
    pkt.primary.packet_id =
        (VERSION << 13) | (TYPE_TM << 12) | (SEC_HDR_PRESENT << 11) | (apid & 0x07FF);
    pkt.primary.sequence_ctrl = (SEQ_STANDALONE << 14) | (sequence & 0x3FFF);
    pkt.secondary.coarse_time = ts.seconds;
    pkt.secondary.fine_time = (ts.subseconds & 0xFFFF) as u16;
    pkt.secondary.service_type = service;
    pkt.secondary.service_subtype = subtype;
    pkt
}

/// Build a TM header stamped from the running sequence counter and clock.
pub fn build_tm_now(apid: u16, service: u8, subtype: u8) -> TmPacket {
    build_tm(apid, service, subtype, next_sequence(apid), time::timestamp())
}

/// Build a TC header (ground-direction packet; used by tests and the SITL).
pub fn build_tc(apid: u16, service: u8, subtype: u8) -> TcPacket {
    let mut pkt = TcPacket::empty();
    pkt.primary.packet_id =
        (VERSION << 13) | (TYPE_TC << 12) | (SEC_HDR_PRESENT << 11) | (apid & 0x07FF);
    pkt.primary.sequence_ctrl = SEQ_STANDALONE << 14;
    pkt.secondary.service_type = service;
    pkt.secondary.service_subtype = subtype;
    pkt
}

/// Parse a serialized TC. Length bookkeeping only; CRC and type checks are
/// `validate_tc`'s job so a caller can still inspect a bad packet.
pub fn parse_tc(raw: &[u8]) -> FswResult<TcPacket> {
    if raw.len() < PRIMARY_HDR_LEN + SEC_HDR_LEN + CRC_LEN {
        return Err(FswError::InvalidParam);
    }

    let mut pkt = TcPacket::empty();
    pkt.primary.packet_id = u16::from_be_bytes([raw[0], raw[1]]);
    pkt.primary.sequence_ctrl = u16::from_be_bytes([raw[2], raw[3]]);
    pkt.primary.packet_length = u16::from_be_bytes([raw[4], raw[5]]);
    pkt.secondary.service_type = raw[6];
    pkt.secondary.service_subtype = raw[7];
    pkt.secondary.source_id = raw[8];
    pkt.secondary.spare = raw[9];
    pkt.secondary.scheduled_time = u32::from_be_bytes([raw[10], raw[11], raw[12], raw[13]]);
    pkt.secondary.ack_flags = u16::from_be_bytes([raw[14], raw[15]]);

    let declared = usize::from(pkt.primary.packet_length) + 1;
    let Some(data_len) = declared.checked_sub(SEC_HDR_LEN + CRC_LEN) else {
        return Err(FswError::Underflow);
    };
    if data_len > MAX_DATA_LEN {
        return Err(FswError::Overflow);
    }
    let end = PRIMARY_HDR_LEN + SEC_HDR_LEN + data_len;
    if raw.len() < end + CRC_LEN {
        return Err(FswError::Underflow);
    }

    pkt.set_data(&raw[PRIMARY_HDR_LEN + SEC_HDR_LEN..end])?;
    pkt.crc = u16::from_be_bytes([raw[end], raw[end + 1]]);
    Ok(pkt)
}

/// Parse a serialized TM (ground-direction decode, also used by loopback
/// tests).
pub fn parse_tm(raw: &[u8]) -> FswResult<TmPacket> {
    if raw.len() < PRIMARY_HDR_LEN + SEC_HDR_LEN + CRC_LEN {
        return Err(FswError::InvalidParam);
    }

    let mut pkt = TmPacket::empty();
    pkt.primary.packet_id = u16::from_be_bytes([raw[0], raw[1]]);
    pkt.primary.sequence_ctrl = u16::from_be_bytes([raw[2], raw[3]]);
    pkt.primary.packet_length = u16::from_be_bytes([raw[4], raw[5]]);
    pkt.secondary.coarse_time = u32::from_be_bytes([raw[6], raw[7], raw[8], raw[9]]);
    pkt.secondary.fine_time = u16::from_be_bytes([raw[10], raw[11]]);
    pkt.secondary.service_type = raw[12];
    pkt.secondary.service_subtype = raw[13];
    pkt.secondary.destination_id = raw[14];
    pkt.secondary.spare = raw[15];

    let declared = usize::from(pkt.primary.packet_length) + 1;
    let Some(data_len) = declared.checked_sub(SEC_HDR_LEN + CRC_LEN) else {
        return Err(FswError::Underflow);
    };
    if data_len > MAX_DATA_LEN {
        return Err(FswError::Overflow);
    }
    let end = PRIMARY_HDR_LEN + SEC_HDR_LEN + data_len;
    if raw.len() < end + CRC_LEN {
        return Err(FswError::Underflow);
    }

    pkt.set_data(&raw[PRIMARY_HDR_LEN + SEC_HDR_LEN..end])?;
    pkt.crc = u16::from_be_bytes([raw[end], raw[end + 1]]);
    Ok(pkt)
}

/// Version, direction and CRC checks for an uplinked TC.
pub fn validate_tc(pkt: &TcPacket) -> bool {
    if pkt.primary.version() != VERSION {
        return false;
    }
    if !pkt.primary.is_tc() {
        return false;
    }
    let mut buf = [0u8; MAX_PACKET_LEN];
    let len = pkt.serialize_body(&mut buf);
    crc16(&buf[..len]) == pkt.crc
}

/// Mirror check for a TM packet (loopback/ground use).
pub fn validate_tm(pkt: &TmPacket) -> bool {
    if pkt.primary.version() != VERSION {
        return false;
    }
    if pkt.primary.is_tc() {
        return false;
    }
    let mut buf = [0u8; MAX_PACKET_LEN];
    let len = pkt.serialize_body(&mut buf);
    crc16(&buf[..len]) == pkt.crc
}

#[cfg(test)]
mod tests;
