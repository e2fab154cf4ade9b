/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Vehicle detector protocol over FT1.2 framing.
//!
//! The detector reports individual vehicles.  Each traffic response carries
//! a status byte, the detector's lifetime vehicle count and one to four
//! vehicle records:
//!
//! ```text
//! user data:  status  count(u32 LE)  vehicle × 1..=4
//! vehicle:    speed  class_lane  duration(u16 LE)  gap(u16 LE)          6 bytes
//!             … + length                                                 7 bytes
//!             … + length  reserved  sync_stamp(u16 LE)  reserved        11 bytes
//! ```
//!
//! # Sequencing
//! The FCB bit alternates after every exchange that decoded cleanly.  When
//! an exchange fails the next request repeats the same FCB, which tells the
//! detector to resend its previous answer.  A resent answer carrying the
//! count we already accepted is a duplicate and its vehicles are dropped.

use std::io::Read;

use super::error::CommError;
use super::ft12::{self, Frame, CTRL_FCB, CTRL_FCV, CTRL_PRM};
use super::property::Property;

// ── Function codes ────────────────────────────────────────────────────────────

pub const FUNC_RESET_LINK: u8 = 0x00;
pub const FUNC_REQUEST_DATA: u8 = 0x0B;

pub const RSP_ACK: u8 = 0x00;
pub const RSP_USER_DATA: u8 = 0x08;
pub const RSP_NO_DATA: u8 = 0x09;

pub const MAX_VEHICLES: usize = 4;

/// Supported vehicle record sizes.
pub const RECORD_SIZES: [usize; 3] = [6, 7, 11];

// ── VehicleInfo ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleInfo {
    pub speed_kph: u8,
    /// Class in the high nibble, lane in the low nibble.
    pub class_lane: u8,
    /// Time the vehicle occupied the detection zone.
    pub duration_ms: u16,
    pub gap_ms: u16,
    pub length_dm: Option<u8>,
    pub sync_stamp: Option<u16>,
}

impl VehicleInfo {
    fn parse(rec: &[u8]) -> Self {
        let le = |i: usize| u16::from_le_bytes([rec[i], rec[i + 1]]);
        Self {
            speed_kph: rec[0],
            class_lane: rec[1],
            duration_ms: le(2),
            gap_ms: le(4),
            length_dm: rec.get(6).copied(),
            sync_stamp: if rec.len() >= 11 { Some(le(8)) } else { None },
        }
    }

    /// Serialize as a record of `size` bytes (6, 7 or 11).
    pub fn encode(&self, size: usize) -> Vec<u8> {
        let mut out = vec![self.speed_kph, self.class_lane];
        out.extend_from_slice(&self.duration_ms.to_le_bytes());
        out.extend_from_slice(&self.gap_ms.to_le_bytes());
        if size >= 7 {
            out.push(self.length_dm.unwrap_or(0));
        }
        if size >= 11 {
            out.push(0);
            out.extend_from_slice(&self.sync_stamp.unwrap_or(0).to_le_bytes());
            out.push(0);
        }
        out
    }

    pub fn vehicle_class(&self) -> u8 {
        self.class_lane >> 4
    }

    pub fn lane(&self) -> u8 {
        self.class_lane & 0x0F
    }

    /// Time from the previous vehicle to this one.
    ///
    /// The detector documents the gap field as headway; field traces suggest
    /// some firmware reports tailway instead.  It is passed through as
    /// documented.
    pub fn headway_ms(&self) -> u16 {
        self.gap_ms
    }
}

/// Build the user data of a traffic response.
pub fn encode_traffic(status: u8, count: u32, vehicles: &[VehicleInfo], size: usize) -> Vec<u8> {
    let mut out = vec![status];
    out.extend_from_slice(&count.to_le_bytes());
    for v in vehicles {
        out.extend_from_slice(&v.encode(size));
    }
    out
}

fn record_size(len: usize) -> Option<usize> {
    RECORD_SIZES
        .iter()
        .copied()
        .find(|s| len % s == 0 && (1..=MAX_VEHICLES).contains(&(len / s)))
}

// ── Link sequencing state ─────────────────────────────────────────────────────

/// Per-detector state that must survive between exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSequence {
    pub fcb: bool,
    /// Last accepted lifetime count.
    pub count: Option<u32>,
    /// A request went out and no answer has been accepted yet.
    pub outstanding: bool,
}

impl Default for LinkSequence {
    fn default() -> Self {
        Self::after_reset()
    }
}

impl LinkSequence {
    /// First request after a link reset carries FCB set.
    pub fn after_reset() -> Self {
        Self {
            fcb: true,
            count: None,
            outstanding: false,
        }
    }
}

// ── ResetProperty ─────────────────────────────────────────────────────────────

/// Reset the detector's link layer.
#[derive(Debug, Default)]
pub struct ResetProperty;

impl Property for ResetProperty {
    fn encode_store(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        ft12::encode_short(CTRL_PRM | FUNC_RESET_LINK, drop)
    }

    fn decode_store(&mut self, drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        match ft12::decode_frame(rx, drop)? {
            Frame::Ack => Ok(()),
            f @ Frame::Short { .. } if f.function() == Some(RSP_ACK) => Ok(()),
            f => Err(CommError::parsing(format!("reset not acknowledged: {:?}", f))),
        }
    }
}

// ── TrafficProperty ───────────────────────────────────────────────────────────

/// Request buffered vehicle events.
#[derive(Debug, Default)]
pub struct TrafficProperty {
    seq: LinkSequence,
    retransmit: bool,
    pub status: Option<u8>,
    pub count: Option<u32>,
    pub vehicles: Vec<VehicleInfo>,
    /// Vehicles passed that the detector did not report.
    pub missed: bool,
    /// Resent answer already accepted earlier; `vehicles` is empty.
    pub duplicate: bool,
}

impl TrafficProperty {
    pub fn new(seq: LinkSequence) -> Self {
        Self {
            seq,
            ..Self::default()
        }
    }

    pub fn sequence(&self) -> &LinkSequence {
        &self.seq
    }

    fn ctrl(&self) -> u8 {
        let fcb = if self.seq.fcb { CTRL_FCB } else { 0 };
        CTRL_PRM | CTRL_FCV | fcb | FUNC_REQUEST_DATA
    }

    fn parse_user_data(&mut self, data: &[u8]) -> Result<(), CommError> {
        let Some((&status, rest)) = data.split_first() else {
            return Err(CommError::parsing("Wrong len: no status"));
        };
        self.status = Some(status);
        if rest.is_empty() {
            return Ok(());
        }
        if rest.len() < 4 {
            return Err(CommError::parsing(format!("Wrong len: {}", data.len())));
        }
        let count = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let records = &rest[4..];
        let size = record_size(records.len())
            .ok_or_else(|| CommError::parsing(format!("Wrong len: {}", data.len())))?;
        let vehicles: Vec<VehicleInfo> = records.chunks(size).map(VehicleInfo::parse).collect();

        if self.retransmit && self.seq.count == Some(count) {
            self.duplicate = true;
            self.count = Some(count);
            return Ok(());
        }
        self.missed = match self.seq.count {
            Some(prev) => u64::from(count) > u64::from(prev) + vehicles.len() as u64,
            None => true,
        };
        self.seq.count = Some(count);
        self.count = Some(count);
        self.vehicles = vehicles;
        Ok(())
    }
}

impl Property for TrafficProperty {
    fn encode_query(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        let req = ft12::encode_short(self.ctrl(), drop)?;
        self.retransmit = self.seq.outstanding;
        self.seq.outstanding = true;
        self.status = None;
        self.count = None;
        self.vehicles.clear();
        self.missed = false;
        self.duplicate = false;
        Ok(req)
    }

    fn decode_query(&mut self, drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        match ft12::decode_frame(rx, drop)? {
            Frame::Ack => {}
            f @ Frame::Short { .. } => match f.function() {
                Some(RSP_NO_DATA) | Some(RSP_ACK) => {}
                _ => return Err(CommError::parsing(format!("Wrong CTRL: {:?}", f))),
            },
            Frame::Long { ctrl, data, .. } => {
                if ctrl & ft12::FUNC_MASK != RSP_USER_DATA {
                    return Err(CommError::parsing(format!("Wrong CTRL: {:#04x}", ctrl)));
                }
                self.parse_user_data(&data)?;
            }
        }
        self.seq.outstanding = false;
        self.seq.fcb = !self.seq.fcb;
        Ok(())
    }
}
