/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! FT1.2-style binary framing.
//!
//! ```text
//! acknowledge   E5
//! short frame   10 C A CS 16                 CS = (C + A) mod 256
//! long frame    68 L L 68 C A D… CS 16       L  = len(C A D…)
//!                                            CS = sum(C A D…) mod 256
//! ```
//!
//! `C` is the control byte (PRM, FCB, FCV and a 4-bit function code) and
//! `A` the drop address, 1..=255.  Decoding checks the frame id, length
//! agreement, second start byte and terminator before the checksum, and
//! the address last, so a corrupted byte inside `C A D…` always surfaces
//! as a checksum error.

use std::io::Read;

use super::error::CommError;
use super::property::{read_byte, read_fully};

// ── Wire constants ────────────────────────────────────────────────────────────

pub const ACK: u8 = 0xE5;
pub const START_SHORT: u8 = 0x10;
pub const START_LONG: u8 = 0x68;
pub const END: u8 = 0x16;

/// Primary (request) message.
pub const CTRL_PRM: u8 = 0x40;
/// Frame count bit; alternates between successive exchanges.
pub const CTRL_FCB: u8 = 0x20;
/// Frame count bit is valid.
pub const CTRL_FCV: u8 = 0x10;
pub const FUNC_MASK: u8 = 0x0F;

/// Largest `C A D…` run a long frame can carry.
pub const MAX_USER_DATA: usize = 255;

pub const MIN_ADDRESS: u16 = 1;
pub const MAX_ADDRESS: u16 = 255;

// ── Frames ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Short { ctrl: u8, address: u8 },
    Long { ctrl: u8, address: u8, data: Vec<u8> },
}

impl Frame {
    pub fn ctrl(&self) -> Option<u8> {
        match self {
            Frame::Ack => None,
            Frame::Short { ctrl, .. } | Frame::Long { ctrl, .. } => Some(*ctrl),
        }
    }

    pub fn address(&self) -> Option<u8> {
        match self {
            Frame::Ack => None,
            Frame::Short { address, .. } | Frame::Long { address, .. } => Some(*address),
        }
    }

    pub fn function(&self) -> Option<u8> {
        self.ctrl().map(|c| c & FUNC_MASK)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Ack => vec![ACK],
            Frame::Short { ctrl, address } => {
                vec![START_SHORT, *ctrl, *address, checksum(&[*ctrl, *address]), END]
            }
            Frame::Long { ctrl, address, data } => {
                let len = (data.len() + 2) as u8;
                let mut out = Vec::with_capacity(data.len() + 8);
                out.extend_from_slice(&[START_LONG, len, len, START_LONG, *ctrl, *address]);
                out.extend_from_slice(data);
                out.push(checksum(&out[4..]));
                out.push(END);
                out
            }
        }
    }
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0_u8, |acc, b| acc.wrapping_add(*b))
}

/// Validate a drop address for the wire.
pub fn check_address(drop: u16) -> Result<u8, CommError> {
    if (MIN_ADDRESS..=MAX_ADDRESS).contains(&drop) {
        Ok(drop as u8)
    } else {
        Err(CommError::InvalidAddress(drop))
    }
}

pub fn encode_short(ctrl: u8, drop: u16) -> Result<Vec<u8>, CommError> {
    let address = check_address(drop)?;
    Ok(Frame::Short { ctrl, address }.encode())
}

pub fn encode_long(ctrl: u8, drop: u16, data: &[u8]) -> Result<Vec<u8>, CommError> {
    let address = check_address(drop)?;
    if data.len() + 2 > MAX_USER_DATA {
        return Err(CommError::framing(format!("{} data bytes do not fit a frame", data.len())));
    }
    Ok(Frame::Long {
        ctrl,
        address,
        data: data.to_vec(),
    }
    .encode())
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Read one frame of any kind without checking its address.
pub fn read_frame(rx: &mut dyn Read) -> Result<Frame, CommError> {
    match read_byte(rx)? {
        ACK => Ok(Frame::Ack),
        START_SHORT => {
            let mut b = [0_u8; 4];
            read_fully(rx, &mut b)?;
            let [ctrl, address, cs, end] = b;
            if end != END {
                return Err(CommError::framing(format!("bad terminator {:#04x}", end)));
            }
            verify(cs, &[ctrl, address])?;
            Ok(Frame::Short { ctrl, address })
        }
        START_LONG => {
            let mut hdr = [0_u8; 3];
            read_fully(rx, &mut hdr)?;
            let [len, len2, start2] = hdr;
            if len != len2 {
                return Err(CommError::framing(format!("length mismatch {} != {}", len, len2)));
            }
            if start2 != START_LONG {
                return Err(CommError::framing(format!("bad second start {:#04x}", start2)));
            }
            if len < 2 {
                return Err(CommError::framing(format!("length {} too short", len)));
            }
            let mut body = vec![0_u8; usize::from(len) + 2];
            read_fully(rx, &mut body)?;
            let end = body[body.len() - 1];
            if end != END {
                return Err(CommError::framing(format!("bad terminator {:#04x}", end)));
            }
            let user = &body[..usize::from(len)];
            verify(body[usize::from(len)], user)?;
            Ok(Frame::Long {
                ctrl: user[0],
                address: user[1],
                data: user[2..].to_vec(),
            })
        }
        other => Err(CommError::framing(format!("unexpected frame id {:#04x}", other))),
    }
}

/// Read one frame and require it to come from `drop`.  Acknowledge frames
/// carry no address and always pass.
pub fn decode_frame(rx: &mut dyn Read, drop: u16) -> Result<Frame, CommError> {
    let frame = read_frame(rx)?;
    match frame.address() {
        Some(a) if u16::from(a) != drop => Err(CommError::Addressing {
            expected: drop,
            found: u16::from(a),
        }),
        _ => Ok(frame),
    }
}

fn verify(received: u8, user: &[u8]) -> Result<(), CommError> {
    let computed = checksum(user);
    if received == computed {
        Ok(())
    } else {
        Err(CommError::Checksum { received, computed })
    }
}
