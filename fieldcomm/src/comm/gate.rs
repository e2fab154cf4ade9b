/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Gate arm controller protocol (ASCII tag/value).
//!
//! | Request         | Meaning            |
//! |-----------------|--------------------|
//! | `@<drop>?\r`    | query status       |
//! | `@<drop>O\r`    | open the arm       |
//! | `@<drop>C\r`    | close the arm      |
//!
//! Every request is answered with one status line `a<pos>b<fault>c<mode>d<drop>`:
//!
//! * `a`: arm position: 0 unknown, 1 opening, 2 open, 3 closing, 4 closed
//! * `b`: fault code, 0 when healthy
//! * `c`: 1 while the cabinet is in local (manual) control
//! * `d`: drop address of the answering controller

use std::fmt;
use std::io::Read;

use serde::Serialize;

use super::error::CommError;
use super::property::Property;
use super::tagline::{read_line, TagLine};

pub const MAX_DROP: u16 = 999;

// ── Arm state ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateArmState {
    Unknown,
    Fault,
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for GateArmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateArmState::Unknown => "unknown",
            GateArmState::Fault => "fault",
            GateArmState::Opening => "opening",
            GateArmState::Open => "open",
            GateArmState::Closing => "closing",
            GateArmState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Movement requested of an arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCommand {
    Open,
    Close,
}

impl GateCommand {
    fn code(self) -> char {
        match self {
            GateCommand::Open => 'O',
            GateCommand::Close => 'C',
        }
    }

    /// Final state of a completed movement.
    pub fn target(self) -> GateArmState {
        match self {
            GateCommand::Open => GateArmState::Open,
            GateCommand::Close => GateArmState::Closed,
        }
    }

    /// True when `state` shows the arm heading the other way.
    pub fn is_opposed_by(self, state: GateArmState) -> bool {
        match self {
            GateCommand::Open => matches!(state, GateArmState::Closing | GateArmState::Closed),
            GateCommand::Close => matches!(state, GateArmState::Opening | GateArmState::Open),
        }
    }
}

impl fmt::Display for GateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateCommand::Open => write!(f, "open"),
            GateCommand::Close => write!(f, "close"),
        }
    }
}

// ── Status line ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    pub position: u32,
    pub fault_code: u32,
    pub local_control: bool,
}

impl GateStatus {
    /// Parse a status line and check it came from `drop`.
    pub fn parse(line: &str, drop: u16) -> Result<Self, CommError> {
        let tags = TagLine::parse(line)?;
        let found = tags.get('d')?;
        if found != u32::from(drop) {
            return Err(CommError::Addressing {
                expected: drop,
                found: u16::try_from(found).unwrap_or(u16::MAX),
            });
        }
        Ok(Self {
            position: tags.get('a')?,
            fault_code: tags.get('b')?,
            local_control: tags.get('c')? != 0,
        })
    }

    pub fn state(&self) -> GateArmState {
        if self.fault_code != 0 {
            return GateArmState::Fault;
        }
        match self.position {
            1 => GateArmState::Opening,
            2 => GateArmState::Open,
            3 => GateArmState::Closing,
            4 => GateArmState::Closed,
            _ => GateArmState::Unknown,
        }
    }

    /// Maintenance text for a non-zero fault code.
    pub fn fault(&self) -> Option<String> {
        match self.fault_code {
            0 => None,
            1 => Some(String::from("arm obstructed")),
            2 => Some(String::from("motor overload")),
            3 => Some(String::from("arm missing")),
            4 => Some(String::from("power failure")),
            n => Some(format!("fault code {}", n)),
        }
    }

    /// Render as the controller would send it.
    pub fn encode(&self, drop: u16) -> String {
        format!(
            "a{}b{}c{}d{}",
            self.position,
            self.fault_code,
            u8::from(self.local_control),
            drop
        )
    }
}

fn request(drop: u16, code: char) -> Result<Vec<u8>, CommError> {
    if drop == 0 || drop > MAX_DROP {
        return Err(CommError::InvalidAddress(drop));
    }
    Ok(format!("@{}{}\r", drop, code).into_bytes())
}

// ── Properties ────────────────────────────────────────────────────────────────

/// Current arm status.
#[derive(Debug, Default)]
pub struct StatusProperty {
    pub status: Option<GateStatus>,
}

impl Property for StatusProperty {
    fn encode_query(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        self.status = None;
        request(drop, '?')
    }

    fn decode_query(&mut self, drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        self.status = Some(GateStatus::parse(&read_line(rx)?, drop)?);
        Ok(())
    }
}

/// Open or close command; the reply carries the status right after it.
#[derive(Debug)]
pub struct CommandProperty {
    pub command: GateCommand,
    pub status: Option<GateStatus>,
}

impl CommandProperty {
    pub fn new(command: GateCommand) -> Self {
        Self {
            command,
            status: None,
        }
    }
}

impl Property for CommandProperty {
    fn encode_store(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        self.status = None;
        request(drop, self.command.code())
    }

    fn decode_store(&mut self, drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        let status = GateStatus::parse(&read_line(rx)?, drop)?;
        if status.local_control {
            return Err(CommError::Controller(String::from("local control active")));
        }
        self.status = Some(status);
        Ok(())
    }
}
