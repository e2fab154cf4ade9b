/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Communication error taxonomy.
//!
//! Every failure while talking to a field controller is a [`CommError`].
//! The poller and the operation engine never inspect messages; they ask the
//! error instead:
//!
//! | Question             | Used for                                        |
//! |----------------------|-------------------------------------------------|
//! | [`CommError::kind`]  | which health counter to bump                    |
//! | `is_retryable`       | whether the operation may try the phase again   |
//! | `drains_input`       | whether stale bytes must be discarded first     |
//! | `is_disconnect`      | whether the transport must be re-established    |

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommError {
    /// Socket-level failure (connection refused, reset, closed).
    #[error("I/O: {0}")]
    Transport(io::Error),

    /// No response within the link timeout.
    #[error("READ TIMED OUT")]
    Timeout,

    /// The stream ended in the middle of a message.
    #[error("truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Bad frame id, length or terminator.
    #[error("framing: {0}")]
    Framing(String),

    #[error("checksum: received {received:#04x}, computed {computed:#04x}")]
    Checksum { received: u8, computed: u8 },

    /// Response came from a different drop address.
    #[error("wrong ADR: {found} (expected {expected})")]
    Addressing { expected: u16, found: u16 },

    /// Drop address outside the protocol's range; nothing was sent.
    #[error("invalid drop address: {0}")]
    InvalidAddress(u16),

    /// Well-framed message with contents that make no sense.
    #[error("parsing: {0}")]
    Parsing(String),

    /// The controller itself reported a fault.
    #[error("controller: {0}")]
    Controller(String),

    /// The property has no encoding for this direction.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Health counter bucket for a [`CommError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Comm,
    Timeout,
    Framing,
    Checksum,
    Addressing,
    Parsing,
    Controller,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Comm => "comm",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Framing => "framing",
            ErrorKind::Checksum => "checksum",
            ErrorKind::Addressing => "addressing",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Controller => "controller",
        };
        write!(f, "{}", s)
    }
}

impl CommError {
    pub fn framing(msg: impl Into<String>) -> Self {
        CommError::Framing(msg.into())
    }

    pub fn parsing(msg: impl Into<String>) -> Self {
        CommError::Parsing(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CommError::Transport(_) => ErrorKind::Comm,
            CommError::Timeout => ErrorKind::Timeout,
            CommError::Truncated { .. } | CommError::Framing(_) => ErrorKind::Framing,
            CommError::Checksum { .. } => ErrorKind::Checksum,
            CommError::Addressing { .. } | CommError::InvalidAddress(_) => ErrorKind::Addressing,
            CommError::Parsing(_) | CommError::Unsupported(_) => ErrorKind::Parsing,
            CommError::Controller(_) => ErrorKind::Controller,
        }
    }

    /// Configuration faults and controller-reported faults fail at once;
    /// everything else counts against the retry threshold.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CommError::InvalidAddress(_) | CommError::Unsupported(_) | CommError::Controller(_)
        )
    }

    /// Leftover bytes of a bad message would corrupt the next exchange.
    pub fn drains_input(&self) -> bool {
        matches!(
            self,
            CommError::Framing(_)
                | CommError::Checksum { .. }
                | CommError::Addressing { .. }
                | CommError::Parsing(_)
                | CommError::Timeout
        )
    }

    /// The connection is unusable and must be re-established.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CommError::Transport(_) | CommError::Truncated { .. })
    }
}

impl From<io::Error> for CommError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CommError::Timeout,
            _ => CommError::Transport(e),
        }
    }
}
