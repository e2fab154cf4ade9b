/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Field controllers: addressing, health and fault reporting.
//!
//! A controller is one device on a link, addressed by its drop.  Two kinds
//! of trouble are tracked separately:
//!
//! * the **comm fault** – set when an operation exhausts its retries, cleared
//!   by the next successful operation;
//! * the **maintenance status** – what the device itself reports (arm
//!   obstructed, power failure), written by device code after decoding.
//!
//! [`Controller::fault`] reports the comm fault first, then maintenance.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{self, Clock};
use crate::comm::ErrorKind;

pub const DEFAULT_RETRY_THRESHOLD: u32 = 3;

// ── Health counters ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommCounters {
    pub success: u64,
    pub failure: u64,
    pub comm: u64,
    pub timeout: u64,
    pub framing: u64,
    pub checksum: u64,
    pub addressing: u64,
    pub parsing: u64,
    pub controller: u64,
}

impl CommCounters {
    fn bump(&mut self, kind: ErrorKind) {
        let slot = match kind {
            ErrorKind::Comm => &mut self.comm,
            ErrorKind::Timeout => &mut self.timeout,
            ErrorKind::Framing => &mut self.framing,
            ErrorKind::Checksum => &mut self.checksum,
            ErrorKind::Addressing => &mut self.addressing,
            ErrorKind::Parsing => &mut self.parsing,
            ErrorKind::Controller => &mut self.controller,
        };
        *slot += 1;
    }

    /// Sum of all per-kind error counts.
    pub fn errors(&self) -> u64 {
        self.comm
            + self.timeout
            + self.framing
            + self.checksum
            + self.addressing
            + self.parsing
            + self.controller
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ControllerState {
    fault: Option<String>,
    maint: Option<String>,
    failed: bool,
    fail_time: Option<i64>,
    counters: CommCounters,
    /// Operation holding exclusive access.
    owner: Option<u64>,
}

#[derive(Debug)]
pub struct Controller {
    name: String,
    link: String,
    drop: u16,
    retry_threshold: u32,
    state: Mutex<ControllerState>,
}

impl Controller {
    pub fn new(name: &str, link: &str, drop: u16, retry_threshold: u32) -> Self {
        Self {
            name: name.to_string(),
            link: link.to_string(),
            drop,
            retry_threshold,
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn drop_address(&self) -> u16 {
        self.drop
    }

    pub fn retry_threshold(&self) -> u32 {
        self.retry_threshold
    }

    /// Comm fault if any, otherwise the device's maintenance status.
    pub fn fault(&self) -> Option<String> {
        let st = self.state.lock();
        st.fault.clone().or_else(|| st.maint.clone())
    }

    pub fn maint_status(&self) -> Option<String> {
        self.state.lock().maint.clone()
    }

    pub fn set_maint_status(&self, maint: Option<String>) {
        let mut st = self.state.lock();
        if st.maint != maint {
            info!(controller = %self.name, maint = ?maint, "maintenance status");
            st.maint = maint;
        }
    }

    pub fn health(&self) -> CommCounters {
        self.state.lock().counters.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.state.lock().failed
    }

    pub fn fail_time(&self) -> Option<i64> {
        self.state.lock().fail_time
    }

    /// One-line status: `FAIL @ <local time>` while failed, else the fault.
    /// The time is shown in `clock`'s zone.
    pub fn status(&self, clock: &dyn Clock) -> String {
        let st = self.state.lock();
        if st.failed {
            if let Some(at) = st.fail_time.and_then(|t| clock::local_time(clock, t)) {
                return format!("FAIL @ {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
            return String::from("FAIL");
        }
        st.fault.clone().or_else(|| st.maint.clone()).unwrap_or_default()
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.state.lock().counters.bump(kind);
    }

    /// Account for a finished operation.  A failure carries the fault text
    /// attributed to this controller.
    pub fn complete_operation(&self, outcome: Result<(), &str>, now: i64) {
        let mut st = self.state.lock();
        match outcome {
            Ok(()) => {
                st.counters.success += 1;
                st.fault = None;
                if st.failed {
                    st.failed = false;
                    info!(controller = %self.name, "comm restored");
                }
            }
            Err(fault) => {
                st.counters.failure += 1;
                st.fault = Some(fault.to_string());
                if !st.failed {
                    st.failed = true;
                    st.fail_time = Some(now);
                    warn!(controller = %self.name, fault = %fault, "comm failed");
                }
            }
        }
    }

    /// Take exclusive access for `op`.  Returns the holder on contention.
    pub(crate) fn try_acquire(&self, op: u64) -> Result<(), u64> {
        let mut st = self.state.lock();
        match st.owner {
            Some(holder) if holder != op => Err(holder),
            _ => {
                st.owner = Some(op);
                Ok(())
            }
        }
    }

    pub(crate) fn release(&self, op: u64) {
        let mut st = self.state.lock();
        if st.owner == Some(op) {
            st.owner = None;
        }
    }

    pub fn lock_holder(&self) -> Option<u64> {
        self.state.lock().owner
    }
}
