/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Gate arm: status polling and supervised open/close.
//!
//! A move is one exclusive operation in two phases.  The command goes out
//! first; its reply only settles a fault or an arm that was already there.
//! The watcher then re-polls every [`WATCH_INTERVAL_MS`] until the move
//! ends:
//!
//! | Observed                         | Result                 |
//! |----------------------------------|------------------------|
//! | device fault code                | `Fault(text)`          |
//! | target state                     | `Complete`             |
//! | heading the other way            | `Opposed(state)`       |
//! | still moving at the end time     | `TimedOut`             |
//!
//! Every result is written back to the arm and to the controller's
//! maintenance status before the operation finishes.  `Opposed` and
//! `TimedOut` also fail the operation, so the controller records a comm
//! fault; a device fault code is reported through maintenance status only.
//! A move that fails before any result (retries exhausted, queue drained)
//! leaves the arm `Unknown` with a `Fault` result.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::comm::gate::{CommandProperty, GateArmState, GateCommand, GateStatus, StatusProperty};
use crate::comm::{Channel, CommError};
use crate::controller::Controller;
use crate::op::{Operation, Phase, PriorityLevel, Step};

/// Re-poll period while an arm is moving.
pub const WATCH_INTERVAL_MS: u64 = 2_000;

/// Longest a move may take before it is given up.
pub const MAX_MOVE_MS: i64 = 90_000;

pub const QUERY_STATUS: &str = "query status";
pub const MOVE_ARM: &str = "move arm";

/// How the last move ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveResult {
    Moving,
    Complete,
    /// Manual override drove the arm the other way.
    Opposed(GateArmState),
    Fault(String),
    TimedOut,
}

impl MoveResult {
    pub fn is_failure(&self) -> bool {
        !matches!(self, MoveResult::Moving | MoveResult::Complete)
    }
}

/// Point-in-time view of an arm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateSnapshot {
    pub arm: GateArmState,
    pub requested: Option<GateCommand>,
    pub fault: Option<String>,
    pub last_move: Option<MoveResult>,
}

#[derive(Debug)]
struct GateState {
    arm: GateArmState,
    requested: Option<GateCommand>,
    fault: Option<String>,
    last_move: Option<MoveResult>,
}

impl Default for GateState {
    fn default() -> Self {
        Self {
            arm: GateArmState::Unknown,
            requested: None,
            fault: None,
            last_move: None,
        }
    }
}

pub struct GateCtx {
    state: Arc<Mutex<GateState>>,
    controller: Arc<Controller>,
    clock: SharedClock,
    /// Clock time after which a move is abandoned.
    end_time: i64,
    /// A move result was recorded.
    settled: bool,
}

impl GateCtx {
    /// Record a plain status reading.
    fn observe(&self, status: &GateStatus) {
        let fault = status.fault();
        {
            let mut st = self.state.lock();
            st.arm = status.state();
            st.fault = fault.clone();
        }
        self.controller.set_maint_status(fault);
    }

    /// Record how a move ended.
    fn finish_move(&mut self, arm: GateArmState, result: MoveResult) {
        self.settled = true;
        let fault = match &result {
            MoveResult::Fault(f) => Some(f.clone()),
            MoveResult::Opposed(s) => Some(format!("manual override: {}", s)),
            MoveResult::TimedOut => Some(String::from("motion timed out")),
            MoveResult::Moving | MoveResult::Complete => None,
        };
        if result.is_failure() {
            warn!(controller = %self.controller.name(), result = ?result, "gate move failed");
        } else {
            info!(controller = %self.controller.name(), arm = %arm, "gate move complete");
        }
        {
            let mut st = self.state.lock();
            st.arm = arm;
            st.fault = fault.clone();
            st.last_move = Some(result);
        }
        self.controller.set_maint_status(fault);
    }

    /// Record a move that failed without a result.
    fn abandon_move(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let fault = self.controller.fault().unwrap_or_else(|| String::from("move abandoned"));
        warn!(controller = %self.controller.name(), fault = %fault, "gate move abandoned");
        let mut st = self.state.lock();
        st.arm = GateArmState::Unknown;
        st.last_move = Some(MoveResult::Fault(fault));
    }
}

/// Verdict on a status read while moving toward `cmd`'s target.
fn judge(cmd: GateCommand, status: &GateStatus, now: i64, end_time: i64) -> MoveResult {
    let state = status.state();
    if let Some(fault) = status.fault() {
        MoveResult::Fault(fault)
    } else if state == cmd.target() {
        MoveResult::Complete
    } else if cmd.is_opposed_by(state) {
        MoveResult::Opposed(state)
    } else if now >= end_time {
        MoveResult::TimedOut
    } else {
        MoveResult::Moving
    }
}

// ── Phases ────────────────────────────────────────────────────────────────────

struct QueryStatus;

impl Phase<GateCtx> for QueryStatus {
    fn poll(&mut self, ctx: &mut GateCtx, chan: &mut Channel<'_>) -> Result<Step<GateCtx>, CommError> {
        let mut prop = StatusProperty::default();
        chan.query_prop(&mut prop)?;
        if let Some(status) = prop.status {
            ctx.observe(&status);
        }
        Ok(Step::Done)
    }
}

struct SendCommand(GateCommand);

impl Phase<GateCtx> for SendCommand {
    fn poll(&mut self, ctx: &mut GateCtx, chan: &mut Channel<'_>) -> Result<Step<GateCtx>, CommError> {
        let cmd = self.0;
        ctx.state.lock().requested = Some(cmd);
        let mut prop = CommandProperty::new(cmd);
        chan.store_prop(&mut prop)?;
        ctx.end_time = ctx.clock.now() + MAX_MOVE_MS;
        // The arm has not started yet, so only a fault or an arm already
        // in place ends the move here.
        if let Some(status) = prop.status {
            match judge(cmd, &status, i64::MIN, ctx.end_time) {
                r @ (MoveResult::Fault(_) | MoveResult::Complete) => {
                    ctx.finish_move(status.state(), r);
                    return Ok(Step::Done);
                }
                _ => ctx.state.lock().arm = status.state(),
            }
        }
        Ok(Step::Next(Box::new(WatchMotion { cmd, waited: false })))
    }
}

struct WatchMotion {
    cmd: GateCommand,
    waited: bool,
}

impl Phase<GateCtx> for WatchMotion {
    fn poll(&mut self, ctx: &mut GateCtx, chan: &mut Channel<'_>) -> Result<Step<GateCtx>, CommError> {
        if !self.waited {
            self.waited = true;
            return Ok(Step::After(WATCH_INTERVAL_MS));
        }
        let mut prop = StatusProperty::default();
        chan.query_prop(&mut prop)?;
        let Some(status) = prop.status else {
            return Ok(Step::After(WATCH_INTERVAL_MS));
        };
        match judge(self.cmd, &status, ctx.clock.now(), ctx.end_time) {
            MoveResult::Moving => {
                ctx.state.lock().arm = status.state();
                Ok(Step::After(WATCH_INTERVAL_MS))
            }
            MoveResult::TimedOut => {
                ctx.finish_move(GateArmState::Fault, MoveResult::TimedOut);
                Err(CommError::Controller(String::from("motion timed out")))
            }
            MoveResult::Opposed(state) => {
                ctx.finish_move(state, MoveResult::Opposed(state));
                Err(CommError::Controller(format!("manual override: {}", state)))
            }
            result => {
                ctx.finish_move(status.state(), result);
                Ok(Step::Done)
            }
        }
    }
}

// ── GateArm ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GateArm {
    controller: Arc<Controller>,
    clock: SharedClock,
    state: Arc<Mutex<GateState>>,
}

impl GateArm {
    pub fn new(controller: Arc<Controller>, clock: SharedClock) -> Self {
        Self {
            controller,
            clock,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    fn ctx(&self) -> GateCtx {
        GateCtx {
            state: Arc::clone(&self.state),
            controller: Arc::clone(&self.controller),
            clock: Arc::clone(&self.clock),
            end_time: i64::MAX,
            settled: false,
        }
    }

    /// Read the arm status.  Non-exclusive, so it interleaves with a move.
    pub fn query_status(&self) -> Operation<GateCtx> {
        Operation::new(QUERY_STATUS, PriorityLevel::PollLow, self.controller.clone(), self.ctx(), Box::new(QueryStatus))
    }

    /// Command the arm and watch it until the move ends.
    pub fn move_arm(&self, cmd: GateCommand) -> Operation<GateCtx> {
        Operation::new(MOVE_ARM, PriorityLevel::Command, self.controller.clone(), self.ctx(), Box::new(SendCommand(cmd)))
            .exclusive()
            .on_done(|ctx, success| {
                if !success {
                    ctx.abandon_move();
                }
            })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let st = self.state.lock();
        GateSnapshot {
            arm: st.arm,
            requested: st.requested,
            fault: st.fault.clone(),
            last_move: st.last_move.clone(),
        }
    }
}
