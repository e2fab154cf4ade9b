/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared fixtures for unit tests.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use crate::comm::property::read_byte;
use crate::comm::script::Script;
use crate::comm::{Channel, CommError, DebugLog, Property};
use crate::op::{Phase, Pollable, Step};

/// Poll `cond` for up to two seconds of real time.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Poll `op` against `script` at clock time `now` until it finishes or
/// `max` polls ran.  Does not clean up.
pub fn drive(op: &mut dyn Pollable, script: &Script, now: i64, max: usize) {
    let log = DebugLog::disabled("test");
    let mut m = script.messenger();
    let ctl = op.controller().clone();
    for _ in 0..max {
        if op.is_done() {
            break;
        }
        let mut chan = Channel::new(&mut m, ctl.drop_address(), &log, ctl.name());
        op.poll(&mut chan, now);
    }
}

/// Request `[drop]`, response one byte.
#[derive(Debug, Default)]
pub struct EchoProperty {
    pub value: Option<u8>,
}

impl Property for EchoProperty {
    fn encode_query(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        Ok(vec![drop as u8])
    }

    fn decode_query(&mut self, _drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        self.value = Some(read_byte(rx)?);
        Ok(())
    }
}

/// Queries one [`EchoProperty`] and finishes, storing the byte.
pub struct EchoPhase;

impl Phase<Option<u8>> for EchoPhase {
    fn poll(&mut self, ctx: &mut Option<u8>, chan: &mut Channel<'_>) -> Result<Step<Option<u8>>, CommError> {
        let mut p = EchoProperty::default();
        chan.query_prop(&mut p)?;
        *ctx = p.value;
        Ok(Step::Done)
    }
}

/// Never finishes; re-polls once a minute.
pub struct ParkPhase;

impl<C> Phase<C> for ParkPhase {
    fn poll(&mut self, _ctx: &mut C, _chan: &mut Channel<'_>) -> Result<Step<C>, CommError> {
        Ok(Step::After(60_000))
    }
}
