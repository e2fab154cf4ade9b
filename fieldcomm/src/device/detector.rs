/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Vehicle detector: per-vehicle events over the framed binary protocol.
//!
//! The detector state outlives every operation: FCB sequencing must carry
//! from one exchange to the next, and vehicle time stamps are chained
//! from the previous batch.
//!
//! # Time stamps
//! The detector does not stamp vehicles, so each batch is placed on the
//! clock by its headways.  When the previous batch is known and every
//! headway in this one is positive, the batch ends at the previous end
//! plus the summed headways (never later than now).  Otherwise it is
//! assumed to have ended [`DEFAULT_EVENT_AGE_MS`] ago.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::clock::SharedClock;
use crate::comm::tdc::{LinkSequence, ResetProperty, TrafficProperty, VehicleInfo};
use crate::comm::{Channel, CommError};
use crate::controller::Controller;
use crate::op::{Operation, Phase, PriorityLevel, Step};

/// Assumed age of a batch that cannot be chained to the previous one.
pub const DEFAULT_EVENT_AGE_MS: i64 = 1_500;

/// Vehicle events kept between sample rollups.
pub const MAX_EVENTS: usize = 1_000;

pub const QUERY_TRAFFIC: &str = "query traffic";
pub const RESET_LINK: &str = "reset link";

// ── Samples ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleEvent {
    /// Estimated clock time the vehicle was detected.
    pub stamp: i64,
    pub speed_kph: u8,
    pub duration_ms: u16,
    pub headway_ms: u16,
    pub length_dm: Option<u8>,
    pub lane: u8,
    pub class: u8,
}

/// Traffic accumulated over one sample period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSample {
    pub start: i64,
    pub end: i64,
    pub volume: u32,
    /// Percent of the period the zone was occupied.
    pub occupancy: f32,
    /// Mean of the reported non-zero speeds.
    pub speed_kph: Option<f32>,
    /// Some vehicles were not reported.
    pub gap: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    volume: u32,
    occupied_ms: u64,
    speed_sum: u64,
    speed_count: u32,
    gap: bool,
}

// ── Device state ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DetectorState {
    seq: LinkSequence,
    /// End of the last batch; zero before the first.
    stamp: i64,
    period_start: i64,
    acc: Accumulator,
    events: Vec<VehicleEvent>,
}

impl DetectorState {
    fn record(&mut self, prop: &TrafficProperty, now: i64) {
        if prop.missed {
            self.acc.gap = true;
        }
        if prop.vehicles.is_empty() {
            return;
        }
        let dur = chained_duration(&prop.vehicles);
        let prev = if prop.missed { 0 } else { self.stamp };
        self.stamp = if prev > 0 && dur > 0 {
            (prev + dur).min(now)
        } else {
            now - DEFAULT_EVENT_AGE_MS
        };
        let mut stamp = self.stamp - dur;
        for v in &prop.vehicles {
            stamp += i64::from(v.headway_ms());
            self.acc.volume += 1;
            self.acc.occupied_ms += u64::from(v.duration_ms);
            if v.speed_kph > 0 {
                self.acc.speed_sum += u64::from(v.speed_kph);
                self.acc.speed_count += 1;
            }
            if self.events.len() < MAX_EVENTS {
                self.events.push(VehicleEvent {
                    stamp,
                    speed_kph: v.speed_kph,
                    duration_ms: v.duration_ms,
                    headway_ms: v.headway_ms(),
                    length_dm: v.length_dm,
                    lane: v.lane(),
                    class: v.vehicle_class(),
                });
            }
        }
    }
}

/// Summed headways, or zero when any headway is unknown.
fn chained_duration(vehicles: &[VehicleInfo]) -> i64 {
    let mut dur = 0;
    for v in vehicles {
        match v.headway_ms() {
            0 => return 0,
            h => dur += i64::from(h),
        }
    }
    dur
}

/// Context shared by the detector's operations.
pub struct DetectorCtx {
    state: Arc<Mutex<DetectorState>>,
    clock: SharedClock,
}

// ── Phases ────────────────────────────────────────────────────────────────────

struct QueryTraffic;

impl Phase<DetectorCtx> for QueryTraffic {
    fn poll(&mut self, ctx: &mut DetectorCtx, chan: &mut Channel<'_>) -> Result<Step<DetectorCtx>, CommError> {
        let seq = ctx.state.lock().seq.clone();
        let mut prop = TrafficProperty::new(seq);
        let res = chan.query_prop(&mut prop);
        let now = ctx.clock.now();
        let mut st = ctx.state.lock();
        // Sequencing advances even on failure: the retry is a retransmission.
        st.seq = prop.sequence().clone();
        res?;
        if prop.duplicate {
            debug!(count = ?prop.count, "duplicate traffic response discarded");
        } else {
            st.record(&prop, now);
        }
        Ok(Step::Done)
    }
}

struct ResetLink;

impl Phase<DetectorCtx> for ResetLink {
    fn poll(&mut self, ctx: &mut DetectorCtx, chan: &mut Channel<'_>) -> Result<Step<DetectorCtx>, CommError> {
        chan.store_prop(&mut ResetProperty)?;
        let mut st = ctx.state.lock();
        st.seq = LinkSequence::after_reset();
        st.stamp = 0;
        Ok(Step::Done)
    }
}

// ── VehicleDetector ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct VehicleDetector {
    controller: Arc<Controller>,
    clock: SharedClock,
    state: Arc<Mutex<DetectorState>>,
}

impl VehicleDetector {
    pub fn new(controller: Arc<Controller>, clock: SharedClock) -> Self {
        let state = DetectorState {
            period_start: clock.now(),
            ..DetectorState::default()
        };
        Self {
            controller,
            clock,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    fn ctx(&self) -> DetectorCtx {
        DetectorCtx {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Fetch buffered vehicle events.
    pub fn query_traffic(&self) -> Operation<DetectorCtx> {
        Operation::new(QUERY_TRAFFIC, PriorityLevel::PollLow, self.controller.clone(), self.ctx(), Box::new(QueryTraffic))
    }

    /// Reset the link layer, restarting FCB sequencing.
    pub fn reset(&self) -> Operation<DetectorCtx> {
        Operation::new(RESET_LINK, PriorityLevel::Settings, self.controller.clone(), self.ctx(), Box::new(ResetLink))
            .exclusive()
    }

    pub fn sequence(&self) -> LinkSequence {
        self.state.lock().seq.clone()
    }

    /// Close the current sample period at `now` and start the next.
    pub fn take_sample(&self, now: i64) -> TrafficSample {
        let mut st = self.state.lock();
        let acc = std::mem::take(&mut st.acc);
        let start = std::mem::replace(&mut st.period_start, now);
        let period = now - start;
        let occupancy = if period > 0 {
            (acc.occupied_ms as f32 * 100.0 / period as f32).min(100.0)
        } else {
            0.0
        };
        let speed_kph = (acc.speed_count > 0).then(|| acc.speed_sum as f32 / acc.speed_count as f32);
        TrafficSample {
            start,
            end: now,
            volume: acc.volume,
            occupancy,
            speed_kph,
            gap: acc.gap,
        }
    }

    /// Vehicle events recorded since the last call.
    pub fn take_events(&self) -> Vec<VehicleEvent> {
        std::mem::take(&mut self.state.lock().events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::comm::ft12::{self, Frame};
    use crate::comm::script::{Reply, Script};
    use crate::comm::tdc::{encode_traffic, RSP_USER_DATA};
    use crate::op::Pollable;
    use crate::testing::drive;

    const DROP: u16 = 9;

    fn detector(now: i64) -> (Arc<SimulatedClock>, VehicleDetector) {
        let clock = Arc::new(SimulatedClock::new(now));
        let ctl = Arc::new(Controller::new("det_9", "east", DROP, 2));
        (clock.clone(), VehicleDetector::new(ctl, clock))
    }

    fn car(speed: u8, duration: u16, gap: u16) -> VehicleInfo {
        VehicleInfo {
            speed_kph: speed,
            class_lane: 0x12,
            duration_ms: duration,
            gap_ms: gap,
            length_dm: Some(48),
            sync_stamp: None,
        }
    }

    fn traffic(count: u32, vehicles: &[VehicleInfo]) -> Vec<u8> {
        ft12::encode_long(RSP_USER_DATA, DROP, &encode_traffic(0, count, vehicles, 7)).unwrap()
    }

    /// Run `op` to completion with the clock at `now`.
    fn run(clock: &SimulatedClock, op: Operation<DetectorCtx>, script: &Script, now: i64) -> bool {
        clock.set(now);
        let mut op = op;
        drive(&mut op, script, now, 10);
        op.cleanup(now);
        op.is_success()
    }

    // ── Time stamps ───────────────────────────────────────────────────────────

    #[test]
    fn first_batch_is_assumed_one_and_a_half_seconds_old() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script.bytes(&traffic(10, &[car(80, 200, 800), car(90, 300, 1_200)]));
        assert!(run(&clock, det.query_traffic(), &script, 100_000));

        let stamps: Vec<_> = det.take_events().iter().map(|e| e.stamp).collect();
        assert_eq!(stamps, vec![97_300, 98_500]);
    }

    #[test]
    fn next_batch_is_chained_by_headway() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script
            .bytes(&traffic(10, &[car(80, 200, 800), car(90, 300, 1_200)]))
            .bytes(&traffic(12, &[car(70, 250, 3_000), car(60, 250, 4_000)]));
        assert!(run(&clock, det.query_traffic(), &script, 100_000));
        det.take_events();
        assert!(run(&clock, det.query_traffic(), &script, 110_000));

        let stamps: Vec<_> = det.take_events().iter().map(|e| e.stamp).collect();
        assert_eq!(stamps, vec![101_500, 105_500]);
    }

    #[test]
    fn chained_batch_never_ends_in_the_future() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script
            .bytes(&traffic(10, &[car(80, 200, 800), car(90, 300, 1_200)]))
            .bytes(&traffic(12, &[car(70, 250, 3_000), car(60, 250, 4_000)]));
        assert!(run(&clock, det.query_traffic(), &script, 100_000));
        det.take_events();
        assert!(run(&clock, det.query_traffic(), &script, 101_000));

        let stamps: Vec<_> = det.take_events().iter().map(|e| e.stamp).collect();
        assert_eq!(stamps, vec![97_000, 101_000]);
    }

    #[test]
    fn unknown_headway_breaks_the_chain() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script
            .bytes(&traffic(1, &[car(80, 200, 800)]))
            .bytes(&traffic(3, &[car(70, 250, 0), car(60, 250, 900)]));
        assert!(run(&clock, det.query_traffic(), &script, 50_000));
        det.take_events();
        assert!(run(&clock, det.query_traffic(), &script, 60_000));

        let stamps: Vec<_> = det.take_events().iter().map(|e| e.stamp).collect();
        assert_eq!(stamps, vec![58_500, 59_400]);
    }

    // ── Sequencing ────────────────────────────────────────────────────────────

    #[test]
    fn retransmission_after_timeout_discards_the_duplicate() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script
            .bytes(&traffic(10, &[car(80, 200, 800)]))
            .reply(Reply::Silence)
            .bytes(&traffic(10, &[car(80, 200, 800)]));
        assert!(run(&clock, det.query_traffic(), &script, 10_000));
        let fcb_after_first = det.sequence().fcb;
        assert!(run(&clock, det.query_traffic(), &script, 20_000));

        let sent = script.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], sent[2], "retry repeats the FCB");
        assert_eq!(det.sequence().fcb, !fcb_after_first);
        assert_eq!(det.take_sample(30_000).volume, 1);
    }

    #[test]
    fn reset_restarts_sequencing() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script.bytes(&traffic(5, &[car(80, 200, 800)])).bytes(&Frame::Ack.encode());
        assert!(run(&clock, det.query_traffic(), &script, 1_000));
        assert!(!det.sequence().fcb);

        let op = det.reset();
        assert!(op.is_exclusive());
        assert!(run(&clock, op, &script, 2_000));
        assert_eq!(det.sequence(), LinkSequence::after_reset());
        assert_eq!(script.sent()[1], ft12::encode_short(0x40, DROP).unwrap());
    }

    // ── Samples ───────────────────────────────────────────────────────────────

    #[test]
    fn sample_rolls_up_volume_occupancy_and_speed() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script.bytes(&traffic(2, &[car(80, 3_000, 900), car(0, 3_000, 1_000)]));
        assert!(run(&clock, det.query_traffic(), &script, 25_000));

        let s = det.take_sample(30_000);
        assert_eq!((s.start, s.end, s.volume), (0, 30_000, 2));
        assert!((s.occupancy - 20.0).abs() < 1e-3);
        assert_eq!(s.speed_kph, Some(80.0));
        assert!(s.gap, "first batch has no baseline");

        let next = det.take_sample(60_000);
        assert_eq!((next.start, next.volume, next.gap), (30_000, 0, false));
        assert_eq!(next.speed_kph, None);
    }

    #[test]
    fn skipped_count_flags_a_gap() {
        let (clock, det) = detector(0);
        let script = Script::new();
        script
            .bytes(&traffic(10, &[car(80, 200, 800)]))
            .bytes(&traffic(15, &[car(80, 200, 800)]));
        assert!(run(&clock, det.query_traffic(), &script, 10_000));
        det.take_sample(20_000);
        assert!(run(&clock, det.query_traffic(), &script, 25_000));
        assert!(det.take_sample(30_000).gap);
    }
}
