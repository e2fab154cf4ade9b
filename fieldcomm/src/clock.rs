/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time source shared by every timed component.
//!
//! Schedulers, workers and pollers never read the wall clock directly; they
//! go through a [`Clock`] handed to them at construction.  Production code
//! uses [`SystemClock`].  Tests swap in [`SimulatedClock`], whose time only
//! moves when the test says so.
//!
//! | Operation       | `SystemClock`              | `SimulatedClock`                   |
//! |-----------------|----------------------------|------------------------------------|
//! | `now`           | wall time (epoch ms)       | settable value                     |
//! | `utc_offset`    | local zone via chrono      | step table of offset changes       |
//! | `sleep_well`    | blocks the thread          | advances simulated time            |
//! | `wait_quantum`  | full requested wait        | capped at [`SIM_WAIT_QUANTUM_MS`]  |

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};

/// Longest real-time block a monitor wait performs under a [`SimulatedClock`].
///
/// Waiters re-read simulated time after every quantum, so a test that
/// advances the clock sees the effect within this many real milliseconds.
pub const SIM_WAIT_QUANTUM_MS: u64 = 10;

// ── Clock trait ───────────────────────────────────────────────────────────────

/// A source of "now", local UTC offsets and blocking waits.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now(&self) -> i64;

    /// Local offset from UTC, in milliseconds, in effect at `at`.
    fn utc_offset(&self, at: i64) -> i64;

    /// Sleep for `ms` milliseconds without surfacing interruption.
    fn sleep_well(&self, ms: u64);

    /// Real duration to block when a monitor waits `ms` of clock time.
    fn wait_quantum(&self, ms: u64) -> Duration;
}

/// Shared handle passed between components.
pub type SharedClock = Arc<dyn Clock>;

/// Process-wide default clock.
///
/// Only the composition root should call this; everything below it receives
/// its clock by injection.
pub fn system_clock() -> SharedClock {
    static CLOCK: OnceLock<SharedClock> = OnceLock::new();
    CLOCK.get_or_init(|| Arc::new(SystemClock)).clone()
}

/// `at` as wall time in the clock's zone.
pub fn local_time(clock: &dyn Clock, at: i64) -> Option<DateTime<FixedOffset>> {
    let secs = i32::try_from(clock.utc_offset(at) / 1000).ok()?;
    FixedOffset::east_opt(secs)?.timestamp_millis_opt(at).single()
}

/// Wait on `cv` for up to `ms` of clock time.
///
/// Returns `true` when the wait ran out rather than being notified.  Spurious
/// wake-ups are possible; callers always re-check their condition.
pub fn wait_on<T>(clock: &dyn Clock, cv: &Condvar, guard: &mut MutexGuard<'_, T>, ms: u64) -> bool {
    cv.wait_for(guard, clock.wait_quantum(ms.max(1))).timed_out()
}

// ── SystemClock ───────────────────────────────────────────────────────────────

/// Wall clock of the host, with the host's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn utc_offset(&self, at: i64) -> i64 {
        Local
            .timestamp_millis_opt(at)
            .earliest()
            .map(|dt| i64::from(dt.offset().local_minus_utc()) * 1000)
            .unwrap_or(0)
    }

    fn sleep_well(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn wait_quantum(&self, ms: u64) -> Duration {
        Duration::from_millis(ms)
    }
}

// ── SimulatedClock ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimState {
    now: i64,
    /// Offset in effect before the first change.
    base_offset: i64,
    /// (effective-from, offset) pairs sorted by time.
    changes: Vec<(i64, i64)>,
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct SimulatedClock {
    state: Mutex<SimState>,
}

impl SimulatedClock {
    /// A clock reading `start` (epoch ms) in a zone with no UTC offset.
    pub fn new(start: i64) -> Self {
        Self {
            state: Mutex::new(SimState {
                now: start,
                base_offset: 0,
                changes: Vec::new(),
            }),
        }
    }

    pub fn set(&self, now: i64) {
        self.state.lock().now = now;
    }

    pub fn advance(&self, ms: i64) {
        self.state.lock().now += ms;
    }

    /// Replace the whole offset table with a single constant offset.
    pub fn set_utc_offset(&self, offset: i64) {
        let mut st = self.state.lock();
        st.base_offset = offset;
        st.changes.clear();
    }

    /// From `at` onwards the local offset becomes `offset` (a DST switch).
    pub fn add_offset_change(&self, at: i64, offset: i64) {
        let mut st = self.state.lock();
        let pos = st.changes.partition_point(|(t, _)| *t <= at);
        st.changes.insert(pos, (at, offset));
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> i64 {
        self.state.lock().now
    }

    fn utc_offset(&self, at: i64) -> i64 {
        let st = self.state.lock();
        st.changes
            .iter()
            .take_while(|(t, _)| *t <= at)
            .last()
            .map(|(_, off)| *off)
            .unwrap_or(st.base_offset)
    }

    fn sleep_well(&self, ms: u64) {
        self.advance(ms as i64);
        thread::yield_now();
    }

    fn wait_quantum(&self, ms: u64) -> Duration {
        Duration::from_millis(ms.min(SIM_WAIT_QUANTUM_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    #[test]
    fn simulated_clock_only_moves_when_told() {
        let clock = SimulatedClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now(), 1_250);
        clock.set(42);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn sleep_well_advances_simulated_time() {
        let clock = SimulatedClock::new(0);
        clock.sleep_well(200);
        assert_eq!(clock.now(), 200);
    }

    #[test]
    fn offset_table_steps_at_change_points() {
        let clock = SimulatedClock::new(0);
        clock.set_utc_offset(-6 * HOUR);
        clock.add_offset_change(10 * HOUR, -5 * HOUR);
        clock.add_offset_change(20 * HOUR, -6 * HOUR);
        assert_eq!(clock.utc_offset(0), -6 * HOUR);
        assert_eq!(clock.utc_offset(10 * HOUR - 1), -6 * HOUR);
        assert_eq!(clock.utc_offset(10 * HOUR), -5 * HOUR);
        assert_eq!(clock.utc_offset(25 * HOUR), -6 * HOUR);
    }

    #[test]
    fn local_time_follows_the_offset_table() {
        let clock = SimulatedClock::new(0);
        clock.set_utc_offset(-6 * HOUR);
        clock.add_offset_change(10 * HOUR, -5 * HOUR);
        let before = local_time(&clock, 0).unwrap();
        assert_eq!(before.format("%Y-%m-%d %H:%M").to_string(), "1969-12-31 18:00");
        let after = local_time(&clock, 10 * HOUR).unwrap();
        assert_eq!(after.format("%H:%M").to_string(), "05:00");
    }

    #[test]
    fn simulated_waits_are_short() {
        let clock = SimulatedClock::new(0);
        assert_eq!(clock.wait_quantum(60_000), Duration::from_millis(SIM_WAIT_QUANTUM_MS));
        assert_eq!(clock.wait_quantum(3), Duration::from_millis(3));
    }

    #[test]
    fn system_clock_offset_is_whole_minutes() {
        let clock = SystemClock;
        let off = clock.utc_offset(clock.now());
        assert_eq!(off % 60_000, 0);
    }
}
