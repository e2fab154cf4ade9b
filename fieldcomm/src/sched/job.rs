/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Jobs: named units of scheduled work.
//!
//! A job is either one-shot (fires once, `delay` ms after creation) or
//! repeating.  Repeating jobs are aligned to *local* wall-clock boundaries:
//! a 30 s job with an 8 s offset fires at hh:mm:08 and hh:mm:38 local time,
//! and a daily job with offset 0 fires at local midnight even across a
//! daylight saving switch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Clock;

use super::error::SchedError;

/// Body of a job.  Errors are routed to the scheduler's exception handler.
pub type JobTask = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

// ── Boundary arithmetic ───────────────────────────────────────────────────────

/// Next fire time strictly after `now` for a job repeating every `interval`
/// ms, `offset` ms past each local boundary, in a zone `utc_offset` ms from
/// UTC.
///
/// ```text
/// shift = offset - utc_offset
/// past  = floor((now - shift) / interval) * interval + shift
/// next  = past + interval
/// ```
pub fn next_boundary(now: i64, interval: i64, offset: i64, utc_offset: i64) -> i64 {
    let shift = offset - utc_offset;
    let past = (now - shift).div_euclid(interval) * interval + shift;
    past + interval
}

// ── JobKey ────────────────────────────────────────────────────────────────────

/// Total order of the pending set: earliest first, then shorter interval,
/// then smaller offset, then creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    pub next_time: i64,
    pub interval: i64,
    pub offset: i64,
    pub id: u64,
}

// ── Job ───────────────────────────────────────────────────────────────────────

pub struct Job {
    id: u64,
    name: String,
    /// Zero for one-shot jobs.
    interval: i64,
    offset: i64,
    next_time: i64,
    task: JobTask,
}

impl Job {
    /// A job that fires once, `delay_ms` after now.
    pub fn once<F>(clock: &dyn Clock, name: impl Into<String>, delay_ms: u64, task: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            interval: 0,
            offset: 0,
            next_time: clock.now() + delay_ms as i64,
            task: Box::new(task),
        }
    }

    /// A job that fires every `interval_ms`, `offset_ms` past each local
    /// boundary, starting at the next boundary after now.
    ///
    /// # Errors
    /// [`SchedError::InvalidSchedule`] unless `0 <= offset < interval`.
    pub fn repeating<F>(
        clock: &dyn Clock,
        name: impl Into<String>,
        interval_ms: u64,
        offset_ms: u64,
        task: F,
    ) -> Result<Self, SchedError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        if interval_ms == 0 || offset_ms >= interval_ms {
            return Err(SchedError::InvalidSchedule {
                interval: interval_ms,
                offset: offset_ms,
            });
        }
        let mut job = Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            interval: interval_ms as i64,
            offset: offset_ms as i64,
            next_time: 0,
            task: Box::new(task),
        };
        job.compute_next_time(clock);
        Ok(job)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn next_time(&self) -> i64 {
        self.next_time
    }

    pub fn is_repeating(&self) -> bool {
        self.interval > 0
    }

    /// Milliseconds until the job is due (negative when overdue).
    pub fn delay(&self, clock: &dyn Clock) -> i64 {
        self.next_time - clock.now()
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            next_time: self.next_time,
            interval: self.interval,
            offset: self.offset,
            id: self.id,
        }
    }

    /// Move a repeating job to its next boundary after now.  The boundary
    /// is taken in the zone offset that applies at the boundary itself.
    pub(crate) fn compute_next_time(&mut self, clock: &dyn Clock) {
        let now = clock.now();
        let current = clock.utc_offset(now);
        let next = next_boundary(now, self.interval, self.offset, current);
        let then = clock.utc_offset(next);
        self.next_time = if then == current {
            next
        } else {
            next_boundary(now, self.interval, self.offset, then)
        };
    }

    pub(crate) fn perform(&mut self) -> anyhow::Result<()> {
        (self.task)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("offset", &self.offset)
            .field("next_time", &self.next_time)
            .finish()
    }
}
