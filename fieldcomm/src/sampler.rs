/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Periodic sampling support.
//!
//! Sampling jobs fire on a fixed period whether or not the previous poll of
//! a device has come back.  [`InFlight`] keeps at most one sampling
//! operation per device queued: a period whose predecessor is still pending
//! enqueues nothing, and the next period after it finished enqueues a fresh
//! one.
//!
//! Completed samples are appended as YAML documents to one file per
//! controller and day: `<sample_dir>/<YYYYMMDD>/<controller>.yaml`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::clock::{self, Clock};

use crate::device::{GateSnapshot, TrafficSample, VehicleEvent};
use crate::op::Operation;
use crate::poller::Poller;

/// Period of the sample rollup job.
pub const SAMPLE_PERIOD_MS: u64 = 30_000;

/// Offset of the rollup inside its period, leaving the detector polls at
/// the period boundary time to come back.
pub const SAMPLE_OFFSET_MS: u64 = 8_000;

// ── In-flight tracking ────────────────────────────────────────────────────────

/// Marks a device whose sampling operation has not finished yet.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device.  False while a previous claim is unfinished.
    pub fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Enqueue `op` on `poller` unless the last one guarded by `flight` is
/// still pending.  The claim is released when the operation ends, however
/// it ends.
pub fn enqueue_sample<C: Send + 'static>(poller: &Poller, flight: &InFlight, op: Operation<C>) -> bool {
    if !flight.try_begin() {
        return false;
    }
    let guard = flight.clone();
    poller.enqueue(op.on_done(move |_, _| guard.finish()).boxed())
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// What a device reported over one sample period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleData {
    Traffic {
        sample: TrafficSample,
        vehicles: Vec<VehicleEvent>,
    },
    Gate(GateSnapshot),
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleSnapshot {
    pub controller: String,
    /// Clock time the period closed.
    pub stamp: i64,
    /// Controller fault at that time.
    pub fault: Option<String>,
    pub data: SampleData,
}

impl SampleSnapshot {
    /// `<dir>/<local day>/<controller>.yaml`, the day taken in `clock`'s zone.
    fn path(&self, dir: &Path, clock: &dyn Clock) -> PathBuf {
        let day = clock::local_time(clock, self.stamp)
            .map(|t| t.format("%Y%m%d").to_string())
            .unwrap_or_else(|| String::from("undated"));
        dir.join(day).join(format!("{}.yaml", self.controller))
    }
}

/// Append each snapshot to its controller's file for the day.
pub fn write_snapshots(dir: &Path, clock: &dyn Clock, snapshots: &[SampleSnapshot]) -> Result<()> {
    for snap in snapshots {
        let path = snap.path(dir, clock);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create sample directory: {}", parent.display()))?;
        }
        let doc = serde_yaml::to_string(snap)
            .with_context(|| format!("Failed to serialize sample for {}", snap.controller))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Cannot open sample file: {}", path.display()))?;
        write!(f, "---\n{}", doc).with_context(|| format!("Cannot write sample file: {}", path.display()))?;
    }
    Ok(())
}
