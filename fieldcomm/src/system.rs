/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Composition root: pollers, controllers and devices built from
//! configuration, plus the sampling jobs that keep them busy.
//!
//! ```text
//! CommSystem
//! ├── links:       name → Poller (one thread each)
//! ├── devices:     controller → VehicleDetector | GateArm
//! ├── scheduler:   poll <link> every poll_period_s
//! │                sample rollup every 30 s at +8 s
//! └── worker:      snapshot file writes
//! ```
//!
//! Scheduled jobs hold only weak references to the system, so dropping it
//! stops everything without a reference cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::comm::gate::GateCommand;
use crate::comm::{Connector, DebugLog, LinkConnector};
use crate::config::{CommConfigManager, LinkConfig};
use crate::controller::{CommCounters, Controller};
use crate::device::{Device, GateArm, VehicleDetector};
use crate::op::Pollable;
use crate::poller::Poller;
use crate::sampler::{self, InFlight, SampleData, SampleSnapshot, SAMPLE_OFFSET_MS, SAMPLE_PERIOD_MS};
use crate::sched::{Job, LogHandler, Scheduler, SchedulerConfig, Worker};

/// Health of one link as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub name: String,
    /// Last connect error, empty while connected.
    pub status: String,
    pub load: f32,
    pub queue_len: usize,
}

struct Link {
    config: LinkConfig,
    poller: Poller,
}

struct Inner {
    clock: SharedClock,
    links: BTreeMap<String, Link>,
    /// Keyed by controller name.
    devices: BTreeMap<String, (Device, InFlight)>,
    sample_dir: Option<PathBuf>,
}

impl Inner {
    /// Enqueue a sampling poll for every device on `link`.
    fn poll_link(&self, link: &str) -> usize {
        let Some(l) = self.links.get(link) else {
            return 0;
        };
        let mut queued = 0;
        for (device, flight) in self.devices.values() {
            if device.controller().link() != link {
                continue;
            }
            let added = match device {
                Device::Detector(d) => sampler::enqueue_sample(&l.poller, flight, d.query_traffic()),
                Device::Gate(g) => sampler::enqueue_sample(&l.poller, flight, g.query_status()),
            };
            if added {
                queued += 1;
            }
        }
        debug!(link = %link, queued, "sampling poll");
        queued
    }

    /// Close the sample period of every device.
    fn rollup(&self, now: i64) -> Vec<SampleSnapshot> {
        self.devices
            .iter()
            .map(|(name, (device, _))| {
                let data = match device {
                    Device::Detector(d) => SampleData::Traffic {
                        sample: d.take_sample(now),
                        vehicles: d.take_events(),
                    },
                    Device::Gate(g) => SampleData::Gate(g.snapshot()),
                };
                SampleSnapshot {
                    controller: name.clone(),
                    stamp: now,
                    fault: device.controller().fault(),
                    data,
                }
            })
            .collect()
    }
}

// ── CommSystem ────────────────────────────────────────────────────────────────

pub struct CommSystem {
    inner: Arc<Inner>,
    scheduler: Option<Scheduler>,
    worker: Option<Arc<Worker>>,
}

impl CommSystem {
    /// Build every link with a TCP or UDP connector.
    pub fn build(cfg: &CommConfigManager, clock: SharedClock) -> Result<Self> {
        Self::build_with(cfg, clock, |link| {
            Box::new(LinkConnector::new(link.transport, link.uri.clone(), link.timeout))
        })
    }

    /// Build with connectors from `connect`, one call per link.
    pub fn build_with<F>(cfg: &CommConfigManager, clock: SharedClock, connect: F) -> Result<Self>
    where
        F: Fn(&LinkConfig) -> Box<dyn Connector>,
    {
        let mut links = BTreeMap::new();
        for (name, link) in cfg.get_all_links() {
            let log = DebugLog::new(cfg.log_dir(), name, clock.clone());
            let poller = Poller::start(name, connect(link), clock.clone(), log)
                .with_context(|| format!("Cannot start poller for link {}", name))?;
            links.insert(
                name.clone(),
                Link {
                    config: link.clone(),
                    poller,
                },
            );
        }

        let mut devices = BTreeMap::new();
        for (name, c) in cfg.get_all_controllers() {
            let Some(link) = links.get(&c.link) else {
                warn!(controller = %name, link = %c.link, "controller on unknown link");
                continue;
            };
            let ctl = Arc::new(Controller::new(name, &c.link, c.drop, c.retry_threshold));
            let device = Device::new(link.config.protocol, ctl, clock.clone());
            devices.insert(name.clone(), (device, InFlight::new()));
        }

        info!(links = links.len(), controllers = devices.len(), "comm system built");
        Ok(Self {
            inner: Arc::new(Inner {
                clock,
                links,
                devices,
                sample_dir: cfg.sample_dir().map(PathBuf::from),
            }),
            scheduler: None,
            worker: None,
        })
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Queue `op` on its controller's link.  Never fails loudly: a refused
    /// operation finishes at once and `false` is returned.
    pub fn enqueue(&self, mut op: Box<dyn Pollable>) -> bool {
        let link = op.controller().link().to_string();
        match self.inner.links.get(&link) {
            Some(l) => l.poller.enqueue(op),
            None => {
                warn!(controller = %op.controller().name(), link = %link, "no poller for link");
                op.abort("NO LINK");
                op.cleanup(self.inner.clock.now());
                false
            }
        }
    }

    /// Enqueue a sampling poll for every device on `link` now.
    pub fn poll_link(&self, link: &str) -> usize {
        self.inner.poll_link(link)
    }

    pub fn move_gate(&self, controller: &str, cmd: GateCommand) -> bool {
        match self.gate(controller) {
            Some(g) => self.enqueue(g.move_arm(cmd).boxed()),
            None => false,
        }
    }

    pub fn reset_detector(&self, controller: &str) -> bool {
        match self.detector(controller) {
            Some(d) => self.enqueue(d.reset().boxed()),
            None => false,
        }
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    pub fn controller(&self, name: &str) -> Option<&Arc<Controller>> {
        self.inner.devices.get(name).map(|(d, _)| d.controller())
    }

    pub fn controller_fault(&self, name: &str) -> Option<String> {
        self.controller(name).and_then(|c| c.fault())
    }

    pub fn controller_health(&self, name: &str) -> Option<CommCounters> {
        self.controller(name).map(|c| c.health())
    }

    pub fn controller_status(&self, name: &str) -> Option<String> {
        self.controller(name).map(|c| c.status(self.inner.clock.as_ref()))
    }

    pub fn detector(&self, name: &str) -> Option<&VehicleDetector> {
        match self.inner.devices.get(name) {
            Some((Device::Detector(d), _)) => Some(d),
            _ => None,
        }
    }

    pub fn gate(&self, name: &str) -> Option<&GateArm> {
        match self.inner.devices.get(name) {
            Some((Device::Gate(g), _)) => Some(g),
            _ => None,
        }
    }

    pub fn link_status(&self, name: &str) -> Option<LinkStatus> {
        self.inner.links.get(name).map(|l| LinkStatus {
            name: name.to_string(),
            status: l.poller.status(),
            load: l.poller.load(),
            queue_len: l.poller.queue_len(),
        })
    }

    pub fn link_names(&self) -> impl Iterator<Item = &str> {
        self.inner.links.keys().map(String::as_str)
    }

    // ── Sampling ──────────────────────────────────────────────────────────────

    /// Start the per-link poll jobs and the sample rollup job.  Idempotent.
    pub fn start_sampling(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        let cfg = SchedulerConfig {
            clock: self.inner.clock.clone(),
            handler: Arc::new(LogHandler),
        };
        let scheduler = Scheduler::with_config("sampling", cfg.clone())?;
        let worker = Arc::new(Worker::with_config("samples", cfg)?);
        let clock = self.inner.clock.as_ref();

        for (name, link) in &self.inner.links {
            let weak = Arc::downgrade(&self.inner);
            let link_name = name.clone();
            let job = Job::repeating(clock, format!("poll {}", name), link.config.poll_period_ms(), 0, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.poll_link(&link_name);
                }
                Ok(())
            })
            .with_context(|| format!("Invalid poll period for link {}", name))?;
            scheduler.add_job(job);
        }

        let rollup = rollup_task(Arc::downgrade(&self.inner), Arc::downgrade(&worker));
        scheduler.add_job(Job::repeating(clock, "sample rollup", SAMPLE_PERIOD_MS, SAMPLE_OFFSET_MS, rollup)?);

        info!(links = self.inner.links.len(), "sampling started");
        self.scheduler = Some(scheduler);
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop sampling and drain every link.  Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(s) = self.scheduler.take() {
            s.dispose();
        }
        if let Some(w) = self.worker.take() {
            w.dispose();
        }
        for link in self.inner.links.values() {
            link.poller.destroy();
        }
    }
}

impl Drop for CommSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Roll up samples and hand the file writes to the worker.
fn rollup_task(inner: Weak<Inner>, worker: Weak<Worker>) -> impl FnMut() -> Result<()> + Send + 'static {
    move || {
        let Some(inner) = inner.upgrade() else {
            return Ok(());
        };
        let snapshots = inner.rollup(inner.clock.now());
        let (Some(dir), Some(worker)) = (inner.sample_dir.clone(), worker.upgrade()) else {
            debug!(samples = snapshots.len(), "no sample directory, samples discarded");
            return Ok(());
        };
        let clock = inner.clock.clone();
        worker.add_work(move || sampler::write_snapshots(&dir, clock.as_ref(), &snapshots));
        Ok(())
    }
}
