/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timed job execution on dedicated threads.
//!
//! A [`Scheduler`] owns one thread and a pending set of [`Job`]s ordered by
//! [`JobKey`].  The thread sleeps until the earliest job is due, runs it with
//! the monitor released, then either retires it (one-shot, or removed while
//! it was running) or re-inserts it at its next boundary.
//!
//! ```text
//!  add_job ──► todo: BTreeMap<JobKey, Job> ──► run (unlocked) ──► retire
//!                         ▲                                          │
//!                         └──────── compute_next_time ◄──────────────┘
//! ```
//!
//! The [`Worker`] sibling runs one-off [`Work`] items in FIFO order.

pub mod error;
pub mod job;
pub mod worker;

pub use error::{ExceptionHandler, LogHandler, SchedError};
pub use job::{next_boundary, Job, JobKey};
pub use worker::{Work, WorkHandle, Worker};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::{self, SharedClock};

use error::panic_error;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Pending-job count above which the scheduler reports itself overloaded.
pub const OVERLOAD_THRESHOLD: usize = 5000;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Collaborators injected into a [`Scheduler`] or [`Worker`].
#[derive(Clone)]
pub struct SchedulerConfig {
    pub clock: SharedClock,
    pub handler: Arc<dyn ExceptionHandler>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clock: clock::system_clock(),
            handler: Arc::new(LogHandler),
        }
    }
}

/// Identifies a job added to a [`Scheduler`], for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    todo: BTreeMap<JobKey, Job>,
    /// Job id → its key in `todo`.
    keys: HashMap<u64, JobKey>,
    /// Jobs removed while running; retired instead of rescheduled.
    removed: HashSet<u64>,
    running: Option<u64>,
    overloaded: bool,
    disposing: bool,
}

struct Shared {
    name: String,
    cfg: SchedulerConfig,
    state: Mutex<State>,
    cv: Condvar,
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// A thread that performs [`Job`]s at their scheduled times.
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start a scheduler on the system clock with the logging handler.
    pub fn new(name: &str) -> Result<Self, SchedError> {
        Self::with_config(name, SchedulerConfig::default())
    }

    pub fn with_config(name: &str, cfg: SchedulerConfig) -> Result<Self, SchedError> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            cfg,
            state: Mutex::new(State::default()),
            cv: Condvar::new(),
        });
        let runner = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("sched-{}", name))
            .spawn(move || run(&runner))?;
        info!(scheduler = %name, "scheduler started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Insert `job` into the pending set and wake the thread.
    pub fn add_job(&self, job: Job) -> JobHandle {
        let id = job.id();
        let mut st = self.shared.state.lock();
        let key = job.key();
        debug!(scheduler = %self.shared.name, job = %job.name(), next_time = key.next_time, "add job");
        st.keys.insert(id, key);
        st.todo.insert(key, job);
        let pending = st.todo.len();
        if pending > OVERLOAD_THRESHOLD {
            if !st.overloaded {
                st.overloaded = true;
                warn!(scheduler = %self.shared.name, pending, "scheduler overloaded");
            }
        } else {
            st.overloaded = false;
        }
        self.shared.cv.notify_all();
        JobHandle(id)
    }

    /// Remove a job.  A job that is running right now finishes its current
    /// run and is then retired instead of rescheduled.
    pub fn remove_job(&self, handle: &JobHandle) {
        let mut st = self.shared.state.lock();
        if let Some(key) = st.keys.remove(&handle.0) {
            st.todo.remove(&key);
        } else if st.running == Some(handle.0) {
            st.removed.insert(handle.0);
        }
        self.shared.cv.notify_all();
    }

    /// Number of jobs waiting in the pending set.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().todo.len()
    }

    /// Stop the thread.  Idempotent.
    pub fn dispose(&self) {
        {
            let mut st = self.shared.state.lock();
            st.disposing = true;
            st.todo.clear();
            st.keys.clear();
            self.shared.cv.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            info!(scheduler = %self.shared.name, "scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Thread body ───────────────────────────────────────────────────────────────

fn run(shared: &Shared) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_jobs(shared)));
    if outcome.is_err() && !shared.state.lock().disposing {
        error!(scheduler = %shared.name, "scheduler thread terminated abnormally");
    }
}

fn run_jobs(shared: &Shared) {
    let clock = shared.cfg.clock.as_ref();
    while let Some(mut job) = next_due(shared) {
        let scope = format!("{}/{}", shared.name, job.name());
        match panic::catch_unwind(AssertUnwindSafe(|| job.perform())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => shared.cfg.handler.handle(&scope, &e),
            Err(payload) => shared.cfg.handler.handle(&scope, &panic_error(payload)),
        }

        let mut st = shared.state.lock();
        st.running = None;
        if st.disposing {
            return;
        }
        let removed = st.removed.remove(&job.id());
        if job.is_repeating() && !removed {
            job.compute_next_time(clock);
            let key = job.key();
            st.keys.insert(job.id(), key);
            st.todo.insert(key, job);
        }
    }
}

/// Block until the earliest job is due and take it out of the pending set.
/// `None` once the scheduler is disposing.
fn next_due(shared: &Shared) -> Option<Job> {
    let clock = shared.cfg.clock.as_ref();
    let mut st = shared.state.lock();
    loop {
        if st.disposing {
            return None;
        }
        let Some(due) = st.todo.keys().next().copied() else {
            shared.cv.wait(&mut st);
            continue;
        };
        let delay = due.next_time - clock.now();
        if delay > 0 {
            clock::wait_on(clock, &shared.cv, &mut st, delay as u64);
            continue;
        }
        st.keys.remove(&due.id);
        st.running = Some(due.id);
        return st.todo.remove(&due);
    }
}
