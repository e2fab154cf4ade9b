/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-link poller.
//!
//! One thread per link owns the messenger and pumps the link's
//! [`OpQueue`]: take the most urgent ready operation, run one phase, then
//! requeue or retire it.
//!
//! ```text
//!  enqueue ──► OpQueue ──► take_ready ──► op.poll(chan) ──┬─ done ──► cleanup
//!                ▲                                        │
//!                └──────── requeue / defer ◄──────────────┘
//!
//!  connect ──fail──► wait for an op ──► connect ──fail──► charge op ──► rest 200 ms
//! ```
//!
//! A connect that fails while the queue is idle is retried once work
//! arrives; only a failure with an operation in hand counts against it.
//!
//! Only the poller thread touches the messenger, so at most one phase runs
//! per link at a time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::clock::{self, SharedClock};
use crate::comm::{Channel, CommError, Connector, DebugLog, Messenger};
use crate::op::{Next, OpQueue, PollResult, Pollable};
use crate::sched::SchedError;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Rest between a transport fault and the next connect attempt.
pub const RECONNECT_REST_MS: u64 = 200;

/// Window over which [`Poller::load`] is measured.
pub const LOAD_INTERVAL_MS: i64 = 30_000;

/// How long an exclusive operation waits after finding its controller busy.
pub const CONTENTION_BACKOFF_MS: i64 = 250;

/// Failure text given to operations still queued at shutdown.
pub const QUEUE_DRAINED: &str = "QUEUE DRAINED";

// ── Load meter ────────────────────────────────────────────────────────────────

/// Busy fraction of the link, recomputed once per interval.
#[derive(Debug)]
struct LoadMeter {
    start: i64,
    busy: i64,
    load: f32,
}

impl LoadMeter {
    fn new(now: i64) -> Self {
        Self {
            start: now,
            busy: 0,
            load: 0.0,
        }
    }

    fn record(&mut self, busy_ms: i64, now: i64) {
        self.busy += busy_ms.max(0);
        let elapsed = now - self.start;
        if elapsed >= LOAD_INTERVAL_MS {
            self.load = (self.busy as f32 / elapsed as f32).min(1.0);
            self.start = now;
            self.busy = 0;
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    name: String,
    clock: SharedClock,
    log: DebugLog,
    connector: Box<dyn Connector>,
    queue: Mutex<OpQueue>,
    cv: Condvar,
    status: Mutex<String>,
    load: Mutex<LoadMeter>,
}

impl Shared {
    fn set_status(&self, status: String) {
        *self.status.lock() = status;
    }

    fn is_closed(&self) -> bool {
        self.queue.lock().is_closed()
    }

    /// Block until an operation is ready.  `None` once the queue closed.
    fn next_op(&self) -> Option<Box<dyn Pollable>> {
        let clock = self.clock.as_ref();
        let mut q = self.queue.lock();
        loop {
            let now = clock.now();
            match q.take_ready(now) {
                Next::Ready(op) => return Some(op),
                Next::Wait(at) => {
                    clock::wait_on(clock, &self.cv, &mut q, (at - now).max(1) as u64);
                }
                Next::Empty => self.cv.wait(&mut q),
                Next::Closed => return None,
            }
        }
    }

    /// Requeue an unfinished operation, or finish it.
    fn settle(&self, mut op: Box<dyn Pollable>) {
        if !op.is_done() {
            let mut q = self.queue.lock();
            if !q.is_closed() {
                q.requeue(op);
                self.cv.notify_all();
                return;
            }
            drop(q);
            op.abort(QUEUE_DRAINED);
        }
        self.finish(op);
    }

    fn finish(&self, mut op: Box<dyn Pollable>) {
        self.queue.lock().retire(op.as_ref());
        let ctl = op.controller().name().to_string();
        match op.fault() {
            None => self.log.log(format_args!("{} {} DONE", ctl, op.name())),
            Some(fault) => self.log.log(format_args!("{} {} FAILED: {}", ctl, op.name(), fault)),
        }
        debug!(link = %self.name, controller = %ctl, op = %op.name(), success = op.is_success(), "operation done");
        op.cleanup(self.clock.now());
    }
}

// ── Poller ────────────────────────────────────────────────────────────────────

/// Drives the operation queue of one communication link.
pub struct Poller {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Start the poller thread.  The first connect happens on that thread.
    pub fn start(
        name: &str,
        connector: Box<dyn Connector>,
        clock: SharedClock,
        log: DebugLog,
    ) -> Result<Self, SchedError> {
        let now = clock.now();
        let shared = Arc::new(Shared {
            name: name.to_string(),
            clock,
            log,
            connector,
            queue: Mutex::new(OpQueue::new()),
            cv: Condvar::new(),
            status: Mutex::new(String::new()),
            load: Mutex::new(LoadMeter::new(now)),
        });
        let runner = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("poll-{}", name))
            .spawn(move || run(&runner))?;
        info!(link = %name, endpoint = %shared.connector.describe(), "poller started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue an operation.  Duplicates and late arrivals are refused and
    /// finish at once without touching the controller's health.
    pub fn enqueue(&self, op: Box<dyn Pollable>) -> bool {
        let ctl = op.controller().name().to_string();
        let name = op.name().to_string();
        let mut q = self.shared.queue.lock();
        match q.add(op) {
            Ok(()) => {
                self.shared.cv.notify_all();
                drop(q);
                debug!(link = %self.shared.name, controller = %ctl, op = %name, "ADDING");
                self.shared.log.log(format_args!("{} {} ADDING", ctl, name));
                true
            }
            Err(mut op) => {
                let closed = q.is_closed();
                drop(q);
                let what = if closed { "DROPPING" } else { "SKIPPING" };
                debug!(link = %self.shared.name, controller = %ctl, op = %name, "{}", what);
                self.shared.log.log(format_args!("{} {} {}", ctl, name, what));
                op.abort(what);
                op.cleanup(self.shared.clock.now());
                false
            }
        }
    }

    /// Last connection error, empty while the link is healthy.
    pub fn status(&self) -> String {
        self.shared.status.lock().clone()
    }

    /// Fraction of the last full interval spent inside phases.
    pub fn load(&self) -> f32 {
        self.shared.load.lock().load
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Close the queue, fail everything still in it and stop the thread.
    /// Idempotent.
    pub fn destroy(&self) {
        let drained = {
            let mut q = self.shared.queue.lock();
            let ops = q.close();
            self.shared.cv.notify_all();
            ops
        };
        if !drained.is_empty() {
            info!(link = %self.shared.name, drained = drained.len(), "{}", QUEUE_DRAINED);
        }
        let now = self.shared.clock.now();
        for mut op in drained {
            op.abort(QUEUE_DRAINED);
            op.cleanup(now);
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            info!(link = %self.shared.name, "poller stopped");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ── Thread body ───────────────────────────────────────────────────────────────

fn run(shared: &Shared) {
    // Operation that arrived while the link was down.
    let mut waiting: Option<Box<dyn Pollable>> = None;
    while !shared.is_closed() {
        match shared.connector.connect() {
            Ok(mut messenger) => {
                shared.set_status(String::new());
                debug!(link = %shared.name, "connected");
                let connected = match waiting.take() {
                    Some(op) => poll_one(shared, messenger.as_mut(), op),
                    None => true,
                };
                if connected {
                    poll_queue(shared, messenger.as_mut());
                }
            }
            Err(e) => {
                warn!(link = %shared.name, "connect failed: {}", e);
                shared.set_status(e.to_string());
                match waiting.take() {
                    Some(op) => charge(shared, op, &e),
                    None => {
                        waiting = shared.next_op();
                        continue;
                    }
                }
            }
        }
        if shared.is_closed() {
            break;
        }
        shared.clock.sleep_well(RECONNECT_REST_MS);
    }
    if let Some(op) = waiting {
        shared.settle(op);
    }
}

/// Run operations until the transport fails or the queue closes.
fn poll_queue(shared: &Shared, messenger: &mut dyn Messenger) {
    while let Some(op) = shared.next_op() {
        if !poll_one(shared, messenger, op) {
            return;
        }
    }
}

/// Run one phase of `op`.  Returns false once the transport is lost.
fn poll_one(shared: &Shared, messenger: &mut dyn Messenger, mut op: Box<dyn Pollable>) -> bool {
    let clock = shared.clock.as_ref();
    let start = clock.now();
    let result = {
        let ctl = Arc::clone(op.controller());
        let mut chan = Channel::new(&mut *messenger, ctl.drop_address(), &shared.log, ctl.name());
        op.poll(&mut chan, start)
    };
    let now = clock.now();
    shared.load.lock().record(now - start, now);

    match result {
        PollResult::Polled => shared.settle(op),
        PollResult::Contention { holder } => contend(shared, op, holder, now),
        PollResult::Disconnect => {
            shared.set_status(String::from("disconnected"));
            shared.log.log(format_args!("{} DISCONNECT", shared.name));
            shared.settle(op);
            return false;
        }
    }
    true
}

/// The controller is locked by `holder`: back off and, if this operation
/// is more urgent, raise the holder so it finishes sooner.
fn contend(shared: &Shared, mut op: Box<dyn Pollable>, holder: u64, now: i64) {
    let mut q = shared.queue.lock();
    if q.bump(holder, op.priority()) {
        debug!(link = %shared.name, controller = %op.controller().name(), holder, priority = %op.priority(), "BUMPING");
        shared.log.log(format_args!(
            "{} {} BUMPING {} to {}",
            op.controller().name(),
            op.name(),
            holder,
            op.priority()
        ));
    }
    op.defer_until(now + CONTENTION_BACKOFF_MS);
    if q.is_closed() {
        drop(q);
        op.abort(QUEUE_DRAINED);
        shared.finish(op);
    } else {
        q.requeue(op);
        shared.cv.notify_all();
    }
}

/// A failed connect counts against the operation that wanted the link.
fn charge(shared: &Shared, mut op: Box<dyn Pollable>, err: &CommError) {
    shared.log.log(format_args!("{} {} {}", op.controller().name(), op.name(), err));
    op.handle_error(err);
    shared.settle(op);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::comm::script::{Reply, Script};
    use crate::controller::Controller;
    use crate::op::{Operation, PriorityLevel};
    use crate::testing::{eventually, EchoPhase, ParkPhase};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn poller(script: &Script, clock: &Arc<SimulatedClock>) -> Poller {
        Poller::start("north", Box::new(script.clone()), clock.clone(), DebugLog::disabled("north")).unwrap()
    }

    fn controller(threshold: u32) -> Arc<Controller> {
        Arc::new(Controller::new("ctl_3", "north", 3, threshold))
    }

    /// Echo op that counts its outcome into `done` / `failed`.
    fn echo(ctl: &Arc<Controller>, done: &Arc<AtomicUsize>, failed: &Arc<AtomicUsize>) -> Box<dyn Pollable> {
        let (done, failed) = (Arc::clone(done), Arc::clone(failed));
        Operation::new("echo", PriorityLevel::PollLow, ctl.clone(), None, Box::new(EchoPhase))
            .on_done(move |_, ok| {
                if ok {
                    done.fetch_add(1, Ordering::SeqCst);
                } else {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .boxed()
    }

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    // ── Normal operation ──────────────────────────────────────────────────────

    #[test]
    fn enqueued_operation_runs_to_completion() {
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        script.bytes(&[7]);
        let p = poller(&script, &clock);
        let ctl = controller(2);
        let (done, failed) = counters();

        assert!(p.enqueue(echo(&ctl, &done, &failed)));
        assert!(eventually(|| done.load(Ordering::SeqCst) == 1));
        assert_eq!(failed.load(Ordering::SeqCst), 0);
        assert_eq!(script.sent(), vec![vec![3]]);
        assert_eq!(ctl.health().success, 1);
        assert!(p.status().is_empty());
        assert_eq!(p.queue_len(), 0);
    }

    #[test]
    fn duplicate_is_skipped_while_the_first_is_active() {
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        let p = poller(&script, &clock);
        let ctl = controller(2);
        let park = || Operation::new("park", PriorityLevel::PollLow, ctl.clone(), (), Box::new(ParkPhase)).boxed();

        assert!(p.enqueue(park()));
        assert!(!p.enqueue(park()), "same op and controller");
        assert!(eventually(|| p.queue_len() == 1));
        assert_eq!(ctl.fault(), None, "skipped ops are not blamed");
    }

    // ── Failures ──────────────────────────────────────────────────────────────

    #[test]
    fn refused_connects_are_charged_to_the_head_operation() {
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        script.refuse_connects(10);
        let p = poller(&script, &clock);
        let ctl = controller(1);
        let (done, failed) = counters();

        p.enqueue(echo(&ctl, &done, &failed));
        assert!(eventually(|| failed.load(Ordering::SeqCst) == 1));
        assert!(ctl.is_failed());
        assert!(ctl.fault().unwrap_or_default().contains("scripted refusal"));
        assert!(p.status().contains("scripted refusal"));
        assert_eq!(ctl.health().comm, 2);
    }

    #[test]
    fn idle_connect_failure_is_retried_when_work_arrives() {
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        script.refuse_connects(1);
        script.bytes(&[7]);
        let p = poller(&script, &clock);
        assert!(eventually(|| p.status().contains("scripted refusal")));

        let ctl = controller(0);
        let (done, failed) = counters();
        p.enqueue(echo(&ctl, &done, &failed));
        assert!(eventually(|| done.load(Ordering::SeqCst) == 1));
        assert_eq!(failed.load(Ordering::SeqCst), 0);
        assert_eq!(script.connects(), 1);
        assert_eq!(ctl.health().comm, 0);
        assert!(!ctl.is_failed());
        assert!(p.status().is_empty());
    }

    #[test]
    fn transport_reset_reconnects_and_retries() {
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        script.reply(Reply::ReadError(std::io::ErrorKind::ConnectionReset)).bytes(&[1]);
        let p = poller(&script, &clock);
        let ctl = controller(2);
        let (done, failed) = counters();

        p.enqueue(echo(&ctl, &done, &failed));
        assert!(eventually(|| done.load(Ordering::SeqCst) == 1));
        assert_eq!(script.connects(), 2);
        assert_eq!(ctl.health().comm, 1);
        assert!(!ctl.is_failed());
    }

    // ── Contention ────────────────────────────────────────────────────────────

    #[test]
    fn contending_command_bumps_the_lock_holder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("north.log"), "").unwrap();
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        let p = Poller::start("north", Box::new(script.clone()), clock.clone(), DebugLog::new(Some(dir.path()), "north", clock.clone()))
            .unwrap();
        let ctl = controller(2);

        let holder = Operation::new("settings", PriorityLevel::Idle, ctl.clone(), (), Box::new(ParkPhase)).exclusive();
        let holder_id = holder.id();
        p.enqueue(holder.boxed());
        assert!(eventually(|| ctl.lock_holder() == Some(holder_id)));

        let cmd = Operation::new("command", PriorityLevel::Command, ctl.clone(), (), Box::new(ParkPhase)).exclusive();
        p.enqueue(cmd.boxed());
        let log = || std::fs::read_to_string(dir.path().join("north.log")).unwrap_or_default();
        assert!(eventually(|| log().contains(&format!("BUMPING {} to COMMAND", holder_id))));
        assert_eq!(ctl.lock_holder(), Some(holder_id), "holder keeps the lock");
        assert_eq!(p.queue_len(), 2);

        p.destroy();
        assert_eq!(ctl.lock_holder(), None);
    }

    // ── Shutdown and load ─────────────────────────────────────────────────────

    #[test]
    fn destroy_drains_the_queue_without_blaming_controllers() {
        let clock = Arc::new(SimulatedClock::new(0));
        let script = Script::new();
        let p = poller(&script, &clock);
        let ctl = controller(2);
        let failed = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failed);
        let op = Operation::new("park", PriorityLevel::PollLow, ctl.clone(), (), Box::new(ParkPhase))
            .on_done(move |_, ok| {
                if !ok {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            });
        p.enqueue(op.boxed());
        assert!(eventually(|| script.connects() == 1));

        p.destroy();
        p.destroy();
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.fault(), None);
        assert!(!p.enqueue(Operation::new("late", PriorityLevel::Urgent, ctl.clone(), (), Box::new(ParkPhase)).boxed()));
    }

    #[test]
    fn load_is_busy_fraction_of_the_interval() {
        let mut m = LoadMeter::new(0);
        m.record(3_000, 10_000);
        assert_eq!(m.load, 0.0, "interval not finished");
        m.record(6_000, 30_000);
        assert!((m.load - 0.3).abs() < 1e-6);
        m.record(40_000, 60_000);
        assert_eq!(m.load, 1.0);
    }

    #[test]
    fn clock_time_is_used_for_deferral() {
        let clock = Arc::new(SimulatedClock::new(1_000));
        let script = Script::new();
        script.bytes(&[4]);
        let p = poller(&script, &clock);
        let ctl = controller(2);
        let (done, failed) = counters();
        let mut op = echo(&ctl, &done, &failed);
        op.defer_until(5_000);
        p.enqueue(op);

        thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(done.load(Ordering::SeqCst), 0);
        clock.set(5_000);
        assert!(eventually(|| done.load(Ordering::SeqCst) == 1));
    }
}
