/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! FIFO execution of one-off work items on a dedicated thread.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::clock::{self, SharedClock};

use super::error::{panic_error, SchedError};
use super::SchedulerConfig;

/// Longest single wait inside [`WorkHandle::wait_for_completion`].
pub const WAIT_SLICE_MS: u64 = 100;

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(1);

// ── Work ──────────────────────────────────────────────────────────────────────

/// A unit of work.  `complete` always runs after `perform`, even when
/// `perform` failed.
pub trait Work: Send + 'static {
    fn perform(&mut self) -> anyhow::Result<()>;

    fn complete(&mut self) {}
}

impl<F> Work for F
where
    F: FnMut() -> anyhow::Result<()> + Send + 'static,
{
    fn perform(&mut self) -> anyhow::Result<()> {
        self()
    }
}

// ── Completion signalling ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Ran,
    /// Dropped by [`Worker::dispose`] without running.
    Disposed,
}

struct Completion {
    outcome: Mutex<Outcome>,
    cv: Condvar,
}

impl Completion {
    fn finish(&self, outcome: Outcome) {
        *self.outcome.lock() = outcome;
        self.cv.notify_all();
    }
}

/// Returned by [`Worker::add_work`]; lets callers wait for the item.
#[derive(Clone)]
pub struct WorkHandle {
    id: u64,
    completion: Arc<Completion>,
    clock: SharedClock,
}

impl WorkHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The item ran, or was dropped by dispose.
    pub fn is_complete(&self) -> bool {
        *self.completion.outcome.lock() != Outcome::Pending
    }

    /// Block until the item completes or `timeout_ms` of clock time passes.
    ///
    /// # Errors
    /// [`SchedError::Timeout`] when the timeout elapses first,
    /// [`SchedError::Disposed`] when the worker dropped the item unrun.
    pub fn wait_for_completion(&self, timeout_ms: u64) -> Result<(), SchedError> {
        let clock = self.clock.as_ref();
        let end = clock.now() + timeout_ms as i64;
        let mut outcome = self.completion.outcome.lock();
        while *outcome == Outcome::Pending {
            let remaining = end - clock.now();
            if remaining <= 0 {
                return Err(SchedError::Timeout { timeout_ms });
            }
            clock::wait_on(
                clock,
                &self.completion.cv,
                &mut outcome,
                (remaining as u64).min(WAIT_SLICE_MS),
            );
        }
        match *outcome {
            Outcome::Disposed => Err(SchedError::Disposed),
            _ => Ok(()),
        }
    }
}

// ── Queue entries ─────────────────────────────────────────────────────────────

struct Entry {
    id: u64,
    work: Box<dyn Work>,
    completion: Arc<Completion>,
}

// BinaryHeap is a max-heap: lower ids compare greater so they pop first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.id.cmp(&self.id)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entry {}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    disposing: bool,
}

struct Shared {
    name: String,
    cfg: SchedulerConfig,
    queue: Mutex<Queue>,
    cv: Condvar,
}

// ── Worker ────────────────────────────────────────────────────────────────────

pub struct Worker {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(name: &str) -> Result<Self, SchedError> {
        Self::with_config(name, SchedulerConfig::default())
    }

    pub fn with_config(name: &str, cfg: SchedulerConfig) -> Result<Self, SchedError> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            cfg,
            queue: Mutex::new(Queue::default()),
            cv: Condvar::new(),
        });
        let runner = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("work-{}", name))
            .spawn(move || run(&runner))?;
        info!(worker = %name, "worker started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queue `work` behind everything added before it.
    pub fn add_work<W: Work>(&self, work: W) -> WorkHandle {
        let id = NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed);
        let completion = Arc::new(Completion {
            outcome: Mutex::new(Outcome::Pending),
            cv: Condvar::new(),
        });
        let mut q = self.shared.queue.lock();
        if q.disposing {
            debug!(worker = %self.shared.name, id, "work refused after dispose");
            completion.finish(Outcome::Disposed);
        } else {
            q.heap.push(Entry {
                id,
                work: Box::new(work),
                completion: Arc::clone(&completion),
            });
            self.shared.cv.notify_all();
        }
        WorkHandle {
            id,
            completion,
            clock: self.shared.cfg.clock.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// Stop the thread.  Queued items are dropped unrun; waiters on them
    /// get [`SchedError::Disposed`].  The item in progress finishes.
    pub fn dispose(&self) {
        {
            let mut q = self.shared.queue.lock();
            q.disposing = true;
            for entry in q.heap.drain() {
                entry.completion.finish(Outcome::Disposed);
            }
            self.shared.cv.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            info!(worker = %self.shared.name, "worker stopped");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Thread body ───────────────────────────────────────────────────────────────

fn run(shared: &Shared) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_work(shared)));
    if outcome.is_err() && !shared.queue.lock().disposing {
        error!(worker = %shared.name, "worker thread terminated abnormally");
    }
}

fn run_work(shared: &Shared) {
    while let Some(mut entry) = next_entry(shared) {
        let scope = format!("{}/work-{}", shared.name, entry.id);
        match panic::catch_unwind(AssertUnwindSafe(|| entry.work.perform())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => shared.cfg.handler.handle(&scope, &e),
            Err(payload) => shared.cfg.handler.handle(&scope, &panic_error(payload)),
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry.work.complete())) {
            shared.cfg.handler.handle(&scope, &panic_error(payload));
        }
        entry.completion.finish(Outcome::Ran);
    }
}

fn next_entry(shared: &Shared) -> Option<Entry> {
    let mut q = shared.queue.lock();
    loop {
        if q.disposing {
            return None;
        }
        if let Some(entry) = q.heap.pop() {
            return Some(entry);
        }
        shared.cv.wait(&mut q);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::ExceptionHandler;
    use crate::testing::eventually;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<String>>,
    }

    impl ExceptionHandler for Recorder {
        fn handle(&self, _scope: &str, err: &anyhow::Error) {
            self.errors.lock().push(err.to_string());
        }
    }

    fn worker_with(recorder: &Arc<Recorder>) -> Worker {
        let cfg = SchedulerConfig {
            clock: clock::system_clock(),
            handler: recorder.clone(),
        };
        Worker::with_config("test", cfg).unwrap()
    }

    /// Work that records `perform` failing and `complete` still running.
    struct Flaky {
        completed: Arc<AtomicBool>,
    }

    impl Work for Flaky {
        fn perform(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("device unreachable")
        }

        fn complete(&mut self) {
            self.completed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn items_run_in_insertion_order() {
        let worker = worker_with(&Arc::new(Recorder::default()));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut last = None;
        for i in 0..20 {
            let order = Arc::clone(&order);
            last = Some(worker.add_work(move || -> anyhow::Result<()> {
                order.lock().push(i);
                Ok(())
            }));
        }
        last.unwrap().wait_for_completion(2_000).unwrap();
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn complete_runs_even_when_perform_fails() {
        let recorder = Arc::new(Recorder::default());
        let worker = worker_with(&recorder);
        let completed = Arc::new(AtomicBool::new(false));
        let handle = worker.add_work(Flaky {
            completed: Arc::clone(&completed),
        });
        handle.wait_for_completion(2_000).unwrap();
        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(*recorder.errors.lock(), vec!["device unreachable".to_string()]);
    }

    #[test]
    fn panicking_work_is_reported_and_the_thread_survives() {
        let recorder = Arc::new(Recorder::default());
        let worker = worker_with(&recorder);
        worker.add_work(|| -> anyhow::Result<()> { panic!("corrupt sample") });
        let after = worker.add_work(|| -> anyhow::Result<()> { Ok(()) });
        after.wait_for_completion(2_000).unwrap();
        assert!(recorder.errors.lock()[0].contains("corrupt sample"));
    }

    #[test]
    fn wait_times_out_on_slow_work() {
        let worker = worker_with(&Arc::new(Recorder::default()));
        let handle = worker.add_work(|| -> anyhow::Result<()> {
            thread::sleep(Duration::from_millis(400));
            Ok(())
        });
        let err = handle.wait_for_completion(120).unwrap_err();
        assert!(matches!(err, SchedError::Timeout { timeout_ms: 120 }));
        handle.wait_for_completion(2_000).unwrap();
        assert!(handle.is_complete());
    }

    #[test]
    fn work_added_after_dispose_is_complete_immediately() {
        let worker = worker_with(&Arc::new(Recorder::default()));
        worker.dispose();
        let handle = worker.add_work(|| -> anyhow::Result<()> { Ok(()) });
        assert!(handle.is_complete());
        assert!(matches!(handle.wait_for_completion(0), Err(SchedError::Disposed)));
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn dispose_fails_waiters_on_unrun_work() {
        let worker = worker_with(&Arc::new(Recorder::default()));
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let running = worker.add_work(move || -> anyhow::Result<()> {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let queued = worker.add_work(move || -> anyhow::Result<()> {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(eventually(|| started.load(Ordering::SeqCst)));

        let waiter = {
            let queued = queued.clone();
            thread::spawn(move || queued.wait_for_completion(5_000))
        };
        worker.dispose();

        assert!(matches!(waiter.join().unwrap(), Err(SchedError::Disposed)));
        running.wait_for_completion(0).unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }
}
