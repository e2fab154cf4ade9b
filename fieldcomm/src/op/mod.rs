/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Operations: multi-phase exchanges with one controller.
//!
//! An [`Operation`] owns a context value `C` and the [`Phase`] to run next.
//! Each poll runs exactly one phase against a [`Channel`]; the phase reads
//! and writes the context and says what happens next through a [`Step`].
//!
//! ```text
//!            ┌──── Again / After(ms) ────┐
//!            ▼                           │
//!   new ──► phase.poll(ctx, chan) ───────┤
//!            │        │                  │
//!            │        └── Next(phase') ──┘
//!            │
//!            ├── Done ─────────────► success
//!            └── Err(e) ── failures > threshold ──► failure (fault on controller)
//!                       └─ otherwise ── same phase again
//! ```
//!
//! Pollers queue operations behind the object-safe [`Pollable`] trait, so
//! one queue carries operations of any context type.

pub mod queue;

pub use queue::{Next, OpQueue};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::comm::{Channel, CommError};
use crate::controller::Controller;
use crate::sched::error::panic_error;

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

// ── Priority ──────────────────────────────────────────────────────────────────

/// Queue priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    Urgent,
    Command,
    Settings,
    PollHigh,
    PollLow,
    Idle,
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriorityLevel::Urgent => "URGENT",
            PriorityLevel::Command => "COMMAND",
            PriorityLevel::Settings => "SETTINGS",
            PriorityLevel::PollHigh => "POLL_HIGH",
            PriorityLevel::PollLow => "POLL_LOW",
            PriorityLevel::Idle => "IDLE",
        };
        write!(f, "{}", s)
    }
}

// ── Phase / Step ──────────────────────────────────────────────────────────────

/// What an operation does after a phase ran cleanly.
pub enum Step<C> {
    /// Continue with another phase on the next poll.
    Next(Box<dyn Phase<C>>),
    /// Run the same phase again on the next poll.
    Again,
    /// Run the same phase again, no sooner than this many ms from now.
    After(u64),
    /// The operation succeeded.
    Done,
}

/// One request/response step of an operation.
pub trait Phase<C>: Send {
    fn poll(&mut self, ctx: &mut C, chan: &mut Channel<'_>) -> Result<Step<C>, CommError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("phase")
    }
}

// ── Pollable ──────────────────────────────────────────────────────────────────

/// Outcome of one poll, for the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Polled,
    /// Exclusive access is held by another operation.
    Contention { holder: u64 },
    /// The transport failed; reconnect before polling again.
    Disconnect,
}

/// Type-erased operation as seen by a poller.
pub trait Pollable: Send {
    fn id(&self) -> u64;
    fn name(&self) -> &str;
    fn priority(&self) -> PriorityLevel;
    fn set_priority(&mut self, priority: PriorityLevel);
    fn controller(&self) -> &Arc<Controller>;
    fn is_exclusive(&self) -> bool;
    fn is_done(&self) -> bool;
    fn is_success(&self) -> bool;
    /// Error text of a failed operation.
    fn fault(&self) -> Option<&str>;
    /// Clock time before which the operation must not be polled.
    fn ready_at(&self) -> i64;
    fn defer_until(&mut self, at: i64);

    /// Run exactly one phase.
    fn poll(&mut self, chan: &mut Channel<'_>, now: i64) -> PollResult;

    /// Charge an error raised outside a phase (e.g. a failed connect).
    fn handle_error(&mut self, err: &CommError);

    /// End the operation without blaming the controller.
    fn abort(&mut self, reason: &str);

    /// Release resources and report the outcome.  Runs once, after the
    /// operation left its queue for good.
    fn cleanup(&mut self, now: i64);
}

// ── Operation ─────────────────────────────────────────────────────────────────

type DoneHook<C> = Box<dyn FnOnce(&mut C, bool) + Send>;

pub struct Operation<C> {
    id: u64,
    name: String,
    priority: PriorityLevel,
    controller: Arc<Controller>,
    exclusive: bool,
    ctx: C,
    phase: Option<Box<dyn Phase<C>>>,
    success: bool,
    failures: u32,
    fault: Option<String>,
    /// Aborted ops do not count against the controller.
    aborted: bool,
    holds_lock: bool,
    ready_at: i64,
    cleaned: bool,
    on_done: Option<DoneHook<C>>,
}

impl<C: Send + 'static> Operation<C> {
    pub fn new(
        name: impl Into<String>,
        priority: PriorityLevel,
        controller: Arc<Controller>,
        ctx: C,
        first: Box<dyn Phase<C>>,
    ) -> Self {
        Self {
            id: NEXT_OP_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            priority,
            controller,
            exclusive: false,
            ctx,
            phase: Some(first),
            success: false,
            failures: 0,
            fault: None,
            aborted: false,
            holds_lock: false,
            ready_at: 0,
            cleaned: false,
            on_done: None,
        }
    }

    /// Require sole access to the controller while the operation runs.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Called once with the context and the success flag when the
    /// operation ends, however it ends.  Hooks run in the order added.
    pub fn on_done<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut C, bool) + Send + 'static,
    {
        self.on_done = Some(match self.on_done.take() {
            Some(prev) => Box::new(move |ctx: &mut C, success| {
                prev(ctx, success);
                hook(ctx, success);
            }),
            None => Box::new(hook),
        });
        self
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn boxed(self) -> Box<dyn Pollable> {
        Box::new(self)
    }

    fn fail(&mut self, fault: String) {
        self.phase = None;
        self.success = false;
        self.fault = Some(fault);
    }
}

impl<C: Send + 'static> Pollable for Operation<C> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> PriorityLevel {
        self.priority
    }

    fn set_priority(&mut self, priority: PriorityLevel) {
        self.priority = priority;
    }

    fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    fn is_done(&self) -> bool {
        self.phase.is_none()
    }

    fn is_success(&self) -> bool {
        self.success
    }

    fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    fn ready_at(&self) -> i64 {
        self.ready_at
    }

    fn defer_until(&mut self, at: i64) {
        self.ready_at = at;
    }

    fn poll(&mut self, chan: &mut Channel<'_>, now: i64) -> PollResult {
        if self.exclusive && !self.holds_lock {
            match self.controller.try_acquire(self.id) {
                Ok(()) => self.holds_lock = true,
                Err(holder) => return PollResult::Contention { holder },
            }
        }
        let Some(mut phase) = self.phase.take() else {
            return PollResult::Polled;
        };
        let ctx = &mut self.ctx;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| phase.poll(ctx, &mut *chan))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let err = panic_error(payload);
                error!(controller = %self.controller.name(), op = %self.name, "{}", err);
                self.fail(err.to_string());
                return PollResult::Polled;
            }
        };
        match outcome {
            Ok(Step::Next(next)) => self.phase = Some(next),
            Ok(Step::Again) => self.phase = Some(phase),
            Ok(Step::After(ms)) => {
                self.phase = Some(phase);
                self.ready_at = now + ms as i64;
            }
            Ok(Step::Done) => self.success = true,
            Err(e) => {
                chan.log().log(format_args!(
                    "{} {} {}: {}",
                    self.controller.name(),
                    self.name,
                    phase.name(),
                    e
                ));
                self.phase = Some(phase);
                if e.drains_input() {
                    if let Err(drain) = chan.drain() {
                        debug!(controller = %self.controller.name(), "drain failed: {}", drain);
                    }
                }
                self.handle_error(&e);
                if e.is_disconnect() {
                    return PollResult::Disconnect;
                }
            }
        }
        PollResult::Polled
    }

    fn handle_error(&mut self, err: &CommError) {
        self.controller.record_error(err.kind());
        if !err.is_retryable() {
            self.fail(err.to_string());
            return;
        }
        self.failures += 1;
        if self.failures > self.controller.retry_threshold() {
            self.fail(err.to_string());
        } else {
            debug!(
                controller = %self.controller.name(),
                op = %self.name,
                failures = self.failures,
                "retrying: {}",
                err
            );
        }
    }

    fn abort(&mut self, reason: &str) {
        self.aborted = true;
        self.fail(reason.to_string());
    }

    fn cleanup(&mut self, now: i64) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.phase = None;
        if self.holds_lock {
            self.controller.release(self.id);
            self.holds_lock = false;
        }
        if self.success {
            self.controller.complete_operation(Ok(()), now);
        } else if !self.aborted {
            let fault = self.fault.as_deref().unwrap_or("operation failed");
            self.controller.complete_operation(Err(fault), now);
        }
        if let Some(hook) = self.on_done.take() {
            hook(&mut self.ctx, self.success);
        }
    }
}

impl<C> fmt::Debug for Operation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("controller", &self.controller.name())
            .field("exclusive", &self.exclusive)
            .field("failures", &self.failures)
            .finish()
    }
}
