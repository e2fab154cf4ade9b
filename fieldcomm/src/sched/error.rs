/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error types and failure reporting for the scheduler and worker threads.
//!
//! * [`SchedError`] – what the public scheduling API can return.
//! * [`ExceptionHandler`] – where task failures go.  A failing job or work
//!   item never escapes its thread; it is handed to the handler and the
//!   thread moves on to the next task.

use std::any::Any;

use thiserror::Error;
use tracing::error;

// ── SchedError ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchedError {
    /// A completion wait ran out of time before the work finished.
    #[error("work did not complete within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// A repeating job needs `interval > 0` and `0 <= offset < interval`.
    #[error("invalid schedule: interval {interval} ms, offset {offset} ms")]
    InvalidSchedule { interval: u64, offset: u64 },

    /// The worker was disposed before the work ran.
    #[error("worker disposed before the work ran")]
    Disposed,

    /// The dedicated thread could not be started.
    #[error("cannot spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ── Exception handling ────────────────────────────────────────────────────────

/// Receives every failure raised by a job or work item.
pub trait ExceptionHandler: Send + Sync {
    /// `scope` names the thread and task, e.g. `"sched/traffic poll"`.
    fn handle(&self, scope: &str, err: &anyhow::Error);
}

/// Default handler: logs the failure and carries on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl ExceptionHandler for LogHandler {
    fn handle(&self, scope: &str, err: &anyhow::Error) {
        error!(scope = %scope, "task failed: {:#}", err);
    }
}

/// Convert a caught panic payload into an error the handler can report.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic payload")
    };
    anyhow::anyhow!("task panicked: {}", msg)
}
