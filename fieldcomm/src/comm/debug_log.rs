/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-link protocol tracing, switched on by the presence of a file.
//!
//! An operator enables tracing for link `north` by creating
//! `<log_dir>/north.log`; deleting the file switches it off again.  The
//! check runs on every write, so no restart or signal is needed.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::clock::{self, SharedClock};

#[derive(Debug, Clone)]
pub struct DebugLog {
    name: String,
    path: Option<PathBuf>,
    /// Source of line time stamps.
    clock: SharedClock,
}

impl DebugLog {
    /// A log named `name` toggled by `<dir>/<name>.log`, stamped by `clock`.
    pub fn new(dir: Option<&Path>, name: &str, clock: SharedClock) -> Self {
        Self {
            name: name.to_string(),
            path: dir.map(|d| d.join(format!("{}.log", name))),
            clock,
        }
    }

    /// A log that is never open.
    pub fn disabled(name: &str) -> Self {
        Self::new(None, name, clock::system_clock())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.path.as_deref().is_some_and(Path::is_file)
    }

    /// Append one time-stamped line when the log is open.
    pub fn log(&self, msg: impl fmt::Display) {
        let Some(path) = self.path.as_deref().filter(|p| p.is_file()) else {
            return;
        };
        let now = self.clock.now();
        let line = match clock::local_time(self.clock.as_ref(), now) {
            Some(at) => format!("{} {}\n", at.format("%Y-%m-%d %H:%M:%S%.3f"), msg),
            None => format!("{} {}\n", now, msg),
        };
        let written = OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            debug!(log = %self.name, "debug log write failed: {}", e);
        }
    }
}

/// Space-separated upper-case hex, e.g. `10 5B 01 5C 16`.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
