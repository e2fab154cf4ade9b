/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scripted in-memory transport for tests.
//!
//! Each write consumes the next [`Reply`] from the script.  Reads past the
//! end of the queued bytes behave like a link that stays silent and fail
//! with a read timeout.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::CommError;
use super::messenger::{Connector, Messenger};

#[derive(Debug, Clone)]
pub enum Reply {
    /// The controller answers with these bytes.
    Bytes(Vec<u8>),
    /// The controller never answers.
    Silence,
    /// The next read fails with this I/O error.
    ReadError(io::ErrorKind),
}

#[derive(Debug, Default)]
pub struct ScriptState {
    pub replies: VecDeque<Reply>,
    pub sent: Vec<Vec<u8>>,
    pub rx: VecDeque<u8>,
    pub read_error: Option<io::ErrorKind>,
    pub connects: usize,
    /// Remaining connection attempts to refuse.
    pub refuse: usize,
    pub drains: usize,
}

/// Shared handle to a script; tests keep one to inspect what was sent.
#[derive(Debug, Clone, Default)]
pub struct Script(pub Arc<Mutex<ScriptState>>);

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.0.lock().replies.push_back(reply);
        self
    }

    pub fn bytes(&self, bytes: &[u8]) -> &Self {
        self.reply(Reply::Bytes(bytes.to_vec()))
    }

    pub fn refuse_connects(&self, n: usize) {
        self.0.lock().refuse = n;
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.0.lock().sent.clone()
    }

    pub fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub fn drains(&self) -> usize {
        self.0.lock().drains
    }

    pub fn messenger(&self) -> ScriptedMessenger {
        ScriptedMessenger(self.clone())
    }
}

pub struct ScriptedMessenger(Script);

impl Read for ScriptedMessenger {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut st = (self.0).0.lock();
        if st.rx.is_empty() {
            if let Some(kind) = st.read_error.take() {
                return Err(io::Error::new(kind, "scripted failure"));
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted silence"));
        }
        let n = out.len().min(st.rx.len());
        for slot in out.iter_mut().take(n) {
            *slot = st.rx.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for ScriptedMessenger {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut st = (self.0).0.lock();
        st.sent.push(data.to_vec());
        match st.replies.pop_front() {
            Some(Reply::Bytes(b)) => st.rx.extend(b),
            Some(Reply::ReadError(kind)) => st.read_error = Some(kind),
            Some(Reply::Silence) | None => {}
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Messenger for ScriptedMessenger {
    fn output(&mut self) -> &mut dyn Write {
        self
    }

    fn input(&mut self) -> &mut dyn Read {
        self
    }

    fn drain(&mut self) -> Result<(), CommError> {
        let mut st = (self.0).0.lock();
        st.rx.clear();
        st.drains += 1;
        Ok(())
    }
}

impl Connector for Script {
    fn connect(&self) -> Result<Box<dyn Messenger>, CommError> {
        let mut st = self.0.lock();
        if st.refuse > 0 {
            st.refuse -= 1;
            return Err(CommError::Transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        }
        st.connects += 1;
        Ok(Box::new(self.messenger()))
    }

    fn describe(&self) -> String {
        String::from("script://")
    }
}
