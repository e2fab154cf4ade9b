/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Priority queue of pending operations for one link.

use std::collections::{BTreeMap, HashSet};

use super::{Pollable, PriorityLevel};

/// Result of asking the queue for work.
pub enum Next {
    Ready(Box<dyn Pollable>),
    /// Nothing is ready before this clock time.
    Wait(i64),
    Empty,
    Closed,
}

/// Operations ordered by (priority, enqueue sequence).
///
/// An operation is *active* from the moment it is accepted until it is
/// retired, including while the poller has it out of the queue.  A second
/// operation with the same name for the same controller is refused while
/// the first is active.
#[derive(Default)]
pub struct OpQueue {
    ops: BTreeMap<(PriorityLevel, u64), Box<dyn Pollable>>,
    active: HashSet<(String, String)>,
    seq: u64,
    closed: bool,
}

fn dedupe_key(op: &dyn Pollable) -> (String, String) {
    (op.name().to_string(), op.controller().name().to_string())
}

impl OpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new operation.  A duplicate, or any operation after the
    /// queue closed, is handed back.
    pub fn add(&mut self, op: Box<dyn Pollable>) -> Result<(), Box<dyn Pollable>> {
        if self.closed || !self.active.insert(dedupe_key(op.as_ref())) {
            return Err(op);
        }
        self.push(op);
        Ok(())
    }

    /// Put back an operation that is still active.
    pub fn requeue(&mut self, op: Box<dyn Pollable>) {
        self.push(op);
    }

    /// Forget a finished operation so an equivalent one may be added.
    pub fn retire(&mut self, op: &dyn Pollable) {
        self.active.remove(&dedupe_key(op));
    }

    fn push(&mut self, op: Box<dyn Pollable>) {
        self.seq += 1;
        self.ops.insert((op.priority(), self.seq), op);
    }

    /// Take the highest-priority operation that is ready at `now`.
    pub fn take_ready(&mut self, now: i64) -> Next {
        if self.closed {
            return Next::Closed;
        }
        let ready = self
            .ops
            .iter()
            .find(|(_, op)| op.ready_at() <= now)
            .map(|(key, _)| *key);
        if let Some(op) = ready.and_then(|key| self.ops.remove(&key)) {
            return Next::Ready(op);
        }
        match self.ops.values().map(|op| op.ready_at()).min() {
            Some(at) => Next::Wait(at),
            None => Next::Empty,
        }
    }

    /// Raise a queued operation to `priority`.  False when it is not queued
    /// or already at least that urgent.
    pub fn bump(&mut self, id: u64, priority: PriorityLevel) -> bool {
        let Some(key) = self
            .ops
            .iter()
            .find(|(_, op)| op.id() == id)
            .map(|(key, _)| *key)
        else {
            return false;
        };
        if key.0 <= priority {
            return false;
        }
        if let Some(mut op) = self.ops.remove(&key) {
            op.set_priority(priority);
            self.ops.insert((priority, key.1), op);
        }
        true
    }

    /// Refuse further operations and hand back everything queued.
    pub fn close(&mut self) -> Vec<Box<dyn Pollable>> {
        self.closed = true;
        let ops: Vec<_> = std::mem::take(&mut self.ops).into_values().collect();
        for op in &ops {
            self.active.remove(&dedupe_key(op.as_ref()));
        }
        ops
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Channel, CommError};
    use crate::controller::Controller;
    use crate::op::{Operation, Phase, Step};
    use std::sync::Arc;

    struct Nop;

    impl Phase<()> for Nop {
        fn poll(&mut self, _: &mut (), _: &mut Channel<'_>) -> Result<Step<()>, CommError> {
            Ok(Step::Done)
        }
    }

    fn op(name: &str, ctl: &str, priority: PriorityLevel) -> Box<dyn Pollable> {
        let ctl = Arc::new(Controller::new(ctl, "link", 1, 3));
        Operation::new(name, priority, ctl, (), Box::new(Nop)).boxed()
    }

    fn take_name(q: &mut OpQueue, now: i64) -> Option<String> {
        match q.take_ready(now) {
            Next::Ready(op) => Some(op.name().to_string()),
            _ => None,
        }
    }

    #[test]
    fn priority_first_then_enqueue_order() {
        let mut q = OpQueue::new();
        for (name, p) in [
            ("idle", PriorityLevel::Idle),
            ("poll-a", PriorityLevel::PollLow),
            ("cmd", PriorityLevel::Command),
            ("poll-b", PriorityLevel::PollLow),
            ("settings", PriorityLevel::Settings),
        ] {
            assert!(q.add(op(name, name, p)).is_ok());
        }
        let order: Vec<_> = std::iter::from_fn(|| take_name(&mut q, 0)).collect();
        assert_eq!(order, vec!["cmd", "settings", "poll-a", "poll-b", "idle"]);
    }

    #[test]
    fn duplicates_are_refused_until_retired() {
        let mut q = OpQueue::new();
        assert!(q.add(op("query", "ctl_1", PriorityLevel::PollLow)).is_ok());
        assert!(q.add(op("query", "ctl_1", PriorityLevel::PollLow)).is_err());
        assert!(q.add(op("query", "ctl_2", PriorityLevel::PollLow)).is_ok());

        let Next::Ready(taken) = q.take_ready(0) else { panic!("expected an op") };
        assert!(q.add(op("query", "ctl_1", PriorityLevel::PollLow)).is_err(), "still active");
        q.retire(taken.as_ref());
        assert!(q.add(op("query", "ctl_1", PriorityLevel::PollLow)).is_ok());
    }

    #[test]
    fn deferred_operations_wait_their_turn() {
        let mut q = OpQueue::new();
        let mut late = op("late", "a", PriorityLevel::Command);
        late.defer_until(5_000);
        q.add(late).ok();
        assert!(matches!(q.take_ready(1_000), Next::Wait(5_000)));
        q.add(op("now", "b", PriorityLevel::Idle)).ok();
        assert_eq!(take_name(&mut q, 1_000).as_deref(), Some("now"));
        assert_eq!(take_name(&mut q, 5_000).as_deref(), Some("late"));
        assert!(matches!(q.take_ready(5_000), Next::Empty));
    }

    #[test]
    fn bump_moves_an_operation_ahead() {
        let mut q = OpQueue::new();
        q.add(op("first", "a", PriorityLevel::PollLow)).ok();
        let slow = op("slow", "b", PriorityLevel::Idle);
        let id = slow.id();
        q.add(slow).ok();
        assert!(q.bump(id, PriorityLevel::Command));
        assert!(!q.bump(id, PriorityLevel::Settings));
        assert_eq!(take_name(&mut q, 0).as_deref(), Some("slow"));
    }

    #[test]
    fn close_hands_back_everything() {
        let mut q = OpQueue::new();
        q.add(op("a", "a", PriorityLevel::PollLow)).ok();
        q.add(op("b", "b", PriorityLevel::PollLow)).ok();
        assert_eq!(q.close().len(), 2);
        assert!(q.add(op("c", "c", PriorityLevel::Urgent)).is_err());
        assert!(matches!(q.take_ready(0), Next::Closed));
    }
}
