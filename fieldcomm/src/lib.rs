/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! fieldcomm – field controller communication framework
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── clock/        – wall clock abstraction, simulated clock for tests
//! ├── sched/        – timed job scheduler and FIFO worker
//! ├── comm/         – transports, framing and protocol properties
//! ├── op/           – multi-phase operations and their queue
//! ├── controller    – per-controller health and fault state
//! ├── poller        – one thread per link driving its operations
//! ├── device/       – vehicle detectors and gate arms
//! ├── sampler       – in-flight tracking and sample snapshots
//! ├── system        – composition root
//! └── config/       – YAML link/controller configuration
//! ```

pub mod clock;
pub mod comm;
pub mod config;
pub mod controller;
pub mod device;
pub mod op;
pub mod poller;
pub mod sampler;
pub mod sched;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;
