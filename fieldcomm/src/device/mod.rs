/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Field devices driven through the operation engine.
//!
//! A device keeps the state that outlives single operations and hands out
//! ready-to-enqueue [`Operation`](crate::op::Operation)s.  Which device sits
//! behind a controller follows from the protocol of its link.

pub mod detector;
pub mod gate;

pub use detector::{TrafficSample, VehicleDetector, VehicleEvent};
pub use gate::{GateArm, GateSnapshot, MoveResult};

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::clock::SharedClock;
use crate::controller::Controller;

/// Wire protocol spoken on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Framed binary vehicle detectors.
    Tdc,
    /// ASCII tag/value gate arms.
    Gate,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tdc => write!(f, "tdc"),
            Protocol::Gate => write!(f, "gate"),
        }
    }
}

#[derive(Clone)]
pub enum Device {
    Detector(VehicleDetector),
    Gate(GateArm),
}

impl Device {
    pub fn new(protocol: Protocol, controller: Arc<Controller>, clock: SharedClock) -> Self {
        match protocol {
            Protocol::Tdc => Device::Detector(VehicleDetector::new(controller, clock)),
            Protocol::Gate => Device::Gate(GateArm::new(controller, clock)),
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        match self {
            Device::Detector(d) => d.controller(),
            Device::Gate(g) => g.controller(),
        }
    }
}
