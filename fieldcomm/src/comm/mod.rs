/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Wire protocols and transports.
//!
//! ```text
//! comm/
//! ├── error       – CommError taxonomy
//! ├── property    – Property trait, stream helpers
//! ├── channel     – per-phase binding of messenger + drop + debug log
//! ├── messenger   – TCP / UDP transports, Connector
//! ├── debug_log   – file-toggled protocol tracing
//! ├── ft12        – binary framing
//! ├── tdc         – vehicle detector properties
//! ├── tagline     – ASCII line reader and tag parser
//! └── gate        – gate arm properties
//! ```

pub mod channel;
pub mod debug_log;
pub mod error;
pub mod ft12;
pub mod gate;
pub mod messenger;
pub mod property;
pub mod tagline;
pub mod tdc;

#[cfg(test)]
pub(crate) mod script;

pub use channel::Channel;
pub use debug_log::DebugLog;
pub use error::{CommError, ErrorKind};
pub use messenger::{Connector, LinkConnector, Messenger, TransportKind};
pub use property::Property;
