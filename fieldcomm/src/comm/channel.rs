/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One controller's view of an open link for the duration of a phase.

use std::io::Write;

use super::debug_log::{hex, DebugLog};
use super::error::CommError;
use super::messenger::Messenger;
use super::property::Property;

/// Binds a messenger to a drop address and the link's debug log.
///
/// A multi-property message is sent in two passes: every property is encoded
/// and written, then every response is decoded in the same order.
pub struct Channel<'a> {
    messenger: &'a mut dyn Messenger,
    drop: u16,
    log: &'a DebugLog,
    controller: &'a str,
}

impl<'a> Channel<'a> {
    pub fn new(
        messenger: &'a mut dyn Messenger,
        drop: u16,
        log: &'a DebugLog,
        controller: &'a str,
    ) -> Self {
        Self {
            messenger,
            drop,
            log,
            controller,
        }
    }

    pub fn drop_address(&self) -> u16 {
        self.drop
    }

    pub fn log(&self) -> &DebugLog {
        self.log
    }

    pub fn query(&mut self, props: &mut [&mut dyn Property]) -> Result<(), CommError> {
        for p in props.iter_mut() {
            let req = p.encode_query(self.drop)?;
            self.send(&req)?;
        }
        for p in props.iter_mut() {
            p.decode_query(self.drop, self.messenger.input())?;
            self.log.log(format_args!("{} RECV {:?}", self.controller, p));
        }
        Ok(())
    }

    pub fn store(&mut self, props: &mut [&mut dyn Property]) -> Result<(), CommError> {
        for p in props.iter_mut() {
            let req = p.encode_store(self.drop)?;
            self.log.log(format_args!("{} STORE {:?}", self.controller, p));
            self.send(&req)?;
        }
        for p in props.iter_mut() {
            p.decode_store(self.drop, self.messenger.input())?;
        }
        Ok(())
    }

    pub fn query_prop(&mut self, prop: &mut dyn Property) -> Result<(), CommError> {
        self.query(&mut [prop])
    }

    pub fn store_prop(&mut self, prop: &mut dyn Property) -> Result<(), CommError> {
        self.store(&mut [prop])
    }

    pub fn drain(&mut self) -> Result<(), CommError> {
        self.messenger.drain()
    }

    fn send(&mut self, req: &[u8]) -> Result<(), CommError> {
        self.log.log(format_args!("{} SEND {}", self.controller, hex(req)));
        let out = self.messenger.output();
        out.write_all(req)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::property::read_byte;
    use crate::comm::script::Script;
    use std::io::Read;

    /// Queries one byte: request `[drop, tag]`, response `[value]`.
    #[derive(Debug)]
    struct Byte {
        tag: u8,
        value: Option<u8>,
    }

    impl Property for Byte {
        fn encode_query(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
            Ok(vec![drop as u8, self.tag])
        }

        fn decode_query(&mut self, _drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
            self.value = Some(read_byte(rx)?);
            Ok(())
        }
    }

    #[test]
    fn all_requests_go_out_before_any_response_is_read() {
        let script = Script::new();
        script.bytes(&[7]).bytes(&[8]);
        let mut m = script.messenger();
        let log = DebugLog::disabled("t");
        let mut chan = Channel::new(&mut m, 5, &log, "ctl");

        let mut a = Byte { tag: 1, value: None };
        let mut b = Byte { tag: 2, value: None };
        chan.query(&mut [&mut a as &mut dyn Property, &mut b]).unwrap();

        assert_eq!(script.sent(), vec![vec![5, 1], vec![5, 2]]);
        assert_eq!((a.value, b.value), (Some(7), Some(8)));
    }

    #[test]
    fn silent_controller_times_out() {
        let script = Script::new();
        let mut m = script.messenger();
        let log = DebugLog::disabled("t");
        let mut chan = Channel::new(&mut m, 1, &log, "ctl");
        let mut a = Byte { tag: 1, value: None };
        assert!(matches!(chan.query_prop(&mut a), Err(CommError::Timeout)));
    }

    #[test]
    fn unsupported_store_sends_nothing() {
        let script = Script::new();
        let mut m = script.messenger();
        let log = DebugLog::disabled("t");
        let mut chan = Channel::new(&mut m, 1, &log, "ctl");
        let mut a = Byte { tag: 1, value: None };
        assert!(matches!(chan.store_prop(&mut a), Err(CommError::Unsupported(_))));
        assert!(script.sent().is_empty());
    }
}
