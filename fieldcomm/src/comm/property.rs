/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The [`Property`] trait: one encodable/decodable datum of a protocol.

use std::fmt;
use std::io::{self, Read};

use super::error::CommError;

/// A value exchanged with a controller.
///
/// A *query* asks the controller for the value; a *store* sends one.  Each
/// direction has an encoder producing request bytes for a drop address and a
/// decoder consuming the response from the byte stream.  Directions a
/// property does not support fail with [`CommError::Unsupported`] and never
/// touch the stream.
pub trait Property: fmt::Debug + Send {
    fn encode_query(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        let _ = drop;
        Err(CommError::Unsupported("query"))
    }

    fn decode_query(&mut self, drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        let _ = (drop, rx);
        Err(CommError::Unsupported("query"))
    }

    fn encode_store(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
        let _ = drop;
        Err(CommError::Unsupported("store"))
    }

    fn decode_store(&mut self, drop: u16, rx: &mut dyn Read) -> Result<(), CommError> {
        let _ = (drop, rx);
        Err(CommError::Unsupported("store"))
    }
}

/// Fill `buf` from `rx`.
///
/// # Errors
/// [`CommError::Truncated`] when the stream ends first, [`CommError::Timeout`]
/// when the transport's read timeout expires.
pub fn read_fully(rx: &mut dyn Read, buf: &mut [u8]) -> Result<(), CommError> {
    let mut got = 0;
    while got < buf.len() {
        match rx.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(CommError::Truncated {
                    expected: buf.len(),
                    got,
                })
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read a single byte.
pub fn read_byte(rx: &mut dyn Read) -> Result<u8, CommError> {
    let mut b = [0_u8; 1];
    read_fully(rx, &mut b)?;
    Ok(b[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct QueryOnly;

    impl Property for QueryOnly {
        fn encode_query(&mut self, drop: u16) -> Result<Vec<u8>, CommError> {
            Ok(vec![drop as u8])
        }
    }

    #[test]
    fn unsupported_directions_fail_without_reading() {
        let mut p = QueryOnly;
        let mut rx: &[u8] = &[1, 2, 3];
        assert!(matches!(p.encode_store(1), Err(CommError::Unsupported("store"))));
        assert!(matches!(
            p.decode_store(1, &mut rx),
            Err(CommError::Unsupported("store"))
        ));
        assert_eq!(rx.len(), 3);
        assert_eq!(p.encode_query(9).unwrap(), vec![9]);
    }

    #[test]
    fn short_stream_is_truncated() {
        let mut rx: &[u8] = &[1, 2];
        let mut buf = [0_u8; 4];
        let err = read_fully(&mut rx, &mut buf).unwrap_err();
        assert!(matches!(err, CommError::Truncated { expected: 4, got: 2 }));
    }
}
