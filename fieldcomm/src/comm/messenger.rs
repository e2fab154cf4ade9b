/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Transports between a poller and its field controllers.
//!
//! A [`Messenger`] is an open connection exposing an output stream, an input
//! stream with a read timeout, and `drain` to discard unread input.  A
//! [`Connector`] knows how to open one; pollers hold a connector and
//! reconnect through it after transport failures.
//!
//! Serial lines are reached through a terminal server, so TCP and UDP cover
//! every deployed link.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::error::CommError;

/// Largest datagram accepted on a UDP link.
const MAX_DATAGRAM: usize = 2048;

// ── Traits ────────────────────────────────────────────────────────────────────

pub trait Messenger: Send {
    fn output(&mut self) -> &mut dyn Write;

    fn input(&mut self) -> &mut dyn Read;

    /// Discard any input already received but not yet read.
    fn drain(&mut self) -> Result<(), CommError>;
}

pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Messenger>, CommError>;

    /// Human-readable endpoint for logs and status strings.
    fn describe(&self) -> String;
}

// ── Transport selection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

/// Opens TCP or UDP messengers to a fixed `host:port`.
#[derive(Debug, Clone)]
pub struct LinkConnector {
    pub kind: TransportKind,
    pub uri: String,
    pub timeout: Duration,
}

impl LinkConnector {
    pub fn new(kind: TransportKind, uri: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind,
            uri: uri.into(),
            timeout,
        }
    }
}

impl Connector for LinkConnector {
    fn connect(&self) -> Result<Box<dyn Messenger>, CommError> {
        match self.kind {
            TransportKind::Tcp => Ok(Box::new(StreamMessenger::connect(&self.uri, self.timeout)?)),
            TransportKind::Udp => Ok(Box::new(DatagramMessenger::connect(&self.uri, self.timeout)?)),
        }
    }

    fn describe(&self) -> String {
        format!("{}://{}", self.kind, self.uri)
    }
}

// ── TCP ───────────────────────────────────────────────────────────────────────

pub struct StreamMessenger {
    stream: TcpStream,
}

impl StreamMessenger {
    pub fn connect(uri: &str, timeout: Duration) -> Result<Self, CommError> {
        let mut last = None;
        for addr in uri.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(uri = %uri, "tcp connected");
                    return Ok(Self { stream });
                }
                Err(e) => last = Some(e),
            }
        }
        Err(match last {
            // A connect timeout is a transport fault, not a read timeout.
            Some(e) => CommError::Transport(e),
            None => CommError::Transport(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address for {}", uri),
            )),
        })
    }
}

impl Messenger for StreamMessenger {
    fn output(&mut self) -> &mut dyn Write {
        &mut self.stream
    }

    fn input(&mut self) -> &mut dyn Read {
        &mut self.stream
    }

    fn drain(&mut self) -> Result<(), CommError> {
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0_u8; 256];
        let drained = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(CommError::Transport(e)),
            }
        };
        self.stream.set_nonblocking(false)?;
        drained
    }
}

// ── UDP ───────────────────────────────────────────────────────────────────────

/// Every write is one datagram; reads consume received datagrams in order.
pub struct DatagramMessenger {
    socket: UdpSocket,
    buf: Vec<u8>,
    pos: usize,
}

impl DatagramMessenger {
    pub fn connect(uri: &str, timeout: Duration) -> Result<Self, CommError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(uri)?;
        socket.set_read_timeout(Some(timeout))?;
        debug!(uri = %uri, "udp bound");
        Ok(Self {
            socket,
            buf: Vec::new(),
            pos: 0,
        })
    }
}

impl Read for DatagramMessenger {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() {
            self.buf.resize(MAX_DATAGRAM, 0);
            let n = self.socket.recv(&mut self.buf)?;
            self.buf.truncate(n);
            self.pos = 0;
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for DatagramMessenger {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Messenger for DatagramMessenger {
    fn output(&mut self) -> &mut dyn Write {
        self
    }

    fn input(&mut self) -> &mut dyn Read {
        self
    }

    fn drain(&mut self) -> Result<(), CommError> {
        self.buf.clear();
        self.pos = 0;
        self.socket.set_nonblocking(true)?;
        let mut scratch = [0_u8; MAX_DATAGRAM];
        let drained = loop {
            match self.socket.recv(&mut scratch) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(CommError::Transport(e)),
            }
        };
        self.socket.set_nonblocking(false)?;
        drained
    }
}
