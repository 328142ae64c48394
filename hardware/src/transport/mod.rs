//! Byte-level links to bench instruments.
//!
//! Every driver in this crate talks to its device through the [`Transport`]
//! trait, which only knows how to push bytes out and pull whatever bytes are
//! available back in. Two implementations cover the bench:
//!
//! - [`TcpTransport`] for Ethernet devices (XENAX axis, OM70 sensor)
//! - [`SerialTransport`] for RS-232 devices (ML-808GX dispenser, XENAX over COM)
//!
//! Framing (prompt characters, STX/ETX, Modbus headers) belongs to the
//! protocol modules, not here.
//!
//! # Example
//!
//! ```no_run
//! use hardware::transport::{IpAddress, TcpTransport, Transport};
//! use std::time::Duration;
//!
//! let addr: IpAddress = "192.168.2.100:10001".parse()?;
//! let mut link = TcpTransport::connect(&addr)?;
//! link.write_str("TP\n")?;
//! let reply = link.read_until(b">", Duration::from_secs(1))?;
//! println!("{}", String::from_utf8_lossy(&reply));
//! # Ok::<(), hardware::transport::TransportError>(())
//! ```

mod serial;
mod tcp;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

pub use serial::{Parity, SerialConfig, SerialTransport};
pub use tcp::{IpAddress, TcpTransport};

/// Default timeout for a single read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Size of the scratch buffer used by the provided read helpers.
const READ_CHUNK: usize = 1024;

/// Errors raised by a link before any protocol is involved.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Low-level I/O error (socket or tty read/write failure).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not open the socket or serial device.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// No data arrived within the read timeout.
    #[error("Timeout waiting for data")]
    Timeout,

    /// Link settings are not usable (bad baud rate, address, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional byte link to an instrument.
///
/// Implementors provide raw writes and single reads; the line/frame helpers
/// are built on top of those two.
pub trait Transport: Send {
    /// Write the whole buffer to the device.
    fn write_all(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Perform one read of whatever is available, waiting at most `timeout`.
    ///
    /// Returns the number of bytes placed in `buf` (always > 0), or
    /// [`TransportError::Timeout`] if nothing arrived.
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<usize>;

    /// Link description, e.g. `tcpip;192.168.2.100;10001`.
    fn info(&self) -> String;

    /// Write an ASCII/Latin-1 string.
    fn write_str(&mut self, msg: &str) -> TransportResult<()> {
        trace!("{} send: {:?}", self.info(), msg);
        self.write_all(msg.as_bytes())
    }

    /// Read until `delim` shows up in the received data.
    ///
    /// Returns everything read, which may extend past the delimiter if the
    /// device sent more in the same chunk. `timeout` applies to each
    /// individual read, so a slowly trickling device does not time out.
    fn read_until(&mut self, delim: &[u8], timeout: Duration) -> TransportResult<Vec<u8>> {
        let mut received = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        while find_subslice(&received, delim).is_none() {
            let n = self.read_some(&mut chunk, timeout)?;
            received.extend_from_slice(&chunk[..n]);
        }
        trace!("{} recv: {:?}", self.info(), String::from_utf8_lossy(&received));
        Ok(received)
    }

    /// Read exactly `len` bytes.
    fn read_exact(&mut self, len: usize, timeout: Duration) -> TransportResult<Vec<u8>> {
        let mut received = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            filled += self.read_some(&mut received[filled..], timeout)?;
        }
        Ok(received)
    }

    /// Discard pending input until a read times out.
    ///
    /// Returns the number of bytes thrown away.
    fn drain(&mut self, timeout: Duration) -> TransportResult<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut discarded = 0;
        loop {
            match self.read_some(&mut chunk, timeout) {
                Ok(n) => discarded += n,
                Err(TransportError::Timeout) => return Ok(discarded),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        (**self).write_all(data)
    }

    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<usize> {
        (**self).read_some(buf, timeout)
    }

    fn info(&self) -> String {
        (**self).info()
    }
}

/// Position of `needle` in `haystack`, if present.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Where a device is attached: either an IP endpoint or a serial line.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Tcp(IpAddress),
    Serial(SerialConfig),
}

impl Link {
    /// Open the link, boxing whichever transport it resolves to.
    pub fn open(&self) -> TransportResult<Box<dyn Transport>> {
        Ok(match self {
            Link::Tcp(addr) => Box::new(TcpTransport::connect(addr)?),
            Link::Serial(config) => Box::new(SerialTransport::open(config)?),
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Tcp(addr) => write!(f, "tcp://{addr}"),
            Link::Serial(config) => write!(f, "serial://{}@{}", config.path, config.baud),
        }
    }
}

impl FromStr for Link {
    type Err = TransportError;

    /// Accepts `host:port` for TCP or `/dev/...[@baud]` for a serial line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('/') || s.to_ascii_uppercase().starts_with("COM") {
            let (path, baud) = match s.split_once('@') {
                Some((path, baud)) => {
                    let baud = baud.parse().map_err(|_| {
                        TransportError::InvalidConfig(format!("Invalid baud rate: {baud}"))
                    })?;
                    (path, baud)
                }
                None => (s, 115_200),
            };
            Ok(Link::Serial(SerialConfig::new(path, baud)))
        } else {
            Ok(Link::Tcp(s.parse()?))
        }
    }
}
