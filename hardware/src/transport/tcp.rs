//! TCP/IP transport.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Transport, TransportError, TransportResult, DEFAULT_TIMEOUT};

/// IP endpoint of a networked instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpAddress {
    pub host: String,
    pub port: u16,
}

impl IpAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for IpAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidConfig(format!("Missing port in '{s}'")))?;
        if host.is_empty() {
            return Err(TransportError::InvalidConfig(format!(
                "Missing host in '{s}'"
            )));
        }
        let port = port
            .parse()
            .map_err(|_| TransportError::InvalidConfig(format!("Invalid port in '{s}'")))?;
        Ok(Self::new(host, port))
    }
}

/// Blocking TCP connection to an instrument.
///
/// Nagle is disabled since all bench protocols are short request/response
/// exchanges.
pub struct TcpTransport {
    stream: TcpStream,
    addr: IpAddress,
    read_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Connect to `addr` with the default 2 s timeout.
    pub fn connect(addr: &IpAddress) -> TransportResult<Self> {
        Self::connect_timeout(addr, DEFAULT_TIMEOUT)
    }

    /// Connect to `addr`, giving up after `timeout`.
    pub fn connect_timeout(addr: &IpAddress, timeout: Duration) -> TransportResult<Self> {
        let socket_addr = (addr.host.as_str(), addr.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionFailed(format!("Cannot resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::ConnectionFailed(format!("No address for {addr}")))?;

        let stream = TcpStream::connect_timeout(&socket_addr, timeout)
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to connect to {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;

        debug!("Connected to {}", addr);

        Ok(Self {
            stream,
            addr: addr.clone(),
            read_timeout: None,
        })
    }

    /// Endpoint this transport is connected to.
    pub fn address(&self) -> &IpAddress {
        &self.addr
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<usize> {
        // A zero duration would be rejected by set_read_timeout
        let timeout = timeout.max(Duration::from_millis(1));
        if self.read_timeout != Some(timeout) {
            self.stream.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }

        match self.stream.read(buf) {
            Ok(0) => Err(TransportError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn info(&self) -> String {
        format!("tcpip;{};{}", self.addr.host, self.addr.port)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_ip_address_parse_and_display() {
        let addr: IpAddress = "192.168.2.250:502".parse().unwrap();
        assert_eq!(addr.host, "192.168.2.250");
        assert_eq!(addr.port, 502);
        assert_eq!(addr.to_string(), "192.168.2.250:502");
    }

    #[test]
    fn test_ip_address_parse_errors() {
        assert!("192.168.2.250".parse::<IpAddress>().is_err());
        assert!(":502".parse::<IpAddress>().is_err());
        assert!("host:99999".parse::<IpAddress>().is_err());
    }

    #[test]
    fn test_loopback_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"TP\n");
            socket.write_all(b"TP\r\n1000\r\n>").unwrap();
        });

        let addr = IpAddress::new("127.0.0.1", port);
        let mut link = TcpTransport::connect(&addr).unwrap();
        assert_eq!(link.info(), format!("tcpip;127.0.0.1;{port}"));

        link.write_str("TP\n").unwrap();
        let reply = link.read_until(b">", Duration::from_secs(2)).unwrap();
        assert_eq!(reply, b"TP\r\n1000\r\n>");

        server.join().unwrap();
    }

    #[test]
    fn test_read_timeout_maps_to_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(200));
            drop(socket);
        });

        let mut link = TcpTransport::connect(&IpAddress::new("127.0.0.1", port)).unwrap();
        let err = link
            .read_some(&mut [0u8; 4], Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));

        server.join().unwrap();
    }
}
