//! RS-232 transport on top of the `serialport` crate.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};
use tracing::debug;

use super::{Transport, TransportError, TransportResult, DEFAULT_TIMEOUT};

/// Baud rates accepted by the POSIX termios layer.
const STANDARD_BAUD_RATES: [u32; 18] = [
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115_200, 230_400,
];

/// Parity setting of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    #[strum(serialize = "N")]
    None,
    #[strum(serialize = "O")]
    Odd,
    #[strum(serialize = "E")]
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device file, e.g. `/dev/ttyUSB0`
    pub path: String,
    pub baud: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl SerialConfig {
    /// 8N1 line at the given baud rate.
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }

    /// True for the common 8 data bits, no parity, 1 stop bit format.
    pub fn is_8n1(&self) -> bool {
        self.data_bits == 8 && self.parity == Parity::None && self.stop_bits == 1
    }

    /// Check that the settings can be applied to a tty.
    pub fn validate(&self) -> TransportResult<()> {
        if !STANDARD_BAUD_RATES.contains(&self.baud) {
            return Err(TransportError::InvalidConfig(format!(
                "Baud rate {} is not supported",
                self.baud
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::InvalidConfig(format!(
                "{}-bit format is not supported",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(TransportError::InvalidConfig(format!(
                "{} stop bits are not supported",
                self.stop_bits
            )));
        }
        Ok(())
    }

    fn serialport_data_bits(&self) -> DataBits {
        match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    fn serialport_stop_bits(&self) -> StopBits {
        if self.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        }
    }
}

impl std::fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}{}{}",
            self.path, self.baud, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// An open serial line.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    config: SerialConfig,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open and configure the serial device, discarding any stale buffered data.
    pub fn open(config: &SerialConfig) -> TransportResult<Self> {
        config.validate()?;

        let port = serialport::new(&config.path, config.baud)
            .data_bits(config.serialport_data_bits())
            .parity(config.parity.into())
            .stop_bits(config.serialport_stop_bits())
            .flow_control(serialport::FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to open {}: {e}", config.path))
            })?;

        port.clear(ClearBuffer::All)
            .map_err(|e| TransportError::Io(e.into()))?;

        debug!("Opened serial port {}", config);

        Ok(Self {
            port,
            config: config.clone(),
            read_timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Settings this port was opened with.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<usize> {
        if self.read_timeout != timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| TransportError::Io(e.into()))?;
            self.read_timeout = timeout;
        }

        match self.port.read(buf) {
            Ok(0) => Err(TransportError::Timeout),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn info(&self) -> String {
        format!("serial;{};{}", self.config.path, self.config.baud)
    }
}
