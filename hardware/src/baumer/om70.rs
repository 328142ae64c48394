//! Baumer OM70-L laser distance sensor over Modbus TCP.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::modbus::{
    registers_to_f32_le_words, registers_to_u32_le_words, ModbusError, ModbusTcp,
    DEFAULT_PORT,
};
use crate::transport::{IpAddress, TcpTransport, Transport};

/// Modbus unit id of the sensor.
pub const UNIT_ID: u8 = 1;

/// Input register block "All Measurements" (manual p. 60).
pub const ALL_MEASUREMENTS_ADDR: u16 = 0x00C8;
pub const ALL_MEASUREMENTS_LEN: u16 = 17;

/// Errors from the OM70 driver.
#[derive(Error, Debug)]
pub enum Om70Error {
    #[error(transparent)]
    Modbus(#[from] ModbusError),

    #[error("OM70-L only supports port {DEFAULT_PORT}, got {0}")]
    InvalidPort(u16),
}

impl From<crate::transport::TransportError> for Om70Error {
    fn from(e: crate::transport::TransportError) -> Self {
        Om70Error::Modbus(e.into())
    }
}

/// Result type for OM70 operations.
pub type Om70Result<T> = Result<T, Om70Error>;

/// Signal quality reported with each measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalQuality {
    Good,
    Medium,
    Bad,
    Unknown(u16),
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalQuality::Good => write!(f, "Good"),
            SignalQuality::Medium => write!(f, "Medium"),
            SignalQuality::Bad => write!(f, "Bad"),
            SignalQuality::Unknown(raw) => write!(f, "Unknown({raw})"),
        }
    }
}

impl From<u16> for SignalQuality {
    fn from(raw: u16) -> Self {
        match raw {
            0 => SignalQuality::Good,
            1 => SignalQuality::Medium,
            2 => SignalQuality::Bad,
            other => SignalQuality::Unknown(other),
        }
    }
}

/// One decoded "All Measurements" block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub quality: SignalQuality,
    pub distance_mm: f32,
    pub sample_rate_hz: f32,
    /// Exposure reserve, arbitrary units
    pub exposure: f32,
    pub response_delay_ms: f64,
}

impl Measurement {
    /// Decode the 17 registers starting at [`ALL_MEASUREMENTS_ADDR`].
    ///
    /// Floats and integers span two registers with the low word first.
    pub fn from_registers(regs: &[u16]) -> Option<Self> {
        if regs.len() < usize::from(ALL_MEASUREMENTS_LEN) {
            return None;
        }
        let delay_s = registers_to_u32_le_words(regs[9], regs[10]);
        let delay_us = registers_to_u32_le_words(regs[11], regs[12]);
        Some(Self {
            quality: SignalQuality::from(regs[1]),
            distance_mm: registers_to_f32_le_words(regs[3], regs[4]),
            sample_rate_hz: registers_to_f32_le_words(regs[5], regs[6]),
            exposure: registers_to_f32_le_words(regs[7], regs[8]),
            response_delay_ms: f64::from(delay_s) * 1000.0 + f64::from(delay_us) / 1000.0,
        })
    }
}

/// Baumer OM70-L distance sensor.
pub struct Om70L<T: Transport> {
    client: ModbusTcp<T>,
}

impl Om70L<TcpTransport> {
    /// Connect to the sensor, which only listens on port 502.
    pub fn connect(addr: &IpAddress) -> Om70Result<Self> {
        if addr.port != DEFAULT_PORT {
            return Err(Om70Error::InvalidPort(addr.port));
        }
        let transport = TcpTransport::connect(addr)?;
        info!("Connected to OM70-L at {}", addr);
        Ok(Self::new(transport))
    }
}

impl<T: Transport> Om70L<T> {
    pub fn new(transport: T) -> Self {
        Self {
            client: ModbusTcp::new(transport, UNIT_ID),
        }
    }

    /// Read and decode the full measurement block.
    pub fn measurement(&mut self) -> Om70Result<Measurement> {
        let regs = self
            .client
            .read_input_registers(ALL_MEASUREMENTS_ADDR, ALL_MEASUREMENTS_LEN)?;
        let measurement = Measurement::from_registers(&regs).ok_or_else(|| {
            ModbusError::Protocol(format!("Expected {ALL_MEASUREMENTS_LEN} registers"))
        })?;
        debug!(
            "OM70 distance {:.3} mm, quality {}, rate {:.0} Hz",
            measurement.distance_mm, measurement.quality, measurement.sample_rate_hz
        );
        Ok(measurement)
    }

    /// Distance in mm.
    pub fn distance_mm(&mut self) -> Om70Result<f32> {
        Ok(self.measurement()?.distance_mm)
    }
}
