//! Musashi Engineering ML-808GX dispenser driver.
//!
//! The ML-808GX is a pneumatic fluid dispenser with 400 parameter channels.
//! It talks a framed STX/ETX protocol over RS-232 (8N1, 9600/19200/38400
//! baud). Host-to-device commands are "downloads", device-to-host queries are
//! "uploads"; both start with an ENQ/ACK handshake and end with EOT.
//!
//! # Example
//!
//! ```no_run
//! use hardware::musashi::Ml808gx;
//! use hardware::transport::SerialConfig;
//!
//! let mut dispenser = Ml808gx::connect(&SerialConfig::new("/dev/ttyUSB0", 38400))?;
//! dispenser.select_channel(1)?;
//! dispenser.timed_mode()?;
//! println!("{}", dispenser.channel_params()?);
//! dispenser.dispense()?;
//! # Ok::<(), hardware::musashi::DispenserError>(())
//! ```

pub mod frame;
mod ml808gx;

use thiserror::Error;

use crate::transport::TransportError;

pub use ml808gx::{
    check_serial, ChannelParams, Ml808gx, MAX_CHANNEL, MAX_VACUUM_INTERVAL_MS,
    SUPPORTED_BAUD_RATES,
};

/// Errors from the dispenser driver.
#[derive(Error, Debug)]
pub enum DispenserError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Handshake or frame did not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device answered `A2` to a command.
    #[error("Command '{0}' rejected by dispenser (A2)")]
    Rejected(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid link settings: {0}")]
    InvalidLinkSettings(String),
}

/// Result type for dispenser operations.
pub type DispenserResult<T> = Result<T, DispenserError>;
