//! Hardware drivers for lab bench equipment.
//!
//! This crate provides drivers for the devices on the dispensing bench and
//! the sequence that runs them together. Each driver is feature-gated for
//! optional compilation.
//!
//! # Features
//!
//! ## Individual Drivers
//! - `xenax` - Jenny Science XENAX Xvi linear axis controller (TCP or RS-232)
//! - `om70` - Baumer OM70-L laser distance sensor (Modbus TCP)
//! - `ml808gx` - Musashi ML-808GX fluid dispenser (RS-232)
//!
//! ## Convenience Features
//! - `bench` - All three drivers plus the device traits and the dispense scan
//!   sequence (default)

pub mod config;
pub mod transport;

#[cfg(feature = "om70")]
pub mod modbus;

#[cfg(feature = "om70")]
pub mod baumer;

#[cfg(feature = "xenax")]
pub mod xenax;

#[cfg(feature = "ml808gx")]
pub mod musashi;

#[cfg(feature = "bench")]
pub mod bench;

#[cfg(feature = "bench")]
pub mod sequence;
