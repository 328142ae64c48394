//! Baumer sensors.
//!
//! Currently the OM70-L laser distance sensor, read over Modbus TCP.

mod om70;

pub use om70::{
    Measurement, Om70Error, Om70L, Om70Result, SignalQuality, ALL_MEASUREMENTS_ADDR,
    ALL_MEASUREMENTS_LEN, UNIT_ID,
};
