//! Device interfaces for bench sequences.
//!
//! Sequences are written against these traits instead of concrete drivers so
//! they can run against fakes in tests.

use std::time::Duration;

use thiserror::Error;

use crate::baumer::{Om70Error, Om70L};
use crate::musashi::{ChannelParams, DispenserError, Ml808gx};
use crate::transport::Transport;
use crate::xenax::{XenaxError, XenaxXvi};

/// Error from any bench device.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Axis: {0}")]
    Axis(#[from] XenaxError),

    #[error("Distance sensor: {0}")]
    Sensor(#[from] Om70Error),

    #[error("Dispenser: {0}")]
    Dispenser(#[from] DispenserError),

    /// Failure of a device without a dedicated error type.
    ///
    /// The drivers in this crate never return it. It is for `LinearAxis`,
    /// `DistanceSensor` and `Dispenser` implementations living elsewhere,
    /// such as simulators or other vendors' hardware.
    #[error("Device error: {0}")]
    Device(String),
}

/// Result type for bench device operations.
pub type BenchResult<T> = Result<T, BenchError>;

/// Motorized linear axis
///
/// Positions are in encoder increments, speeds in increments per second.
pub trait LinearAxis {
    fn power_on(&mut self) -> BenchResult<()>;

    fn power_off(&mut self) -> BenchResult<()>;

    fn is_referenced(&mut self) -> BenchResult<bool>;

    /// Reference the axis and block until done.
    fn reference(&mut self, interval: Duration, timeout: Duration) -> BenchResult<()>;

    fn set_speed(&mut self, inc_per_sec: u32) -> BenchResult<()>;

    /// Move and block until the axis has settled at `position`.
    fn goto_position(
        &mut self,
        position: i32,
        interval: Duration,
        timeout: Duration,
    ) -> BenchResult<()>;

    /// Start a move and return immediately.
    fn move_position(&mut self, position: i32) -> BenchResult<()>;

    fn position(&mut self) -> BenchResult<i32>;

    fn in_position(&mut self) -> BenchResult<bool>;

    /// Motor current in mA
    fn motor_current(&mut self) -> BenchResult<i32>;
}

/// Distance sensor reporting millimeters.
pub trait DistanceSensor {
    fn distance_mm(&mut self) -> BenchResult<f32>;
}

/// Channel-based fluid dispenser.
pub trait Dispenser {
    fn select_channel(&mut self, channel: u32) -> BenchResult<()>;

    /// Dispense for a fixed time on each trigger.
    fn timed_mode(&mut self) -> BenchResult<()>;

    fn channel_params(&mut self) -> BenchResult<ChannelParams>;

    fn dispense(&mut self) -> BenchResult<()>;
}

impl<T: Transport> LinearAxis for XenaxXvi<T> {
    fn power_on(&mut self) -> BenchResult<()> {
        Ok(XenaxXvi::power_on(self)?)
    }

    fn power_off(&mut self) -> BenchResult<()> {
        Ok(XenaxXvi::power_off(self)?)
    }

    fn is_referenced(&mut self) -> BenchResult<bool> {
        Ok(XenaxXvi::is_referenced(self)?)
    }

    fn reference(&mut self, interval: Duration, timeout: Duration) -> BenchResult<()> {
        Ok(self.reference_axis_wait(interval, timeout)?)
    }

    fn set_speed(&mut self, inc_per_sec: u32) -> BenchResult<()> {
        Ok(XenaxXvi::set_speed(self, inc_per_sec)?)
    }

    fn goto_position(
        &mut self,
        position: i32,
        interval: Duration,
        timeout: Duration,
    ) -> BenchResult<()> {
        Ok(XenaxXvi::goto_position(self, position, interval, timeout)?)
    }

    fn move_position(&mut self, position: i32) -> BenchResult<()> {
        Ok(XenaxXvi::move_position(self, position)?)
    }

    fn position(&mut self) -> BenchResult<i32> {
        Ok(XenaxXvi::position(self)?)
    }

    fn in_position(&mut self) -> BenchResult<bool> {
        Ok(XenaxXvi::in_position(self)?)
    }

    fn motor_current(&mut self) -> BenchResult<i32> {
        Ok(XenaxXvi::motor_current(self)?)
    }
}

impl<T: Transport> DistanceSensor for Om70L<T> {
    fn distance_mm(&mut self) -> BenchResult<f32> {
        Ok(Om70L::distance_mm(self)?)
    }
}

impl<T: Transport> Dispenser for Ml808gx<T> {
    fn select_channel(&mut self, channel: u32) -> BenchResult<()> {
        Ok(Ml808gx::select_channel(self, channel)?)
    }

    fn timed_mode(&mut self) -> BenchResult<()> {
        Ok(Ml808gx::timed_mode(self)?)
    }

    fn channel_params(&mut self) -> BenchResult<ChannelParams> {
        Ok(Ml808gx::channel_params(self)?)
    }

    fn dispense(&mut self) -> BenchResult<()> {
        Ok(Ml808gx::dispense(self)?)
    }
}
