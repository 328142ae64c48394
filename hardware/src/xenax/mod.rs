//! Jenny Science XENAX Xvi servo controller driver.
//!
//! The XENAX drives LINAX/ELAX linear axes and is reachable over Ethernet
//! (TCP port 10001) or RS-232 (115200 baud 8N1) with the same ASCII command
//! set.
//!
//! - [`XenaxLink`] handles the echo/payload/prompt framing and refusal codes
//! - [`XenaxXvi`] exposes motion, force, PLC I/O and status operations
//! - [`ProcessStatus`] decodes the process status register
//!
//! # Example
//!
//! ```no_run
//! use hardware::transport::IpAddress;
//! use hardware::xenax::XenaxXvi;
//!
//! let mut axis = XenaxXvi::connect_tcp(&IpAddress::new("192.168.2.100", 10001))?;
//! axis.power_on()?;
//! axis.move_position(140_000)?;
//! while !axis.in_position()? {
//!     println!("{} inc, {} mA", axis.position()?, axis.motor_current()?);
//! }
//! axis.power_off()?;
//! # Ok::<(), hardware::xenax::XenaxError>(())
//! ```

mod axis;
mod link;
mod status;

pub use axis::{
    check_link, OutputType, XenaxXvi, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT,
};
pub use link::{
    refusal_reason, XenaxError, XenaxLink, XenaxResult, BAUD_RATE, DEFAULT_PORT, PROMPT,
    QUERY_TIMEOUT, REFUSED_IN_MOTION,
};
pub use status::ProcessStatus;
