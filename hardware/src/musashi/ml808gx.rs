//! Musashi ML-808GX dispenser.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::frame::{self, number_after, A0, A2, ACK, CAN, ENQ, EOT, ETX};
use super::{DispenserError, DispenserResult};
use crate::transport::{SerialConfig, SerialTransport, Transport, DEFAULT_TIMEOUT};

/// Baud rates the controller can be configured for (manual p. 24).
pub const SUPPORTED_BAUD_RATES: [u32; 3] = [9600, 19200, 38400];

/// Highest channel (recipe) number.
pub const MAX_CHANNEL: u32 = 399;

/// Longest vacuum on/off interval in ms.
pub const MAX_VACUUM_INTERVAL_MS: u32 = 4000;

const PRESSURE_RANGE: std::ops::RangeInclusive<u32> = 200..=8000;
const DURATION_RANGE: std::ops::RangeInclusive<u32> = 10..=9999;
const DELAY_MAX: u32 = 99_999;

/// Dispense parameters of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// 20.0 - 800.0 kPa, 0.1 kPa resolution
    pub pressure_kpa: f64,
    /// 10 - 9999 ms
    pub duration_ms: f64,
    /// 0 - 9999.9 ms, 0.1 ms resolution
    pub on_delay_ms: f64,
    /// 0 - 9999.9 ms, 0.1 ms resolution
    pub off_delay_ms: f64,
}

impl fmt::Display for ChannelParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.1} kPa, {} ms, {:.1} ms, {:.1} ms)",
            self.pressure_kpa, self.duration_ms, self.on_delay_ms, self.off_delay_ms
        )
    }
}

/// Pressure in units of 0.1 kPa.
fn pressure_to_wire(kpa: f64) -> DispenserResult<u32> {
    let wire = (10.0 * kpa).round();
    if wire < 0.0 || !PRESSURE_RANGE.contains(&(wire as u32)) {
        return Err(DispenserError::InvalidArgument(format!(
            "Invalid pressure {kpa:.1} kPa (valid range: 20.0 - 800.0 kPa)"
        )));
    }
    Ok(wire as u32)
}

/// Duration in ms.
fn duration_to_wire(ms: f64) -> DispenserResult<u32> {
    let wire = ms.round();
    if wire < 0.0 || !DURATION_RANGE.contains(&(wire as u32)) {
        return Err(DispenserError::InvalidArgument(format!(
            "Invalid duration {ms} ms (valid range: 10 - 9999 ms)"
        )));
    }
    Ok(wire as u32)
}

/// Delay in units of 0.1 ms.
fn delay_to_wire(ms: f64) -> DispenserResult<u32> {
    let wire = (10.0 * ms).round();
    if !(0.0..=f64::from(DELAY_MAX)).contains(&wire) {
        return Err(DispenserError::InvalidArgument(format!(
            "Invalid delay {ms} ms (valid range: 0 - 9999.9 ms)"
        )));
    }
    Ok(wire as u32)
}

/// Check that a serial line suits the dispenser: 8N1 at 9600, 19200 or
/// 38400 baud.
pub fn check_serial(config: &SerialConfig) -> DispenserResult<()> {
    if !SUPPORTED_BAUD_RATES.contains(&config.baud) {
        return Err(DispenserError::InvalidLinkSettings(format!(
            "Baud {} is not supported by ML-808GX",
            config.baud
        )));
    }
    if !config.is_8n1() {
        return Err(DispenserError::InvalidLinkSettings(format!(
            "Invalid serial format {config} (8N1 required)"
        )));
    }
    Ok(())
}

/// Musashi ML-808GX pneumatic dispenser on an RS-232 line.
///
/// Parameters are stored per channel; setters and getters act on the
/// currently selected channel.
pub struct Ml808gx<T: Transport> {
    transport: T,
    channel: u32,
    timeout: Duration,
}

impl Ml808gx<SerialTransport> {
    /// Open the serial line and read the active channel.
    pub fn connect(config: &SerialConfig) -> DispenserResult<Self> {
        check_serial(config)?;
        Self::new(SerialTransport::open(config)?)
    }
}

impl<T: Transport> Ml808gx<T> {
    pub fn new(transport: T) -> DispenserResult<Self> {
        let mut dispenser = Self {
            transport,
            channel: 0,
            timeout: DEFAULT_TIMEOUT,
        };
        let channel = dispenser.channel()?;
        info!(
            "Connected to ML-808GX via {}, channel {}",
            dispenser.transport.info(),
            channel
        );
        Ok(dispenser)
    }

    /// Channel selected by the last `select_channel` or `channel` call.
    pub fn current_channel(&self) -> u32 {
        self.channel
    }

    // ==================== Operations ====================

    /// Dispense once with the current channel's parameters.
    pub fn dispense(&mut self) -> DispenserResult<()> {
        debug!("Dispensing");
        self.download("DI  ", "")
    }

    pub fn select_channel(&mut self, channel: u32) -> DispenserResult<()> {
        if channel > MAX_CHANNEL {
            return Err(DispenserError::InvalidArgument(format!(
                "Invalid channel {channel} (allowed 0 - {MAX_CHANNEL})"
            )));
        }
        debug!("Switching channel to {}", channel);
        self.download("CH  ", &format!("{channel:03}"))?;
        self.channel = channel;
        Ok(())
    }

    /// Read the active channel from the device.
    pub fn channel(&mut self) -> DispenserResult<u32> {
        let body = self.upload("UA   ")?;
        let start = body
            .find("D0")
            .map(|pos| pos + 2)
            .ok_or_else(|| DispenserError::ParseError(format!("No channel in '{body}'")))?;
        let digits = body.get(start..start + 3).unwrap_or_default();
        self.channel = digits.parse().map_err(|_| {
            DispenserError::ParseError(format!("Invalid channel number in '{body}'"))
        })?;
        Ok(self.channel)
    }

    pub fn set_channel_params(&mut self, params: &ChannelParams) -> DispenserResult<()> {
        let pressure = pressure_to_wire(params.pressure_kpa)?;
        let duration = duration_to_wire(params.duration_ms)?;
        let on_delay = delay_to_wire(params.on_delay_ms)?;
        let off_delay = delay_to_wire(params.off_delay_ms)?;
        debug!("Setting parameters of ch {} to {}", self.channel, params);
        self.download(
            "SC  ",
            &format!(
                "CH{:03}P{pressure:04}T{duration:04}OD{on_delay:05}OF{off_delay:05}",
                self.channel
            ),
        )
    }

    pub fn channel_params(&mut self) -> DispenserResult<ChannelParams> {
        debug!("Reading parameters of ch {}", self.channel);
        let body = self.upload(&format!("GC{:03}", self.channel))?;
        let params = ChannelParams {
            pressure_kpa: 0.1 * f64::from(number_after(&body, "P")?),
            duration_ms: f64::from(number_after(&body, "T")?),
            on_delay_ms: 0.1 * f64::from(number_after(&body, "OD")?),
            off_delay_ms: 0.1 * f64::from(number_after(&body, "OF")?),
        };
        debug!("ch {} parameters: {}", self.channel, params);
        Ok(params)
    }

    pub fn set_pressure(&mut self, kpa: f64) -> DispenserResult<()> {
        let pressure = pressure_to_wire(kpa)?;
        debug!("Setting pressure of ch {} to {} x 100 Pa", self.channel, pressure);
        self.download("PH  ", &format!("CH{:03}P{pressure:04}", self.channel))
    }

    pub fn pressure(&mut self) -> DispenserResult<f64> {
        Ok(self.channel_params()?.pressure_kpa)
    }

    pub fn set_duration(&mut self, ms: f64) -> DispenserResult<()> {
        let duration = duration_to_wire(ms)?;
        self.download("DH  ", &format!("CH{:03}T{duration:04}", self.channel))
    }

    pub fn duration(&mut self) -> DispenserResult<f64> {
        Ok(self.channel_params()?.duration_ms)
    }

    pub fn set_delays(&mut self, on_ms: f64, off_ms: f64) -> DispenserResult<()> {
        let on_delay = delay_to_wire(on_ms)?;
        let off_delay = delay_to_wire(off_ms)?;
        self.download(
            "DD  ",
            &format!("CH{:03}N{on_delay:05}F{off_delay:05}", self.channel),
        )
    }

    /// On and off delay in ms.
    pub fn delays(&mut self) -> DispenserResult<(f64, f64)> {
        let params = self.channel_params()?;
        Ok((params.on_delay_ms, params.off_delay_ms))
    }

    /// Dispense for as long as the foot switch is held.
    pub fn manual_mode(&mut self) -> DispenserResult<()> {
        self.download("MT  ", "")
    }

    /// Dispense for the channel's duration on each trigger.
    pub fn timed_mode(&mut self) -> DispenserResult<()> {
        self.download("TT  ", "")
    }

    pub fn enable_vacuum(&mut self, enable: bool) -> DispenserResult<()> {
        self.download("VO  ", if enable { "1" } else { "0" })
    }

    pub fn set_vacuum_interval(&mut self, on_ms: u32, off_ms: u32) -> DispenserResult<()> {
        if on_ms > MAX_VACUUM_INTERVAL_MS || off_ms > MAX_VACUUM_INTERVAL_MS {
            return Err(DispenserError::InvalidArgument(format!(
                "Vacuum interval {on_ms}/{off_ms} ms out of range (max {MAX_VACUUM_INTERVAL_MS} ms)"
            )));
        }
        self.download("VI  ", &format!("V{on_ms:04}I{off_ms:04}"))
    }

    // ==================== Transfer ====================

    fn enquire(&mut self) -> DispenserResult<()> {
        self.transport.write_all(&[ENQ])?;
        let reply = self.transport.read_exact(1, self.timeout)?;
        if reply[0] != ACK {
            return Err(DispenserError::Protocol(format!(
                "Did not receive ACK (got 0x{:02X})",
                reply[0]
            )));
        }
        Ok(())
    }

    fn read_frame(&mut self) -> DispenserResult<Vec<u8>> {
        let mut frame = self.transport.read_until(&[ETX], self.timeout)?;
        if let Some(pos) = frame.iter().position(|&b| b == ETX) {
            frame.truncate(pos + 1);
        }
        trace!("ML-808GX recv: {:?}", String::from_utf8_lossy(&frame));
        Ok(frame)
    }

    fn check_reply(&mut self, reply: &[u8], command: &str) -> DispenserResult<()> {
        if reply == A0 {
            return Ok(());
        }
        if reply == A2 {
            self.transport.write_all(CAN)?;
            return Err(DispenserError::Rejected(command.trim_end().to_string()));
        }
        Err(DispenserError::Protocol(format!(
            "Unexpected reply {:?} to '{}'",
            String::from_utf8_lossy(reply),
            command.trim_end()
        )))
    }

    /// Send data host -> device (manual p. 56).
    fn download(&mut self, cmd: &str, data: &str) -> DispenserResult<()> {
        let request = frame::encode_command(cmd, data)?;
        self.enquire()?;
        trace!("ML-808GX send: {:?}", String::from_utf8_lossy(&request));
        self.transport.write_all(&request)?;
        let reply = self.read_frame()?;
        self.check_reply(&reply, cmd)?;
        self.transport.write_all(&[EOT])?;
        Ok(())
    }

    /// Query data device -> host (manual p. 57) and return the payload body.
    fn upload(&mut self, cmd: &str) -> DispenserResult<String> {
        let request = frame::encode_command(cmd, "")?;
        self.enquire()?;
        trace!("ML-808GX send: {:?}", String::from_utf8_lossy(&request));
        self.transport.write_all(&request)?;
        let reply = self.read_frame()?;
        self.check_reply(&reply, cmd)?;

        self.transport.write_all(&[ACK])?;
        let payload = self.read_frame()?;
        self.transport.write_all(&[EOT])?;
        frame::decode(&payload)
    }
}
