//! High-level XENAX Xvi axis control.

use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::link::{XenaxError, XenaxLink, XenaxResult, BAUD_RATE, DEFAULT_PORT, REFUSED_IN_MOTION};
use super::status::ProcessStatus;
use crate::transport::{IpAddress, Link, TcpTransport, Transport};

/// Default poll interval while waiting on status bits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time limit while waiting on status bits.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const FORCE_CALIBRATION_START_INTERVAL: Duration = Duration::from_millis(200);
const MOVE_SETTLE_TIME: Duration = Duration::from_millis(100);
const RESET_MOTOR_TIMEOUT: Duration = Duration::from_secs(10);

const DEVICE_NAME: &str = "XENAX Xvi";
const MAX_SERVO_ID_LEN: usize = 16;
const NUM_OUTPUTS: u32 = 8;
const NUM_INPUTS: u32 = 16;
const MAX_CARD_IDENTIFIER: u32 = 4;

/// Power-up value of the output type register: every output is a source.
const DEFAULT_OUTPUT_TYPE: u16 = 0x5555;
/// Power-up value of the output activity register: every output active high.
const DEFAULT_OUTPUT_ACTIVITY: u8 = 0xFF;

/// Electrical type of a PLC output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OutputType {
    Sink = 0b00,
    Source = 0b01,
    SinkSource = 0b10,
}

/// Jenny Science XENAX Xvi servo controller.
///
/// Positions are in encoder increments (1 inc = 1 µm on linear LINAX axes),
/// speeds in inc/s and accelerations in inc/s².
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use hardware::transport::IpAddress;
/// use hardware::xenax::{XenaxXvi, DEFAULT_POLL_INTERVAL};
///
/// let mut axis = XenaxXvi::connect_tcp(&IpAddress::new("192.168.2.100", 10001))?;
/// axis.power_on()?;
/// if !axis.is_referenced()? {
///     axis.reference_axis_wait(DEFAULT_POLL_INTERVAL, Duration::from_secs(30))?;
/// }
/// axis.set_speed(25_000)?;
/// axis.goto_position(170_000, DEFAULT_POLL_INTERVAL, Duration::from_secs(10))?;
/// println!("at {} inc", axis.position()?);
/// # Ok::<(), hardware::xenax::XenaxError>(())
/// ```
pub struct XenaxXvi<T: Transport> {
    link: XenaxLink<T>,
    name: String,
    /// N/mA
    force_constant: f64,
    output_type: u16,
    output_activity: u8,
    error_pending: bool,
    stop_on_drop: bool,
}

/// Check that a link matches what the controller accepts.
///
/// TCP must use port 10001; a serial line must run at 115200 baud 8N1.
pub fn check_link(link: &Link) -> XenaxResult<()> {
    match link {
        Link::Tcp(addr) if addr.port != DEFAULT_PORT => Err(XenaxError::InvalidLinkSettings(
            format!("Invalid port {} (port {DEFAULT_PORT} required)", addr.port),
        )),
        Link::Serial(config) if config.baud != BAUD_RATE || !config.is_8n1() => {
            Err(XenaxError::InvalidLinkSettings(format!(
                "Invalid serial setup {config}; {BAUD_RATE} 8N1 required"
            )))
        }
        _ => Ok(()),
    }
}

impl XenaxXvi<TcpTransport> {
    /// Connect over Ethernet.
    pub fn connect_tcp(addr: &IpAddress) -> XenaxResult<Self> {
        check_link(&Link::Tcp(addr.clone()))?;
        Self::new(TcpTransport::connect(addr)?)
    }
}

impl XenaxXvi<Box<dyn Transport>> {
    /// Connect over whichever link is given.
    pub fn connect(link: &Link) -> XenaxResult<Self> {
        check_link(link)?;
        info!("Connecting to XENAX at {}", link);
        Self::new(link.open()?)
    }
}

impl<T: Transport> XenaxXvi<T> {
    /// Wrap an open transport and initialize the controller.
    ///
    /// Flushes stale input, disables asynchronous events, reads the force
    /// constant and the servo id.
    pub fn new(transport: T) -> XenaxResult<Self> {
        let mut axis = Self {
            link: XenaxLink::new(transport),
            name: DEVICE_NAME.to_string(),
            force_constant: 0.0,
            output_type: DEFAULT_OUTPUT_TYPE,
            output_activity: DEFAULT_OUTPUT_ACTIVITY,
            error_pending: false,
            stop_on_drop: true,
        };
        axis.init()?;
        Ok(axis)
    }

    fn init(&mut self) -> XenaxResult<()> {
        self.link.flush()?;
        self.link.query("EVT0")?;
        self.force_constant()?;
        let servo_id = self.servo_id()?;
        if !servo_id.is_empty() {
            self.name = format!("{DEVICE_NAME},{servo_id}");
        }
        info!("Connected to {} via {}", self.name, self.link.info());
        Ok(())
    }

    /// Device name, including the servo id if one is set.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a raw command and return its payload.
    pub fn raw_query(&mut self, cmd: &str) -> XenaxResult<String> {
        self.link.query(cmd)
    }

    fn command(&mut self, cmd: &str) -> XenaxResult<()> {
        debug!("XENAX command: {}", cmd);
        self.link.query(cmd).map(|_| ())
    }

    fn query_value<V: FromStr>(&mut self, cmd: &str) -> XenaxResult<V> {
        let payload = self.link.query(cmd)?;
        payload.trim().parse().map_err(|_| {
            XenaxError::ParseError(format!("Unexpected response '{payload}' to '{cmd}'"))
        })
    }

    // ==================== Power ====================

    pub fn power_on(&mut self) -> XenaxResult<()> {
        self.command("PW")
    }

    pub fn power_off(&mut self) -> XenaxResult<()> {
        self.command("PQ")
    }

    /// Resume after a fault without re-phasing.
    pub fn power_continue(&mut self) -> XenaxResult<()> {
        self.command("PWC")
    }

    // ==================== Referencing ====================

    /// Start referencing (non-blocking).
    pub fn reference_axis(&mut self) -> XenaxResult<()> {
        info!("Referencing axis");
        self.command("REF")
    }

    /// Reference and wait until the axis is referenced and at rest.
    pub fn reference_axis_wait(&mut self, interval: Duration, timeout: Duration) -> XenaxResult<()> {
        self.reference_axis()?;
        thread::sleep(MOVE_SETTLE_TIME);
        self.wait_status_set(ProcessStatus::REF | ProcessStatus::IN_POSITION, interval, timeout)?;
        self.wait_status_clear(ProcessStatus::IN_MOTION, interval, timeout)
    }

    pub fn is_referenced(&mut self) -> XenaxResult<bool> {
        Ok(self.status_register()?.contains(ProcessStatus::REF))
    }

    /// True once a gantry pair has finished its initialization.
    pub fn gantry_init(&mut self) -> XenaxResult<bool> {
        Ok(self.status_register()?.contains(ProcessStatus::END_OF_GANTRY_INIT))
    }

    pub fn set_reference_direction(&mut self, direction: u32) -> XenaxResult<()> {
        debug!("Changing reference direction to {}", direction);
        self.command(&format!("DRHR{direction}"))
    }

    pub fn reference_direction(&mut self) -> XenaxResult<u32> {
        self.query_value("DRHR?")
    }

    // ==================== Motion ====================

    /// Start a move to an absolute position and return immediately.
    pub fn move_position(&mut self, position: i32) -> XenaxResult<()> {
        self.command(&format!("G{position}"))
    }

    /// Move to an absolute position and block until the axis has settled.
    pub fn goto_position(
        &mut self,
        position: i32,
        interval: Duration,
        timeout: Duration,
    ) -> XenaxResult<()> {
        self.move_position(position)?;
        // IN_POSITION still reflects the previous target right after G
        thread::sleep(MOVE_SETTLE_TIME);
        self.wait_status_set(ProcessStatus::IN_POSITION, interval, timeout)?;
        self.wait_status_clear(ProcessStatus::IN_MOTION, interval, timeout)
    }

    /// Current position in increments.
    pub fn position(&mut self) -> XenaxResult<i32> {
        self.query_value("TP")
    }

    pub fn in_motion(&mut self) -> XenaxResult<bool> {
        match self.status_register() {
            Ok(status) => Ok(status.contains(ProcessStatus::IN_MOTION)),
            Err(e) if e.refusal_code() == Some(REFUSED_IN_MOTION) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub fn in_position(&mut self) -> XenaxResult<bool> {
        match self.status_register() {
            Ok(status) => Ok(status.contains(ProcessStatus::IN_POSITION)),
            Err(e) if e.refusal_code() == Some(REFUSED_IN_MOTION) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn jog_positive(&mut self) -> XenaxResult<()> {
        self.command("JP")
    }

    pub fn jog_negative(&mut self) -> XenaxResult<()> {
        self.command("JN")
    }

    /// Stop any motion and wait until the axis is at rest.
    pub fn stop_motion(&mut self) -> XenaxResult<()> {
        self.command("SM")?;
        self.wait_status_clear(ProcessStatus::IN_MOTION, STOP_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT)
    }

    // ==================== Motion parameters ====================

    pub fn set_speed(&mut self, inc_per_sec: u32) -> XenaxResult<()> {
        self.command(&format!("SP{inc_per_sec}"))
    }

    pub fn speed(&mut self) -> XenaxResult<u32> {
        self.query_value("SP?")
    }

    pub fn set_acceleration(&mut self, inc_per_sec2: u32) -> XenaxResult<()> {
        self.command(&format!("AC{inc_per_sec2}"))
    }

    pub fn acceleration(&mut self) -> XenaxResult<u32> {
        self.query_value("AC?")
    }

    /// Jerk limitation as a percentage of the acceleration ramp (0 - 100).
    pub fn set_s_curve(&mut self, percent: u32) -> XenaxResult<()> {
        if percent > 100 {
            return Err(XenaxError::InvalidArgument(format!(
                "Invalid S-curve percentage {percent}"
            )));
        }
        self.command(&format!("SCRV{percent}"))
    }

    pub fn s_curve(&mut self) -> XenaxResult<u32> {
        self.query_value("SCRV?")
    }

    /// Software travel limits in increments.
    pub fn set_limits(&mut self, left: u32, right: u32) -> XenaxResult<()> {
        self.command(&format!("LL{left}"))?;
        self.command(&format!("LR{right}"))
    }

    pub fn limit_left(&mut self) -> XenaxResult<u32> {
        self.query_value("LL?")
    }

    pub fn limit_right(&mut self) -> XenaxResult<u32> {
        self.query_value("LR?")
    }

    // ==================== Control loop ====================

    pub fn set_gain_position(&mut self, gain: u32) -> XenaxResult<()> {
        debug!("Setting position gain to {}", gain);
        self.command(&format!("BWP{gain}"))
    }

    pub fn gain_position(&mut self) -> XenaxResult<u32> {
        self.query_value("BWP?")
    }

    pub fn set_gain_current(&mut self, gain: u32) -> XenaxResult<()> {
        debug!("Setting current gain to {}", gain);
        self.command(&format!("BWC{gain}"))
    }

    pub fn gain_current(&mut self) -> XenaxResult<u32> {
        self.query_value("BWC?")
    }

    /// Largest following error between set and actual position, in increments.
    pub fn set_max_deviation(&mut self, inc: u32) -> XenaxResult<()> {
        self.command(&format!("DP{inc}"))
    }

    pub fn max_deviation(&mut self) -> XenaxResult<u32> {
        self.query_value("DP?")
    }

    /// Window around the target that counts as in position, in increments.
    pub fn set_target_deviation(&mut self, inc: u32) -> XenaxResult<()> {
        self.command(&format!("DTP{inc}"))
    }

    pub fn target_deviation(&mut self) -> XenaxResult<u32> {
        self.query_value("DTP?")
    }

    // ==================== Gantry ====================

    /// Card identifier on a multi-axis bus, 0 to 4.
    pub fn set_card_identifier(&mut self, ci: u32) -> XenaxResult<()> {
        if ci > MAX_CARD_IDENTIFIER {
            return Err(XenaxError::InvalidArgument(format!(
                "Invalid card identifier {ci} (valid 0 - {MAX_CARD_IDENTIFIER})"
            )));
        }
        debug!("Changing card identifier to {}", ci);
        self.command(&format!("CI{ci}"))
    }

    pub fn card_identifier(&mut self) -> XenaxResult<u32> {
        self.query_value("CI?")
    }

    pub fn set_gantry_slave_id(&mut self, gsid: u32) -> XenaxResult<()> {
        debug!("Changing gantry slave id to {}", gsid);
        self.command(&format!("GSID{gsid}"))
    }

    pub fn gantry_slave_id(&mut self) -> XenaxResult<u32> {
        self.query_value("GSID?")
    }

    /// Position offset of the gantry slave against its master, in increments.
    pub fn set_gantry_master_slave_offset(&mut self, offset: i32) -> XenaxResult<()> {
        debug!("Setting gantry master/slave offset to {}", offset);
        self.command(&format!("PGMSO{offset}"))
    }

    pub fn gantry_master_slave_offset(&mut self) -> XenaxResult<i32> {
        self.query_value("PGMSO?")
    }

    /// Master/slave offset measured during gantry initialization.
    pub fn detected_gantry_master_slave_offset(&mut self) -> XenaxResult<i32> {
        self.query_value("DGMSO?")
    }

    // ==================== Force ====================

    /// Run a force calibration over `distance` increments and refresh the
    /// force constant.
    pub fn force_calibration(&mut self, distance: u32) -> XenaxResult<()> {
        info!("Performing force calibration over {} inc", distance);
        self.command(&format!("FC{distance}"))?;
        self.wait_status_set(
            ProcessStatus::IN_MOTION,
            FORCE_CALIBRATION_START_INTERVAL,
            DEFAULT_WAIT_TIMEOUT,
        )?;
        self.wait_status_clear(
            ProcessStatus::FORCE_CALIBRATION_ACTIVE,
            DEFAULT_POLL_INTERVAL,
            DEFAULT_WAIT_TIMEOUT,
        )?;
        self.force_constant()?;
        Ok(())
    }

    /// Motor current in mA.
    pub fn motor_current(&mut self) -> XenaxResult<i32> {
        self.query_value("TMC")
    }

    /// Read the motor force constant in N/mA.
    pub fn force_constant(&mut self) -> XenaxResult<f64> {
        let micro_newton_per_ma: i64 = self.query_value("FCM?")?;
        self.force_constant = 1e-6 * micro_newton_per_ma as f64;
        debug!("force constant = {} N/mA", self.force_constant);
        Ok(self.force_constant)
    }

    /// Motor force in N from the current and the calibrated force constant.
    pub fn motor_force(&mut self) -> XenaxResult<f64> {
        if !self
            .status_register()?
            .contains(ProcessStatus::FORCE_CALIBRATION_ACTIVE)
        {
            return Err(XenaxError::ForceNotCalibrated);
        }
        Ok(self.force_constant * f64::from(self.motor_current()?))
    }

    /// Limit the motor force to `newton`, sent in units of 10 mA.
    pub fn set_force_limit(&mut self, newton: f64) -> XenaxResult<()> {
        if self.force_constant == 0.0 {
            return Err(XenaxError::ForceNotCalibrated);
        }
        let limit_10ma = (0.1 * newton / self.force_constant) as i64;
        self.command(&format!("LIF{limit_10ma}"))
    }

    /// Force limit in N.
    pub fn force_limit(&mut self) -> XenaxResult<f64> {
        let limit_10ma: i64 = self.query_value("LIF?")?;
        let limit = 10.0 * limit_10ma as f64 * self.force_constant;
        debug!("force limit = {:.3} N", limit);
        Ok(limit)
    }

    pub fn force_limit_reached(&mut self) -> XenaxResult<bool> {
        Ok(self
            .status_register()?
            .contains(ProcessStatus::I_FORCE_LIMIT_REACHED))
    }

    // ==================== PLC I/O ====================

    fn check_output(output: u32) -> XenaxResult<()> {
        if !(1..=NUM_OUTPUTS).contains(&output) {
            return Err(XenaxError::InvalidArgument(format!(
                "GPIO output number has to be between 1 and {NUM_OUTPUTS}, got {output}"
            )));
        }
        Ok(())
    }

    pub fn set_output_type(&mut self, output: u32, output_type: OutputType) -> XenaxResult<()> {
        Self::check_output(output)?;
        let shift = 2 * (output - 1);
        self.output_type &= !(0b11 << shift);
        self.output_type |= (output_type as u16) << shift;
        debug!("Setting output type to 0x{:04X}", self.output_type);
        self.command(&format!("SOT{}", self.output_type))
    }

    pub fn set_output_activity(&mut self, output: u32, active_high: bool) -> XenaxResult<()> {
        Self::check_output(output)?;
        let bit = 1u8 << (output - 1);
        if active_high {
            self.output_activity |= bit;
        } else {
            self.output_activity &= !bit;
        }
        debug!("Setting output activity to 0x{:02X}", self.output_activity);
        self.command(&format!("SOA{}", self.output_activity))
    }

    /// Output type register as last written.
    pub fn output_type_mask(&self) -> u16 {
        self.output_type
    }

    /// Output activity register as last written.
    pub fn output_activity_mask(&self) -> u8 {
        self.output_activity
    }

    pub fn set_output(&mut self, output: u32, high: bool) -> XenaxResult<()> {
        Self::check_output(output)?;
        let cmd = if high { "SO" } else { "CO" };
        self.command(&format!("{cmd}{output}"))
    }

    /// State of an output. The register is left-aligned: output 1 is bit 7.
    pub fn output(&mut self, output: u32) -> XenaxResult<bool> {
        Self::check_output(output)?;
        let register: u32 = self.query_value("TO")?;
        Ok(register & (1 << (NUM_OUTPUTS - output)) != 0)
    }

    pub fn input(&mut self, input: u32) -> XenaxResult<bool> {
        if !(1..=NUM_INPUTS).contains(&input) {
            return Err(XenaxError::InvalidArgument(format!(
                "GPIO input number has to be between 1 and {NUM_INPUTS}, got {input}"
            )));
        }
        let register: u32 = self.query_value("TI")?;
        Ok(register & (1 << (input - 1)) != 0)
    }

    // ==================== Status ====================

    /// Read the process status register, updating the error-pending flag.
    pub fn status_register(&mut self) -> XenaxResult<ProcessStatus> {
        let payload = self.link.query("TPSR")?;
        let status = ProcessStatus::from_hex(&payload).ok_or_else(|| {
            XenaxError::ParseError(format!("Invalid status register '{payload}'"))
        })?;
        debug!("status register = 0x{:08X}", status.bits());
        self.error_pending = status.error_pending();
        Ok(status)
    }

    /// True if an error, warning or info entry waits in the queue.
    pub fn error_pending(&mut self) -> XenaxResult<bool> {
        self.status_register()?;
        Ok(self.error_pending)
    }

    /// Pop the latest error: its number and description.
    pub fn last_error(&mut self) -> XenaxResult<(u32, String)> {
        self.error_pending = false;
        let code = self.query_value("TE")?;
        let text = self.link.query("TES")?;
        Ok((code, text))
    }

    /// Read queued errors while the status register reports one, at most
    /// `limit` of them.
    ///
    /// Stops early on error number 0 or when the same error comes back,
    /// since a standing warning keeps the attention bits set.
    pub fn pending_errors(&mut self, limit: usize) -> XenaxResult<Vec<(u32, String)>> {
        let mut errors: Vec<(u32, String)> = Vec::new();
        while errors.len() < limit && self.error_pending()? {
            let (code, text) = self.last_error()?;
            if code == 0 || errors.last().is_some_and(|(last, _)| *last == code) {
                break;
            }
            errors.push((code, text));
        }
        Ok(errors)
    }

    fn wait_status(
        &mut self,
        mask: ProcessStatus,
        set: bool,
        interval: Duration,
        timeout: Duration,
    ) -> XenaxResult<()> {
        let reached = |status: ProcessStatus| {
            if set {
                status.contains(mask)
            } else {
                !status.intersects(mask)
            }
        };

        let start = Instant::now();
        let mut status = self.status_register()?;
        while !reached(status) {
            thread::sleep(interval);
            if start.elapsed() > timeout {
                return Err(XenaxError::StatusTimeout {
                    action: if set { "set" } else { "clear" },
                    expected: mask.bits(),
                    current: status.bits(),
                });
            }
            status = self.status_register()?;
        }
        Ok(())
    }

    /// Poll until every bit in `mask` is set.
    pub fn wait_status_set(
        &mut self,
        mask: ProcessStatus,
        interval: Duration,
        timeout: Duration,
    ) -> XenaxResult<()> {
        self.wait_status(mask, true, interval, timeout)
    }

    /// Poll until every bit in `mask` is clear.
    pub fn wait_status_clear(
        &mut self,
        mask: ProcessStatus,
        interval: Duration,
        timeout: Duration,
    ) -> XenaxResult<()> {
        self.wait_status(mask, false, interval, timeout)
    }

    // ==================== Misc ====================

    pub fn set_servo_id(&mut self, sid: &str) -> XenaxResult<()> {
        if sid.len() > MAX_SERVO_ID_LEN {
            return Err(XenaxError::InvalidArgument(format!(
                "SID '{sid}' exceeds max. length of {MAX_SERVO_ID_LEN} characters"
            )));
        }
        self.command(&format!("SID{sid}"))
    }

    pub fn servo_id(&mut self) -> XenaxResult<String> {
        self.link.query("SID?")
    }

    /// Moving mass in g, used by the controller's feed-forward.
    pub fn set_payload(&mut self, grams: u32) -> XenaxResult<()> {
        debug!("Setting payload to {} g", grams);
        self.command(&format!("ML{grams}"))
    }

    pub fn payload(&mut self) -> XenaxResult<u32> {
        self.query_value("ML?")
    }

    /// Disable the safety motion unit bus.
    pub fn disable_smu(&mut self) -> XenaxResult<()> {
        self.command("DMBUS")
    }

    /// Whether dropping the driver sends a stop (`SM`). On by default; turn
    /// it off to leave a jog or non-blocking move running after the program
    /// exits.
    pub fn set_stop_on_drop(&mut self, stop: bool) {
        self.stop_on_drop = stop;
    }

    /// Re-detect the connected motor. Takes several seconds.
    pub fn reset_motor_type(&mut self) -> XenaxResult<()> {
        self.link.query_timeout("RESM", RESET_MOTOR_TIMEOUT).map(|_| ())
    }
}

impl<T: Transport> Drop for XenaxXvi<T> {
    fn drop(&mut self) {
        if !self.stop_on_drop {
            return;
        }
        if let Err(e) = self.link.query("SM") {
            debug!("Stop on disconnect failed: {}", e);
        }
    }
}
