//! XENAX ASCII command protocol.
//!
//! Commands are plain ASCII terminated by LF. The controller answers with an
//! echo of the command, an optional payload line, and the prompt `>`:
//!
//! ```text
//! host:  TP\n
//! xenax: TP\r\n12345\r\n>
//! ```
//!
//! A payload of `?` flags an unknown command. A payload of `#NN` means the
//! controller refused to execute the command (manual p. 34).

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::transport::{find_subslice, Transport, TransportError};

/// TCP port of the XENAX command server.
pub const DEFAULT_PORT: u16 = 10001;

/// Required baud rate on the RS-232 port (8N1).
pub const BAUD_RATE: u32 = 115_200;

/// End of message marker.
pub const PROMPT: u8 = b'>';

/// Default time to wait for a prompt.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

const FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

/// Errors from the XENAX driver.
#[derive(Error, Debug)]
pub enum XenaxError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response did not follow the echo/payload/prompt format.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Controller answered `?`.
    #[error("Invalid command '{0}'")]
    InvalidCommand(String),

    /// Controller answered `#NN`.
    #[error("Cannot execute '{command}', {reason} (#{code:02})")]
    Refused {
        command: String,
        code: u32,
        reason: &'static str,
    },

    /// Payload could not be converted to the expected type.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Status register did not reach the expected state in time.
    #[error("Timeout on status bits to {action}: expected 0x{expected:08X}, current 0x{current:08X}")]
    StatusTimeout {
        action: &'static str,
        expected: u32,
        current: u32,
    },

    /// Motor force requested without a completed force calibration.
    #[error("No force calibration active, run force_calibration first")]
    ForceNotCalibrated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The link does not match what the controller requires.
    #[error("Invalid link settings: {0}")]
    InvalidLinkSettings(String),
}

impl XenaxError {
    /// Refusal code if the controller rejected the command.
    pub fn refusal_code(&self) -> Option<u32> {
        match self {
            XenaxError::Refused { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for XENAX operations.
pub type XenaxResult<T> = Result<T, XenaxError>;

/// Refusal code `#03`, returned while the axis is moving.
pub const REFUSED_IN_MOTION: u32 = 3;

/// Meaning of a `#NN` refusal code.
pub fn refusal_reason(code: u32) -> &'static str {
    match code {
        1 => "error in error queue",
        3 => "currently moving",
        5 => "program is active",
        13 => "emergency exit EE1 is pending",
        14 => "emergency exit EE is pending",
        15 => "force calibration is active",
        27 => "I Force Drift Compensation is active",
        34 => "rotation reference is active",
        36 => "gantry reference is active",
        38 => "reference is active",
        40 => "command not permitted",
        47 => "fault reaction active",
        49 => "no JSC motor connected",
        65 => "parameter out of value range",
        66 => "5s timeout occurred",
        _ => "unknown hash",
    }
}

/// Split a response into its CR/LF-terminated lines, dropping empty ones.
///
/// Trailing text without a terminator is not a complete line and is ignored.
fn split_lines(response: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = response.split("\r\n").collect();
    lines.pop();
    lines.into_iter().filter(|line| !line.is_empty()).collect()
}

/// Command/response channel to a XENAX controller.
///
/// Input that arrives after a prompt is kept and consumed by the next query.
pub struct XenaxLink<T: Transport> {
    transport: T,
    buffer: Vec<u8>,
}

impl<T: Transport> XenaxLink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
        }
    }

    /// Link description of the underlying transport.
    pub fn info(&self) -> String {
        self.transport.info()
    }

    /// Discard all pending input, including anything buffered.
    pub fn flush(&mut self) -> XenaxResult<()> {
        debug!("Flushing XENAX input");
        let discarded = self.transport.drain(FLUSH_TIMEOUT)?;
        self.buffer.clear();
        trace!("Flushed {} bytes", discarded);
        Ok(())
    }

    /// Send `cmd` and return its payload with the default timeout.
    pub fn query(&mut self, cmd: &str) -> XenaxResult<String> {
        self.query_timeout(cmd, QUERY_TIMEOUT)
    }

    /// Send `cmd` and return its payload, or an empty string for commands
    /// that only echo.
    pub fn query_timeout(&mut self, cmd: &str, timeout: Duration) -> XenaxResult<String> {
        self.transport.write_str(&format!("{cmd}\n"))?;

        if !self.buffer.contains(&PROMPT) {
            let received = self.transport.read_until(&[PROMPT], timeout)?;
            self.buffer.extend_from_slice(&received);
        }
        let pos = find_subslice(&self.buffer, &[PROMPT])
            .ok_or_else(|| XenaxError::Protocol("Prompt vanished from buffer".to_string()))?;
        let message: Vec<u8> = self.buffer.drain(..=pos).collect();
        let response = String::from_utf8_lossy(&message[..pos]);

        let lines = split_lines(&response);
        for (i, line) in lines.iter().enumerate() {
            trace!("param ({}/{}): '{}'", i + 1, lines.len(), line);
        }

        match lines.first() {
            Some(echo) if echo.contains(cmd) => {}
            _ => {
                return Err(XenaxError::Protocol(format!(
                    "No command echo for '{cmd}' received"
                )))
            }
        }

        let Some(payload) = lines.get(1) else {
            return Ok(String::new());
        };

        if payload.contains('?') {
            return Err(XenaxError::InvalidCommand(cmd.to_string()));
        }
        if let Some(hash) = payload.trim().strip_prefix('#') {
            let code: u32 = hash.trim().parse().map_err(|_| {
                XenaxError::Protocol(format!("Malformed refusal '{payload}' for '{cmd}'"))
            })?;
            debug!("XENAX refused '{}' with #{:02}", cmd, code);
            return Err(XenaxError::Refused {
                command: cmd.to_string(),
                code,
                reason: refusal_reason(code),
            });
        }

        Ok(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;

    fn link() -> (XenaxLink<ScriptedTransport>, ScriptedTransport) {
        let mock = ScriptedTransport::new();
        (XenaxLink::new(mock.clone()), mock)
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("TP\r\n1000\r\n"), vec!["TP", "1000"]);
        assert_eq!(split_lines("\r\nPW\r\n"), vec!["PW"]);
        assert_eq!(split_lines("TP\r\n1000"), vec!["TP"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_query_returns_payload() {
        let (mut link, mock) = link();
        mock.reply("TP\r\n170000\r\n>");

        assert_eq!(link.query("TP").unwrap(), "170000");
        assert_eq!(mock.written_strings(), vec!["TP\n"]);
    }

    #[test]
    fn test_command_without_payload() {
        let (mut link, mock) = link();
        mock.reply("PW\r\n>");

        assert_eq!(link.query("PW").unwrap(), "");
    }

    #[test]
    fn test_fragmented_prompt() {
        let (mut link, mock) = link();
        mock.reply_fragmented(&[b"SP?\r\n25", b"000\r", b"\n>"]);

        assert_eq!(link.query("SP?").unwrap(), "25000");
    }

    #[test]
    fn test_bytes_after_prompt_are_kept() {
        let (mut link, mock) = link();
        mock.reply("TMC\r\n120\r\n>TMC\r\n130\r\n>");
        mock.silent();

        assert_eq!(link.query("TMC").unwrap(), "120");
        assert_eq!(link.query("TMC").unwrap(), "130");
    }

    #[test]
    fn test_missing_echo() {
        let (mut link, mock) = link();
        mock.reply("XX\r\n1\r\n>");

        assert!(matches!(link.query("TP"), Err(XenaxError::Protocol(_))));
    }

    #[test]
    fn test_invalid_command() {
        let (mut link, mock) = link();
        mock.reply("FOO\r\n?\r\n>");

        assert!(matches!(
            link.query("FOO"),
            Err(XenaxError::InvalidCommand(cmd)) if cmd == "FOO"
        ));
    }

    #[test]
    fn test_refusal() {
        let (mut link, mock) = link();
        mock.reply("G1000\r\n#03\r\n>");

        let err = link.query("G1000").unwrap_err();
        assert_eq!(err.refusal_code(), Some(REFUSED_IN_MOTION));
        assert_eq!(
            err.to_string(),
            "Cannot execute 'G1000', currently moving (#03)"
        );
    }

    #[test]
    fn test_unknown_refusal() {
        let (mut link, mock) = link();
        mock.reply("REF\r\n#99\r\n>");

        match link.query("REF").unwrap_err() {
            XenaxError::Refused { code, reason, .. } => {
                assert_eq!(code, 99);
                assert_eq!(reason, "unknown hash");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_without_prompt() {
        let (mut link, mock) = link();
        mock.reply("TP\r\n100");

        assert!(matches!(
            link.query("TP"),
            Err(XenaxError::Transport(TransportError::Timeout))
        ));
    }

    #[test]
    fn test_flush_clears_buffer() {
        let (mut link, mock) = link();
        mock.reply("TP\r\n1\r\n>stale\r\n>");
        link.query("TP").unwrap();
        mock.push_input("EVT junk");

        link.flush().unwrap();
        mock.reply("TP\r\n2\r\n>");
        assert_eq!(link.query("TP").unwrap(), "2");
    }

    #[test]
    fn test_status_timeout_message() {
        let err = XenaxError::StatusTimeout {
            action: "set",
            expected: 0x8,
            current: 0x4006,
        };
        assert_eq!(
            err.to_string(),
            "Timeout on status bits to set: expected 0x00000008, current 0x00004006"
        );
    }
}
