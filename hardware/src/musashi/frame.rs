//! ML-808GX serial framing.
//!
//! ```text
//! | STX | nchars (2 hex) | command (4) | data ... | checksum (2 hex) | ETX |
//! ```
//!
//! `nchars` counts the command and data characters. The checksum is the
//! two's complement of the byte sum of everything between STX and the
//! checksum itself, written as two uppercase hex digits.

use super::{DispenserError, DispenserResult};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;

/// Reply meaning the command was accepted.
pub const A0: &[u8] = b"\x0202A02D\x03";
/// Reply meaning the command was rejected.
pub const A2: &[u8] = b"\x0202A22B\x03";
/// Cancel sequence sent after an `A2`.
pub const CAN: &[u8] = b"\x020218186E\x03";

const COMMAND_LEN: usize = 4;
const MAX_BODY_LEN: usize = 0xFF;

/// 8-bit two's complement of the byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_sub(b))
}

/// Wrap an arbitrary body (command + data) in a frame.
pub fn encode_body(body: &str) -> DispenserResult<Vec<u8>> {
    if body.len() > MAX_BODY_LEN {
        return Err(DispenserError::InvalidArgument(format!(
            "Frame body of {} characters is too long",
            body.len()
        )));
    }
    let mut frame = vec![STX];
    frame.extend_from_slice(format!("{:02X}", body.len()).as_bytes());
    frame.extend_from_slice(body.as_bytes());
    let cs = checksum(&frame[1..]);
    frame.extend_from_slice(format!("{cs:02X}").as_bytes());
    frame.push(ETX);
    Ok(frame)
}

/// Build a command frame. `cmd` must be at least four characters, padded
/// with spaces as the device expects (e.g. `"DI  "`).
pub fn encode_command(cmd: &str, data: &str) -> DispenserResult<Vec<u8>> {
    if cmd.len() < COMMAND_LEN {
        return Err(DispenserError::InvalidArgument(format!(
            "Invalid command '{cmd}'"
        )));
    }
    encode_body(&format!("{cmd}{data}"))
}

/// Extract and verify the body of a received frame.
pub fn decode(frame: &[u8]) -> DispenserResult<String> {
    let malformed = || {
        DispenserError::Protocol(format!(
            "Malformed frame {:?}",
            String::from_utf8_lossy(frame)
        ))
    };

    if frame.len() < 6 || frame[0] != STX || frame[frame.len() - 1] != ETX {
        return Err(malformed());
    }
    let nchars = std::str::from_utf8(&frame[1..3])
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(malformed)?;
    if frame.len() != nchars + 6 {
        return Err(malformed());
    }

    let body_end = 3 + nchars;
    let received = std::str::from_utf8(&frame[body_end..body_end + 2])
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(malformed)?;
    let expected = checksum(&frame[1..body_end]);
    if received != expected {
        return Err(DispenserError::Protocol(format!(
            "Checksum mismatch: expected {expected:02X}, got {received:02X}"
        )));
    }

    Ok(String::from_utf8_lossy(&frame[3..body_end]).into_owned())
}

/// Leading digits of `text` right after the first occurrence of `marker`.
pub(crate) fn number_after(text: &str, marker: &str) -> DispenserResult<u32> {
    let start = text
        .find(marker)
        .map(|pos| pos + marker.len())
        .ok_or_else(|| DispenserError::ParseError(format!("'{marker}' missing in '{text}'")))?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .map_err(|_| DispenserError::ParseError(format!("No value after '{marker}' in '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_constants_are_valid_frames() {
        assert_eq!(decode(A0).unwrap(), "A0");
        assert_eq!(decode(A2).unwrap(), "A2");
        assert_eq!(encode_body("A0").unwrap(), A0);
    }

    #[test]
    fn test_encode_dispense() {
        assert_eq!(encode_command("DI  ", "").unwrap(), b"\x0204DI  CF\x03");
    }

    #[test]
    fn test_encode_channel_select() {
        let frame = encode_command("CH  ", "001").unwrap();
        assert_eq!(frame, b"\x0207CH  0013D\x03");
        assert_eq!(decode(&frame).unwrap(), "CH  001");
    }

    #[test]
    fn test_checksum_is_zero_padded() {
        // "08CH  0000" sums to 0x2F3
        assert_eq!(encode_body("CH  0000").unwrap(), b"\x0208CH  00000D\x03");
    }

    #[test]
    fn test_short_command_rejected() {
        assert!(matches!(
            encode_command("DI", ""),
            Err(DispenserError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(decode(b"").is_err());
        assert!(decode(b"\x0202A02D").is_err());
        assert!(decode(b"\x0203A02D\x03").is_err());
        assert!(matches!(
            decode(b"\x0202A02E\x03"),
            Err(DispenserError::Protocol(msg)) if msg.contains("Checksum")
        ));
    }

    #[test]
    fn test_number_after() {
        let body = "D0P0500T0100OD00020OF00150";
        assert_eq!(number_after(body, "P").unwrap(), 500);
        assert_eq!(number_after(body, "T").unwrap(), 100);
        assert_eq!(number_after(body, "OD").unwrap(), 20);
        assert_eq!(number_after(body, "OF").unwrap(), 150);
        assert!(number_after(body, "X").is_err());
        assert!(number_after("P", "P").is_err());
    }
}
