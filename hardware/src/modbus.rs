//! Modbus TCP client.
//!
//! Implements the MBAP framing and the eight data-access function codes used
//! by bench sensors. Each request is a single transaction: the frame is
//! written, the 7-byte MBAP header is read, then exactly the number of bytes
//! the header announces.
//!
//! # Frame layout
//!
//! ```text
//! | transaction id (2) | protocol id (2) = 0 | length (2) | unit id (1) | PDU ... |
//! ```
//!
//! `length` counts the unit id plus the PDU. All multi-byte fields are
//! big-endian.
//!
//! # Example
//!
//! ```no_run
//! use hardware::modbus::ModbusTcp;
//! use hardware::transport::{IpAddress, TcpTransport};
//!
//! let link = TcpTransport::connect(&IpAddress::new("192.168.2.250", 502))?;
//! let mut client = ModbusTcp::new(link, 1);
//! let regs = client.read_input_registers(0x00C8, 17)?;
//! println!("{regs:04X?}");
//! # Ok::<(), hardware::modbus::ModbusError>(())
//! ```

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::transport::{Transport, TransportError, DEFAULT_TIMEOUT};

/// Default Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// Size of the MBAP header including the unit id.
pub const MBAP_HEADER_LEN: usize = 7;

/// Bit set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Function code constants.
pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
}

const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_REGISTERS: u16 = 123;
const MAX_READ_BITS: u16 = 2000;
const MAX_WRITE_COILS: u16 = 1968;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Errors from a Modbus transaction.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an exception response.
    #[error("Modbus exception {code} on function 0x{function:02X}: {}", exception_message(*.code))]
    Exception { function: u8, code: u8 },

    /// The response does not match the request.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The request was rejected before it was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for Modbus operations.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Human-readable meaning of a Modbus exception code.
pub fn exception_message(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal function",
        0x02 => "Illegal data address",
        0x03 => "Illegal data value",
        0x04 => "Server device failure",
        0x05 => "Acknowledge",
        0x06 => "Server device busy",
        0x08 => "Memory parity error",
        0x0A => "Gateway path unavailable",
        0x0B => "Gateway target device failed to respond",
        _ => "Unknown exception",
    }
}

/// Build a complete Modbus TCP frame around `pdu`.
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Combine two registers, low word first, into a `u32`.
pub fn registers_to_u32_le_words(lo: u16, hi: u16) -> u32 {
    u32::from(lo) | (u32::from(hi) << 16)
}

/// Combine two registers, low word first, into an IEEE-754 `f32`.
pub fn registers_to_f32_le_words(lo: u16, hi: u16) -> f32 {
    f32::from_bits(registers_to_u32_le_words(lo, hi))
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect()
}

fn check_quantity(what: &str, quantity: usize, max: u16) -> ModbusResult<u16> {
    if quantity == 0 || quantity > usize::from(max) {
        return Err(ModbusError::InvalidRequest(format!(
            "{what} quantity {quantity} out of range (1 - {max})"
        )));
    }
    Ok(quantity as u16)
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

/// Modbus TCP client bound to one unit id.
pub struct ModbusTcp<T: Transport> {
    transport: T,
    unit_id: u8,
    transaction_id: u16,
    timeout: Duration,
}

impl<T: Transport> ModbusTcp<T> {
    pub fn new(transport: T, unit_id: u8) -> Self {
        Self {
            transport,
            unit_id,
            transaction_id: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-read timeout used while waiting for a response.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Transaction id the next request will carry.
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Link description of the underlying transport.
    pub fn info(&self) -> String {
        self.transport.info()
    }

    // ==================== Reads ====================

    /// FC 01: read coils.
    pub fn read_coils(&mut self, addr: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(function::READ_COILS, addr, quantity)
    }

    /// FC 02: read discrete inputs.
    pub fn read_discrete_inputs(&mut self, addr: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(function::READ_DISCRETE_INPUTS, addr, quantity)
    }

    /// FC 03: read holding registers.
    pub fn read_holding_registers(&mut self, addr: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(function::READ_HOLDING_REGISTERS, addr, quantity)
    }

    /// FC 04: read input registers.
    pub fn read_input_registers(&mut self, addr: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(function::READ_INPUT_REGISTERS, addr, quantity)
    }

    // ==================== Writes ====================

    /// FC 05: write a single coil.
    pub fn write_single_coil(&mut self, addr: u16, on: bool) -> ModbusResult<()> {
        let value = if on { COIL_ON } else { COIL_OFF };
        let mut pdu = vec![function::WRITE_SINGLE_COIL];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&value.to_be_bytes());
        let response = self.transact(&pdu)?;
        Self::check_echo(&pdu, &response)
    }

    /// FC 06: write a single holding register.
    pub fn write_single_register(&mut self, addr: u16, value: u16) -> ModbusResult<()> {
        let mut pdu = vec![function::WRITE_SINGLE_REGISTER];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&value.to_be_bytes());
        let response = self.transact(&pdu)?;
        Self::check_echo(&pdu, &response)
    }

    /// FC 15: write consecutive coils starting at `addr`.
    pub fn write_multiple_coils(&mut self, addr: u16, values: &[bool]) -> ModbusResult<()> {
        let quantity = check_quantity("Coil", values.len(), MAX_WRITE_COILS)?;
        let packed = pack_bits(values);

        let mut pdu = vec![function::WRITE_MULTIPLE_COILS];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&quantity.to_be_bytes());
        pdu.push(packed.len() as u8);
        pdu.extend_from_slice(&packed);

        let response = self.transact(&pdu)?;
        Self::check_echo(&pdu[..5], &response)
    }

    /// FC 16: write consecutive holding registers starting at `addr`.
    pub fn write_multiple_registers(&mut self, addr: u16, values: &[u16]) -> ModbusResult<()> {
        let quantity = check_quantity("Register", values.len(), MAX_WRITE_REGISTERS)?;

        let mut pdu = vec![function::WRITE_MULTIPLE_REGISTERS];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&quantity.to_be_bytes());
        pdu.push((2 * values.len()) as u8);
        for value in values {
            pdu.extend_from_slice(&value.to_be_bytes());
        }

        let response = self.transact(&pdu)?;
        Self::check_echo(&pdu[..5], &response)
    }

    // ==================== Internals ====================

    fn read_bits(&mut self, function: u8, addr: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        check_quantity("Bit", usize::from(quantity), MAX_READ_BITS)?;
        let data = self.read_request(function, addr, quantity)?;
        let expected = usize::from(quantity).div_ceil(8);
        if data.len() != expected {
            return Err(ModbusError::Protocol(format!(
                "Expected {expected} data bytes for {quantity} bits, got {}",
                data.len()
            )));
        }
        Ok(unpack_bits(&data, usize::from(quantity)))
    }

    fn read_registers(&mut self, function: u8, addr: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        check_quantity("Register", usize::from(quantity), MAX_READ_REGISTERS)?;
        let data = self.read_request(function, addr, quantity)?;
        if data.len() != 2 * usize::from(quantity) {
            return Err(ModbusError::Protocol(format!(
                "Expected {} data bytes for {quantity} registers, got {}",
                2 * quantity,
                data.len()
            )));
        }
        Ok(data.chunks_exact(2).map(|w| be_u16(w, 0)).collect())
    }

    /// Send a read request and return the data bytes after the byte count.
    fn read_request(&mut self, function: u8, addr: u16, quantity: u16) -> ModbusResult<Vec<u8>> {
        let mut pdu = vec![function];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&quantity.to_be_bytes());

        let response = self.transact(&pdu)?;
        let Some((&byte_count, data)) = response[1..].split_first() else {
            return Err(ModbusError::Protocol("Missing byte count".to_string()));
        };
        if usize::from(byte_count) != data.len() {
            return Err(ModbusError::Protocol(format!(
                "Byte count {byte_count} does not match {} received bytes",
                data.len()
            )));
        }
        Ok(data.to_vec())
    }

    fn check_echo(request: &[u8], response: &[u8]) -> ModbusResult<()> {
        if response != request {
            return Err(ModbusError::Protocol(format!(
                "Write echo mismatch: sent {request:02X?}, got {response:02X?}"
            )));
        }
        Ok(())
    }

    /// Run one transaction and return the response PDU (function code first).
    fn transact(&mut self, pdu: &[u8]) -> ModbusResult<Vec<u8>> {
        let tid = self.transaction_id;
        let function = pdu[0];
        let frame = encode_frame(tid, self.unit_id, pdu);
        trace!("Modbus send: {:02X?}", frame);
        self.transport.write_all(&frame)?;

        let header = self.transport.read_exact(MBAP_HEADER_LEN, self.timeout)?;
        let length = usize::from(be_u16(&header, 4));
        if length < 2 {
            return Err(ModbusError::Protocol(format!("Invalid frame length {length}")));
        }
        let body = self.transport.read_exact(length - 1, self.timeout)?;
        trace!("Modbus recv: {:02X?} {:02X?}", header, body);

        self.transaction_id = self.transaction_id.wrapping_add(1);

        let response_tid = be_u16(&header, 0);
        if response_tid != tid {
            return Err(ModbusError::Protocol(format!(
                "Wrong transaction id: expected {tid}, got {response_tid}"
            )));
        }
        let protocol_id = be_u16(&header, 2);
        if protocol_id != 0 {
            return Err(ModbusError::Protocol(format!(
                "Wrong protocol id {protocol_id}"
            )));
        }
        if header[6] != self.unit_id {
            return Err(ModbusError::Protocol(format!(
                "Wrong unit id: expected {}, got {}",
                self.unit_id, header[6]
            )));
        }

        let response_function = body[0];
        if response_function == function | EXCEPTION_FLAG {
            let code = body.get(1).copied().unwrap_or(0);
            debug!(
                "Modbus exception {} on function 0x{:02X}: {}",
                code,
                function,
                exception_message(code)
            );
            return Err(ModbusError::Exception { function, code });
        }
        if response_function != function {
            return Err(ModbusError::Protocol(format!(
                "Wrong function code: expected 0x{function:02X}, got 0x{response_function:02X}"
            )));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;

    fn response(tid: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
        encode_frame(tid, unit, pdu)
    }

    fn client() -> (ModbusTcp<ScriptedTransport>, ScriptedTransport) {
        let link = ScriptedTransport::new();
        (ModbusTcp::new(link.clone(), 1), link)
    }

    #[test]
    fn test_encode_read_input_registers_frame() {
        let frame = encode_frame(0, 1, &[0x04, 0x00, 0xC8, 0x00, 0x11]);
        assert_eq!(
            frame,
            vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0xC8, 0x00, 0x11]
        );
    }

    #[test]
    fn test_read_input_registers() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x04, 0x04, 0x12, 0x34, 0xAB, 0xCD]));

        let regs = client.read_input_registers(0x00C8, 2).unwrap();
        assert_eq!(regs, vec![0x1234, 0xABCD]);
        assert_eq!(
            link.written()[0],
            vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0xC8, 0x00, 0x02]
        );
        assert_eq!(client.transaction_id(), 1);
    }

    #[test]
    fn test_fragmented_response() {
        let (mut client, link) = client();
        let frame = response(0, 1, &[0x03, 0x02, 0x00, 0x2A]);
        link.reply_fragmented(&[&frame[..3], &frame[3..8], &frame[8..]]);

        assert_eq!(client.read_holding_registers(10, 1).unwrap(), vec![42]);
    }

    #[test]
    fn test_exception_response() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x84, 0x02]));

        let err = client.read_input_registers(0xFFFF, 1).unwrap_err();
        match err {
            ModbusError::Exception { function, code } => {
                assert_eq!(function, 0x04);
                assert_eq!(code, 0x02);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(client
            .read_input_registers(0, 1)
            .is_err_and(|e| matches!(e, ModbusError::Transport(TransportError::Timeout))));
    }

    #[test]
    fn test_exception_message_text() {
        let err = ModbusError::Exception {
            function: 0x03,
            code: 0x03,
        };
        assert_eq!(
            err.to_string(),
            "Modbus exception 3 on function 0x03: Illegal data value"
        );
        assert_eq!(exception_message(0x42), "Unknown exception");
    }

    #[test]
    fn test_wrong_transaction_id_rejected() {
        let (mut client, link) = client();
        link.reply(response(7, 1, &[0x04, 0x02, 0x00, 0x01]));

        let err = client.read_input_registers(0, 1).unwrap_err();
        assert!(matches!(err, ModbusError::Protocol(_)));
    }

    #[test]
    fn test_wrong_unit_id_rejected() {
        let (mut client, link) = client();
        link.reply(response(0, 9, &[0x04, 0x02, 0x00, 0x01]));

        assert!(matches!(
            client.read_input_registers(0, 1),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_byte_count_mismatch_rejected() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x04, 0x04, 0x00, 0x01]));

        assert!(matches!(
            client.read_input_registers(0, 2),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_quantity_limits_checked_before_sending() {
        let (mut client, link) = client();
        assert!(matches!(
            client.read_holding_registers(0, 0),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.read_input_registers(0, 126),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.read_coils(0, 2001),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.write_multiple_registers(0, &[0u16; 124]),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_transaction_id_wraps() {
        let (mut client, link) = client();
        client.transaction_id = 0xFFFF;
        link.reply(response(0xFFFF, 1, &[0x06, 0x00, 0x01, 0x00, 0x05]));

        client.write_single_register(1, 5).unwrap();
        assert_eq!(client.transaction_id(), 0);
    }

    #[test]
    fn test_read_coils_unpacks_lsb_first() {
        let (mut client, link) = client();
        // 10 coils: 0b1100_1101, 0b01
        link.reply(response(0, 1, &[0x01, 0x02, 0xCD, 0x01]));

        let coils = client.read_coils(0x13, 10).unwrap();
        assert_eq!(
            coils,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
    }

    #[test]
    fn test_read_discrete_inputs() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x02, 0x01, 0x05]));

        assert_eq!(
            client.read_discrete_inputs(0, 3).unwrap(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_write_single_coil_echo() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x05, 0x00, 0xAC, 0xFF, 0x00]));
        client.write_single_coil(0xAC, true).unwrap();
        assert_eq!(&link.written()[0][7..], &[0x05, 0x00, 0xAC, 0xFF, 0x00]);

        link.reply(response(1, 1, &[0x05, 0x00, 0xAC, 0xFF, 0x00]));
        assert!(matches!(
            client.write_single_coil(0xAC, false),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_write_multiple_coils() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x0F, 0x00, 0x13, 0x00, 0x0A]));

        let values = [true, false, true, true, false, false, true, true, true, false];
        client.write_multiple_coils(0x13, &values).unwrap();
        assert_eq!(
            &link.written()[0][7..],
            &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn test_write_multiple_registers() {
        let (mut client, link) = client();
        link.reply(response(0, 1, &[0x10, 0x00, 0x01, 0x00, 0x02]));

        client.write_multiple_registers(1, &[0x000A, 0x0102]).unwrap();
        let sent = &link.written()[0];
        assert_eq!(&sent[4..6], &[0x00, 0x0B]);
        assert_eq!(
            &sent[7..],
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_register_word_order() {
        // 1.5f32 = 0x3FC00000
        assert_eq!(registers_to_u32_le_words(0x0000, 0x3FC0), 0x3FC0_0000);
        assert_eq!(registers_to_f32_le_words(0x0000, 0x3FC0), 1.5);
    }
}
