//! CoAP message structure and encoding/decoding (RFC 7252, section 3)

use crate::code::Code;
use crate::option::{decode_uint, CoapOption};
use bytes::{BufMut, Bytes, BytesMut};
use lwm2m_core::{Lwm2mError, Lwm2mResult};

/// Protocol version carried in every header
pub const VERSION: u8 = 1;

/// Byte separating options from the payload
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Longest token allowed by the header's 4-bit length field
pub const MAX_TOKEN_LENGTH: usize = 8;

const HEADER_LENGTH: usize = 4;

/// CoAP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    pub fn to_bits(&self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

/// CoAP message
///
/// Options are kept ordered by option number; repeated options keep their
/// insertion order, which is significant for Uri-Path and Location-Path.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(message_type: MessageType, code: Code, message_id: u16, token: Vec<u8>) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Empty acknowledgement for a confirmable message
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, Code::EMPTY, message_id, Vec::new())
    }

    /// Reset message rejecting `message_id`
    pub fn reset(message_id: u16) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, message_id, Vec::new())
    }

    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// Insert an option after every option with a number lower or equal to it
    pub fn add_option(&mut self, option: CoapOption) {
        let position = self
            .options
            .iter()
            .position(|existing| existing.number > option.number)
            .unwrap_or(self.options.len());
        self.options.insert(position, option);
    }

    /// Values of all options with `number`, in message order
    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |option| option.number == number)
            .map(|option| option.value.as_slice())
    }

    /// Repeated string option (Uri-Path, Uri-Query, Location-Path)
    pub fn string_options(&self, number: u16) -> Lwm2mResult<Vec<String>> {
        self.options
            .iter()
            .filter(|option| option.number == number)
            .map(|option| option.as_str().map(str::to_string))
            .collect()
    }

    /// First unsigned integer option with `number`
    pub fn uint_option(&self, number: u16) -> Lwm2mResult<Option<u32>> {
        self.option_values(number).next().map(decode_uint).transpose()
    }

    pub fn set_uint_option(&mut self, number: u16, value: u32) {
        self.options.retain(|option| option.number != number);
        self.add_option(CoapOption::uint(number, value));
    }

    /// Encode the message into a datagram
    ///
    /// # Errors
    /// Returns `InvalidData` if the token is longer than 8 bytes or an
    /// option value does not fit the extended length encoding
    pub fn encode(&self) -> Lwm2mResult<Bytes> {
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(Lwm2mError::InvalidData(format!(
                "Token too long: {} bytes",
                self.token.len()
            )));
        }

        let options_length: usize = self.options.iter().map(|o| o.value.len() + 5).sum();
        let mut buf = BytesMut::with_capacity(
            HEADER_LENGTH + self.token.len() + options_length + 1 + self.payload.len(),
        );

        buf.put_u8((VERSION << 6) | (self.message_type.to_bits() << 4) | self.token.len() as u8);
        buf.put_u8(self.code.as_u8());
        buf.put_u16(self.message_id);
        buf.put_slice(&self.token);

        let mut previous = 0u16;
        for option in &self.options {
            let delta = option.number - previous;
            let length = u16::try_from(option.value.len()).map_err(|_| {
                Lwm2mError::InvalidData(format!(
                    "Option {} value too long: {} bytes",
                    option.number,
                    option.value.len()
                ))
            })?;
            let (delta_nibble, delta_ext) = split_extended(delta);
            let (length_nibble, length_ext) = split_extended(length);
            buf.put_u8((delta_nibble << 4) | length_nibble);
            put_extended(&mut buf, delta_ext);
            put_extended(&mut buf, length_ext);
            buf.put_slice(&option.value);
            previous = option.number;
        }

        if !self.payload.is_empty() {
            buf.put_u8(PAYLOAD_MARKER);
            buf.put_slice(&self.payload);
        }

        Ok(buf.freeze())
    }

    /// Decode a message from a datagram
    pub fn decode(data: &[u8]) -> Lwm2mResult<Self> {
        if data.len() < HEADER_LENGTH {
            return Err(Lwm2mError::InvalidData("Message too short".to_string()));
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(Lwm2mError::InvalidData(format!(
                "Unsupported CoAP version: {}",
                version
            )));
        }
        let message_type = MessageType::from_bits(data[0] >> 4);
        let token_length = usize::from(data[0] & 0x0F);
        if token_length > MAX_TOKEN_LENGTH {
            return Err(Lwm2mError::InvalidData(format!(
                "Illegal token length: {}",
                token_length
            )));
        }
        let code = Code::from_u8(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = HEADER_LENGTH;
        if data.len() < pos + token_length {
            return Err(Lwm2mError::InvalidData("Message too short for token".to_string()));
        }
        let token = data[pos..pos + token_length].to_vec();
        pos += token_length;

        if code.is_empty() && (token_length != 0 || pos != data.len()) {
            return Err(Lwm2mError::InvalidData(
                "Empty message must not carry token, options or payload".to_string(),
            ));
        }

        let mut message = Self::new(message_type, code, message_id, token);
        let mut number = 0u16;

        while pos < data.len() {
            let byte = data[pos];
            pos += 1;

            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(Lwm2mError::InvalidData(
                        "Payload marker without payload".to_string(),
                    ));
                }
                message.payload = data[pos..].to_vec();
                break;
            }

            let delta = read_extended(byte >> 4, data, &mut pos)?;
            let length = usize::from(read_extended(byte & 0x0F, data, &mut pos)?);
            number = number.checked_add(delta).ok_or_else(|| {
                Lwm2mError::InvalidData("Option number overflow".to_string())
            })?;

            if data.len() < pos + length {
                return Err(Lwm2mError::InvalidData(format!(
                    "Option {} truncated",
                    number
                )));
            }
            message
                .options
                .push(CoapOption::new(number, data[pos..pos + length].to_vec()));
            pos += length;
        }

        Ok(message)
    }
}

/// Split a delta or length into its 4-bit nibble and extended bytes
fn split_extended(value: u16) -> (u8, Option<Extended>) {
    match value {
        0..=12 => (value as u8, None),
        13..=268 => (13, Some(Extended::One((value - 13) as u8))),
        _ => (14, Some(Extended::Two(value - 269))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Extended {
    One(u8),
    Two(u16),
}

fn put_extended(buf: &mut BytesMut, extended: Option<Extended>) {
    match extended {
        Some(Extended::One(value)) => buf.put_u8(value),
        Some(Extended::Two(value)) => buf.put_u16(value),
        None => {}
    }
}

fn read_extended(nibble: u8, data: &[u8], pos: &mut usize) -> Lwm2mResult<u16> {
    match nibble {
        0..=12 => Ok(u16::from(nibble)),
        13 => {
            let byte = *data
                .get(*pos)
                .ok_or_else(|| Lwm2mError::InvalidData("Option header truncated".to_string()))?;
            *pos += 1;
            Ok(u16::from(byte) + 13)
        }
        14 => {
            if data.len() < *pos + 2 {
                return Err(Lwm2mError::InvalidData("Option header truncated".to_string()));
            }
            let value = u16::from_be_bytes([data[*pos], data[*pos + 1]]);
            *pos += 2;
            value
                .checked_add(269)
                .ok_or_else(|| Lwm2mError::InvalidData("Option header overflow".to_string()))
        }
        _ => Err(Lwm2mError::InvalidData(
            "Reserved option nibble 15".to_string(),
        )),
    }
}
