//! CoAP message encoding and decoding (RFC 7252 §3)

use lwm2m_core::{Method, ResponseCode};
use thiserror::Error;

/// Only defined protocol version
const VERSION: u8 = 1;

const HEADER_LEN: usize = 4;
const MAX_TOKEN_LEN: usize = 8;
const PAYLOAD_MARKER: u8 = 0xFF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Message too short: {0} bytes")]
    TooShort(usize),
    #[error("Unsupported version {0}")]
    BadVersion(u8),
    #[error("Invalid token length {0}")]
    BadTokenLength(usize),
    #[error("Message truncated")]
    Truncated,
    #[error("Reserved option nibble")]
    ReservedNibble,
    #[error("Payload marker followed by empty payload")]
    EmptyPayload,
    #[error("Option value too long: {0} bytes")]
    OptionTooLong(usize),
}

/// Option numbers used by this client
pub mod option {
    pub const URI_HOST: u16 = 3;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PORT: u16 = 7;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn bits(self) -> u8 {
        match self {
            Self::Confirmable => 0,
            Self::NonConfirmable => 1,
            Self::Acknowledgement => 2,
            Self::Reset => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }
}

/// Request method → code byte
pub fn method_code(method: Method) -> u8 {
    match method {
        Method::Get => 1,
        Method::Post => 2,
        Method::Put => 3,
        Method::Delete => 4,
    }
}

pub fn method_from_code(code: u8) -> Option<Method> {
    match code {
        1 => Some(Method::Get),
        2 => Some(Method::Post),
        3 => Some(Method::Put),
        4 => Some(Method::Delete),
        _ => None,
    }
}

/// Response code → code byte (`class << 5 | detail`)
pub fn response_code(code: ResponseCode) -> u8 {
    (code.class << 5) | (code.detail & 0x1F)
}

pub fn response_from_code(code: u8) -> ResponseCode {
    ResponseCode::new(code >> 5, code & 0x1F)
}

/// Minimal big-endian unsigned integer option value
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub fn decode_uint(bytes: &[u8]) -> u32 {
    bytes.iter().take(4).fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

/// A single CoAP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    /// Raw code byte (class << 5 | detail); 0 is the empty message
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    /// Options sorted by number, repeated numbers kept in insertion order
    options: Vec<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageType, code: u8, message_id: u16, token: Vec<u8>) -> Self {
        Self {
            kind,
            code,
            message_id,
            token,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Empty ACK or RST for a message id
    pub fn empty(kind: MessageType, message_id: u16) -> Self {
        Self::new(kind, 0, message_id, Vec::new())
    }

    pub fn add_option(&mut self, number: u16, value: Vec<u8>) {
        let at = self
            .options
            .iter()
            .position(|(n, _)| *n > number)
            .unwrap_or(self.options.len());
        self.options.insert(at, (number, value));
    }

    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, v)| v.as_slice())
    }

    /// Repeated string option joined by `/` (Uri-Path, Location-Path)
    pub fn joined_path(&self, number: u16) -> String {
        self.option_values(number)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn content_format(&self) -> Option<u16> {
        self.option_values(option::CONTENT_FORMAT)
            .next()
            .map(|v| decode_uint(v) as u16)
    }

    pub fn is_empty(&self) -> bool {
        self.code == 0
    }

    pub fn is_request(&self) -> bool {
        self.code != 0 && self.code >> 5 == 0
    }

    pub fn is_response(&self) -> bool {
        self.code >> 5 >= 2
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(CodecError::BadTokenLength(self.token.len()));
        }

        let mut out = Vec::with_capacity(HEADER_LEN + self.token.len() + self.payload.len() + 32);
        // Byte 0: Ver(2) | Type(2) | TKL(4)
        out.push((VERSION << 6) | (self.kind.bits() << 4) | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut previous = 0u16;
        for (number, value) in &self.options {
            if value.len() > u16::MAX as usize {
                return Err(CodecError::OptionTooLong(value.len()));
            }
            let delta = number - previous;
            let (delta_nibble, delta_ext) = split_nibble(delta);
            let (len_nibble, len_ext) = split_nibble(value.len() as u16);
            out.push((delta_nibble << 4) | len_nibble);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&len_ext);
            out.extend_from_slice(value);
            previous = *number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        Ok(out)
    }

    /// Decode from wire format
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(CodecError::BadVersion(version));
        }
        let kind = MessageType::from_bits(data[0] >> 4);
        let token_len = (data[0] & 0x0F) as usize;
        if token_len > MAX_TOKEN_LEN {
            return Err(CodecError::BadTokenLength(token_len));
        }
        let code = data[1];
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = HEADER_LEN;
        let token = data
            .get(pos..pos + token_len)
            .ok_or(CodecError::Truncated)?
            .to_vec();
        pos += token_len;

        let mut message = Self::new(kind, code, message_id, token);
        let mut number = 0u16;

        while pos < data.len() {
            let byte = data[pos];
            pos += 1;
            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(CodecError::EmptyPayload);
                }
                message.payload = data[pos..].to_vec();
                break;
            }

            let delta = read_extended(byte >> 4, data, &mut pos)?;
            let len = read_extended(byte & 0x0F, data, &mut pos)? as usize;
            number = number.checked_add(delta).ok_or(CodecError::Truncated)?;

            let value = data.get(pos..pos + len).ok_or(CodecError::Truncated)?;
            message.options.push((number, value.to_vec()));
            pos += len;
        }

        Ok(message)
    }
}

/// Split a delta or length into its 4-bit nibble and extension bytes
fn split_nibble(value: u16) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, (value - 269).to_be_bytes().to_vec()),
    }
}

fn read_extended(nibble: u8, data: &[u8], pos: &mut usize) -> Result<u16, CodecError> {
    match nibble {
        0..=12 => Ok(nibble as u16),
        13 => {
            let b = *data.get(*pos).ok_or(CodecError::Truncated)?;
            *pos += 1;
            Ok(b as u16 + 13)
        }
        14 => {
            let bytes = data.get(*pos..*pos + 2).ok_or(CodecError::Truncated)?;
            *pos += 2;
            u16::from_be_bytes([bytes[0], bytes[1]])
                .checked_add(269)
                .ok_or(CodecError::Truncated)
        }
        _ => Err(CodecError::ReservedNibble),
    }
}
