//! CoAP options

use lwm2m_core::{Lwm2mError, Lwm2mResult};

/// Option numbers from the RFC 7252 / RFC 7959 registry
pub mod number {
    pub const IF_MATCH: u16 = 1;
    pub const URI_HOST: u16 = 3;
    pub const ETAG: u16 = 4;
    pub const IF_NONE_MATCH: u16 = 5;
    pub const OBSERVE: u16 = 6;
    pub const URI_PORT: u16 = 7;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const LOCATION_QUERY: u16 = 20;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
    pub const SIZE2: u16 = 28;
    pub const PROXY_URI: u16 = 35;
    pub const PROXY_SCHEME: u16 = 39;
    pub const SIZE1: u16 = 60;
}

/// A single option instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: u16, value: Vec<u8>) -> Self {
        Self { number, value }
    }

    /// Option carrying a UTF-8 string value
    pub fn string(number: u16, value: &str) -> Self {
        Self::new(number, value.as_bytes().to_vec())
    }

    /// Option carrying an unsigned integer value
    pub fn uint(number: u16, value: u32) -> Self {
        Self::new(number, encode_uint(value))
    }

    /// Critical options must be understood by the receiver (odd numbers)
    pub fn is_critical(&self) -> bool {
        self.number & 0x01 == 0x01
    }

    pub fn as_str(&self) -> Lwm2mResult<&str> {
        std::str::from_utf8(&self.value).map_err(|e| {
            Lwm2mError::InvalidData(format!("Option {} is not UTF-8: {}", self.number, e))
        })
    }

    pub fn as_uint(&self) -> Lwm2mResult<u32> {
        decode_uint(&self.value)
    }
}

/// Encode an unsigned integer in the minimal number of bytes
///
/// Zero is encoded as the empty value.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode an unsigned integer option value (at most 4 bytes)
pub fn decode_uint(value: &[u8]) -> Lwm2mResult<u32> {
    if value.len() > 4 {
        return Err(Lwm2mError::InvalidData(format!(
            "Integer option too long: {} bytes",
            value.len()
        )));
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_minimal_encoding() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(encode_uint(40), vec![40]);
        assert_eq!(encode_uint(11543), vec![0x2D, 0x17]);
        assert_eq!(encode_uint(0x0100_0000), vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_uint_decoding() {
        assert_eq!(decode_uint(&[]).unwrap(), 0);
        assert_eq!(decode_uint(&[0x2D, 0x17]).unwrap(), 11543);
        assert!(decode_uint(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_critical() {
        assert!(CoapOption::string(number::URI_PATH, "rd").is_critical());
        assert!(!CoapOption::uint(number::CONTENT_FORMAT, 40).is_critical());
    }
}
