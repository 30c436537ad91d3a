//! CoAP content-format registry entries used by LwM2M

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content format of a CoAP payload
///
/// Numbers follow the IANA "CoAP Content-Formats" registry. Values without
/// a named variant are kept verbatim in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentFormat {
    TextPlain,
    LinkFormat,
    OctetStream,
    Json,
    Cbor,
    SenmlJson,
    SenmlCbor,
    Lwm2mTlv,
    Lwm2mJson,
    Other(u16),
}

impl ContentFormat {
    /// Map a registry number to a content format
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ContentFormat::TextPlain,
            40 => ContentFormat::LinkFormat,
            42 => ContentFormat::OctetStream,
            50 => ContentFormat::Json,
            60 => ContentFormat::Cbor,
            110 => ContentFormat::SenmlJson,
            112 => ContentFormat::SenmlCbor,
            11542 => ContentFormat::Lwm2mTlv,
            11543 => ContentFormat::Lwm2mJson,
            other => ContentFormat::Other(other),
        }
    }

    /// Registry number of this content format
    pub fn as_u16(&self) -> u16 {
        match self {
            ContentFormat::TextPlain => 0,
            ContentFormat::LinkFormat => 40,
            ContentFormat::OctetStream => 42,
            ContentFormat::Json => 50,
            ContentFormat::Cbor => 60,
            ContentFormat::SenmlJson => 110,
            ContentFormat::SenmlCbor => 112,
            ContentFormat::Lwm2mTlv => 11542,
            ContentFormat::Lwm2mJson => 11543,
            ContentFormat::Other(value) => *value,
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentFormat::TextPlain => write!(f, "text/plain"),
            ContentFormat::LinkFormat => write!(f, "application/link-format"),
            ContentFormat::OctetStream => write!(f, "application/octet-stream"),
            ContentFormat::Json => write!(f, "application/json"),
            ContentFormat::Cbor => write!(f, "application/cbor"),
            ContentFormat::SenmlJson => write!(f, "application/senml+json"),
            ContentFormat::SenmlCbor => write!(f, "application/senml+cbor"),
            ContentFormat::Lwm2mTlv => write!(f, "application/vnd.oma.lwm2m+tlv"),
            ContentFormat::Lwm2mJson => write!(f, "application/vnd.oma.lwm2m+json"),
            ContentFormat::Other(value) => write!(f, "content-format {}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_numbers() {
        assert_eq!(ContentFormat::from_u16(40), ContentFormat::LinkFormat);
        assert_eq!(ContentFormat::from_u16(11543), ContentFormat::Lwm2mJson);
        assert_eq!(ContentFormat::SenmlJson.as_u16(), 110);
        assert_eq!(ContentFormat::from_u16(9999), ContentFormat::Other(9999));
        assert_eq!(ContentFormat::Other(9999).as_u16(), 9999);
    }

    #[test]
    fn test_display() {
        assert_eq!(ContentFormat::LinkFormat.to_string(), "application/link-format");
        assert_eq!(ContentFormat::Other(7).to_string(), "content-format 7");
    }
}
