//! Hardware addresses: 6 bytes, rendered as `xx:xx:xx:xx:xx:xx`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 6-byte hardware (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// All-ones address. Frames sent here reach every listening node.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Parse the colon-separated form. Each octet is one or two hex digits, either case.
    pub fn parse(s: &str) -> Result<Self, MacParseError> {
        let mut out = [0u8; 6];
        let mut groups = s.split(':');
        for byte in out.iter_mut() {
            let group = groups.next().ok_or(MacParseError::TooFewOctets)?;
            let hex = group.bytes().all(|b| b.is_ascii_hexdigit());
            if group.is_empty() || group.len() > 2 || !hex {
                return Err(MacParseError::InvalidOctet(group.to_string()));
            }
            *byte = u8::from_str_radix(group, 16)
                .map_err(|_| MacParseError::InvalidOctet(group.to_string()))?;
        }
        if groups.next().is_some() {
            return Err(MacParseError::TooManyOctets);
        }
        Ok(MacAddress(out))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        MacAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacParseError {
    #[error("expected 6 octets, found fewer")]
    TooFewOctets,
    #[error("expected 6 octets, found more")]
    TooManyOctets,
    #[error("invalid octet {0:?}")]
    InvalidOctet(String),
}
