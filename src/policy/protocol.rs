use super::Mode;
use crate::error::ConfigError;
use crate::hex::HexValue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// SSL/TLS protocol versions, ordered from oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProtocolVersion {
    #[serde(rename = "SSLv2")]
    SslV2,
    #[serde(rename = "SSLv3")]
    SslV3,
    #[serde(rename = "TLSv1.0")]
    TlsV10,
    #[serde(rename = "TLSv1.1")]
    TlsV11,
    #[serde(rename = "TLSv1.2")]
    TlsV12,
    #[serde(rename = "TLSv1.3")]
    TlsV13,
}

impl ProtocolVersion {
    /// Every version the parser recognises on the wire.
    pub const ALL: [ProtocolVersion; 6] = [
        ProtocolVersion::SslV2,
        ProtocolVersion::SslV3,
        ProtocolVersion::TlsV10,
        ProtocolVersion::TlsV11,
        ProtocolVersion::TlsV12,
        ProtocolVersion::TlsV13,
    ];

    /// Versions a policy must declare; TLSv1.3 cannot be tested.
    pub const TESTABLE: [ProtocolVersion; 5] = [
        ProtocolVersion::SslV2,
        ProtocolVersion::SslV3,
        ProtocolVersion::TlsV10,
        ProtocolVersion::TlsV11,
        ProtocolVersion::TlsV12,
    ];

    pub fn wire_value(self) -> u16 {
        match self {
            ProtocolVersion::SslV2 => 0x0200,
            ProtocolVersion::SslV3 => 0x0300,
            ProtocolVersion::TlsV10 => 0x0301,
            ProtocolVersion::TlsV11 => 0x0302,
            ProtocolVersion::TlsV12 => 0x0303,
            ProtocolVersion::TlsV13 => 0x0304,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.wire_value() == value)
    }

    pub fn hex(self) -> HexValue {
        HexValue::from_u16(self.wire_value())
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolVersion::SslV2 => "SSLv2",
            ProtocolVersion::SslV3 => "SSLv3",
            ProtocolVersion::TlsV10 => "TLSv1.0",
            ProtocolVersion::TlsV11 => "TLSv1.1",
            ProtocolVersion::TlsV12 => "TLSv1.2",
            ProtocolVersion::TlsV13 => "TLSv1.3",
        }
    }

    /// Versions at or below `offered`, newest first.
    ///
    /// The version field of a ClientHello is the highest version the client
    /// speaks, so this is an approximation: it assumes the client would also
    /// accept every older version, which a hardened client may refuse.
    pub fn at_or_below(offered: &HexValue) -> Vec<ProtocolVersion> {
        let Some(offered) = offered.to_u64() else {
            return Vec::new();
        };
        let mut versions: Vec<ProtocolVersion> = Self::ALL
            .into_iter()
            .filter(|v| u64::from(v.wire_value()) <= offered)
            .collect();
        versions.reverse();
        versions
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '.' && *c != '_' && *c != ' ')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "sslv2" => Ok(ProtocolVersion::SslV2),
            "sslv3" => Ok(ProtocolVersion::SslV3),
            "tlsv10" | "tlsv1" => Ok(ProtocolVersion::TlsV10),
            "tlsv11" => Ok(ProtocolVersion::TlsV11),
            "tlsv12" => Ok(ProtocolVersion::TlsV12),
            "tlsv13" => Ok(ProtocolVersion::TlsV13),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A protocol version together with its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Protocol {
    pub version: ProtocolVersion,
    pub mode: Mode,
}

impl Protocol {
    pub fn new(version: ProtocolVersion, mode: Mode) -> Self {
        Self { version, mode }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

/// Declared protocols, iterated oldest first.
#[derive(Debug, Default, Clone)]
pub struct ProtocolRegistry {
    entries: BTreeMap<ProtocolVersion, Protocol>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a protocol; TLSv1.3 and duplicates are configuration errors.
    pub fn insert(&mut self, protocol: Protocol) -> Result<(), ConfigError> {
        if protocol.version == ProtocolVersion::TlsV13 {
            return Err(ConfigError::UnsupportedProtocol(protocol.version.to_string()));
        }
        if self.entries.contains_key(&protocol.version) {
            return Err(ConfigError::DuplicateProtocol(protocol.version.to_string()));
        }
        self.entries.insert(protocol.version, protocol);
        Ok(())
    }

    pub fn contains(&self, version: ProtocolVersion) -> bool {
        self.entries.contains_key(&version)
    }

    pub fn get(&self, version: ProtocolVersion) -> Option<&Protocol> {
        self.entries.get(&version)
    }

    pub fn missing(&self) -> Vec<ProtocolVersion> {
        ProtocolVersion::TESTABLE
            .into_iter()
            .filter(|v| !self.entries.contains_key(v))
            .collect()
    }

    pub fn ensure_complete(&self) -> Result<(), ConfigError> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingProtocols(
                missing.iter().map(|v| v.to_string()).collect(),
            ))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Protocol> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
