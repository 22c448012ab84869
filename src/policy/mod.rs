//! Policy model: what the endpoint under test must, must not, or may do.

mod certificate;
mod cipher;
mod protocol;

pub use certificate::{CertificateMaterial, CertificateRegistry, ClientCertificate};
pub use cipher::{CipherSuite, CipherSuiteRegistry, TLS_FALLBACK_SCSV, UNKNOWN_CIPHER_SUITE_NAME};
pub use protocol::{Protocol, ProtocolRegistry, ProtocolVersion};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Obligation attached to a protocol, cipher suite or certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Unconstrained; no compliance message is ever emitted.
    CanBe,
    MustBe,
    MustNotBe,
}

impl Mode {
    pub fn is_must_be(self) -> bool {
        self == Mode::MustBe
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::CanBe => "CAN_BE",
            Mode::MustBe => "MUST_BE",
            Mode::MustNotBe => "MUST_NOT_BE",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "CAN_BE" => Ok(Mode::CanBe),
            "MUST_BE" => Ok(Mode::MustBe),
            "MUST_NOT_BE" => Ok(Mode::MustNotBe),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Everything the relay, scanner and orchestrator need to know about the
/// policy, built once at start-up and shared by reference.
#[derive(Debug)]
pub struct PolicyContext {
    pub cipher_suites: CipherSuiteRegistry,
    pub protocols: ProtocolRegistry,
    pub certificates: CertificateRegistry,
    pub tls_fallback_scsv: Mode,
    /// Also judge protocols from the version field of captured ClientHellos.
    pub passive_protocol_check: bool,
}

impl PolicyContext {
    pub fn new(
        cipher_suites: CipherSuiteRegistry,
        protocols: ProtocolRegistry,
        certificates: CertificateRegistry,
    ) -> Self {
        Self {
            cipher_suites,
            protocols,
            certificates,
            tls_fallback_scsv: Mode::CanBe,
            passive_protocol_check: false,
        }
    }

    pub fn with_tls_fallback_scsv(mut self, mode: Mode) -> Self {
        self.tls_fallback_scsv = mode;
        self
    }

    pub fn with_passive_protocol_check(mut self, enabled: bool) -> Self {
        self.passive_protocol_check = enabled;
        self
    }

    /// Checks the start-up invariants: all five protocols declared and at
    /// least one MUST_BE certificate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocols.ensure_complete()?;
        self.certificates.default_certificate()?;
        Ok(())
    }
}
