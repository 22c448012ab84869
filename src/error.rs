//! Error types for the compliance proxy.
//!
//! Only [`ConfigError`] and the bind variants of [`RelayError`] abort a run.
//! Everything else is recovered per connection or per phase and surfaces in
//! the final report.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal, pre-run configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Following configuration directives are missing {0:?}, can't continue without them!")]
    MissingDirectives(Vec<String>),

    #[error("Value for directive {directive} must be in range [1 - 65535], got {value}")]
    InvalidPort { directive: String, value: i64 },

    #[error("Value [{0}] isn't a valid hexadecimal value!")]
    InvalidHex(String),

    #[error("Value [{value}] must have exactly [{digits}] digit(s)!")]
    HexWidth { value: String, digits: usize },

    #[error("Unknown mode [{0}], expected one of MUST_BE, MUST_NOT_BE, CAN_BE")]
    UnknownMode(String),

    #[error("Unknown protocol [{0}]")]
    UnknownProtocol(String),

    #[error("Protocol {0} is not supported!")]
    UnsupportedProtocol(String),

    #[error("Protocol [{0}] is already present!")]
    DuplicateProtocol(String),

    #[error("Following protocols are missing {0:?}, can't continue without them!")]
    MissingProtocols(Vec<String>),

    #[error("Cipher suite [{0}] is already present!")]
    DuplicateCipherSuite(String),

    #[error("Cipher suite named [{0}] is not present in the cipher suite catalog")]
    UnknownCipherSuite(String),

    #[error("Cipher suite TLS_FALLBACK_SCSV is governed by the \"tls_fallback_scsv\" directive, remove it from the cipher suite catalog")]
    FallbackScsvInCatalog,

    #[error("Certificate with name [{0}] already exists.")]
    DuplicateCertificate(String),

    #[error("You must specify at least one certificate with mode MUST_BE (used during initial communication)!")]
    NoMustBeCertificate,

    #[error("Certificate [{name}] could not be loaded: {reason}")]
    CertificateMaterial { name: String, reason: String },
}

/// Malformed or truncated ClientHello bytes. Recoverable per packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("not a ClientHello record")]
    NotClientHello,

    #[error("truncated ClientHello while reading {field}: need {needed} byte(s) at offset {offset}, buffer has {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("cipher suite block has odd length {0}, cipher suites are always pairs of bytes")]
    OddCipherSuiteLength(usize),
}

/// Relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Port [{0}] is already being used. Please specify different port.")]
    PortInUse(u16),

    #[error("Failed to bind listening socket on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: io::Error,
    },

    #[error("TLS setup failed: {0}")]
    TlsSetup(String),

    #[error("Client-facing handshake failed: {0}")]
    Handshake(String),

    #[error("Relay is not running")]
    NotRunning,

    #[error("Relay is already running")]
    AlreadyRunning,

    #[error("Relay did not acknowledge the rebind within {0:?}")]
    ReloadTimeout(std::time::Duration),

    #[error("Upstream connection to {addr} failed: {message}")]
    Upstream { addr: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<rustls::Error> for RelayError {
    fn from(err: rustls::Error) -> Self {
        RelayError::TlsSetup(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for RelayError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        RelayError::TlsSetup(err.to_string())
    }
}

/// Errors that abort an orchestrated run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Relay failed to start: {0}")]
    Startup(#[source] RelayError),

    #[error(transparent)]
    Policy(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(err: tokio::task::JoinError) -> Self {
        OrchestratorError::Task(err.to_string())
    }
}
