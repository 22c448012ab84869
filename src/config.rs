//! TOML run configuration.
//!
//! One file carries the relay directives, phase timing and the three policy
//! tables. Everything is validated here, before any socket is bound.

use crate::error::ConfigError;
use crate::hex::HexValue;
use crate::orchestrator::PhaseTiming;
use crate::policy::{
    CertificateMaterial, CertificateRegistry, CipherSuite, CipherSuiteRegistry, ClientCertificate,
    Mode, PolicyContext, Protocol, ProtocolRegistry, ProtocolVersion, TLS_FALLBACK_SCSV,
};
use crate::relay::RelaySettings;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "configuration.toml";
pub const DEFAULT_REMOTE_PORT: u16 = 443;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    directives: RawDirectives,
    #[serde(default)]
    timing: RawTiming,
    #[serde(default)]
    analysis: RawAnalysis,
    #[serde(default)]
    protocols: Vec<RawProtocol>,
    #[serde(default)]
    cipher_suites: Vec<RawCipherSuite>,
    #[serde(default)]
    cipher_policy: Vec<RawCipherPolicy>,
    #[serde(default)]
    certificates: Vec<RawCertificate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDirectives {
    debug: Option<bool>,
    local_port: Option<i64>,
    remote_host: Option<String>,
    remote_port: Option<i64>,
    bind_address: Option<IpAddr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTiming {
    phase_timeout_secs: Option<u64>,
    grace_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAnalysis {
    tls_fallback_scsv: Option<String>,
    passive_protocol_check: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProtocol {
    name: String,
    mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCipherSuite {
    hex: String,
    name: String,
    mode: Option<String>,
}

/// Mode override for a catalog entry, looked up by name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCipherPolicy {
    name: String,
    mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCertificate {
    name: String,
    mode: Option<String>,
    cert_path: PathBuf,
    key_path: PathBuf,
    password: Option<String>,
}

/// Non-policy settings of a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub debug: bool,
    pub relay: RelaySettings,
    pub timing: PhaseTiming,
}

#[derive(Debug)]
pub struct LoadedConfig {
    pub settings: RunSettings,
    pub policy: PolicyContext,
}

/// Reads and validates `path`. Certificate paths resolve against the
/// directory holding the file.
pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "parsing configuration");
    from_toml(&text, path)
}

/// Parses configuration text as if read from `origin`.
pub fn from_toml(text: &str, origin: &Path) -> Result<LoadedConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    let base_dir = origin.parent().unwrap_or_else(|| Path::new("."));

    let settings = build_settings(&raw)?;
    let protocols = build_protocols(&raw.protocols)?;
    let cipher_suites = build_cipher_suites(&raw.cipher_suites)?;
    apply_cipher_policy(&cipher_suites, &raw.cipher_policy)?;
    let certificates = build_certificates(&raw.certificates, base_dir)?;

    let tls_fallback_scsv = raw
        .analysis
        .tls_fallback_scsv
        .as_deref()
        .map(str::parse::<Mode>)
        .transpose()?
        .unwrap_or(Mode::CanBe);

    let policy = PolicyContext::new(cipher_suites, protocols, certificates)
        .with_tls_fallback_scsv(tls_fallback_scsv)
        .with_passive_protocol_check(raw.analysis.passive_protocol_check.unwrap_or(false));
    policy.validate()?;

    debug!(
        cipher_suites = policy.cipher_suites.len(),
        protocols = policy.protocols.len(),
        certificates = policy.certificates.len(),
        "configuration loaded"
    );
    Ok(LoadedConfig { settings, policy })
}

fn port(directive: &str, value: i64) -> Result<u16, ConfigError> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::InvalidPort {
            directive: directive.to_string(),
            value,
        })
}

fn build_settings(raw: &RawConfig) -> Result<RunSettings, ConfigError> {
    let directives = &raw.directives;
    let remote_host = directives
        .remote_host
        .as_deref()
        .map(str::trim)
        .filter(|host| !host.is_empty());

    let mut missing = Vec::new();
    if directives.local_port.is_none() {
        missing.push("local_port".to_string());
    }
    if remote_host.is_none() {
        missing.push("remote_host".to_string());
    }
    let (Some(local_port), Some(remote_host)) = (directives.local_port, remote_host) else {
        return Err(ConfigError::MissingDirectives(missing));
    };

    let mut relay = RelaySettings::new(port("local_port", local_port)?, remote_host).with_remote_port(
        directives
            .remote_port
            .map(|value| port("remote_port", value))
            .transpose()?
            .unwrap_or(DEFAULT_REMOTE_PORT),
    );
    if let Some(address) = directives.bind_address {
        relay = relay.with_bind_address(address);
    }

    let defaults = PhaseTiming::default();
    let timing = PhaseTiming {
        timeout: raw
            .timing
            .phase_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        grace: raw
            .timing
            .grace_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.grace),
    };

    Ok(RunSettings {
        debug: directives.debug.unwrap_or(true),
        relay,
        timing,
    })
}

fn build_protocols(raw: &[RawProtocol]) -> Result<ProtocolRegistry, ConfigError> {
    let mut registry = ProtocolRegistry::new();
    for entry in raw {
        let version: ProtocolVersion = entry.name.parse()?;
        registry.insert(Protocol::new(version, entry.mode.parse()?))?;
    }
    Ok(registry)
}

fn build_cipher_suites(raw: &[RawCipherSuite]) -> Result<CipherSuiteRegistry, ConfigError> {
    let registry = CipherSuiteRegistry::new();
    let fallback = HexValue::from_u16(TLS_FALLBACK_SCSV);
    for entry in raw {
        let hex = HexValue::parse_exact(&entry.hex, 4)?;
        if hex == fallback {
            return Err(ConfigError::FallbackScsvInCatalog);
        }
        let mode = entry
            .mode
            .as_deref()
            .map(str::parse::<Mode>)
            .transpose()?
            .unwrap_or(Mode::CanBe);
        registry.insert(CipherSuite::new(hex, entry.name.trim(), mode))?;
    }
    Ok(registry)
}

fn apply_cipher_policy(registry: &CipherSuiteRegistry, raw: &[RawCipherPolicy]) -> Result<(), ConfigError> {
    for entry in raw {
        registry.set_mode_by_name(entry.name.trim(), entry.mode.parse()?)?;
    }
    Ok(())
}

fn build_certificates(raw: &[RawCertificate], base_dir: &Path) -> Result<CertificateRegistry, ConfigError> {
    let mut registry = CertificateRegistry::new();
    for entry in raw {
        if registry.contains(&entry.name) {
            return Err(ConfigError::DuplicateCertificate(entry.name.clone()));
        }
        let mode = entry
            .mode
            .as_deref()
            .map(str::parse::<Mode>)
            .transpose()?
            .unwrap_or(Mode::CanBe);
        let material = CertificateMaterial::from_pem_files(
            &entry.name,
            &base_dir.join(&entry.cert_path),
            &base_dir.join(&entry.key_path),
            entry.password.as_deref().filter(|p| !p.is_empty()),
        )?;
        registry.insert(ClientCertificate::new(entry.name.clone(), mode, material))?;
    }
    Ok(registry)
}
