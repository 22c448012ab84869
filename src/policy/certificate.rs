use super::Mode;
use crate::error::ConfigError;
use openssl::pkey::PKey;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Certificate chain and private key offered on the client-facing socket.
#[derive(Clone)]
pub struct CertificateMaterial {
    pub cert_chain: Vec<rustls::Certificate>,
    pub private_key: rustls::PrivateKey,
}

impl CertificateMaterial {
    pub fn new(cert_chain: Vec<rustls::Certificate>, private_key: rustls::PrivateKey) -> Self {
        Self {
            cert_chain,
            private_key,
        }
    }

    /// Loads a PEM certificate chain and a PEM private key (PKCS#8, PKCS#1 or SEC1).
    ///
    /// Encrypted keys, PKCS#8 or legacy `Proc-Type` PEM, are decrypted with
    /// `password` and kept as plain PKCS#8 DER.
    pub fn from_pem_files(
        name: &str,
        cert_path: &Path,
        key_path: &Path,
        password: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let material_error = |reason: String| ConfigError::CertificateMaterial {
            name: name.to_string(),
            reason,
        };

        let cert_pem = fs::read(cert_path)
            .map_err(|e| material_error(format!("can't read {}: {e}", cert_path.display())))?;
        let cert_chain: Vec<rustls::Certificate> = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .map_err(|e| material_error(format!("can't parse {}: {e}", cert_path.display())))?
            .into_iter()
            .map(rustls::Certificate)
            .collect();
        if cert_chain.is_empty() {
            return Err(material_error(format!(
                "no certificate found in {}",
                cert_path.display()
            )));
        }

        let key_pem = fs::read(key_path)
            .map_err(|e| material_error(format!("can't read {}: {e}", key_path.display())))?;

        if String::from_utf8_lossy(&key_pem).contains("ENCRYPTED") {
            let password = password.ok_or_else(|| {
                material_error(format!(
                    "{} is password-protected but no password is configured",
                    key_path.display()
                ))
            })?;
            let key = PKey::private_key_from_pem_passphrase(&key_pem, password.as_bytes())
                .map_err(|e| material_error(format!("can't decrypt {}: {e}", key_path.display())))?;
            let der = key
                .private_key_to_pkcs8()
                .map_err(|e| material_error(format!("can't re-encode {}: {e}", key_path.display())))?;
            return Ok(Self::new(cert_chain, rustls::PrivateKey(der)));
        }

        if password.is_some() {
            tracing::warn!(certificate = name, key = %key_path.display(), "private key is not encrypted, ignoring its password");
        }
        let items = rustls_pemfile::read_all(&mut key_pem.as_slice())
            .map_err(|e| material_error(format!("can't parse {}: {e}", key_path.display())))?;
        items
            .into_iter()
            .find_map(|item| match item {
                rustls_pemfile::Item::PKCS8Key(key)
                | rustls_pemfile::Item::RSAKey(key)
                | rustls_pemfile::Item::ECKey(key) => Some(rustls::PrivateKey(key)),
                _ => None,
            })
            .map(|private_key| Self::new(cert_chain, private_key))
            .ok_or_else(|| material_error(format!("no private key found in {}", key_path.display())))
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("cert_chain_len", &self.cert_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A certificate the relay can present, with its policy.
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    pub name: String,
    pub mode: Mode,
    pub material: CertificateMaterial,
}

impl ClientCertificate {
    pub fn new(name: impl Into<String>, mode: Mode, material: CertificateMaterial) -> Self {
        Self {
            name: name.into(),
            mode,
            material,
        }
    }
}

/// Certificates under test, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct CertificateRegistry {
    entries: Vec<Arc<ClientCertificate>>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, certificate: ClientCertificate) -> Result<(), ConfigError> {
        if self.contains(&certificate.name) {
            return Err(ConfigError::DuplicateCertificate(certificate.name));
        }
        self.entries.push(Arc::new(certificate));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClientCertificate>> {
        self.entries.iter().find(|c| c.name == name).cloned()
    }

    /// First MUST_BE certificate; it boots the relay and serves the
    /// protocol phases.
    pub fn default_certificate(&self) -> Result<Arc<ClientCertificate>, ConfigError> {
        self.entries
            .iter()
            .find(|c| c.mode.is_must_be())
            .cloned()
            .ok_or(ConfigError::NoMustBeCertificate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClientCertificate>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
