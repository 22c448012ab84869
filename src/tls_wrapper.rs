use crate::error::RelayError;
use crate::policy::{CertificateMaterial, ProtocolVersion};
use openssl::pkey::PKey;
use openssl::ssl::{SslAcceptor, SslMethod, SslOptions, SslStream, SslVersion};
use openssl::x509::X509;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::net::TcpStream;
use std::sync::Arc;

pub type UpstreamStream = StreamOwned<ClientConnection, TcpStream>;
pub type ClientFacingStream = SslStream<TcpStream>;

const LEGACY_CIPHER_LIST: &str = "ALL:@SECLEVEL=0";

/// TLS wrapper for the server-facing leg of the relay.
///
/// The upstream leg is never under test, so it enables every version and
/// cipher suite rustls ships.
#[derive(Clone)]
pub struct UpstreamTls {
    config: Arc<ClientConfig>,
}

impl UpstreamTls {
    /// Trusts the platform certificate store.
    pub fn new() -> Result<Self, RelayError> {
        let mut root_store = RootCertStore::empty();

        let native_certs = rustls_native_certs::load_native_certs()
            .map_err(|e| RelayError::TlsSetup(format!("can't load platform trust store: {e}")))?;
        let ders: Vec<Vec<u8>> = native_certs.into_iter().map(|cert| cert.0).collect();
        let (added, ignored) = root_store.add_parsable_certificates(&ders);
        tracing::debug!(added, ignored, "loaded platform trust anchors");

        Self::with_roots(root_store)
    }

    /// Trusts only `root_store`.
    pub fn with_roots(root_store: RootCertStore) -> Result<Self, RelayError> {
        let config = ClientConfig::builder()
            .with_cipher_suites(rustls::ALL_CIPHER_SUITES)
            .with_safe_default_kx_groups()
            .with_protocol_versions(rustls::ALL_VERSIONS)?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Runs the client handshake with `server_name` over `stream`.
    pub fn connect(&self, stream: TcpStream, server_name: &str) -> Result<UpstreamStream, RelayError> {
        let name = rustls::ServerName::try_from(server_name).map_err(|e| RelayError::Upstream {
            addr: server_name.to_string(),
            message: e.to_string(),
        })?;
        let conn = ClientConnection::new(self.config.clone(), name)?;
        let mut tls = StreamOwned::new(conn, stream);
        while tls.conn.is_handshaking() {
            tls.conn
                .complete_io(&mut tls.sock)
                .map_err(|e| RelayError::Upstream {
                    addr: server_name.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(tls)
    }
}

/// OpenSSL version pin for a protocol under test.
///
/// OpenSSL dropped SSLv2 entirely, so that phase is a TLS setup error.
/// SSLv3 configures fine but only handshakes where the linked OpenSSL was
/// built with it.
pub fn ssl_version(protocol: ProtocolVersion) -> Result<SslVersion, RelayError> {
    match protocol {
        ProtocolVersion::SslV2 => Err(RelayError::TlsSetup(format!(
            "OpenSSL cannot serve {protocol} on the client-facing socket"
        ))),
        ProtocolVersion::SslV3 => Ok(SslVersion::SSL3),
        ProtocolVersion::TlsV10 => Ok(SslVersion::TLS1),
        ProtocolVersion::TlsV11 => Ok(SslVersion::TLS1_1),
        ProtocolVersion::TlsV12 => Ok(SslVersion::TLS1_2),
        ProtocolVersion::TlsV13 => Ok(SslVersion::TLS1_3),
    }
}

/// Client-facing acceptor presenting `material`, pinned to exactly `protocol`.
///
/// The security level is dropped to 0 so legacy versions keep their SHA-1
/// handshake signatures and CBC suites.
pub fn acceptor(material: &CertificateMaterial, protocol: ProtocolVersion) -> Result<SslAcceptor, RelayError> {
    let version = ssl_version(protocol)?;
    let (leaf, chain) = material
        .cert_chain
        .split_first()
        .ok_or_else(|| RelayError::TlsSetup("certificate chain is empty".into()))?;

    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
    builder.clear_options(
        SslOptions::NO_SSLV3
            | SslOptions::NO_TLSV1
            | SslOptions::NO_TLSV1_1
            | SslOptions::NO_TLSV1_2
            | SslOptions::NO_TLSV1_3,
    );
    builder.set_min_proto_version(Some(version))?;
    builder.set_max_proto_version(Some(version))?;
    builder.set_cipher_list(LEGACY_CIPHER_LIST)?;

    let leaf_cert: X509 = X509::from_der(&leaf.0)?;
    builder.set_certificate(&leaf_cert)?;
    for extra in chain {
        builder.add_extra_chain_cert(X509::from_der(&extra.0)?)?;
    }
    let private_key: PKey<openssl::pkey::Private> = PKey::private_key_from_der(&material.private_key.0)?;
    builder.set_private_key(&private_key)?;
    builder.check_private_key()?;
    Ok(builder.build())
}

/// Completes the server side of the handshake on an accepted socket.
pub fn accept(acceptor: &SslAcceptor, stream: TcpStream) -> Result<ClientFacingStream, RelayError> {
    acceptor
        .accept(stream)
        .map_err(|e| RelayError::Handshake(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated_material() -> CertificateMaterial {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        CertificateMaterial::new(
            vec![rustls::Certificate(generated.serialize_der().unwrap())],
            rustls::PrivateKey(generated.serialize_private_key_der()),
        )
    }

    #[test]
    fn legacy_versions_are_pinned() {
        assert!(ssl_version(ProtocolVersion::SslV3).unwrap() == SslVersion::SSL3);
        assert!(ssl_version(ProtocolVersion::TlsV10).unwrap() == SslVersion::TLS1);
        assert!(ssl_version(ProtocolVersion::TlsV11).unwrap() == SslVersion::TLS1_1);
    }

    #[test]
    fn tls10_through_tls12_build_an_acceptor() {
        for protocol in [
            ProtocolVersion::TlsV10,
            ProtocolVersion::TlsV11,
            ProtocolVersion::TlsV12,
        ] {
            assert!(acceptor(&generated_material(), protocol).is_ok(), "{protocol}");
        }
    }

    #[test]
    fn ssl2_is_a_setup_error() {
        assert!(matches!(
            acceptor(&generated_material(), ProtocolVersion::SslV2),
            Err(RelayError::TlsSetup(_))
        ));
    }

    #[test]
    fn broken_key_is_a_setup_error() {
        let mut material = generated_material();
        material.private_key = rustls::PrivateKey(vec![0, 1, 2]);
        assert!(matches!(
            acceptor(&material, ProtocolVersion::TlsV12),
            Err(RelayError::TlsSetup(_))
        ));
    }

    #[test]
    fn mismatched_key_is_a_setup_error() {
        let mut material = generated_material();
        material.private_key = generated_material().private_key;
        assert!(matches!(
            acceptor(&material, ProtocolVersion::TlsV12),
            Err(RelayError::TlsSetup(_))
        ));
    }

    #[test]
    fn upstream_config_builds_with_empty_roots() {
        assert!(UpstreamTls::with_roots(RootCertStore::empty()).is_ok());
    }
}
