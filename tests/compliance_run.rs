//! Full orchestrated run against a loopback TLS server.

use openssl::ssl::{SslConnector, SslMethod, SslOptions, SslVerifyMode, SslVersion};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::fs;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tls_compliance_proxy::config;
use tls_compliance_proxy::orchestrator::{PhaseTiming, TestOrchestrator, TestPhase};
use tls_compliance_proxy::policy::ProtocolVersion;
use tls_compliance_proxy::report::Severity;
use tls_compliance_proxy::tls_wrapper::{self, UpstreamTls};
use tls_compliance_proxy::{ProxyRelay, ReportStore};

struct Generated {
    der: Vec<u8>,
}

fn write_identity(dir: &Path, stem: &str) -> Generated {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    fs::write(dir.join(format!("{stem}.pem")), generated.serialize_pem().unwrap()).unwrap();
    fs::write(dir.join(format!("{stem}.key")), generated.serialize_private_key_pem()).unwrap();
    Generated {
        der: generated.serialize_der().unwrap(),
    }
}

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_echo_upstream(dir: &Path) -> u16 {
    let material = tls_compliance_proxy::policy::CertificateMaterial::from_pem_files(
        "upstream",
        &dir.join("upstream.pem"),
        &dir.join("upstream.key"),
        None,
    )
    .unwrap();
    let acceptor = tls_wrapper::acceptor(&material, ProtocolVersion::TlsV12).unwrap();
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                let Ok(mut tls) = tls_wrapper::accept(&acceptor, stream) else {
                    return;
                };
                let mut buf = [0u8; 256];
                while let Ok(n) = tls.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    if tls.write_all(&buf[..n]).and_then(|_| tls.flush()).is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

/// Keeps connecting to the relay until told to stop, trusting both the
/// relay's and the upstream's certificate.
fn spawn_client(port: u16, trusted: Vec<Vec<u8>>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let mut roots = RootCertStore::empty();
    for der in &trusted {
        roots.add(&rustls::Certificate(der.clone())).unwrap();
    }
    let config = Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    );
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            if let Ok(sock) = TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
                let _ = sock.set_read_timeout(Some(Duration::from_secs(2)));
                let conn =
                    ClientConnection::new(Arc::clone(&config), "localhost".try_into().unwrap())
                        .unwrap();
                let mut tls = StreamOwned::new(conn, sock);
                let mut echo = [0u8; 5];
                let _ = tls.write_all(b"hello").and_then(|_| tls.read_exact(&mut echo));
            }
            thread::sleep(Duration::from_millis(100));
        }
    })
}

/// A client stuck on TLSv1.0, which the relay should only ever complete a
/// handshake with during the TLSv1.0 phase.
fn spawn_legacy_client(port: u16, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.clear_options(SslOptions::NO_TLSV1);
    builder.set_min_proto_version(Some(SslVersion::TLS1)).unwrap();
    builder.set_max_proto_version(Some(SslVersion::TLS1)).unwrap();
    builder.set_cipher_list("ALL:@SECLEVEL=0").unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            if let Ok(sock) = TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
                let _ = sock.set_read_timeout(Some(Duration::from_secs(2)));
                if let Ok(mut tls) = connector.connect("localhost", sock) {
                    let _ = tls.write_all(b"hello");
                    let mut echo = [0u8; 5];
                    let _ = tls.read_exact(&mut echo);
                }
            }
            thread::sleep(Duration::from_millis(100));
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_run_catches_a_client_that_speaks_forbidden_tls10() {
    let dir = tempfile::tempdir().unwrap();
    let relay_identity = write_identity(dir.path(), "relay");
    let upstream_identity = write_identity(dir.path(), "upstream");
    let upstream_port = spawn_echo_upstream(dir.path());
    let local_port = free_port();

    let text = format!(
        r#"
[directives]
debug = false
local_port = {local_port}
remote_host = "localhost"
remote_port = {upstream_port}
bind_address = "127.0.0.1"

[timing]
phase_timeout_secs = 3
grace_secs = 0

[[protocols]]
name = "SSLv2"
mode = "MUST_NOT_BE"
[[protocols]]
name = "SSLv3"
mode = "MUST_NOT_BE"
[[protocols]]
name = "TLSv1.0"
mode = "MUST_NOT_BE"
[[protocols]]
name = "TLSv1.1"
mode = "CAN_BE"
[[protocols]]
name = "TLSv1.2"
mode = "MUST_BE"

[[cipher_suites]]
hex = "c02b"
name = "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"
mode = "MUST_BE"
[[cipher_suites]]
hex = "c02f"
name = "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
[[cipher_suites]]
hex = "0005"
name = "TLS_RSA_WITH_RC4_128_SHA"
mode = "MUST_NOT_BE"

[[certificates]]
name = "relay"
mode = "MUST_BE"
cert_path = "relay.pem"
key_path = "relay.key"
"#
    );
    let config_path = dir.path().join("configuration.toml");
    fs::write(&config_path, text).unwrap();
    let loaded = config::load(&config_path).unwrap();

    let mut upstream_roots = RootCertStore::empty();
    upstream_roots
        .add(&rustls::Certificate(upstream_identity.der.clone()))
        .unwrap();

    let policy = Arc::new(loaded.policy);
    let report = Arc::new(ReportStore::new());
    let relay = Arc::new(ProxyRelay::with_upstream(
        loaded.settings.relay.clone(),
        Arc::clone(&policy),
        Arc::clone(&report),
        UpstreamTls::with_roots(upstream_roots).unwrap(),
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let client = spawn_client(
        local_port,
        vec![relay_identity.der.clone(), upstream_identity.der.clone()],
        Arc::clone(&stop),
    );
    let legacy_client = spawn_legacy_client(local_port, Arc::clone(&stop));

    let timing = PhaseTiming {
        timeout: loaded.settings.timing.timeout,
        grace: Duration::from_millis(100),
    };
    let outcome = TestOrchestrator::new(Arc::clone(&relay), policy, report)
        .with_timing(timing)
        .run()
        .await
        .unwrap();
    stop.store(true, Ordering::Relaxed);
    client.join().unwrap();
    legacy_client.join().unwrap();

    let observed: Vec<(TestPhase, bool)> = outcome
        .phases
        .iter()
        .map(|p| (p.phase.clone(), p.observed_handshake))
        .collect();
    assert_eq!(
        observed,
        vec![
            (TestPhase::Handshake, true),
            (TestPhase::Protocol(ProtocolVersion::SslV2), false),
            (TestPhase::Protocol(ProtocolVersion::SslV3), false),
            (TestPhase::Protocol(ProtocolVersion::TlsV10), true),
            (TestPhase::Protocol(ProtocolVersion::TlsV11), false),
            (TestPhase::Protocol(ProtocolVersion::TlsV12), true),
            (TestPhase::Certificate("relay".into()), true),
        ]
    );
    // OpenSSL has no SSLv2 at all; the later legacy versions bind and serve
    assert!(outcome.phases[1].setup_error.is_some());
    assert!(outcome.phases[1].elapsed < Duration::from_secs(1));
    assert!(outcome.phases[3].setup_error.is_none());
    assert!(outcome.phases[4].setup_error.is_none());

    assert!(!outcome.report.client_hellos.is_empty());
    let protocols = outcome.report.protocols.clone().unwrap();
    assert_eq!(protocols.len(), 4);
    let errors: Vec<&str> = protocols
        .iter()
        .filter(|m| m.severity == Severity::Error)
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Protocol [TLSv1.0] MUST NOT BE supported"));
    assert!(!outcome.passed);
    let certificates = outcome.report.certificates.clone().unwrap();
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].severity, Severity::Success);
    assert!(outcome.report.general.is_empty());

    // the rustls client offers the required suite; the TLSv1.0 client cannot
    let satisfied = outcome.report.client_hellos.iter().any(|client_hello| {
        client_hello
            .messages
            .iter()
            .all(|m| !m.text.contains("TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"))
    });
    assert!(satisfied);
    assert!(!relay.is_running());
}
