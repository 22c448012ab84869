//! Sequential test driver: one handshake-presence phase, then one phase per
//! protocol, then one per certificate.
//!
//! Each phase subscribes to the relay, reloads it, then waits at most
//! `timeout` for a handshake on the binding that reload returned. The first
//! such handshake ends the phase `grace` later; events from earlier
//! bindings are dropped.

use crate::error::{OrchestratorError, RelayError};
use crate::policy::{ClientCertificate, PolicyContext, Protocol, ProtocolVersion};
use crate::relay::{HandshakeEvent, RelayConfig, RelayControl};
use crate::report::{Category, ReportMessage, ReportSnapshot, ReportStore};
use crate::scanner::{evaluate_observation, PhaseSubject};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Protocol the certificate phases are served with.
pub const CERTIFICATE_PHASE_PROTOCOL: ProtocolVersion = ProtocolVersion::TlsV12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    /// Hard ceiling of a phase without handshake.
    pub timeout: Duration,
    /// Extra time after the first handshake to let trailing traffic through.
    pub grace: Duration,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "subject", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestPhase {
    Handshake,
    Protocol(ProtocolVersion),
    Certificate(String),
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestPhase::Handshake => f.write_str("handshake"),
            TestPhase::Protocol(version) => write!(f, "protocol {version}"),
            TestPhase::Certificate(name) => write!(f, "certificate {name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub phase: TestPhase,
    pub observed_handshake: bool,
    pub elapsed: Duration,
    /// Why the relay could not serve this phase, if it could not.
    pub setup_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub phases: Vec<PhaseRecord>,
    pub report: ReportSnapshot,
    pub passed: bool,
}

pub struct TestOrchestrator<R> {
    relay: Arc<R>,
    policy: Arc<PolicyContext>,
    report: Arc<ReportStore>,
    timing: PhaseTiming,
}

impl<R: RelayControl + 'static> TestOrchestrator<R> {
    pub fn new(relay: Arc<R>, policy: Arc<PolicyContext>, report: Arc<ReportStore>) -> Self {
        Self {
            relay,
            policy,
            report,
            timing: PhaseTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: PhaseTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Runs every phase in order and stops the relay.
    ///
    /// Only a relay that cannot start aborts the run; every later failure
    /// ends up in the report.
    pub async fn run(&self) -> Result<RunOutcome, OrchestratorError> {
        let default = self.policy.certificates.default_certificate()?;
        let mut phases = Vec::new();

        info!(
            timeout = ?self.timing.timeout,
            grace = ?self.timing.grace,
            "starting SSL/TLS handshake test"
        );
        phases.push(self.handshake_phase(Arc::clone(&default)).await?);

        self.report.begin_protocol_phase();
        let protocols: Vec<Protocol> = self.policy.protocols.iter().copied().collect();
        for protocol in protocols {
            phases.push(self.protocol_phase(protocol, Arc::clone(&default)).await);
        }

        self.report.begin_certificate_phase();
        let certificates: Vec<Arc<ClientCertificate>> =
            self.policy.certificates.iter().cloned().collect();
        for certificate in certificates {
            phases.push(self.certificate_phase(certificate).await);
        }

        let relay = Arc::clone(&self.relay);
        tokio::task::spawn_blocking(move || relay.stop()).await?;

        let report = self.report.snapshot();
        let passed = report.passed;
        info!(passed, errors = report.error_count(), "all phases finished");
        Ok(RunOutcome {
            phases,
            report,
            passed,
        })
    }

    async fn handshake_phase(
        &self,
        default: Arc<ClientCertificate>,
    ) -> Result<PhaseRecord, OrchestratorError> {
        let started = Instant::now();
        let events = self.relay.subscribe();
        let relay = Arc::clone(&self.relay);
        let generation = tokio::task::spawn_blocking(move || relay.start(RelayConfig::plain(default)))
            .await?
            .map_err(OrchestratorError::Startup)?;

        let observed = self.observe(events, generation).await;
        info!(observed, "stopped SSL/TLS handshake test");
        Ok(PhaseRecord {
            phase: TestPhase::Handshake,
            observed_handshake: observed,
            elapsed: started.elapsed(),
            setup_error: None,
        })
    }

    async fn protocol_phase(&self, protocol: Protocol, default: Arc<ClientCertificate>) -> PhaseRecord {
        info!(protocol = %protocol.version, mode = %protocol.mode, "starting protocol test");
        let record = self
            .live_phase(
                TestPhase::Protocol(protocol.version),
                RelayConfig::secure(protocol.version, default),
            )
            .await;

        if let Some(message) = evaluate_observation(
            &PhaseSubject::Protocol(protocol.version),
            protocol.mode,
            record.observed_handshake,
        ) {
            self.report.add_protocol(message);
        }
        info!(
            protocol = %protocol.version,
            observed = record.observed_handshake,
            "stopped protocol test"
        );
        record
    }

    async fn certificate_phase(&self, certificate: Arc<ClientCertificate>) -> PhaseRecord {
        info!(certificate = %certificate.name, mode = %certificate.mode, "starting certificate test");
        let record = self
            .live_phase(
                TestPhase::Certificate(certificate.name.clone()),
                RelayConfig::secure(CERTIFICATE_PHASE_PROTOCOL, Arc::clone(&certificate)),
            )
            .await;

        if let Some(reason) = &record.setup_error {
            self.report.add_certificate(ReportMessage::error(
                format!(
                    "Certificate named [{}] could not be used by the proxy: {reason}",
                    certificate.name
                ),
                Category::Certificate,
                Some(certificate.mode),
            ));
        }
        if let Some(message) = evaluate_observation(
            &PhaseSubject::Certificate(certificate.name.clone()),
            certificate.mode,
            record.observed_handshake,
        ) {
            self.report.add_certificate(message);
        }
        info!(
            certificate = %certificate.name,
            observed = record.observed_handshake,
            "stopped certificate test"
        );
        record
    }

    /// Reloads the relay with `config` and waits for a handshake. A reload
    /// failure ends the phase at once as unobserved.
    async fn live_phase(&self, phase: TestPhase, config: RelayConfig) -> PhaseRecord {
        let started = Instant::now();
        let events = self.relay.subscribe();
        let relay = Arc::clone(&self.relay);
        let reloaded = tokio::task::spawn_blocking(move || relay.reload(config))
            .await
            .map_err(|e| RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
            .and_then(|result| result);

        let (generation, setup_error) = match reloaded {
            Ok(generation) => (Some(generation), None),
            Err(RelayError::TlsSetup(reason)) => {
                warn!(%phase, %reason, "relay can't serve this phase");
                (None, Some(reason))
            }
            Err(e) => {
                warn!(%phase, error = %e, "relay reload failed");
                self.report.add_general(ReportMessage::error(
                    format!("Test of {phase} could not run: {e}"),
                    Category::Other,
                    None,
                ));
                (None, Some(e.to_string()))
            }
        };

        let observed = match generation {
            Some(generation) => self.observe(events, generation).await,
            None => false,
        };
        PhaseRecord {
            phase,
            observed_handshake: observed,
            elapsed: started.elapsed(),
            setup_error,
        }
    }

    /// Waits at most `timeout` for the first event of `generation`, then
    /// `grace` more.
    async fn observe(&self, mut events: UnboundedReceiver<HandshakeEvent>, generation: u64) -> bool {
        let deadline = tokio::time::Instant::now() + self.timing.timeout;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) if event.generation != generation => {
                    debug!(
                        stale = event.generation,
                        current = generation,
                        peer = %event.peer,
                        "ignoring handshake from a previous binding"
                    );
                }
                Ok(Some(event)) => {
                    debug!(peer = %event.peer, kind = ?event.kind, "handshake observed");
                    tokio::time::sleep(self.timing.grace).await;
                    return true;
                }
                Ok(None) | Err(_) => return false,
            }
        }
    }
}
