//! Policy evaluation of captured ClientHellos and of phase observations.

use crate::client_hello::ParsedClientHello;
use crate::policy::{Mode, PolicyContext, ProtocolVersion};
use crate::report::{Category, ReportMessage};

/// Evaluates parsed ClientHellos against a policy.
pub struct ComplianceScanner<'a> {
    policy: &'a PolicyContext,
}

impl<'a> ComplianceScanner<'a> {
    pub fn new(policy: &'a PolicyContext) -> Self {
        Self { policy }
    }

    /// All findings for one ClientHello. An empty result means compliant.
    pub fn scan(&self, hello: &ParsedClientHello) -> Vec<ReportMessage> {
        let mut messages = self.scan_cipher_suites(hello);
        messages.extend(self.scan_fallback_scsv(hello));
        if self.policy.passive_protocol_check {
            messages.extend(self.scan_protocols(hello));
        }
        messages
    }

    /// Every catalog suite except the fallback sentinel, checked against the
    /// offer list.
    pub fn scan_cipher_suites(&self, hello: &ParsedClientHello) -> Vec<ReportMessage> {
        self.policy
            .cipher_suites
            .all()
            .into_iter()
            .filter(|suite| !suite.is_fallback_scsv())
            .filter_map(|suite| {
                let offered = hello.offers(&suite.hex);
                let text = match suite.mode {
                    Mode::MustBe if !offered => format!(
                        "Cipher suite [{suite}] MUST BE supported, but is missing in Client Hello!"
                    ),
                    Mode::MustNotBe if offered => format!(
                        "Cipher suite [{suite}] MUST NOT BE supported, but is present in Client Hello!"
                    ),
                    _ => return None,
                };
                Some(ReportMessage::error(text, Category::Cipher, Some(suite.mode)))
            })
            .collect()
    }

    pub fn scan_fallback_scsv(&self, hello: &ParsedClientHello) -> Option<ReportMessage> {
        let mode = self.policy.tls_fallback_scsv;
        let text = match mode {
            Mode::MustBe if !hello.fallback_scsv_offered => {
                "TLS_FALLBACK_SCSV MUST BE supported, but this cipher suite IS NOT supported!"
            }
            Mode::MustNotBe if hello.fallback_scsv_offered => {
                "TLS_FALLBACK_SCSV MUST NOT BE supported, but this cipher suite IS supported!"
            }
            _ => return None,
        };
        Some(ReportMessage::error(text, Category::Cipher, Some(mode)))
    }

    /// Best-effort protocol check from the ClientHello version field.
    ///
    /// Relies on [`ParsedClientHello::supported_protocols`], which assumes
    /// the client accepts every version up to the one it offered. Each
    /// declared version is judged on its own mode: a MUST_BE version the
    /// client does not reach is under-support, a MUST_NOT_BE version it does
    /// reach is over-support. A MUST_BE version is never an error for being
    /// offered, so over-support only shows up through MUST_NOT_BE entries.
    /// The live protocol phases stay authoritative.
    pub fn scan_protocols(&self, hello: &ParsedClientHello) -> Vec<ReportMessage> {
        let supported = hello.supported_protocols();
        self.policy
            .protocols
            .iter()
            .filter_map(|protocol| {
                let present = supported.contains(&protocol.version);
                let text = match protocol.mode {
                    Mode::MustBe if !present => format!(
                        "Protocol [{}] MUST BE supported, but Client Hello offers at most [{}]!",
                        protocol.version,
                        describe_offer(&supported)
                    ),
                    Mode::MustNotBe if present => format!(
                        "Protocol [{}] MUST NOT BE supported, but Client Hello offers up to [{}]!",
                        protocol.version,
                        describe_offer(&supported)
                    ),
                    _ => return None,
                };
                Some(ReportMessage::error(text, Category::Protocol, Some(protocol.mode)))
            })
            .collect()
    }
}

fn describe_offer(supported: &[ProtocolVersion]) -> String {
    supported
        .first()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "nothing".to_string())
}

/// What a live phase exercised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseSubject {
    Protocol(ProtocolVersion),
    Certificate(String),
}

/// Judges a finished phase: CAN_BE yields nothing, a violation an ERROR,
/// and a satisfied MUST_BE / MUST_NOT_BE a SUCCESS.
pub fn evaluate_observation(subject: &PhaseSubject, mode: Mode, observed: bool) -> Option<ReportMessage> {
    let (category, label) = match subject {
        PhaseSubject::Protocol(version) => (Category::Protocol, format!("Protocol [{version}]")),
        PhaseSubject::Certificate(name) => (Category::Certificate, format!("Certificate named [{name}]")),
    };

    match (mode, observed) {
        (Mode::CanBe, _) => None,
        (Mode::MustBe, false) => Some(ReportMessage::error(
            format!("{label} MUST BE supported, but there wasn't captured significant communication!"),
            category,
            Some(mode),
        )),
        (Mode::MustNotBe, true) => Some(ReportMessage::error(
            format!("{label} MUST NOT BE supported, but there was captured significant communication!"),
            category,
            Some(mode),
        )),
        (Mode::MustBe, true) => Some(ReportMessage::success(
            format!("{label} MUST BE supported and a handshake was captured."),
            category,
            Some(mode),
        )),
        (Mode::MustNotBe, false) => Some(ReportMessage::success(
            format!("{label} MUST NOT BE supported and no handshake was captured."),
            category,
            Some(mode),
        )),
    }
}
