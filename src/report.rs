//! Report messages and the run-wide report store.

use crate::policy::Mode;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

pub const NO_COMMUNICATION_TEXT: &str = "No SSL/TLS communication was recorded.";
pub const CLIENT_HELLO_PASSED_TEXT: &str =
    "All tests performed with the given configuration over captured Client Hello passed successfully.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Protocol,
    Cipher,
    Certificate,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMessage {
    pub text: String,
    pub category: Category,
    pub mode: Option<Mode>,
    pub severity: Severity,
}

impl ReportMessage {
    pub fn error(text: impl Into<String>, category: Category, mode: Option<Mode>) -> Self {
        Self {
            text: text.into(),
            category,
            mode,
            severity: Severity::Error,
        }
    }

    pub fn success(text: impl Into<String>, category: Category, mode: Option<Mode>) -> Self {
        Self {
            text: text.into(),
            category,
            mode,
            severity: Severity::Success,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ReportMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Success => "SUCCESS",
        };
        write!(f, "[{severity}] {:?}: {}", self.category, self.text)
    }
}

/// Findings for one captured ClientHello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportClientHello {
    pub client_hello_id: u64,
    pub messages: Vec<ReportMessage>,
}

impl ReportClientHello {
    pub fn has_error(&self) -> bool {
        self.messages.iter().any(ReportMessage::is_error)
    }
}

#[derive(Debug, Default)]
struct ReportData {
    general: Vec<ReportMessage>,
    client_hellos: Vec<ReportClientHello>,
    protocols: Option<Vec<ReportMessage>>,
    certificates: Option<Vec<ReportMessage>>,
}

/// Append-only store shared by the relay (ClientHello findings) and the
/// orchestrator (phase findings).
#[derive(Debug)]
pub struct ReportStore {
    started_at: u64,
    data: Mutex<ReportData>,
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportStore {
    pub fn new() -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            started_at,
            data: Mutex::new(ReportData::default()),
        }
    }

    fn data(&self) -> std::sync::MutexGuard<'_, ReportData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_general(&self, message: ReportMessage) {
        self.data().general.push(message);
    }

    /// Files the findings of one ClientHello and returns its sequential id.
    pub fn add_client_hello(&self, messages: Vec<ReportMessage>) -> u64 {
        let mut data = self.data();
        let client_hello_id = data.client_hellos.len() as u64 + 1;
        data.client_hellos.push(ReportClientHello {
            client_hello_id,
            messages,
        });
        client_hello_id
    }

    /// Marks the protocol phase as run, even if it files nothing.
    pub fn begin_protocol_phase(&self) {
        self.data().protocols.get_or_insert_with(Vec::new);
    }

    pub fn begin_certificate_phase(&self) {
        self.data().certificates.get_or_insert_with(Vec::new);
    }

    pub fn add_protocol(&self, message: ReportMessage) {
        self.data().protocols.get_or_insert_with(Vec::new).push(message);
    }

    pub fn add_certificate(&self, message: ReportMessage) {
        self.data()
            .certificates
            .get_or_insert_with(Vec::new)
            .push(message);
    }

    pub fn client_hello_count(&self) -> usize {
        self.data().client_hellos.len()
    }

    /// Export view: adds the "no communication" finding when nothing was
    /// captured and a SUCCESS line to every ClientHello without findings.
    pub fn snapshot(&self) -> ReportSnapshot {
        let data = self.data();

        let mut general = data.general.clone();
        if data.client_hellos.is_empty() {
            general.push(ReportMessage::error(
                NO_COMMUNICATION_TEXT,
                Category::Other,
                Some(Mode::MustBe),
            ));
        }

        let client_hellos = data
            .client_hellos
            .iter()
            .map(|report| {
                if report.messages.is_empty() {
                    ReportClientHello {
                        client_hello_id: report.client_hello_id,
                        messages: vec![ReportMessage::success(
                            CLIENT_HELLO_PASSED_TEXT,
                            Category::Other,
                            None,
                        )],
                    }
                } else {
                    report.clone()
                }
            })
            .collect();

        let mut snapshot = ReportSnapshot {
            started_at: self.started_at,
            general,
            client_hellos,
            protocols: data.protocols.clone(),
            certificates: data.certificates.clone(),
            passed: false,
        };
        snapshot.passed = !snapshot.has_error();
        snapshot
    }
}

/// Read-only copy of the four report collections plus the verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSnapshot {
    /// Unix seconds at which the run started.
    pub started_at: u64,
    pub general: Vec<ReportMessage>,
    pub client_hellos: Vec<ReportClientHello>,
    /// `None` when the protocol phase never ran.
    pub protocols: Option<Vec<ReportMessage>>,
    pub certificates: Option<Vec<ReportMessage>>,
    pub passed: bool,
}

impl ReportSnapshot {
    pub fn has_error(&self) -> bool {
        self.general.iter().any(ReportMessage::is_error)
            || self.client_hellos.iter().any(ReportClientHello::has_error)
            || self.protocols.iter().flatten().any(ReportMessage::is_error)
            || self.certificates.iter().flatten().any(ReportMessage::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.general.iter().filter(|m| m.is_error()).count()
            + self
                .client_hellos
                .iter()
                .flat_map(|r| r.messages.iter())
                .filter(|m| m.is_error())
                .count()
            + self.protocols.iter().flatten().filter(|m| m.is_error()).count()
            + self.certificates.iter().flatten().filter(|m| m.is_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_reports_missing_communication() {
        let store = ReportStore::new();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.general.len(), 1);
        assert_eq!(snapshot.general[0].text, NO_COMMUNICATION_TEXT);
        assert!(!snapshot.passed);
        assert!(snapshot.has_error());
    }

    #[test]
    fn clean_client_hello_gets_success_line() {
        let store = ReportStore::new();
        let id = store.add_client_hello(Vec::new());
        assert_eq!(id, 1);
        let snapshot = store.snapshot();
        assert!(snapshot.general.is_empty());
        assert_eq!(snapshot.client_hellos[0].messages[0].severity, Severity::Success);
        assert!(snapshot.passed);
    }

    #[test]
    fn client_hello_ids_are_sequential() {
        let store = ReportStore::new();
        assert_eq!(store.add_client_hello(Vec::new()), 1);
        assert_eq!(store.add_client_hello(Vec::new()), 2);
        assert_eq!(store.client_hello_count(), 2);
    }

    #[test]
    fn phase_not_run_differs_from_empty_phase() {
        let store = ReportStore::new();
        assert!(store.snapshot().protocols.is_none());
        store.begin_protocol_phase();
        assert_eq!(store.snapshot().protocols, Some(Vec::new()));
        assert!(store.snapshot().certificates.is_none());
    }

    #[test]
    fn any_error_fails_the_verdict() {
        let store = ReportStore::new();
        store.add_client_hello(Vec::new());
        store.add_certificate(ReportMessage::error(
            "Certificate named [x] MUST BE supported",
            Category::Certificate,
            Some(Mode::MustBe),
        ));
        let snapshot = store.snapshot();
        assert!(!snapshot.passed);
        assert_eq!(snapshot.error_count(), 1);
    }

    #[test]
    fn snapshot_serialises_enum_tags() {
        let message = ReportMessage::error("x", Category::Cipher, Some(Mode::MustNotBe));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["category"], "CIPHER");
        assert_eq!(json["severity"], "ERROR");
        assert_eq!(json["mode"], "MUST_NOT_BE");
    }
}
