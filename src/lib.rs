//! MITM TLS proxy that checks a TLS endpoint's observable handshake
//! behaviour against a declared policy of protocols, cipher suites and
//! client certificates.

pub mod client_hello;
pub mod config;
pub mod error;
pub mod export;
pub mod forwarding;
pub mod hex;
pub mod logging;
pub mod orchestrator;
pub mod policy;
pub mod relay;
pub mod relay_stats;
pub mod report;
pub mod scanner;
pub mod tls_wrapper;


pub use error::{ConfigError, OrchestratorError, ParseError, RelayError};
pub use hex::HexValue;
pub use orchestrator::{PhaseRecord, PhaseTiming, RunOutcome, TestOrchestrator, TestPhase};
pub use policy::{Mode, PolicyContext};
pub use relay::{ProxyRelay, RelayConfig, RelayControl, RelaySettings};
pub use report::{ReportMessage, ReportSnapshot, ReportStore};
pub use scanner::ComplianceScanner;
