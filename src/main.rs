use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tls_compliance_proxy::config::{self, DEFAULT_CONFIG_FILE};
use tls_compliance_proxy::report::Severity;
use tls_compliance_proxy::{export, logging, relay};
use tls_compliance_proxy::{ProxyRelay, ReportStore, RunOutcome, TestOrchestrator};
use tracing::{error, info};

/// MITM TLS proxy that tests a TLS endpoint against a compliance policy.
///
/// Point the client under test at the local port. The proxy relays it to the
/// remote host while switching the offered protocol and certificate, then
/// reports which handshakes happened against what the policy demands.
#[derive(Parser, Debug)]
#[command(name = "tls-compliance-proxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration.
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Where to write the JSON report.
    #[arg(long, value_name = "PATH", default_value = "report.json")]
    report: PathBuf,

    /// Override the per-phase timeout, in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Override the grace period after an observed handshake, in seconds.
    #[arg(long, value_name = "SECS")]
    grace: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let loaded = config::load(&cli.config)?;
    logging::init_tracing(loaded.settings.debug, cli.verbose)?;

    let settings = loaded.settings;
    let mut timing = settings.timing;
    if let Some(secs) = cli.timeout {
        timing.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.grace {
        timing.grace = Duration::from_secs(secs);
    }

    relay::check_port(settings.relay.bind_address, settings.relay.local_port)?;

    let policy = Arc::new(loaded.policy);
    let report = Arc::new(ReportStore::new());
    let proxy = Arc::new(
        ProxyRelay::new(settings.relay.clone(), Arc::clone(&policy), Arc::clone(&report))
            .context("Failed to prepare the upstream TLS client")?,
    );

    info!(
        port = settings.relay.local_port,
        remote = %format!("{}:{}", settings.relay.remote_host, settings.relay.remote_port),
        "MiTM proxy is starting; each test takes around {} seconds",
        timing.timeout.as_secs()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let orchestrator = TestOrchestrator::new(Arc::clone(&proxy), policy, report).with_timing(timing);
    let outcome = runtime.block_on(orchestrator.run())?;

    print_summary(&outcome);
    export::write_json(&cli.report, &outcome, Some(&proxy.stats()))?;
    Ok(outcome.passed)
}

fn print_summary(outcome: &RunOutcome) {
    for phase in &outcome.phases {
        info!(
            phase = %phase.phase,
            observed = phase.observed_handshake,
            elapsed = ?phase.elapsed,
            "phase result"
        );
    }

    let report = &outcome.report;
    let errors = report
        .general
        .iter()
        .chain(report.client_hellos.iter().flat_map(|c| c.messages.iter()))
        .chain(report.protocols.iter().flatten())
        .chain(report.certificates.iter().flatten())
        .filter(|m| m.severity == Severity::Error);
    for message in errors {
        eprintln!("{message}");
    }

    if outcome.passed {
        info!("no policy violation captured");
    } else {
        info!(errors = report.error_count(), "policy violations captured");
    }
}
