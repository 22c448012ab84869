//! JSON export of a finished run.

use crate::orchestrator::{PhaseRecord, RunOutcome};
use crate::relay_stats::RelayStatsSnapshot;
use crate::report::ReportSnapshot;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    passed: bool,
    error_count: usize,
    report: &'a ReportSnapshot,
    phases: &'a [PhaseRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    relay: Option<&'a RelayStatsSnapshot>,
}

/// Renders `outcome` as pretty-printed JSON.
pub fn to_json(outcome: &RunOutcome, relay: Option<&RelayStatsSnapshot>) -> Result<String> {
    let document = ExportDocument {
        passed: outcome.passed,
        error_count: outcome.report.error_count(),
        report: &outcome.report,
        phases: &outcome.phases,
        relay,
    };
    serde_json::to_string_pretty(&document).context("Failed to serialise report")
}

/// Writes the JSON report to `path`, creating parent directories.
pub fn write_json(path: &Path, outcome: &RunOutcome, relay: Option<&RelayStatsSnapshot>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    let json = to_json(outcome, relay)?;
    fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "report saved");
    Ok(())
}
