//! Run artifacts: the JSON log and the human-readable `FAILURE.md`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use b2_mirror_models::{ItemError, Operation};
use chrono::Local;
use serde::Serialize;

use crate::run_dir::run_stamp;

/// Name of the failure report at the top of a run directory.
pub const FAILURE_REPORT: &str = "FAILURE.md";

/// Errors that can occur while writing run artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Serializing the log failed.
    #[error("Failed to serialize {operation} log: {source}")]
    Serialize {
        /// Operation being logged.
        operation: Operation,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Writing an artifact failed.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// `{stamp}_{operation}_log.json` for a run directory.
#[must_use]
pub fn log_path(run_dir: &Path, operation: Operation) -> PathBuf {
    run_dir.join(format!("{}_{operation}_log.json", run_stamp(run_dir)))
}

/// Writes `report` as pretty JSON at [`log_path`].
///
/// # Errors
///
/// Returns [`ReportError`] if serialization or the write fails.
pub fn write_json_log<T: Serialize>(
    run_dir: &Path,
    operation: Operation,
    report: &T,
) -> Result<PathBuf, ReportError> {
    let path = log_path(run_dir, operation);
    let json = serde_json::to_string_pretty(report)
        .map_err(|source| ReportError::Serialize { operation, source })?;
    std::fs::write(&path, json).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    log::info!("Generated JSON log: {}", path.display());
    Ok(path)
}

/// Renders `FAILURE.md`: one section per error, then the raw tool output
/// if there is any.
#[must_use]
pub fn render_failure_report(
    operation: Operation,
    errors: &[ItemError],
    raw_output: Option<&str>,
) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Sync Failure Report");
    let _ = writeln!(md, "**Date**: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(md, "**Operation**: {operation}");
    let _ = writeln!(md);
    let _ = writeln!(md, "## Summary");
    let _ = writeln!(md, "- **Failed Items**: {}", errors.len());
    let _ = writeln!(md);

    let _ = writeln!(md, "## Failed Items");
    for error in errors {
        let _ = writeln!(md, "### {}", error.item);
        let _ = writeln!(md, "- **Error**: {}", error.message);
        let _ = writeln!(md, "- **Type**: {}", kind_label(error));
        let _ = writeln!(md);
    }

    if let Some(raw) = raw_output.filter(|raw| !raw.trim().is_empty()) {
        let _ = writeln!(md, "## Raw Tool Output");
        let _ = writeln!(md, "```text");
        let _ = writeln!(md, "{}", raw.trim_end());
        let _ = writeln!(md, "```");
        let _ = writeln!(md);
    }

    let _ = writeln!(md, "## Next Steps");
    let _ = writeln!(md, "1. Fix the issues listed above");
    let _ = writeln!(md, "2. Re-run the {operation} to pick up the changes");
    md
}

fn kind_label(error: &ItemError) -> String {
    serde_json::to_value(error.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Writes `FAILURE.md` into `run_dir`.
///
/// # Errors
///
/// Returns [`ReportError::Write`] if the file cannot be written.
pub fn write_failure_report(
    run_dir: &Path,
    operation: Operation,
    errors: &[ItemError],
    raw_output: Option<&str>,
) -> Result<PathBuf, ReportError> {
    let path = run_dir.join(FAILURE_REPORT);
    std::fs::write(&path, render_failure_report(operation, errors, raw_output)).map_err(
        |source| ReportError::Write {
            path: path.clone(),
            source,
        },
    )?;
    log::warn!("Generated failure report: {}", path.display());
    Ok(path)
}
