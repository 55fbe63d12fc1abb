//! Output formatting for CLI

use crate::models::{FailureKind, RunResult};

const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Human readable byte count (`1536` -> `1.5 KiB`).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn failure_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Unreadable => "unreadable",
        FailureKind::Probe => "probe",
        FailureKind::Transfer => "transfer",
        FailureKind::Directory => "directory",
        FailureKind::Cancelled => "cancelled",
        FailureKind::Aborted => "aborted",
    }
}

/// Plain-text run report.
#[must_use]
pub fn format_report(result: &RunResult) -> String {
    let mut out = String::new();
    let mode = if result.dry_run { " (simulation)" } else { "" };

    out.push_str(&format!(
        "Backup of {} to {} via {}{mode}\n",
        result.source_root, result.remote, result.transport
    ));
    out.push_str(&format!(
        "  Candidates: {:>8}\n  Uploaded:   {:>8}  ({}, {} retried)\n  Skipped:    {:>8}\n  Failed:     {:>8}\n",
        result.total,
        result.uploaded,
        format_bytes(result.bytes_uploaded),
        result.retried,
        result.skipped,
        result.failed,
    ));
    out.push_str(&format!(
        "  Directories: {} ensured, {} failed; {} excluded\n",
        result.directories_ensured, result.directories_failed, result.excluded
    ));

    let elapsed = result.finished_at - result.started_at;
    #[allow(clippy::cast_precision_loss)]
    let secs = elapsed.num_milliseconds() as f64 / 1000.0;
    out.push_str(&format!("  Duration:   {secs:.1}s\n"));

    if result.cancelled {
        out.push_str("  Run was cancelled before all entries were processed.\n");
    }

    if !result.failures.is_empty() {
        out.push_str("\nFailures:\n");
        for failure in &result.failures {
            out.push_str(&format!(
                "  [{}] {} ({} attempt(s)): {}\n",
                failure_label(failure.kind),
                failure.path,
                failure.attempts,
                failure.message
            ));
        }
    }

    out
}

/// Pretty JSON rendering of the full run result.
#[must_use]
pub fn format_json(result: &RunResult) -> String {
    let output = serde_json::json!({
        "complete": result.is_complete_success(),
        "result": result,
    });

    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}
