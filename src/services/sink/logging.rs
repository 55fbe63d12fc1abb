//! Sink rendering events through the `log` facade.

use super::{BackupEvent, EventSink};
use crate::models::OutcomeStatus;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &BackupEvent) {
        match event {
            BackupEvent::ScanStarted { root } => log::info!("Scanning {root}"),
            BackupEvent::ScanFinished {
                entries,
                excluded,
                unreadable,
            } => log::info!(
                "Scan finished: {entries} entries, {excluded} excluded, {unreadable} unreadable"
            ),
            BackupEvent::StateChanged { from, to } => log::debug!("State {from} -> {to}"),
            BackupEvent::Connected { endpoint, worker } => {
                log::debug!("Worker {worker} connected to {endpoint}");
            }
            BackupEvent::DecisionMade {
                path,
                decision,
                reason,
            } => log::debug!("{path}: {decision:?} ({})", reason.as_str()),
            BackupEvent::DirectoryEnsured { path, ok: true, .. } => {
                log::debug!("Directory {path} ready");
            }
            BackupEvent::DirectoryEnsured { path, error, .. } => log::warn!(
                "Directory {path} could not be created: {}",
                error.as_deref().unwrap_or("unknown error")
            ),
            BackupEvent::UploadStarted { path, attempt } => {
                log::debug!("Uploading {path} (attempt {attempt})");
            }
            BackupEvent::UploadResult {
                path,
                status: OutcomeStatus::Failed,
                attempts,
                error,
                ..
            } => log::warn!(
                "Upload of {path} failed after {attempts} attempt(s): {}",
                error.as_deref().unwrap_or("unknown error")
            ),
            BackupEvent::UploadResult {
                path,
                status: OutcomeStatus::Simulated,
                ..
            } => log::info!("Would upload {path}"),
            BackupEvent::UploadResult {
                path,
                attempts,
                bytes,
                ..
            } => log::info!("Uploaded {path} ({bytes} bytes, {attempts} attempt(s))"),
            BackupEvent::Reconnecting { worker, reason } => {
                log::warn!("Worker {worker} reconnecting: {reason}");
            }
            BackupEvent::RunFinished {
                total,
                skipped,
                uploaded,
                failed,
                cancelled,
            } => {
                let suffix = if *cancelled { " (cancelled)" } else { "" };
                log::info!(
                    "Run finished{suffix}: {total} candidates, {uploaded} uploaded, {skipped} skipped, {failed} failed"
                );
            }
        }
    }
}
