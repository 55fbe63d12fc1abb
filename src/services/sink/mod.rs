//! Event sinks receiving structured progress events from a backup run.
//!
//! The engine never formats human-readable text; it emits [`BackupEvent`]s to
//! whatever sink the caller injects.

use crate::models::{DecisionKind, DecisionReason, OutcomeStatus};
use crate::services::orchestrate::RunState;
use serde::Serialize;

/// One progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackupEvent {
    ScanStarted {
        root: String,
    },
    ScanFinished {
        entries: usize,
        excluded: usize,
        unreadable: usize,
    },
    StateChanged {
        from: RunState,
        to: RunState,
    },
    Connected {
        endpoint: String,
        worker: usize,
    },
    DecisionMade {
        path: String,
        decision: DecisionKind,
        reason: DecisionReason,
    },
    DirectoryEnsured {
        path: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    UploadStarted {
        path: String,
        attempt: u32,
    },
    UploadResult {
        path: String,
        status: OutcomeStatus,
        attempts: u32,
        bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Reconnecting {
        worker: usize,
        reason: String,
    },
    RunFinished {
        total: usize,
        skipped: usize,
        uploaded: usize,
        failed: usize,
        cancelled: bool,
    },
}

impl BackupEvent {
    /// The `event` tag used in the serialized form.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            BackupEvent::ScanStarted { .. } => "scan_started",
            BackupEvent::ScanFinished { .. } => "scan_finished",
            BackupEvent::StateChanged { .. } => "state_changed",
            BackupEvent::Connected { .. } => "connected",
            BackupEvent::DecisionMade { .. } => "decision_made",
            BackupEvent::DirectoryEnsured { .. } => "directory_ensured",
            BackupEvent::UploadStarted { .. } => "upload_started",
            BackupEvent::UploadResult { .. } => "upload_result",
            BackupEvent::Reconnecting { .. } => "reconnecting",
            BackupEvent::RunFinished { .. } => "run_finished",
        }
    }
}

/// Receiver for progress events. Called from worker threads concurrently.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &BackupEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &BackupEvent) {}
}

pub mod json;
pub mod logging;
pub mod memory;

pub use json::JsonLinesSink;
pub use logging::LogSink;
pub use memory::MemorySink;
