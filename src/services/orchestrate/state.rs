//! Run state machine.

use crate::services::sink::{BackupEvent, EventSink};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Scanning,
    Deciding,
    Connecting,
    Transferring,
    Reporting,
    Done,
    Failed,
}

impl RunState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Scanning => "scanning",
            RunState::Deciding => "deciding",
            RunState::Connecting => "connecting",
            RunState::Transferring => "transferring",
            RunState::Reporting => "reporting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `Failed` is entered when the initial connection fails. An unusable
    /// source root fails the run from `Scanning`; a dropped session that
    /// cannot be re-established fails it from `Transferring`.
    #[must_use]
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::{
            Connecting, Deciding, Done, Failed, Idle, Reporting, Scanning, Transferring,
        };
        matches!(
            (*self, next),
            (Idle, Scanning)
                | (Scanning, Deciding)
                | (Deciding, Connecting)
                | (Connecting, Transferring)
                | (Transferring, Reporting)
                | (Reporting, Done)
                | (Connecting | Scanning | Transferring, Failed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state and announces every transition.
pub struct StateMachine<'a> {
    current: RunState,
    sink: &'a dyn EventSink,
}

impl<'a> StateMachine<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            current: RunState::Idle,
            sink,
        }
    }

    #[must_use]
    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.current.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.current
        );
        if !self.current.can_transition_to(next) {
            log::warn!("Unexpected state transition {} -> {next}", self.current);
        }
        log::trace!("State {} -> {next}", self.current);
        let from = std::mem::replace(&mut self.current, next);
        self.sink.emit(&BackupEvent::StateChanged { from, to: next });
    }
}
