//! Accumulator for the run result.
//!
//! Workers record through a shared reference; every write takes the lock, so
//! outcome recording is serialized even when uploads run concurrently. Each
//! registered candidate is completed exactly once.

use crate::error::RemoteIoError;
use crate::models::{FailureItem, FailureKind, OutcomeStatus, RunResult, TransferOutcome};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

struct Slot {
    path: String,
    is_dir: bool,
    done: bool,
}

#[derive(Default)]
struct LedgerState {
    slots: BTreeMap<usize, Slot>,
    total: usize,
    skipped: usize,
    uploaded: usize,
    failed: usize,
    retried: usize,
    excluded: usize,
    directories_ensured: usize,
    directories_failed: usize,
    bytes_uploaded: u64,
    failures: Vec<(usize, FailureItem)>,
    outcomes: Vec<(usize, TransferOutcome)>,
}

impl LedgerState {
    /// Mark `index` complete; `false` if unknown or already completed.
    fn complete(&mut self, index: usize) -> bool {
        match self.slots.get_mut(&index) {
            Some(slot) if !slot.done => {
                slot.done = true;
                true
            }
            Some(slot) => {
                log::warn!("Outcome for {} recorded twice; ignoring", slot.path);
                false
            }
            None => {
                log::warn!("Outcome for unregistered candidate #{index} ignored");
                false
            }
        }
    }

    fn push_failure(&mut self, index: usize, item: FailureItem) {
        self.failures.push((index, item));
    }
}

/// Run-wide fields of the result that the ledger does not count itself.
#[derive(Debug, Clone)]
pub struct ResultHeader {
    pub source_root: String,
    pub remote: String,
    pub transport: String,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RunLedger {
    state: Mutex<LedgerState>,
}

impl RunLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Register a regular-file candidate; it counts towards `total`.
    pub fn register_file(&self, index: usize, path: &str) {
        self.with(|s| {
            s.total += 1;
            s.slots.insert(
                index,
                Slot {
                    path: path.to_string(),
                    is_dir: false,
                    done: false,
                },
            );
        });
    }

    pub fn register_directory(&self, index: usize, path: &str) {
        self.with(|s| {
            s.slots.insert(
                index,
                Slot {
                    path: path.to_string(),
                    is_dir: true,
                    done: false,
                },
            );
        });
    }

    pub fn record_excluded(&self) {
        self.with(|s| s.excluded += 1);
    }

    /// A scan entry that could not be read: a candidate that failed before
    /// any decision.
    pub fn record_unreadable(&self, index: usize, path: &str, message: &str) {
        self.with(|s| {
            s.total += 1;
            s.failed += 1;
            s.push_failure(
                index,
                FailureItem {
                    path: path.to_string(),
                    kind: FailureKind::Unreadable,
                    attempts: 0,
                    message: message.to_string(),
                },
            );
        });
    }

    pub fn record_skip(&self, index: usize) {
        self.with(|s| {
            if s.complete(index) {
                s.skipped += 1;
            }
        });
    }

    pub fn record_probe_failure(&self, index: usize, attempts: u32, error: &RemoteIoError) {
        self.with(|s| {
            if s.complete(index) {
                s.failed += 1;
                let path = s.slots.get(&index).map(|slot| slot.path.clone());
                s.push_failure(
                    index,
                    FailureItem {
                        path: path.unwrap_or_else(|| error.path.clone()),
                        kind: FailureKind::Probe,
                        attempts,
                        message: error.to_string(),
                    },
                );
            }
        });
    }

    pub fn record_transfer(&self, index: usize, outcome: TransferOutcome) {
        self.with(|s| {
            if !s.complete(index) {
                return;
            }
            match outcome.status {
                OutcomeStatus::Failed => {
                    s.failed += 1;
                    s.push_failure(
                        index,
                        FailureItem {
                            path: outcome.path.clone(),
                            kind: FailureKind::Transfer,
                            attempts: outcome.attempts,
                            message: outcome.last_error.clone().unwrap_or_default(),
                        },
                    );
                }
                OutcomeStatus::RetriedSuccess => {
                    s.uploaded += 1;
                    s.retried += 1;
                    s.bytes_uploaded += outcome.bytes_transferred;
                }
                OutcomeStatus::Success | OutcomeStatus::Simulated => {
                    s.uploaded += 1;
                    s.bytes_uploaded += outcome.bytes_transferred;
                }
            }
            s.outcomes.push((index, outcome));
        });
    }

    /// Record the ensure-directory result for a registered directory.
    pub fn record_directory(
        &self,
        index: usize,
        attempts: u32,
        result: Result<(), &RemoteIoError>,
    ) {
        self.with(|s| {
            if !s.complete(index) {
                return;
            }
            match result {
                Ok(()) => s.directories_ensured += 1,
                Err(err) => {
                    s.directories_failed += 1;
                    let path = s.slots.get(&index).map(|slot| slot.path.clone());
                    s.push_failure(
                        index,
                        FailureItem {
                            path: path.unwrap_or_else(|| err.path.clone()),
                            kind: FailureKind::Directory,
                            attempts,
                            message: err.to_string(),
                        },
                    );
                }
            }
        });
    }

    /// The remote root could not be prepared. Reported ahead of every scan
    /// entry.
    pub fn record_root_failure(&self, attempts: u32, error: &RemoteIoError) {
        self.with(|s| {
            s.directories_failed += 1;
            s.failures.insert(
                0,
                (
                    0,
                    FailureItem {
                        path: error.path.clone(),
                        kind: FailureKind::Directory,
                        attempts,
                        message: error.to_string(),
                    },
                ),
            );
        });
    }

    /// Record every candidate not completed yet as a failure of `kind`.
    /// Returns how many were swept.
    pub fn sweep_unprocessed(&self, kind: FailureKind, message: &str) -> usize {
        self.with(|s| {
            let pending: Vec<(usize, String, bool)> = s
                .slots
                .iter_mut()
                .filter(|(_, slot)| !slot.done)
                .map(|(index, slot)| {
                    slot.done = true;
                    (*index, slot.path.clone(), slot.is_dir)
                })
                .collect();

            for (index, path, is_dir) in &pending {
                if *is_dir {
                    s.directories_failed += 1;
                } else {
                    s.failed += 1;
                }
                s.push_failure(
                    *index,
                    FailureItem {
                        path: path.clone(),
                        kind,
                        attempts: 0,
                        message: message.to_string(),
                    },
                );
            }
            pending.len()
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.with(|s| s.total)
    }

    /// Freeze into the immutable result handed to the caller. Failures and
    /// outcomes are ordered by scan position.
    #[must_use]
    pub fn into_result(self, header: ResultHeader) -> RunResult {
        let mut s = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        s.failures.sort_by_key(|(index, _)| *index);
        s.outcomes.sort_by_key(|(index, _)| *index);

        RunResult {
            source_root: header.source_root,
            remote: header.remote,
            transport: header.transport,
            dry_run: header.dry_run,
            cancelled: header.cancelled,
            total: s.total,
            skipped: s.skipped,
            uploaded: s.uploaded,
            failed: s.failed,
            retried: s.retried,
            excluded: s.excluded,
            directories_ensured: s.directories_ensured,
            directories_failed: s.directories_failed,
            bytes_uploaded: s.bytes_uploaded,
            failures: s.failures.into_iter().map(|(_, item)| item).collect(),
            outcomes: s.outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            started_at: header.started_at,
            finished_at: Utc::now(),
        }
    }
}
