//! One session's share of the transfer phase.
//!
//! A worker owns exactly one [`SessionGuard`]. It probes, decides and uploads
//! on that session, retries transient failures, and re-establishes the session
//! once per drop. When a reconnect fails the whole run is signalled to stop.

use super::ledger::RunLedger;
use super::retry::{Classified, RetryPolicy};
use crate::CancelToken;
use crate::error::{ConnectionError, RemoteErrorKind, RemoteIoError};
use crate::models::{FileEntry, OutcomeStatus, TransferDecision, TransferOutcome};
use crate::services::select::SelectionPolicy;
use crate::services::sink::{BackupEvent, EventSink};
use crate::transport::{Credentials, Endpoint, Session, SessionGuard, Timeouts, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// The run was stopped because a session could not be re-established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Set once by the first worker whose reconnect fails; keeps that error.
#[derive(Default)]
pub struct AbortSignal {
    flag: AtomicBool,
    error: Mutex<Option<ConnectionError>>,
}

impl AbortSignal {
    pub fn trigger(&self, error: ConnectionError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn take_error(&self) -> Option<ConnectionError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Everything a worker needs that is shared across the run.
pub struct RunContext<'a> {
    pub transport: &'a dyn Transport,
    pub endpoint: &'a Endpoint,
    pub credentials: &'a Credentials,
    pub timeouts: Timeouts,
    pub policy: SelectionPolicy,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    pub cancel: &'a CancelToken,
    pub sink: &'a dyn EventSink,
    pub ledger: &'a RunLedger,
    pub abort: &'a AbortSignal,
}

impl RunContext<'_> {
    /// No new work may be scheduled.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_set()
    }
}

/// A scanned entry scheduled for processing, keyed by its scan position.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub entry: FileEntry,
    /// Set when the decision did not need the remote side.
    pub decision: Option<TransferDecision>,
}

/// Result of a retried operation.
struct Attempted<T, E> {
    result: Result<T, E>,
    attempts: u32,
    last_error: Option<String>,
}

pub struct Worker<'a> {
    id: usize,
    guard: SessionGuard,
    ctx: &'a RunContext<'a>,
}

impl<'a> Worker<'a> {
    pub fn new(id: usize, session: Box<dyn Session>, ctx: &'a RunContext<'a>) -> Self {
        Self {
            id,
            guard: SessionGuard::new(session, format!("worker-{id}")),
            ctx,
        }
    }

    /// Open an additional session. A worker that cannot connect is dropped;
    /// the others carry on.
    pub fn connect(id: usize, ctx: &'a RunContext<'a>) -> Option<Self> {
        match ctx
            .transport
            .connect(ctx.endpoint, ctx.credentials, &ctx.timeouts)
        {
            Ok(session) => {
                ctx.sink.emit(&BackupEvent::Connected {
                    endpoint: ctx.endpoint.to_string(),
                    worker: id,
                });
                Some(Self::new(id, session, ctx))
            }
            Err(err) => {
                log::warn!("Worker {id} could not connect, continuing without it: {err}");
                None
            }
        }
    }

    /// Make sure the remote root exists before anything is placed in it.
    pub fn ensure_root(&mut self) -> Result<(), Aborted> {
        let root = self.ctx.endpoint.remote_root.clone();
        let attempted = self.with_retry(&root, |session, _| session.ensure_directory(&root))?;
        match attempted.result {
            Ok(()) => log::debug!("Remote root {root} ready"),
            Err(err) => {
                log::error!("Remote root {root} could not be prepared: {err}");
                self.ctx.sink.emit(&BackupEvent::DirectoryEnsured {
                    path: root,
                    ok: false,
                    error: Some(err.to_string()),
                });
                self.ctx.ledger.record_root_failure(attempted.attempts, &err);
            }
        }
        Ok(())
    }

    pub fn ensure_directory(&mut self, candidate: &Candidate) -> Result<(), Aborted> {
        let relative_path = &candidate.entry.relative_path;
        let ledger = self.ctx.ledger;

        if self.ctx.dry_run {
            ledger.record_directory(candidate.index, 0, Ok(()));
            return Ok(());
        }

        let remote = self.ctx.endpoint.remote_path(relative_path);
        let attempted =
            self.with_retry(&remote, |session, _| session.ensure_directory(&remote))?;

        self.ctx.sink.emit(&BackupEvent::DirectoryEnsured {
            path: relative_path.clone(),
            ok: attempted.result.is_ok(),
            error: attempted.result.as_ref().err().map(ToString::to_string),
        });
        ledger.record_directory(
            candidate.index,
            attempted.attempts,
            attempted.result.as_ref().map(|_| ()),
        );
        Ok(())
    }

    /// Pull candidates until the queue is empty or the run must stop.
    pub fn drain(mut self, queue: &Mutex<VecDeque<Candidate>>) {
        loop {
            if self.ctx.should_stop() {
                log::debug!("Worker {} stops scheduling", self.id);
                break;
            }
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(candidate) = next else {
                break;
            };
            if self.process_file(candidate).is_err() {
                break;
            }
        }
    }

    /// Decide (probing if needed) and act on one regular file.
    pub fn process_file(&mut self, candidate: Candidate) -> Result<(), Aborted> {
        let Candidate {
            index,
            entry,
            decision,
        } = candidate;
        let remote = self.ctx.endpoint.remote_path(&entry.relative_path);
        let ledger = self.ctx.ledger;

        let mut probe_attempts = 0;
        let decision = match decision {
            Some(decision) => decision,
            None => {
                let policy = self.ctx.policy;
                let mut aborted = false;
                let decision = policy.decide(&entry, || {
                    match self.with_retry(&remote, |session, _| session.probe(&remote)) {
                        Ok(attempted) => {
                            probe_attempts = attempted.attempts;
                            attempted.result
                        }
                        Err(Aborted) => {
                            aborted = true;
                            Err(RemoteIoError::new(
                                &remote,
                                RemoteErrorKind::ConnectionLost,
                                "run aborted",
                            ))
                        }
                    }
                });
                if aborted {
                    return Err(Aborted);
                }
                self.ctx.sink.emit(&BackupEvent::DecisionMade {
                    path: entry.relative_path.clone(),
                    decision: decision.kind(),
                    reason: decision.reason(),
                });
                decision
            }
        };

        match decision {
            TransferDecision::Skip(_) => ledger.record_skip(index),
            TransferDecision::FailPrecondition(err) => {
                log::warn!("Cannot decide on {}: {err}", entry.relative_path);
                ledger.record_probe_failure(index, probe_attempts, &err);
            }
            TransferDecision::Upload(_) if self.ctx.dry_run => {
                self.finish_upload(
                    index,
                    TransferOutcome {
                        path: entry.relative_path.clone(),
                        status: OutcomeStatus::Simulated,
                        attempts: 0,
                        bytes_transferred: 0,
                        last_error: None,
                    },
                );
            }
            TransferDecision::Upload(_) => self.upload(index, &entry, &remote)?,
        }
        Ok(())
    }

    fn upload(&mut self, index: usize, entry: &FileEntry, remote: &str) -> Result<(), Aborted> {
        let sink = self.ctx.sink;
        let attempted = self.with_retry(remote, |session, attempt| {
            sink.emit(&BackupEvent::UploadStarted {
                path: entry.relative_path.clone(),
                attempt,
            });
            session.upload(&entry.local_path, remote, entry.modified)
        })?;

        let outcome = match attempted.result {
            Ok(bytes) => TransferOutcome {
                path: entry.relative_path.clone(),
                status: if attempted.attempts > 1 {
                    OutcomeStatus::RetriedSuccess
                } else {
                    OutcomeStatus::Success
                },
                attempts: attempted.attempts,
                bytes_transferred: bytes,
                last_error: attempted.last_error,
            },
            Err(err) => TransferOutcome {
                path: entry.relative_path.clone(),
                status: OutcomeStatus::Failed,
                attempts: attempted.attempts,
                bytes_transferred: err.bytes_transferred,
                last_error: Some(err.to_string()),
            },
        };
        self.finish_upload(index, outcome);
        Ok(())
    }

    fn finish_upload(&self, index: usize, outcome: TransferOutcome) {
        self.ctx.sink.emit(&BackupEvent::UploadResult {
            path: outcome.path.clone(),
            status: outcome.status,
            attempts: outcome.attempts,
            bytes: outcome.bytes_transferred,
            error: match outcome.status {
                OutcomeStatus::Failed => outcome.last_error.clone(),
                _ => None,
            },
        });
        self.ctx.ledger.record_transfer(index, outcome);
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// A dropped session is replaced before the next attempt. `Err(Aborted)`
    /// means the replacement failed and the run is over.
    fn with_retry<T, E: Classified>(
        &mut self,
        path: &str,
        mut op: impl FnMut(&mut dyn Session, u32) -> Result<T, E>,
    ) -> Result<Attempted<T, E>, Aborted> {
        let retry = self.ctx.retry;
        let mut attempt = 0u32;
        let mut last_error = None;

        loop {
            if self.ctx.abort.is_set() {
                return Err(Aborted);
            }
            let Some(session) = self.guard.get() else {
                self.reconnect("no live session")?;
                continue;
            };

            attempt += 1;
            let err = match op(session, attempt) {
                Ok(value) => {
                    return Ok(Attempted {
                        result: Ok(value),
                        attempts: attempt,
                        last_error,
                    });
                }
                Err(err) => err,
            };

            let kind = err.kind();
            log::debug!("{path}: attempt {attempt} failed ({kind}): {err}");
            last_error = Some(err.to_string());

            if kind == RemoteErrorKind::ConnectionLost && !self.ctx.cancel.is_cancelled() {
                self.reconnect(&err.to_string())?;
            }
            if !retry.should_retry(attempt, kind) || self.ctx.cancel.is_cancelled() {
                return Ok(Attempted {
                    result: Err(err),
                    attempts: attempt,
                    last_error,
                });
            }
            retry.wait(attempt);
        }
    }

    fn reconnect(&mut self, reason: &str) -> Result<(), Aborted> {
        if self.ctx.abort.is_set() {
            return Err(Aborted);
        }
        log::warn!("Worker {} lost its session: {reason}", self.id);
        self.ctx.sink.emit(&BackupEvent::Reconnecting {
            worker: self.id,
            reason: reason.to_string(),
        });
        self.guard.release();

        match self
            .ctx
            .transport
            .connect(self.ctx.endpoint, self.ctx.credentials, &self.ctx.timeouts)
        {
            Ok(session) => {
                self.guard.replace(session);
                self.ctx.sink.emit(&BackupEvent::Connected {
                    endpoint: self.ctx.endpoint.to_string(),
                    worker: self.id,
                });
                Ok(())
            }
            Err(err) => {
                log::error!("Worker {} could not reconnect: {err}", self.id);
                self.ctx.abort.trigger(err);
                Err(Aborted)
            }
        }
    }
}
