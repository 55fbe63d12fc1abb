//! Backup orchestrator: scan, decide, connect, transfer, report.
//!
//! Phases run in the order of [`RunState`]. Local decisions (directories,
//! forced uploads) are made while `Deciding`; decisions that need the remote
//! side are made during `Transferring`, on the session that performs the
//! upload.
//!
//! Directories are ensured first, in scan order, on the primary session, so
//! every directory exists before any worker starts placing files. Files are
//! then pulled from a shared queue by up to `concurrency` workers, each with
//! its own session.

pub mod ledger;
pub mod retry;
pub mod state;
mod worker;

pub use ledger::RunLedger;
pub use retry::RetryPolicy;
pub use state::{RunState, StateMachine};

use self::ledger::ResultHeader;
use self::worker::{AbortSignal, Candidate, RunContext, Worker};
use crate::BackupOptions;
use crate::error::RunError;
use crate::models::{FailureKind, RunResult};
use crate::services::scan::{self, ExcludeSet, ScanItem, ScanOptions};
use crate::services::select::SelectionPolicy;
use crate::services::sink::{BackupEvent, EventSink, NullSink};
use crate::transport::{Credentials, Endpoint, Transport, TransportKind};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Runs backups through one transport.
pub struct BackupEngine {
    transport: Box<dyn Transport>,
    sink: Arc<dyn EventSink>,
}

impl BackupEngine {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            sink: Arc::new(NullSink),
        }
    }

    /// Send progress events to `sink` instead of discarding them.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Back up `source_root` to `endpoint`.
    ///
    /// Per-file problems end up in the returned [`RunResult`]. An unusable
    /// source root, a failed initial connection, or a failed reconnect end
    /// the run with a [`RunError`]; the last one carries the partial result.
    pub fn run(
        &self,
        source_root: &Path,
        endpoint: &Endpoint,
        credentials: &Credentials,
        options: &BackupOptions,
    ) -> Result<RunResult, RunError> {
        let started_at = Utc::now();
        let sink = self.sink.as_ref();
        let mut state = StateMachine::new(sink);
        let exclude = ExcludeSet::new(&options.exclude_patterns)?;

        // Scanning
        state.advance(RunState::Scanning);
        let scan_options = ScanOptions {
            exclude,
            follow_symlinks: options.follow_symlinks,
            max_depth: options.max_depth,
        };
        let scanner = match scan::scan(source_root, &scan_options) {
            Ok(scanner) => scanner,
            Err(err) => {
                log::error!("Cannot scan {}: {err}", source_root.display());
                state.advance(RunState::Failed);
                return Err(err.into());
            }
        };
        sink.emit(&BackupEvent::ScanStarted {
            root: source_root.display().to_string(),
        });

        let ledger = RunLedger::new();
        let (mut directories, mut files) = plan(scanner, &ledger, sink);

        // Deciding
        state.advance(RunState::Deciding);
        let policy = SelectionPolicy::new(options.force_full_upload);
        for candidate in directories.iter_mut().chain(files.iter_mut()) {
            if let Some(decision) = policy.decide_locally(&candidate.entry) {
                sink.emit(&BackupEvent::DecisionMade {
                    path: candidate.entry.relative_path.clone(),
                    decision: decision.kind(),
                    reason: decision.reason(),
                });
                candidate.decision = Some(decision);
            }
        }

        // Connecting
        state.advance(RunState::Connecting);
        let session = match self
            .transport
            .connect(endpoint, credentials, &options.timeouts)
        {
            Ok(session) => session,
            Err(err) => {
                log::error!("Connection to {endpoint} failed: {err}");
                state.advance(RunState::Failed);
                return Err(RunError::Connect(err));
            }
        };
        sink.emit(&BackupEvent::Connected {
            endpoint: endpoint.to_string(),
            worker: 0,
        });

        // Transferring
        state.advance(RunState::Transferring);
        let abort = AbortSignal::default();
        let ctx = RunContext {
            transport: self.transport.as_ref(),
            endpoint,
            credentials,
            timeouts: options.timeouts,
            policy,
            retry: RetryPolicy::new(options.max_retries, options.retry_backoff),
            dry_run: options.dry_run,
            cancel: &options.cancel,
            sink,
            ledger: &ledger,
            abort: &abort,
        };

        let mut primary = Worker::new(0, session, &ctx);
        let mut ready = options.dry_run || primary.ensure_root().is_ok();
        for candidate in &directories {
            if !ready || ctx.should_stop() {
                break;
            }
            ready = primary.ensure_directory(candidate).is_ok();
        }
        if ready && !ctx.should_stop() {
            transfer_files(primary, files, &ctx, options.concurrency);
        } else {
            drop(primary);
        }

        let reconnect_error = abort.take_error();
        let cancelled = options.cancel.is_cancelled();
        let swept = match (&reconnect_error, cancelled) {
            (Some(_), _) => ledger.sweep_unprocessed(
                FailureKind::Aborted,
                "not processed: the connection could not be re-established",
            ),
            (None, true) => ledger.sweep_unprocessed(
                FailureKind::Cancelled,
                "not processed: the run was cancelled",
            ),
            (None, false) => ledger.sweep_unprocessed(FailureKind::Aborted, "not processed"),
        };
        if swept > 0 {
            log::warn!("{swept} entries were not processed");
        }

        let header = ResultHeader {
            source_root: source_root.display().to_string(),
            remote: endpoint.to_string(),
            transport: self.transport.kind().as_str().to_string(),
            dry_run: options.dry_run,
            cancelled,
            started_at,
        };

        match reconnect_error {
            Some(source) => {
                let partial = ledger.into_result(header);
                emit_finished(sink, &partial);
                state.advance(RunState::Failed);
                Err(RunError::ReconnectFailed {
                    source,
                    partial: Box::new(partial),
                })
            }
            None => {
                state.advance(RunState::Reporting);
                let result = ledger.into_result(header);
                emit_finished(sink, &result);
                state.advance(RunState::Done);
                Ok(result)
            }
        }
    }
}

/// Drain the scan into directory and file candidates, recording excluded and
/// unreadable entries on the way.
fn plan(
    scanner: scan::Scanner,
    ledger: &RunLedger,
    sink: &dyn EventSink,
) -> (Vec<Candidate>, Vec<Candidate>) {
    let mut directories = Vec::new();
    let mut files = Vec::new();
    let (mut excluded, mut unreadable) = (0usize, 0usize);

    for (index, item) in scanner.enumerate() {
        match item {
            ScanItem::Entry(entry) => {
                if entry.is_dir {
                    ledger.register_directory(index, &entry.relative_path);
                    directories.push(Candidate {
                        index,
                        entry,
                        decision: None,
                    });
                } else {
                    ledger.register_file(index, &entry.relative_path);
                    files.push(Candidate {
                        index,
                        entry,
                        decision: None,
                    });
                }
            }
            ScanItem::Excluded { .. } => {
                ledger.record_excluded();
                excluded += 1;
            }
            ScanItem::Unreadable {
                relative_path,
                code,
                message,
                ..
            } => {
                ledger.record_unreadable(index, &relative_path, &format!("{code}: {message}"));
                unreadable += 1;
            }
        }
    }

    sink.emit(&BackupEvent::ScanFinished {
        entries: directories.len() + files.len(),
        excluded,
        unreadable,
    });
    (directories, files)
}

fn transfer_files(
    primary: Worker<'_>,
    files: Vec<Candidate>,
    ctx: &RunContext<'_>,
    concurrency: usize,
) {
    let workers = concurrency.clamp(1, files.len().max(1));
    let queue = Mutex::new(VecDeque::from(files));

    if workers == 1 {
        primary.drain(&queue);
        return;
    }

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("upload-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            log::warn!("Could not start upload workers, using one session: {err}");
            primary.drain(&queue);
            return;
        }
    };

    log::debug!("Transferring with {workers} sessions");
    let queue = &queue;
    pool.scope(|scope| {
        scope.spawn(move |_| primary.drain(queue));
        for id in 1..workers {
            scope.spawn(move |_| {
                if let Some(worker) = Worker::connect(id, ctx) {
                    worker.drain(queue);
                }
            });
        }
    });
}

fn emit_finished(sink: &dyn EventSink, result: &RunResult) {
    sink.emit(&BackupEvent::RunFinished {
        total: result.total,
        skipped: result.skipped,
        uploaded: result.uploaded,
        failed: result.failed,
        cancelled: result.cancelled,
    });
}
