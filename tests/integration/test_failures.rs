#[cfg(test)]
mod tests {
    use crate::fixtures::{
        MemoryServer, Op, T1, at, create_scenario_tree, credentials, endpoint, engine, options,
        utc, write_file,
    };
    use ftp_backup::cli::app::{EXIT_FAILURE, EXIT_PARTIAL, exit_code};
    use ftp_backup::{
        BackupEvent, BackupOptions, CancelToken, ConnectionError, FailureKind, OutcomeStatus,
        RemoteErrorKind, RunError, RunState, ScanError,
    };
    use std::path::Path;
    use tempfile::TempDir;

    fn three_files(root: &Path) {
        write_file(root, "a.txt", 10, at(T1));
        write_file(root, "b.txt", 20, at(T1));
        write_file(root, "c.txt", 30, at(T1));
    }

    #[test]
    fn test_auth_failure_aborts_before_any_transfer() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.fail_auth();
        let (engine, sink) = engine(&server);

        let outcome = engine.run(temp.path(), &endpoint(), &credentials(), &options());

        assert!(matches!(
            outcome,
            Err(RunError::Connect(ConnectionError::Auth { .. }))
        ));
        assert!(server.journal().is_empty());
        assert_eq!(exit_code(&outcome), EXIT_FAILURE);

        let events = sink.events();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, BackupEvent::ScanFinished { entries: 3, .. }))
        );
        assert!(matches!(
            events.last(),
            Some(BackupEvent::StateChanged {
                from: RunState::Connecting,
                to: RunState::Failed,
            })
        ));
    }

    #[test]
    fn test_unreachable_server_is_a_connect_error() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.set_unreachable();
        let (engine, _) = engine(&server);

        let err = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap_err();

        match err {
            RunError::Connect(inner) => assert_eq!(inner.code(), "unreachable"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_source_root_fails_without_connecting() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);

        let err = engine
            .run(&missing, &endpoint(), &credentials(), &options())
            .unwrap_err();

        assert!(matches!(err, RunError::Scan(ScanError::NotFound(_))));
        assert_eq!(server.connects(), 0);
    }

    #[test]
    fn test_invalid_exclude_pattern_is_rejected() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);
        let opts = BackupOptions {
            exclude_patterns: vec!["[unclosed".to_string()],
            ..options()
        };

        let err = engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap_err();

        assert!(matches!(err, RunError::Exclude(_)));
        assert_eq!(server.connects(), 0);
    }

    #[test]
    fn test_transient_failures_end_in_retried_success() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        server.fail_uploads(
            "/backup/c.txt",
            &[RemoteErrorKind::Timeout, RemoteErrorKind::Timeout],
        );
        let (engine, _) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.uploaded, 3);
        assert_eq!(result.retried, 1);
        let c = result.outcomes.iter().find(|o| o.path == "c.txt").unwrap();
        assert_eq!(c.status, OutcomeStatus::RetriedSuccess);
        assert_eq!(c.attempts, 3);
        assert!(c.last_error.is_some());
        assert!(result.is_complete_success());
    }

    #[test]
    fn test_exhausted_retries_fail_only_that_file() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        server.fail_uploads("/backup/b.txt", &[RemoteErrorKind::Protocol; 5]);
        let (engine, _) = engine(&server);
        let opts = BackupOptions {
            max_retries: 2,
            ..options()
        };

        let outcome = engine.run(temp.path(), &endpoint(), &credentials(), &opts);
        let result = outcome.as_ref().unwrap();

        assert_eq!(result.uploaded, 2);
        assert_eq!(result.failed, 1);
        assert!(result.is_consistent());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, "b.txt");
        assert_eq!(result.failures[0].kind, FailureKind::Transfer);
        assert_eq!(result.failures[0].attempts, 3);
        assert!(server.file("/backup/b.txt").is_none());
        assert_eq!(exit_code(&outcome), EXIT_PARTIAL);
    }

    #[test]
    fn test_permission_denied_is_not_retried() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        server.fail_uploads("/backup/a.txt", &[RemoteErrorKind::PermissionDenied]);
        let (engine, sink) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].attempts, 1);
        let starts = sink
            .events()
            .iter()
            .filter(|e| matches!(e, BackupEvent::UploadStarted { path, .. } if path == "a.txt"))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_probe_failure_is_recorded_and_run_continues() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        server.fail_probes("/backup/a.txt", &[RemoteErrorKind::PermissionDenied]);
        let (engine, _) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.uploaded, 2);
        assert_eq!(result.failures[0].kind, FailureKind::Probe);
        assert_eq!(result.failures[0].attempts, 1);
        assert!(server.file("/backup/a.txt").is_none());
    }

    #[test]
    fn test_dropped_session_is_reestablished() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        server.fail_uploads("/backup/a.txt", &[RemoteErrorKind::ConnectionLost]);
        let (engine, sink) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(server.connects(), 2);
        assert_eq!(result.uploaded, 3);
        let a = &result.outcomes[0];
        assert_eq!(a.path, "a.txt");
        assert_eq!(a.status, OutcomeStatus::RetriedSuccess);
        assert_eq!(a.attempts, 2);
        assert!(
            sink.events()
                .iter()
                .any(|e| matches!(e, BackupEvent::Reconnecting { worker: 0, .. }))
        );
    }

    #[test]
    fn test_failed_reconnect_returns_partial_result() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        server.refuse_reconnect();
        server.fail_uploads("/backup/b.txt", &[RemoteErrorKind::ConnectionLost]);
        let (engine, sink) = engine(&server);

        let outcome = engine.run(temp.path(), &endpoint(), &credentials(), &options());
        assert_eq!(exit_code(&outcome), EXIT_FAILURE);
        let Err(RunError::ReconnectFailed { partial, .. }) = outcome else {
            panic!("expected a reconnect failure");
        };

        assert_eq!(partial.total, 3);
        assert_eq!(partial.uploaded, 1);
        assert_eq!(partial.failed, 2);
        assert!(partial.is_consistent());
        assert!(
            partial
                .failures
                .iter()
                .all(|f| f.kind == FailureKind::Aborted)
        );
        let paths: Vec<&str> = partial.failures.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "c.txt"]);
        assert!(matches!(
            sink.events().last(),
            Some(BackupEvent::StateChanged {
                from: RunState::Transferring,
                to: RunState::Failed,
            })
        ));
    }

    #[test]
    fn test_cancellation_stops_scheduling() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        let server = MemoryServer::new();
        let cancel = CancelToken::new();
        server.cancel_after_uploads(1, cancel.clone());
        let (engine, _) = engine(&server);
        let opts = BackupOptions {
            cancel,
            ..options()
        };

        let outcome = engine.run(temp.path(), &endpoint(), &credentials(), &opts);
        let result = outcome.as_ref().unwrap();

        assert!(result.cancelled);
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.failed, 2);
        assert!(result.is_consistent());
        assert!(
            result
                .failures
                .iter()
                .all(|f| f.kind == FailureKind::Cancelled)
        );
        assert_eq!(server.upload_count(), 1);
        assert_eq!(exit_code(&outcome), EXIT_PARTIAL);
    }

    #[test]
    fn test_cancelled_before_start_transfers_nothing() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let (engine, _) = engine(&server);
        let opts = BackupOptions {
            cancel,
            ..options()
        };

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.uploaded, 0);
        assert_eq!(result.failed, 2);
        assert_eq!(result.directories_failed, 1);
        assert!(
            !server
                .journal()
                .iter()
                .any(|op| matches!(op, Op::Upload { .. }))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_is_reported_not_fatal() {
        let temp = TempDir::new().unwrap();
        three_files(temp.path());
        std::os::unix::fs::symlink(temp.path().join("gone"), temp.path().join("dangling"))
            .unwrap();
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);
        let opts = BackupOptions {
            follow_symlinks: true,
            ..options()
        };

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap();

        assert_eq!(result.total, 4);
        assert_eq!(result.uploaded, 3);
        assert_eq!(result.failed, 1);
        assert!(result.is_consistent());
        assert_eq!(result.failures[0].path, "dangling");
        assert_eq!(result.failures[0].kind, FailureKind::Unreadable);
        assert!(result.failures[0].message.starts_with("ENOENT"));
    }

    #[test]
    fn test_directory_failure_does_not_stop_other_files() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        // A plain file occupies the directory's remote name.
        server.put_file("/backup/sub", 1, utc(T1));
        let (engine, _) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.directories_failed, 1);
        assert_eq!(result.failures[0].kind, FailureKind::Directory);
        assert_eq!(result.failures[0].path, "sub");
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.failed, 1);
        assert!(result.is_consistent());
        assert!(!result.is_complete_success());
    }
}
