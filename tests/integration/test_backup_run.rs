#[cfg(test)]
mod tests {
    use crate::fixtures::{
        MemoryServer, Op, T1, at, create_scenario_tree, credentials, endpoint, engine, options,
        position, utc, write_file,
    };
    use ftp_backup::{BackupEvent, DecisionKind, DecisionReason, OutcomeStatus, RunState};
    use tempfile::TempDir;

    fn reason_for(events: &[BackupEvent], path: &str) -> Option<DecisionReason> {
        events.iter().find_map(|e| match e {
            BackupEvent::DecisionMade { path: p, reason, .. } if p == path => Some(*reason),
            _ => None,
        })
    }

    #[test]
    fn test_empty_remote_uploads_everything() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.uploaded, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.failed, 0);
        assert_eq!(result.directories_ensured, 1);
        assert_eq!(result.bytes_uploaded, 150);
        assert!(result.is_consistent());
        assert!(result.is_complete_success());

        assert!(server.has_dir("/backup/sub"));
        assert_eq!(server.file("/backup/a.txt").unwrap().size, 100);
        assert_eq!(server.file("/backup/sub/b.txt").unwrap().size, 50);
        assert!(
            result
                .outcomes
                .iter()
                .all(|o| o.status == OutcomeStatus::Success && o.attempts == 1)
        );
    }

    #[test]
    fn test_partial_remote_skips_unchanged_file() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.put_file("/backup/a.txt", 100, utc(T1));
        let (engine, sink) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].path, "sub/b.txt");
        assert_eq!(
            reason_for(&sink.events(), "a.txt"),
            Some(DecisionReason::Unchanged)
        );
        assert!(
            !server
                .journal()
                .iter()
                .any(|op| matches!(op, Op::Upload { path, .. } if path == "/backup/a.txt"))
        );
    }

    #[test]
    fn test_remote_newer_or_equal_is_skipped() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.put_file("/backup/a.txt", 100, utc(T1 + 3600));
        let (engine, _) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_older_remote_copy_is_replaced() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.put_file("/backup/a.txt", 100, utc(T1 - 10));
        let (engine, sink) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.uploaded, 2);
        assert_eq!(
            reason_for(&sink.events(), "a.txt"),
            Some(DecisionReason::NewerLocalMtime)
        );
        assert_eq!(server.file("/backup/a.txt").unwrap().modified, Some(utc(T1)));
    }

    #[test]
    fn test_size_mismatch_is_uploaded() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.put_file("/backup/a.txt", 99, utc(T1 + 3600));
        let (engine, sink) = engine(&server);

        engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(
            reason_for(&sink.events(), "a.txt"),
            Some(DecisionReason::SizeMismatch)
        );
        assert_eq!(server.file("/backup/a.txt").unwrap().size, 100);
    }

    #[test]
    fn test_missing_remote_mtime_forces_upload() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        server.disable_mtime();
        server.put_file("/backup/a.txt", 100, utc(T1));
        let (engine, sink) = engine(&server);

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(result.uploaded, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(
            reason_for(&sink.events(), "a.txt"),
            Some(DecisionReason::RemoteMetadataUnavailableForcedUpload)
        );
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);

        let first = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();
        let second = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(first.uploaded, 2);
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(server.upload_count(), 2);
        assert!(second.is_consistent());
    }

    #[test]
    fn test_sub_second_local_mtime_does_not_reupload() {
        let temp = TempDir::new().unwrap();
        write_file(
            temp.path(),
            "precise.txt",
            10,
            at(T1) + std::time::Duration::from_millis(750),
        );
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);

        engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();
        let second = engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert_eq!(second.skipped, 1);
    }

    #[test]
    fn test_force_full_upload_ignores_remote_state() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, sink) = engine(&server);
        let opts = ftp_backup::BackupOptions {
            force_full_upload: true,
            ..options()
        };

        engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap();
        server.clear_journal();
        let second = engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap();

        assert_eq!(second.uploaded, 2);
        assert_eq!(server.upload_count(), 4);
        assert!(
            !server
                .journal()
                .iter()
                .any(|op| matches!(op, Op::Probe { .. }))
        );
        assert_eq!(
            reason_for(&sink.events(), "a.txt"),
            Some(DecisionReason::Forced)
        );
    }

    #[test]
    fn test_dry_run_never_mutates_remote() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);
        let opts = ftp_backup::BackupOptions {
            dry_run: true,
            ..options()
        };

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap();

        assert!(result.dry_run);
        assert_eq!(result.uploaded, 2);
        assert_eq!(result.directories_ensured, 1);
        assert!(
            result
                .outcomes
                .iter()
                .all(|o| o.status == OutcomeStatus::Simulated)
        );
        assert!(server.file_paths().is_empty());
        assert!(!server.has_dir("/backup"));
        assert!(
            server
                .journal()
                .iter()
                .all(|op| !matches!(op, Op::EnsureDir { .. } | Op::Upload { .. }))
        );
    }

    #[test]
    fn test_excluded_entries_are_counted_and_not_uploaded() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        write_file(temp.path(), "debug.log", 5, at(T1));
        write_file(temp.path(), "cache/blob.bin", 5, at(T1));
        write_file(temp.path(), "sub/trace.log", 5, at(T1));
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);
        let opts = ftp_backup::BackupOptions {
            exclude_patterns: vec!["*.log".to_string(), "cache".to_string()],
            ..options()
        };

        let result = engine
            .run(temp.path(), &endpoint(), &credentials(), &opts)
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.excluded, 3);
        assert_eq!(
            server.file_paths(),
            vec!["/backup/a.txt".to_string(), "/backup/sub/b.txt".to_string()]
        );
        assert!(!server.has_dir("/backup/cache"));
    }

    #[test]
    fn test_directory_is_ensured_before_its_files() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);

        engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        let journal = server.journal();
        let dir = position(
            &journal,
            |op| matches!(op, Op::EnsureDir { path, .. } if path == "/backup/sub"),
        )
        .unwrap();
        let file = position(
            &journal,
            |op| matches!(op, Op::Upload { path, .. } if path == "/backup/sub/b.txt"),
        )
        .unwrap();
        assert!(dir < file);
    }

    #[test]
    fn test_session_is_released_at_the_end() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, _) = engine(&server);

        engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        assert!(matches!(server.journal().last(), Some(Op::Disconnect { .. })));
    }

    #[test]
    fn test_event_stream_follows_run_states() {
        let temp = TempDir::new().unwrap();
        create_scenario_tree(temp.path());
        let server = MemoryServer::new();
        let (engine, sink) = engine(&server);

        engine
            .run(temp.path(), &endpoint(), &credentials(), &options())
            .unwrap();

        let events = sink.events();
        let states: Vec<RunState> = events
            .iter()
            .filter_map(|e| match e {
                BackupEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                RunState::Scanning,
                RunState::Deciding,
                RunState::Connecting,
                RunState::Transferring,
                RunState::Reporting,
                RunState::Done,
            ]
        );

        let directory_decision = events.iter().find_map(|e| match e {
            BackupEvent::DecisionMade {
                path, decision, reason,
            } if path == "sub" => Some((*decision, *reason)),
            _ => None,
        });
        assert_eq!(
            directory_decision,
            Some((DecisionKind::Upload, DecisionReason::Directory))
        );
        assert!(matches!(
            events.last(),
            Some(BackupEvent::StateChanged {
                to: RunState::Done,
                ..
            })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            BackupEvent::RunFinished {
                total: 2,
                uploaded: 2,
                ..
            }
        )));
    }
}
