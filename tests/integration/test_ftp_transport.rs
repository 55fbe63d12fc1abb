#[cfg(test)]
mod tests {
    use crate::fixtures::ftp_server::ScriptedFtpServer;
    use crate::fixtures::{T1, at, utc, write_file};
    use ftp_backup::transport::ftp::FtpTransport;
    use ftp_backup::{Credentials, Endpoint, RemoteErrorKind, Session, Timeouts, Transport};
    use std::time::Duration;
    use tempfile::TempDir;

    /// `1_700_000_000` in `MDTM` form.
    const T1_MDTM: &str = "20231114221320";

    fn connect(server: &ScriptedFtpServer) -> Box<dyn Session> {
        let timeouts = Timeouts {
            connect: Duration::from_secs(5),
            io: Duration::from_secs(5),
        };
        FtpTransport::new(true)
            .connect(
                &Endpoint::new("127.0.0.1", server.port(), "/backup"),
                &Credentials::password("backup", "secret"),
                &timeouts,
            )
            .unwrap()
    }

    fn index_of(commands: &[String], line: &str) -> usize {
        commands
            .iter()
            .position(|c| c == line)
            .unwrap_or_else(|| panic!("{line} not sent; got {commands:?}"))
    }

    #[test]
    fn test_upload_writes_temporary_then_renames() {
        let temp = TempDir::new().unwrap();
        let local = write_file(temp.path(), "a.txt", 11, at(T1));
        let server = ScriptedFtpServer::start();
        server.add_dir("/backup");

        let mut session = connect(&server);
        let written = session.upload(&local, "/backup/a.txt", utc(T1)).unwrap();
        session.disconnect().unwrap();

        assert_eq!(written, 11);
        assert_eq!(server.file("/backup/a.txt"), Some(vec![b'x'; 11]));
        assert_eq!(server.file("/backup/.a.txt.part"), None);

        let commands = server.commands();
        let stor = index_of(&commands, "STOR /backup/.a.txt.part");
        let rnfr = index_of(&commands, "RNFR /backup/.a.txt.part");
        let rnto = index_of(&commands, "RNTO /backup/a.txt");
        assert!(stor < rnfr && rnfr < rnto);
    }

    #[test]
    fn test_refused_rename_keeps_existing_copy() {
        let temp = TempDir::new().unwrap();
        let local = write_file(temp.path(), "a.txt", 11, at(T1));
        let server = ScriptedFtpServer::start();
        server.add_dir("/backup");
        server.put_file("/backup/a.txt", b"old", Some(T1_MDTM));
        server.script("RNTO /backup/a.txt", "553 File name not allowed");

        let mut session = connect(&server);
        let err = session
            .upload(&local, "/backup/a.txt", utc(T1))
            .unwrap_err();
        session.disconnect().unwrap();

        assert_eq!(err.kind, RemoteErrorKind::PermissionDenied);
        assert_eq!(err.bytes_transferred, 11);
        assert_eq!(server.file("/backup/a.txt"), Some(b"old".to_vec()));
        assert_eq!(server.file("/backup/.a.txt.part"), None);

        let commands = server.commands();
        assert!(!commands.iter().any(|c| c == "DELE /backup/a.txt"));
        index_of(&commands, "DELE /backup/.a.txt.part");
    }

    #[test]
    fn test_rename_onto_existing_file_replaces_it() {
        let temp = TempDir::new().unwrap();
        let local = write_file(temp.path(), "a.txt", 11, at(T1));
        let server = ScriptedFtpServer::start();
        server.add_dir("/backup");
        server.put_file("/backup/a.txt", b"old", None);
        server.script("RNTO /backup/a.txt", "550 File exists");

        let mut session = connect(&server);
        let written = session.upload(&local, "/backup/a.txt", utc(T1)).unwrap();
        session.disconnect().unwrap();

        assert_eq!(written, 11);
        assert_eq!(server.file("/backup/a.txt"), Some(vec![b'x'; 11]));
        assert_eq!(server.file("/backup/.a.txt.part"), None);

        let commands = server.commands();
        let delete = index_of(&commands, "DELE /backup/a.txt");
        let renames: Vec<usize> = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == "RNTO /backup/a.txt")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(renames.len(), 2);
        assert!(renames[0] < delete && delete < renames[1]);
    }

    #[test]
    fn test_rename_failure_without_destination_deletes_nothing_else() {
        let temp = TempDir::new().unwrap();
        let local = write_file(temp.path(), "a.txt", 11, at(T1));
        let server = ScriptedFtpServer::start();
        server.add_dir("/backup");
        server.script("RNTO /backup/a.txt", "550 Rename failed");

        let mut session = connect(&server);
        let err = session
            .upload(&local, "/backup/a.txt", utc(T1))
            .unwrap_err();
        session.disconnect().unwrap();

        assert_eq!(err.kind, RemoteErrorKind::Protocol);
        assert_eq!(server.file("/backup/a.txt"), None);
        assert_eq!(server.file("/backup/.a.txt.part"), None);
        assert!(
            !server
                .commands()
                .iter()
                .any(|c| c == "DELE /backup/a.txt")
        );
    }

    #[test]
    fn test_probe_reads_size_and_mdtm() {
        let server = ScriptedFtpServer::start();
        server.put_file("/backup/a.txt", b"hello world", Some(T1_MDTM));

        let mut session = connect(&server);
        let status = session.probe("/backup/a.txt").unwrap();
        let missing = session.probe("/backup/none.txt").unwrap();
        session.disconnect().unwrap();

        assert!(status.exists);
        assert_eq!(status.size_bytes, Some(11));
        assert_eq!(status.modified, Some(utc(T1)));
        assert!(!missing.exists);
    }

    #[test]
    fn test_unavailable_mdtm_leaves_mtime_unknown() {
        let server = ScriptedFtpServer::start();
        server.put_file("/backup/a.txt", b"hello world", None);

        let mut session = connect(&server);
        let status = session.probe("/backup/a.txt").unwrap();
        session.disconnect().unwrap();

        assert!(status.exists);
        assert_eq!(status.size_bytes, Some(11));
        assert_eq!(status.modified, None);
    }

    #[test]
    fn test_unsupported_size_falls_back_to_listing() {
        let server = ScriptedFtpServer::start();
        server.put_file("/backup/a.txt", b"hello world", Some(T1_MDTM));
        server.script("SIZE", "502 SIZE not implemented");

        let mut session = connect(&server);
        let status = session.probe("/backup/a.txt").unwrap();
        session.disconnect().unwrap();

        assert!(status.exists);
        assert_eq!(status.size_bytes, Some(11));
        assert_eq!(status.modified, None);
        index_of(&server.commands(), "LIST /backup/a.txt");
    }

    #[test]
    fn test_permission_denied_size_is_not_reported_missing() {
        let server = ScriptedFtpServer::start();
        server.put_file("/backup/a.txt", b"hello world", Some(T1_MDTM));
        server.script("SIZE /backup/a.txt", "550 Permission denied");

        let mut session = connect(&server);
        let err = session.probe("/backup/a.txt").unwrap_err();
        session.disconnect().unwrap();

        assert_eq!(err.kind, RemoteErrorKind::PermissionDenied);
        assert_eq!(err.path, "/backup/a.txt");
    }

    #[test]
    fn test_mkd_on_existing_directory_is_accepted() {
        let server = ScriptedFtpServer::start();
        server.add_dir("/backup");

        let mut session = connect(&server);
        session.ensure_directory("/backup/sub").unwrap();
        session.disconnect().unwrap();

        assert!(server.has_dir("/backup/sub"));
        let commands = server.commands();
        let mkd = index_of(&commands, "MKD /backup");
        let cwd = index_of(&commands, "CWD /backup");
        let create = index_of(&commands, "MKD /backup/sub");
        assert!(mkd < cwd && cwd < create);
    }

    #[test]
    fn test_mkd_blocked_by_a_file_fails() {
        let server = ScriptedFtpServer::start();
        server.add_dir("/backup");
        server.put_file("/backup/blocker", b"x", None);

        let mut session = connect(&server);
        let err = session.ensure_directory("/backup/blocker").unwrap_err();
        session.disconnect().unwrap();

        assert_eq!(err.path, "/backup/blocker");
        assert_eq!(err.kind, RemoteErrorKind::Protocol);
        assert!(!server.has_dir("/backup/blocker"));
    }
}
