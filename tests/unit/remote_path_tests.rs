#[cfg(test)]
mod tests {
    use ftp_backup::transport::{ancestor_chain, join_remote, temporary_name};
    use ftp_backup::{Endpoint, Secret, TransportKind};
    use std::path::PathBuf;

    #[test]
    fn test_join_remote_uses_single_slashes() {
        assert_eq!(join_remote("/backup", "a/b.txt"), "/backup/a/b.txt");
        assert_eq!(join_remote("/backup/", "/a/b.txt"), "/backup/a/b.txt");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote("/backup", ""), "/backup");
        assert_eq!(join_remote("", "a.txt"), "a.txt");
        assert_eq!(join_remote("", ""), ".");
        assert_eq!(join_remote("relative/root", "x"), "relative/root/x");
    }

    #[test]
    fn test_ancestor_chain_lists_every_prefix() {
        assert_eq!(
            ancestor_chain("/srv/backup/host"),
            vec!["/srv", "/srv/backup", "/srv/backup/host"]
        );
        assert_eq!(ancestor_chain("a/./b/"), vec!["a", "a/b"]);
        assert!(ancestor_chain("/").is_empty());
    }

    #[test]
    fn test_temporary_name_is_a_hidden_sibling() {
        assert_eq!(temporary_name("/backup/sub/b.txt"), "/backup/sub/.b.txt.part");
        assert_eq!(temporary_name("b.txt"), ".b.txt.part");
    }

    #[test]
    fn test_endpoint_display_and_remote_path() {
        let endpoint = Endpoint::new("ftp.example.org", 21, "backup");
        assert_eq!(endpoint.to_string(), "ftp.example.org:21/backup");
        assert_eq!(endpoint.remote_path("a/b"), "backup/a/b");

        let rooted = Endpoint::new("h", 22, "/");
        assert_eq!(rooted.to_string(), "h:22/");
        assert_eq!(rooted.remote_path("x.txt"), "/x.txt");
    }

    #[test]
    fn test_secret_debug_hides_passwords() {
        let rendered = format!("{:?}", Secret::Password("hunter2".to_string()));
        assert!(!rendered.contains("hunter2"));

        let key = Secret::KeyFile {
            path: PathBuf::from("/home/u/.ssh/id_ed25519"),
            passphrase: Some("also-secret".to_string()),
        };
        let rendered = format!("{key:?}");
        assert!(rendered.contains("id_ed25519"));
        assert!(!rendered.contains("also-secret"));
    }

    #[test]
    fn test_transport_kind_defaults() {
        assert_eq!(TransportKind::Ftp.default_port(), 21);
        assert_eq!(TransportKind::Sftp.default_port(), 22);
        assert_eq!(TransportKind::Sftp.to_string(), "sftp");
    }
}
