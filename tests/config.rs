use std::time::Duration;

use assert_matches::assert_matches;

use bed_to_tabix::config::{ConfigLoader, Overrides};
use bed_to_tabix::domain::Transport;
use bed_to_tabix::error::TabixError;

#[test]
fn loads_explicit_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bed-to-tabix.json");
    std::fs::write(
        &path,
        r#"{
            "concurrency": 3,
            "compressed": false,
            "transport": "http",
            "max_attempts": 5,
            "attempt_timeout_secs": 30,
            "archive": { "http_base": "http://mirror.example.org/1000g" }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(&path), Overrides::default()).unwrap();
    assert_eq!(resolved.concurrency, 3);
    assert!(!resolved.compressed);
    assert_eq!(resolved.transport, Transport::Http);
    assert_eq!(resolved.retry.max_attempts, 5);
    assert_eq!(resolved.attempt_timeout, Duration::from_secs(30));
    assert_eq!(resolved.archive.http_base, "http://mirror.example.org/1000g");
    assert!(resolved.archive.ftp_base.starts_with("ftp://"));
}

#[test]
fn malformed_config_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ \"concurrency\": \"many\" }").unwrap();
    let err = ConfigLoader::resolve(Some(&path), Overrides::default()).unwrap_err();
    assert_matches!(err, TabixError::ConfigParse(_));

    let missing = temp.path().join("missing.json");
    let err = ConfigLoader::resolve(Some(&missing), Overrides::default()).unwrap_err();
    assert_matches!(err, TabixError::ConfigRead(_));
}
