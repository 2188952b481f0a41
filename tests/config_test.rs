use std::fs;

use cluster_harness::cluster::{flatfile, formation_timeout, HostAddr};
use cluster_harness::config::{resolve, ConfigOverrides, ConfigSource};
use cluster_harness::HarnessError;

const TWO_HOSTS: &str = r#"{
    "ip": ["192.168.1.17", "192.168.1.18"],
    "h2o_per_host": 3,
    "base_port": 56000,
    "username": "tester",
    "password": "secret",
    "use_flatfile": true,
    "java_heap_GB": 14
}"#;

#[test]
fn test_remote_document_to_peer_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hosts.json");
    fs::write(&path, TWO_HOSTS).unwrap();

    let spec = tokio_test::assert_ok!(resolve(&ConfigOverrides::default(), &ConfigSource::Path(path)));
    assert!(!spec.is_local());
    assert_eq!(spec.expected_size(), 6);
    assert_eq!(spec.java_heap_gb, Some(14));
    assert_eq!(formation_timeout(&spec).as_secs(), 60);

    let peers = flatfile::compute(&spec);
    assert_eq!(peers.len(), 6);
    let first_host: Vec<u16> = peers.on_host(&HostAddr::new("192.168.1.17")).map(|p| p.port).collect();
    assert_eq!(first_host, vec![56000, 56002, 56004]);

    let written = flatfile::write(&peers, dir.path()).unwrap();
    let content = fs::read_to_string(written).unwrap();
    assert_eq!(content.lines().count(), 6);
    assert_eq!(content.lines().last(), Some("192.168.1.18:56004"));
}

#[test]
fn test_worker_override_beats_document() {
    let overrides = ConfigOverrides {
        workers_per_host: Some(1),
        ..Default::default()
    };
    let spec = resolve(&overrides, &ConfigSource::Inline(TWO_HOSTS.to_string())).unwrap();
    assert_eq!(spec.workers_per_host, 1);
    assert_eq!(spec.expected_size(), 2);
}

#[test]
fn test_password_stays_out_of_debug_output() {
    let spec = resolve(&ConfigOverrides::default(), &ConfigSource::Inline(TWO_HOSTS.to_string())).unwrap();
    assert!(!format!("{:?}", spec).contains("secret"));
}

#[test]
fn test_missing_and_broken_documents() {
    let dir = tempfile::tempdir().unwrap();
    let missing = ConfigSource::Path(dir.path().join("nope.json"));
    assert!(matches!(
        resolve(&ConfigOverrides::default(), &missing),
        Err(HarnessError::ConfigNotFound { .. })
    ));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ \"ip\": ").unwrap();
    assert!(matches!(
        resolve(&ConfigOverrides::default(), &ConfigSource::Path(broken)),
        Err(HarnessError::ConfigMalformed(_))
    ));
}
