mod common;

use common::{RecordingExecutor, chain_for};
use nr_acme::tlsa::TlsaHistory;
use nr_acme::{CertStorage, CertificateRecord, PortSpec, TrustRecordRotator};
use nr_dns::DnsUpdateConfig;
use rcgen::KeyPair;
use tempfile::tempdir;

const DOMAINS: [&str; 3] = ["example.com", "www.example.com", "admin.example.com"];

/// Archive `count` versions, each with its own key, oldest first.
fn archive_versions(storage: &CertStorage, count: usize) -> Vec<CertificateRecord> {
    (0..count)
        .map(|i| {
            let key = KeyPair::generate().unwrap();
            let chain = chain_for(&DOMAINS, &key, 90);
            storage
                .write_archive(&format!("2025010{}000000", i + 1), "example.com", &chain, &key.serialize_pem())
                .unwrap();
            CertificateRecord::from_pem(&chain).unwrap()
        })
        .collect()
}

fn rotator(keep: bool) -> TrustRecordRotator {
    let ports = vec!["443".parse::<PortSpec>().unwrap(), "admin:8443".parse().unwrap()];
    TrustRecordRotator::new(DnsUpdateConfig::default(), ports, 3600, keep)
}

fn domains(names: &[&str]) -> Vec<String> {
    names.iter().map(|d| d.to_string()).collect()
}

#[test]
fn test_retained_set_size() {
    for (count, retained) in [(0, 0), (1, 1), (2, 2), (4, 2)] {
        let dir = tempdir().unwrap();
        let storage = CertStorage::new(dir.path());
        let versions = archive_versions(&storage, count);

        let history = TlsaHistory::load(&storage, "example.com").unwrap();
        assert_eq!(history.retained.len(), retained, "{count} versions");
        assert_eq!(history.stale.len(), count.saturating_sub(2));
        for version in versions.iter().rev().take(2) {
            assert!(!history.stale.contains(&version.tlsa));
        }
    }
}

#[tokio::test]
async fn test_rotation_withdraws_oldest_only() {
    let dir = tempdir().unwrap();
    let storage = CertStorage::new(dir.path());
    let versions = archive_versions(&storage, 3);
    let (oldest, middle, newest) = (&versions[0], &versions[1], &versions[2]);

    let executor = RecordingExecutor::default();
    let report = rotator(false)
        .rotate(&executor, &storage, &domains(&DOMAINS), newest)
        .await
        .unwrap();
    assert_eq!(report.updated, domains(&DOMAINS));
    assert!(report.is_success());

    let scripts = executor.scripts();
    assert_eq!(scripts.len(), 3);
    for (script, domain) in scripts.iter().zip(DOMAINS) {
        let label = format!("_443._tcp.{}", domain);
        assert!(script.contains(&format!("update del {} TLSA {}\n", label, oldest.tlsa)));
        assert!(script.contains(&format!("update add {} 3600 TLSA {}\n", label, newest.tlsa)));
        assert!(!script.contains(&middle.tlsa.to_string()));
    }

    let admin_label = "_8443._tcp.admin.example.com";
    assert!(scripts[2].contains(&format!("update add {} 3600 TLSA {}\n", admin_label, newest.tlsa)));
    assert!(!scripts[0].contains("_8443"));
    assert!(!scripts[1].contains("_8443"));
}

#[tokio::test]
async fn test_host_port_skipped_when_not_requested() {
    let dir = tempdir().unwrap();
    let storage = CertStorage::new(dir.path());
    let versions = archive_versions(&storage, 1);

    let executor = RecordingExecutor::default();
    rotator(false)
        .rotate(&executor, &storage, &domains(&["example.com", "www.example.com"]), &versions[0])
        .await
        .unwrap();

    let scripts = executor.scripts();
    assert_eq!(scripts.len(), 2);
    assert!(scripts.iter().all(|s| !s.contains("_8443")));
    // No stale content yet: delete + add of the current value only
    assert!(scripts.iter().all(|s| s.lines().count() == 3));
}

#[tokio::test]
async fn test_failures_are_collected() {
    let dir = tempdir().unwrap();
    let storage = CertStorage::new(dir.path());
    let versions = archive_versions(&storage, 2);

    let executor = RecordingExecutor::rejecting("www.example.com");
    let report = rotator(false)
        .rotate(&executor, &storage, &domains(&DOMAINS), &versions[1])
        .await
        .unwrap();

    assert_eq!(report.updated, domains(&["example.com", "admin.example.com"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "www.example.com");
    assert!(report.failed[0].1.contains("REFUSED"));
    assert_eq!(executor.scripts().len(), 3);
}

#[tokio::test]
async fn test_keep_leaves_stale_content() {
    let dir = tempdir().unwrap();
    let storage = CertStorage::new(dir.path());
    let versions = archive_versions(&storage, 3);

    let executor = RecordingExecutor::default();
    rotator(true)
        .rotate(&executor, &storage, &domains(&["example.com"]), &versions[2])
        .await
        .unwrap();

    let scripts = executor.scripts();
    assert!(!scripts[0].contains(&versions[0].tlsa.to_string()));
}
