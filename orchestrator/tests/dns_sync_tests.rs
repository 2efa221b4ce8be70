//! Integration tests for the DNS sync service: file delivery, serial
//! advancement, audit rows, tombstones, and the HTTP control plane.

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use orchestrator::database::{Database, NewDnsRecord};
use orchestrator::dns::{DnsControlPlane, DnsSyncService, HttpDnsControl};

async fn setup() -> (
    tempfile::TempDir,
    Arc<orchestrator::config::Config>,
    Arc<Database>,
    Arc<FakeDnsControl>,
    DnsSyncService,
) {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path()));
    let database = Arc::new(Database::new(":memory:").await.unwrap());
    let control = FakeDnsControl::new();
    let sync = DnsSyncService::new(database.clone(), control.clone(), &config.dns);
    (tmp, config, database, control, sync)
}

async fn seed_zone(database: &Database, name: &str) -> orchestrator::database::DnsZone {
    database
        .create_zone(
            name,
            None,
            "ns1.example-host.net",
            "hostmaster.example-host.net",
            7200,
            1800,
            1209600,
            300,
            &[
                "ns1.example-host.net".to_string(),
                "ns2.example-host.net".to_string(),
            ],
            3600,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sync_writes_files_and_advances_serial() {
    let (_tmp, config, database, control, sync) = setup().await;
    let zone = seed_zone(&database, "customer-one.net").await;
    database
        .create_dns_record(&NewDnsRecord {
            zone_id: zone.id,
            name: "@".to_string(),
            record_type: "A".to_string(),
            value: "203.0.113.9".to_string(),
            ttl: None,
            priority: None,
            weight: None,
            port: None,
            is_system: false,
        })
        .await
        .unwrap();

    sync.sync_zone(zone.id).await.unwrap();

    let after_first = database.get_zone(zone.id).await.unwrap();
    assert!(after_first.last_updated_serial > 0);

    sync.sync_zone(zone.id).await.unwrap();
    let after_second = database.get_zone(zone.id).await.unwrap();
    assert!(after_second.last_updated_serial > after_first.last_updated_serial);

    // Zone file and config snippet exist
    let zone_path =
        std::path::Path::new(&config.dns.zone_dir).join("customer-one.net.zone");
    let conf_path =
        std::path::Path::new(&config.dns.config_dir).join("customer-one.net.conf");
    assert!(zone_path.exists());
    assert!(conf_path.exists());
    let contents = tokio::fs::read_to_string(&zone_path).await.unwrap();
    assert!(contents.contains("203.0.113.9"));
    assert!(contents.contains(&after_second.last_updated_serial.to_string()));

    assert_eq!(control.reloads.load(Ordering::SeqCst), 2);

    // Every push was audited
    let logs = database.list_sync_logs(zone.id, 10).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == "SUCCESS"));
}

#[tokio::test]
async fn test_failed_reload_is_audited_as_failed() {
    let (_tmp, _config, database, control, sync) = setup().await;
    let zone = seed_zone(&database, "customer-two.net").await;

    control.fail_reload.store(true, Ordering::SeqCst);
    assert!(sync.sync_zone(zone.id).await.is_err());

    let logs = database.list_sync_logs(zone.id, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "FAILED");
    assert!(logs[0]
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("refused"));
}

#[tokio::test]
async fn test_inactive_zone_files_are_tombstoned() {
    let (_tmp, config, database, _control, sync) = setup().await;
    let zone = seed_zone(&database, "customer-three.net").await;

    sync.sync_zone(zone.id).await.unwrap();
    let zone_path =
        std::path::Path::new(&config.dns.zone_dir).join("customer-three.net.zone");
    assert!(zone_path.exists());

    database.set_zone_status(zone.id, "DELETED").await.unwrap();
    sync.sync_zone(zone.id).await.unwrap();
    assert!(!zone_path.exists());
    assert!(!std::path::Path::new(&config.dns.config_dir)
        .join("customer-three.net.conf")
        .exists());
}

#[tokio::test]
async fn test_regenerate_all_zones_single_reload() {
    let (_tmp, config, database, control, sync) = setup().await;
    seed_zone(&database, "alpha.net").await;
    seed_zone(&database, "beta.net").await;
    let gone = seed_zone(&database, "gone.net").await;
    database.set_zone_status(gone.id, "DELETED").await.unwrap();

    let summary = sync.regenerate_all_zones().await.unwrap();
    assert_eq!(summary.zones_written, 2);
    assert_eq!(summary.zones_removed, 1);

    // One global operation, one reload
    assert_eq!(control.reloads.load(Ordering::SeqCst), 1);
    assert!(std::path::Path::new(&config.dns.zone_dir)
        .join("alpha.net.zone")
        .exists());
    assert!(!std::path::Path::new(&config.dns.zone_dir)
        .join("gone.net.zone")
        .exists());
}

#[tokio::test]
async fn test_http_control_plane_against_mock_server() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reload"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut dns_config = test_config(std::path::Path::new("/tmp")).dns;
    dns_config.reload_url = format!("{}/reload", server.uri());
    dns_config.health_url = format!("{}/health", server.uri());

    let control = HttpDnsControl::new(&dns_config).unwrap();
    control.reload().await.unwrap();
    assert!(control.health().await.unwrap());
}

#[tokio::test]
async fn test_http_control_plane_surfaces_server_errors() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("zone parse error"))
        .mount(&server)
        .await;

    let mut dns_config = test_config(std::path::Path::new("/tmp")).dns;
    dns_config.reload_url = format!("{}/reload", server.uri());
    dns_config.health_url = format!("{}/health", server.uri());

    let control = HttpDnsControl::new(&dns_config).unwrap();
    let err = control.reload().await.unwrap_err();
    assert!(err.to_string().contains("500"));
}
