//! Integration tests for the proxy config generator's test-before-apply
//! discipline.

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use orchestrator::proxy::ProxyConfigGenerator;

fn setup() -> (tempfile::TempDir, Arc<FakeProxyControl>, ProxyConfigGenerator) {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let control = FakeProxyControl::new();
    let generator = ProxyConfigGenerator::new(&config.proxy, control.clone());
    (tmp, control, generator)
}

#[tokio::test]
async fn test_add_route_writes_tests_and_reloads() {
    let (_tmp, control, generator) = setup();

    generator
        .add_service_route("vps-1.vps.example-host.net", "10.66.0.2", 80)
        .await
        .unwrap();

    assert!(generator.route_exists("vps-1.vps.example-host.net").await);
    assert_eq!(control.tests.load(Ordering::SeqCst), 1);
    assert_eq!(control.reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_config_test_rolls_back_file_and_skips_reload() {
    let (_tmp, control, generator) = setup();

    control.fail_test.store(true, Ordering::SeqCst);
    let err = generator
        .add_service_route("vps-2.vps.example-host.net", "10.66.0.3", 80)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("rolled back"));

    // No orphan file, and the proxy was never reloaded with a bad config
    assert!(!generator.route_exists("vps-2.vps.example-host.net").await);
    assert_eq!(control.reloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remove_route_is_not_rolled_back_on_reload_failure() {
    let (_tmp, control, generator) = setup();

    generator
        .add_service_route("vps-3.vps.example-host.net", "10.66.0.4", 80)
        .await
        .unwrap();

    control.fail_reload.store(true, Ordering::SeqCst);
    let result = generator
        .remove_service_route("vps-3.vps.example-host.net")
        .await;
    assert!(result.is_err());

    // The route is gone from intent: the file stays removed
    assert!(!generator.route_exists("vps-3.vps.example-host.net").await);
}

#[tokio::test]
async fn test_remove_missing_route_is_noop() {
    let (_tmp, control, generator) = setup();

    generator
        .remove_service_route("never-existed.example-host.net")
        .await
        .unwrap();
    assert_eq!(control.reloads.load(Ordering::SeqCst), 0);
}
