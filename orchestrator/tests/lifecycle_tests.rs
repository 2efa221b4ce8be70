//! Integration tests for the container lifecycle manager, driven entirely
//! through fake control planes and a fake runtime.

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use orchestrator::database::Database;
use orchestrator::dns::DnsSyncService;
use orchestrator::lifecycle::LifecycleManager;
use orchestrator::proxy::ProxyConfigGenerator;
use orchestrator::services::AlertService;
use orchestrator::state::{ContainerState, SubscriptionState};

struct TestStack {
    _tmp: tempfile::TempDir,
    config: Arc<orchestrator::config::Config>,
    database: Arc<Database>,
    runtime: Arc<MockRuntime>,
    proxy_control: Arc<FakeProxyControl>,
    dns_control: Arc<FakeDnsControl>,
    lifecycle: LifecycleManager,
}

async fn setup() -> TestStack {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path()));
    let database = Arc::new(Database::new(":memory:").await.unwrap());

    let dns_control = FakeDnsControl::new();
    let dns_sync = Arc::new(DnsSyncService::new(
        database.clone(),
        dns_control.clone(),
        &config.dns,
    ));
    let proxy_control = FakeProxyControl::new();
    let proxy = Arc::new(ProxyConfigGenerator::new(
        &config.proxy,
        proxy_control.clone(),
    ));
    let runtime = MockRuntime::new();
    let alert_service = Arc::new(AlertService::new(String::new()));

    // The platform base zone records containers' A records
    database
        .create_zone(
            &config.base_domain,
            None,
            "ns1.example-host.net",
            "hostmaster.example-host.net",
            7200,
            1800,
            1209600,
            300,
            &config.dns.nameservers,
            3600,
        )
        .await
        .unwrap();

    let lifecycle = LifecycleManager::new(
        database.clone(),
        runtime.clone(),
        dns_sync,
        proxy,
        alert_service,
        config.clone(),
    );

    TestStack {
        _tmp: tmp,
        config,
        database,
        runtime,
        proxy_control,
        dns_control,
        lifecycle,
    }
}

#[tokio::test]
async fn test_provision_happy_path() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "5.00").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;

    let container = stack.lifecycle.provision(subscription.id).await.unwrap();

    assert_eq!(container.state, ContainerState::Running);
    assert!(container.ip_address.starts_with("10.66.0."));
    assert!(container.ssh_port >= 2200 && container.ssh_port <= 2400);
    assert!(container.runtime_id.is_some());
    assert!(container.first_started_at.is_some());

    // Plan limits reached the runtime spec
    let runtime_state = stack.runtime.state.lock().await;
    assert_eq!(runtime_state.created.len(), 1);
    assert_eq!(runtime_state.created[0].memory_mb, 2048);
    assert_eq!(runtime_state.created[0].cpu_cores, 2);
    drop(runtime_state);

    // Subscription activated with billing stamps and first invoice lines
    let subscription = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription.state, SubscriptionState::Active);
    assert!(subscription.next_billing_date.is_some());
    assert_eq!(subscription.total_invoiced, dec("15.00"));

    let events = stack
        .database
        .list_billing_events(subscription.id)
        .await
        .unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(kinds.contains(&"SETUP_FEE"));
    assert!(kinds.contains(&"RECURRING"));

    // DNS record published and pushed
    let zone = stack
        .database
        .get_zone_by_name(&stack.config.base_domain)
        .await
        .unwrap()
        .unwrap();
    let records = stack.database.list_zone_records(zone.id).await.unwrap();
    assert!(records
        .iter()
        .any(|r| r.name == container.hostname && r.record_type == "A" && r.is_system));
    assert!(stack.dns_control.reloads.load(Ordering::SeqCst) >= 1);
    let zone_file = tokio::fs::read_to_string(
        std::path::Path::new(&stack.config.dns.zone_dir)
            .join(format!("{}.zone", stack.config.base_domain)),
    )
    .await
    .unwrap();
    assert!(zone_file.contains(&container.hostname));

    // Proxy route published
    let site = std::path::Path::new(&stack.config.proxy.sites_dir).join(format!(
        "{}.{}.conf",
        container.hostname, stack.config.base_domain
    ));
    assert!(site.exists());
    assert!(stack.proxy_control.reloads.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_provision_is_idempotent() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;

    let first = stack.lifecycle.provision(subscription.id).await.unwrap();
    let second = stack.lifecycle.provision(subscription.id).await.unwrap();
    assert_eq!(first.id, second.id);

    // Exactly one runtime container was ever created
    let runtime_state = stack.runtime.state.lock().await;
    assert_eq!(runtime_state.created.len(), 1);
}

#[tokio::test]
async fn test_provision_failure_parks_error_and_resumes() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;

    stack.runtime.fail_create.store(true, Ordering::SeqCst);
    assert!(stack.lifecycle.provision(subscription.id).await.is_err());

    let container = stack
        .database
        .get_live_container(subscription.id)
        .await
        .unwrap()
        .expect("container row survives the failure");
    assert_eq!(container.state, ContainerState::Error);
    // Subscription stays in PROVISIONING for the caller's retry
    let sub = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(sub.state, SubscriptionState::Provisioning);

    // The retry resumes the same row and keeps its address
    stack.runtime.fail_create.store(false, Ordering::SeqCst);
    let recovered = stack.lifecycle.provision(subscription.id).await.unwrap();
    assert_eq!(recovered.id, container.id);
    assert_eq!(recovered.ip_address, container.ip_address);
    assert_eq!(recovered.state, ContainerState::Running);
}

#[tokio::test]
async fn test_one_live_container_across_provision_terminate_cycles() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;

    let container = stack.lifecycle.provision(subscription.id).await.unwrap();
    stack.lifecycle.terminate(container.id).await.unwrap();

    assert!(stack
        .database
        .get_live_container(subscription.id)
        .await
        .unwrap()
        .is_none());

    let terminated = stack.database.get_container(container.id).await.unwrap();
    assert_eq!(terminated.state, ContainerState::Terminated);
    let sub = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(sub.state, SubscriptionState::Terminated);

    // De-provisioning removed the route and the DNS record
    let site = std::path::Path::new(&stack.config.proxy.sites_dir).join(format!(
        "{}.{}.conf",
        container.hostname, stack.config.base_domain
    ));
    assert!(!site.exists());
    let zone = stack
        .database
        .get_zone_by_name(&stack.config.base_domain)
        .await
        .unwrap()
        .unwrap();
    let records = stack.database.list_zone_records(zone.id).await.unwrap();
    assert!(!records.iter().any(|r| r.name == container.hostname));
}

#[tokio::test]
async fn test_terminate_runs_from_error_state() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;

    stack.runtime.fail_start.store(true, Ordering::SeqCst);
    assert!(stack.lifecycle.provision(subscription.id).await.is_err());
    let container = stack
        .database
        .get_live_container(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(container.state, ContainerState::Error);

    // Terminate must still work and is irreversible
    stack.lifecycle.terminate(container.id).await.unwrap();
    let container = stack.database.get_container(container.id).await.unwrap();
    assert_eq!(container.state, ContainerState::Terminated);

    // A second terminate is a no-op
    stack.lifecycle.terminate(container.id).await.unwrap();
}

#[tokio::test]
async fn test_start_stop_reboot_cycle() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;
    let container = stack.lifecycle.provision(subscription.id).await.unwrap();

    stack.lifecycle.stop(container.id).await.unwrap();
    let stopped = stack.database.get_container(container.id).await.unwrap();
    assert_eq!(stopped.state, ContainerState::Stopped);
    assert!(stopped.last_stopped_at.is_some());

    // Rebooting a stopped container is an invariant violation
    assert!(stack.lifecycle.reboot(container.id).await.is_err());

    stack.lifecycle.start(container.id).await.unwrap();
    let running = stack.database.get_container(container.id).await.unwrap();
    assert_eq!(running.state, ContainerState::Running);

    stack.lifecycle.reboot(container.id).await.unwrap();
    let rebooted = stack.database.get_container(container.id).await.unwrap();
    assert_eq!(rebooted.state, ContainerState::Running);
}

#[tokio::test]
async fn test_custom_image_gates_provisioning() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "starter", "10.00", "0").await;

    // An image that never completed may not back a subscription
    let image = stack
        .database
        .create_image(7, "myapp", 1, None, "build-archives/7/x.tar.gz", None, true)
        .await
        .unwrap();

    let subscription = stack
        .database
        .create_subscription(&orchestrator::database::NewSubscription {
            customer_id: 7,
            plan_id: plan.id,
            billing_cycle: orchestrator::state::BillingCycle::Monthly,
            start_date: chrono::Utc::now().date_naive(),
            is_trial: false,
            auto_renew: true,
            custom_image_id: Some(image.id),
        })
        .await
        .unwrap();

    let err = stack
        .lifecycle
        .provision(subscription.id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not eligible"));
}
