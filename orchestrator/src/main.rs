use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use orchestrator::backup::BackupManager;
use orchestrator::config::ConfigManager;
use orchestrator::constants::cleanup;
use orchestrator::database::Database;
use orchestrator::dns::{DnsControlPlane, DnsSyncService, HttpDnsControl};
use orchestrator::images::ImagePipeline;
use orchestrator::lifecycle::LifecycleManager;
use orchestrator::operation_tracker::SubscriptionOperationTracker;
use orchestrator::proxy::{ExecProxyControl, ProxyConfigGenerator};
use orchestrator::runtime::{ContainerRuntime, DockerRuntime};
use orchestrator::services::{AlertService, BillingService, MetricsService, OperationExecutor};
use orchestrator::storage::{LocalObjectStorage, ObjectStorage};
use orchestrator::web::{start_web_server, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with reduced verbosity for the noisy layers
    let env_filter = EnvFilter::from_default_env()
        .add_directive("orchestrator=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("bollard=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting Hosting Orchestration Core");

    // Load configuration
    let config_manager = ConfigManager::new("config".to_string()).await?;
    let config = config_manager.get_current_config();

    // Initialize database
    let database = Arc::new(Database::new(&config.database_path).await?);

    // Operation tracking (per-subscription serialization)
    let tracker = Arc::new(SubscriptionOperationTracker::new());

    // Operator alerting
    let alert_service = Arc::new(AlertService::new(config.operator_webhook_url.clone()));
    if alert_service.is_enabled() {
        info!(
            "Alert service enabled with webhook: {}",
            alert_service.get_webhook_url()
        );
        if let Err(e) = alert_service.test_webhook().await {
            error!("Alert webhook test failed: {}", e);
            warn!("Alerts may not be delivered. Check the webhook URL and connectivity.");
        }
    } else {
        warn!("Alert service disabled: no operator_webhook_url in config/main.toml");
    }

    // Container runtime (Docker Engine API)
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(
        config.runtime.request_timeout_seconds,
        config.runtime.build_timeout_seconds,
    )?);
    info!("Container runtime connected");

    // Object storage for build archives and backup uploads
    let storage: Arc<dyn ObjectStorage> =
        Arc::new(LocalObjectStorage::new(config.backup.storage_dir.clone()));

    // DNS control plane and sync service
    let dns_control = Arc::new(HttpDnsControl::new(&config.dns)?);
    match dns_control.health().await {
        Ok(true) => info!("DNS server is healthy"),
        Ok(false) => warn!("DNS server health endpoint reports unhealthy"),
        Err(e) => warn!("DNS server health check failed: {}", e),
    }
    let dns_sync = Arc::new(DnsSyncService::new(
        database.clone(),
        dns_control.clone(),
        &config.dns,
    ));

    // Reverse proxy control plane
    let proxy_control = Arc::new(ExecProxyControl::new(&config.proxy));
    let proxy = Arc::new(ProxyConfigGenerator::new(&config.proxy, proxy_control));

    // Core services
    let lifecycle = Arc::new(LifecycleManager::new(
        database.clone(),
        runtime.clone(),
        dns_sync.clone(),
        proxy.clone(),
        alert_service.clone(),
        config.clone(),
    ));
    let pipeline = Arc::new(ImagePipeline::new(
        database.clone(),
        storage.clone(),
        runtime.clone(),
        alert_service.clone(),
        config.clone(),
    ));
    let backup_manager = Arc::new(BackupManager::new(
        database.clone(),
        runtime.clone(),
        storage.clone(),
        config.clone(),
    ));
    let billing_service = Arc::new(BillingService::new(
        database.clone(),
        alert_service.clone(),
        config.clone(),
    ));
    let metrics_service = Arc::new(MetricsService::new(database.clone(), runtime.clone()));
    let executor = Arc::new(OperationExecutor::new(
        database.clone(),
        alert_service.clone(),
        tracker.clone(),
    ));
    info!("Core services initialized");

    // The platform base zone must exist before any container can publish a
    // DNS record into it
    if database.get_zone_by_name(&config.base_domain).await?.is_none() {
        let dns = &config.dns;
        database
            .create_zone(
                &config.base_domain,
                None,
                dns.nameservers.first().map(String::as_str).unwrap_or(""),
                &dns.soa_rname,
                orchestrator::constants::dns::SOA_REFRESH as i64,
                orchestrator::constants::dns::SOA_RETRY as i64,
                orchestrator::constants::dns::SOA_EXPIRE as i64,
                orchestrator::constants::dns::SOA_MINIMUM as i64,
                &dns.nameservers,
                dns.default_ttl as i64,
            )
            .await?;
        info!("Created platform base zone '{}'", config.base_domain);
    }

    // Image build worker: poll for pending uploads
    let pipeline_clone = pipeline.clone();
    let worker_poll = config.images.worker_poll_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(worker_poll));
        loop {
            interval.tick().await;
            match pipeline_clone.process_pending().await {
                Ok(0) => {}
                Ok(count) => info!("Image worker processed {} build(s)", count),
                Err(e) => warn!("Image worker pass failed: {}", e),
            }
        }
    });

    // Metric sampling loop
    let metrics_clone = metrics_service.clone();
    let sample_interval = config.metrics.sample_interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sample_interval));
        loop {
            interval.tick().await;
            if let Err(e) = metrics_clone.sample_all().await {
                warn!("Metric sampling pass failed: {}", e);
            }
        }
    });

    // Periodic cleanup of stuck operation locks
    let tracker_clone = tracker.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            cleanup::CLEANUP_INTERVAL_SECONDS,
        ));
        loop {
            interval.tick().await;
            let cleaned = tracker_clone
                .cleanup_old_operations(cleanup::OPERATION_CLEANUP_HOURS)
                .await;
            if cleaned > 0 {
                warn!(
                    "Cleaned up {} stuck operations older than {} hours",
                    cleaned,
                    cleanup::OPERATION_CLEANUP_HOURS
                );
            }
        }
    });

    info!("Background workers started");

    // Scheduler: backups, retention, metric pruning, billing batches
    let scheduler = orchestrator::scheduler::OrchestratorScheduler::new(
        config.clone(),
        database.clone(),
        backup_manager.clone(),
        metrics_service.clone(),
        billing_service.clone(),
        executor.clone(),
    )
    .await?;
    scheduler.start().await?;

    // Web server
    let state = AppState::new(
        config,
        database,
        lifecycle,
        pipeline,
        dns_sync,
        dns_control,
        backup_manager,
        billing_service,
        executor,
        tracker,
    );
    start_web_server(state).await?;

    Ok(())
}
