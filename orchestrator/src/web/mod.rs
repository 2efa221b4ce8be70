pub mod handlers;
pub mod server;

pub use server::start_web_server;

use std::sync::Arc;

use crate::backup::BackupManager;
use crate::config::Config;
use crate::database::Database;
use crate::dns::{DnsControlPlane, DnsSyncService};
use crate::images::ImagePipeline;
use crate::lifecycle::LifecycleManager;
use crate::operation_tracker::SubscriptionOperationTracker;
use crate::services::{BillingService, OperationExecutor};

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub lifecycle: Arc<LifecycleManager>,
    pub pipeline: Arc<ImagePipeline>,
    pub dns_sync: Arc<DnsSyncService>,
    pub dns_control: Arc<dyn DnsControlPlane>,
    pub backup_manager: Arc<BackupManager>,
    pub billing_service: Arc<BillingService>,
    pub executor: Arc<OperationExecutor>,
    pub tracker: Arc<SubscriptionOperationTracker>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        database: Arc<Database>,
        lifecycle: Arc<LifecycleManager>,
        pipeline: Arc<ImagePipeline>,
        dns_sync: Arc<DnsSyncService>,
        dns_control: Arc<dyn DnsControlPlane>,
        backup_manager: Arc<BackupManager>,
        billing_service: Arc<BillingService>,
        executor: Arc<OperationExecutor>,
        tracker: Arc<SubscriptionOperationTracker>,
    ) -> Self {
        Self {
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
        }
    }
}
