pub mod alert_service;
pub mod billing_service;
pub mod metrics_service;
pub mod operation_executor;

pub use alert_service::AlertService;
pub use billing_service::BillingService;
pub use metrics_service::MetricsService;
pub use operation_executor::OperationExecutor;
