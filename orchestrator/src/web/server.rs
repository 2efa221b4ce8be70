use crate::web::{handlers, AppState};
use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub async fn start_web_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        // === HEALTH ===
        .route("/api/health", get(handlers::get_health))
        // === PLANS ===
        .route("/api/plans", get(handlers::list_plans))
        .route("/api/plans", post(handlers::create_plan))
        .route("/api/plans/{plan_id}/deactivate", post(handlers::deactivate_plan))
        // === SUBSCRIPTIONS ===
        .route("/api/subscriptions", post(handlers::create_subscription))
        .route("/api/subscriptions", get(handlers::list_subscriptions))
        .route(
            "/api/subscriptions/{subscription_id}",
            get(handlers::get_subscription),
        )
        .route(
            "/api/subscriptions/{subscription_id}/provision",
            post(handlers::provision_subscription),
        )
        .route(
            "/api/subscriptions/{subscription_id}/plan-change",
            post(handlers::change_plan),
        )
        .route(
            "/api/subscriptions/{subscription_id}/cancel",
            post(handlers::cancel_subscription),
        )
        .route(
            "/api/subscriptions/{subscription_id}/payments",
            post(handlers::record_payment),
        )
        .route(
            "/api/subscriptions/{subscription_id}/billing-events",
            get(handlers::list_billing_events),
        )
        // === CONTAINER OPERATIONS ===
        .route(
            "/api/containers/{container_id}",
            get(handlers::get_container),
        )
        .route(
            "/api/containers/{container_id}/start",
            post(handlers::start_container),
        )
        .route(
            "/api/containers/{container_id}/stop",
            post(handlers::stop_container),
        )
        .route(
            "/api/containers/{container_id}/reboot",
            post(handlers::reboot_container),
        )
        .route(
            "/api/containers/{container_id}/terminate",
            post(handlers::terminate_container),
        )
        .route(
            "/api/containers/{container_id}/metrics",
            get(handlers::get_container_metrics),
        )
        // === BACKUPS ===
        .route(
            "/api/containers/{container_id}/backups",
            post(handlers::create_backup),
        )
        .route(
            "/api/containers/{container_id}/backups",
            get(handlers::list_backups),
        )
        .route(
            "/api/containers/{container_id}/restore",
            post(handlers::restore_backup),
        )
        .route("/api/backups/cleanup", post(handlers::cleanup_backups))
        // === CUSTOM IMAGES ===
        .route(
            "/api/customers/{customer_id}/images",
            post(handlers::upload_image),
        )
        .route(
            "/api/customers/{customer_id}/images",
            get(handlers::list_customer_images),
        )
        .route("/api/images/{image_id}", get(handlers::get_image))
        .route("/api/images/{image_id}", delete(handlers::delete_image))
        .route("/api/images/{image_id}/logs", get(handlers::get_image_logs))
        .route(
            "/api/images/{image_id}/approve",
            post(handlers::approve_image),
        )
        .route("/api/images/{image_id}/reject", post(handlers::reject_image))
        .route(
            "/api/images/{image_id}/rebuild",
            post(handlers::rebuild_image),
        )
        // === DNS ===
        .route("/api/dns/zones", post(handlers::create_zone))
        .route("/api/dns/zones", get(handlers::list_zones))
        .route("/api/dns/zones/{zone_id}", delete(handlers::delete_zone))
        .route(
            "/api/dns/zones/{zone_id}/file",
            get(handlers::get_zone_file),
        )
        .route(
            "/api/dns/zones/{zone_id}/records",
            post(handlers::create_dns_record),
        )
        .route(
            "/api/dns/zones/{zone_id}/records",
            get(handlers::list_dns_records),
        )
        .route(
            "/api/dns/records/{record_id}",
            delete(handlers::delete_dns_record),
        )
        .route("/api/dns/zones/{zone_id}/sync", post(handlers::sync_zone))
        .route(
            "/api/dns/zones/{zone_id}/sync-logs",
            get(handlers::list_sync_logs),
        )
        .route("/api/dns/regenerate", post(handlers::regenerate_zones))
        // === BILLING BATCHES (manual triggers) ===
        .route(
            "/api/billing/run-recurring",
            post(handlers::run_recurring_billing),
        )
        .route("/api/billing/run-overdue", post(handlers::run_overdue_checks))
        // === OPERATIONS ===
        .route(
            "/api/operations/active",
            get(handlers::get_active_operations),
        )
        .route(
            "/api/operations/history",
            get(handlers::get_operation_history),
        )
        // Add middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
