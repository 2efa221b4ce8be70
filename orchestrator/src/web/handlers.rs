use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

use crate::backup::{BackupInfo, BackupType, CleanupReport};
use crate::database::{
    BillingEvent, Container, ContainerMetricRecord, CustomImage, DnsRecord, DnsSyncLog, DnsZone,
    ImageBuildLogLine, NewDnsRecord, NewPlan, NewSubscription, OperationRecord, Plan, Subscription,
};
use crate::dns::validate_record_input;
use crate::errors::{ExternalError, InvariantError, ValidationError};
use crate::operation_tracker::OperationStatus;
use crate::services::billing_service::BatchReport;
use crate::state::BillingCycle;
use crate::web::AppState;

// Helper type for API responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

fn api_error(status: StatusCode, message: String) -> (StatusCode, Json<ApiResponse<()>>) {
    (status, Json(ApiResponse::error(message)))
}

/// Map domain failures onto status codes: validation -> 400, invariant ->
/// 409, external process failures -> 502, missing entities -> 404,
/// everything else -> 500
fn map_err(e: anyhow::Error) -> (StatusCode, Json<ApiResponse<()>>) {
    let status = if e.downcast_ref::<ValidationError>().is_some() {
        StatusCode::BAD_REQUEST
    } else if e.downcast_ref::<InvariantError>().is_some() {
        StatusCode::CONFLICT
    } else if e.downcast_ref::<ExternalError>().is_some() {
        StatusCode::BAD_GATEWAY
    } else if e.to_string().contains("not found") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    api_error(status, e.to_string())
}

fn parse_money(value: &str, field: &str) -> Result<BigDecimal, (StatusCode, Json<ApiResponse<()>>)> {
    BigDecimal::from_str(value).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid decimal for '{}': {}", field, e),
        )
    })
}

// ============================================================================
// Health
// ============================================================================

pub async fn get_health(State(state): State<AppState>) -> ApiResult<Value> {
    let dns_healthy = state.dns_control.health().await.ok();
    Ok(Json(ApiResponse::success(json!({
        "status": "ok",
        "dns_server_healthy": dns_healthy,
    }))))
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub cpu_cores: i64,
    pub memory_mb: i64,
    pub storage_gb: i64,
    pub bandwidth_gb: i64,
    pub monthly_price: String,
    #[serde(default)]
    pub setup_fee: Option<String>,
    pub base_image: String,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(request): Json<CreatePlanRequest>,
) -> ApiResult<Plan> {
    let monthly_price = parse_money(&request.monthly_price, "monthly_price")?;
    let setup_fee = match &request.setup_fee {
        Some(fee) => parse_money(fee, "setup_fee")?,
        None => BigDecimal::from(0),
    };

    let plan = state
        .database
        .create_plan(&NewPlan {
            name: request.name,
            cpu_cores: request.cpu_cores,
            memory_mb: request.memory_mb,
            storage_gb: request.storage_gb,
            bandwidth_gb: request.bandwidth_gb,
            monthly_price,
            setup_fee,
            base_image: request.base_image,
        })
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(plan)))
}

#[derive(Deserialize)]
pub struct IncludeInactiveQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<IncludeInactiveQuery>,
) -> ApiResult<Vec<Plan>> {
    let plans = state
        .database
        .list_plans(query.include_inactive)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(plans)))
}

pub async fn deactivate_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<i64>,
) -> ApiResult<Value> {
    state
        .database
        .deactivate_plan(plan_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(json!({"plan_id": plan_id}))))
}

// ============================================================================
// Subscriptions
// ============================================================================

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: i64,
    pub plan_id: i64,
    #[serde(default = "default_cycle")]
    pub billing_cycle: String,
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_trial: bool,
    #[serde(default = "default_true")]
    pub auto_renew: bool,
    pub custom_image_id: Option<i64>,
}

fn default_cycle() -> String {
    "MONTHLY".to_string()
}

fn default_true() -> bool {
    true
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<Subscription> {
    let billing_cycle: BillingCycle = request
        .billing_cycle
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;

    // The plan must exist and be active to sell
    let plan = state
        .database
        .get_plan(request.plan_id)
        .await
        .map_err(map_err)?;
    if !plan.is_active {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Plan '{}' is no longer offered", plan.name),
        ));
    }

    let subscription = state
        .database
        .create_subscription(&NewSubscription {
            customer_id: request.customer_id,
            plan_id: request.plan_id,
            billing_cycle,
            start_date: request.start_date.unwrap_or_else(|| Utc::now().date_naive()),
            is_trial: request.is_trial,
            auto_renew: request.auto_renew,
            custom_image_id: request.custom_image_id,
        })
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(subscription)))
}

pub async fn list_subscriptions(State(state): State<AppState>) -> ApiResult<Vec<Subscription>> {
    let subscriptions = state.database.list_subscriptions().await.map_err(map_err)?;
    Ok(Json(ApiResponse::success(subscriptions)))
}

#[derive(Serialize)]
pub struct SubscriptionDetail {
    pub subscription: Subscription,
    pub container: Option<Container>,
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
) -> ApiResult<SubscriptionDetail> {
    let subscription = state
        .database
        .get_subscription(subscription_id)
        .await
        .map_err(map_err)?;
    let container = state
        .database
        .get_live_container(subscription_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(SubscriptionDetail {
        subscription,
        container,
    })))
}

pub async fn provision_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
) -> ApiResult<Value> {
    state
        .database
        .get_subscription(subscription_id)
        .await
        .map_err(map_err)?;

    let lifecycle = state.lifecycle.clone();
    let operation_id = state
        .executor
        .execute_for_subscription(subscription_id, "provision", move || {
            let lifecycle = lifecycle.clone();
            async move { lifecycle.provision(subscription_id).await.map(|_| ()) }
        })
        .await
        .map_err(map_err)?;

    Ok(Json(ApiResponse::success(
        json!({"operation_id": operation_id}),
    )))
}

#[derive(Deserialize)]
pub struct PlanChangeRequest {
    pub new_plan_id: i64,
    #[serde(default)]
    pub allow_downgrade: bool,
}

#[derive(Serialize)]
pub struct PlanChangeResponse {
    pub adjustment: String,
}

pub async fn change_plan(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
    Json(request): Json<PlanChangeRequest>,
) -> ApiResult<PlanChangeResponse> {
    let amount = state
        .billing_service
        .change_plan(subscription_id, request.new_plan_id, request.allow_downgrade)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(PlanChangeResponse {
        adjustment: amount.to_string(),
    })))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
) -> ApiResult<Value> {
    state
        .billing_service
        .cancel_subscription(subscription_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(
        json!({"subscription_id": subscription_id}),
    )))
}

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub amount: String,
}

pub async fn record_payment(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
    Json(request): Json<PaymentRequest>,
) -> ApiResult<Value> {
    let amount = parse_money(&request.amount, "amount")?;
    state
        .billing_service
        .record_payment(subscription_id, &amount)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(
        json!({"subscription_id": subscription_id, "amount": amount.to_string()}),
    )))
}

pub async fn list_billing_events(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
) -> ApiResult<Vec<BillingEvent>> {
    let events = state
        .database
        .list_billing_events(subscription_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(events)))
}

// ============================================================================
// Container operations
// ============================================================================

pub async fn get_container(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
) -> ApiResult<Container> {
    let container = state
        .database
        .get_container(container_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(container)))
}

/// Queue a container operation under its subscription's exclusive lock
async fn queue_container_operation(
    state: &AppState,
    container_id: i64,
    operation_type: &'static str,
) -> ApiResult<Value> {
    let container = state
        .database
        .get_container(container_id)
        .await
        .map_err(map_err)?;

    let lifecycle = state.lifecycle.clone();
    let operation_id = state
        .executor
        .execute_for_subscription(container.subscription_id, operation_type, move || {
            let lifecycle = lifecycle.clone();
            async move {
                match operation_type {
                    "start_container" => lifecycle.start(container_id).await,
                    "stop_container" => lifecycle.stop(container_id).await,
                    "reboot_container" => lifecycle.reboot(container_id).await,
                    "terminate_container" => lifecycle.terminate(container_id).await,
                    other => Err(anyhow::anyhow!("Unknown container operation '{}'", other)),
                }
            }
        })
        .await
        .map_err(map_err)?;

    Ok(Json(ApiResponse::success(
        json!({"operation_id": operation_id}),
    )))
}

pub async fn start_container(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
) -> ApiResult<Value> {
    queue_container_operation(&state, container_id, "start_container").await
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
) -> ApiResult<Value> {
    queue_container_operation(&state, container_id, "stop_container").await
}

pub async fn reboot_container(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
) -> ApiResult<Value> {
    queue_container_operation(&state, container_id, "reboot_container").await
}

pub async fn terminate_container(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
) -> ApiResult<Value> {
    queue_container_operation(&state, container_id, "terminate_container").await
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_metric_hours")]
    pub hours: i64,
}

fn default_metric_hours() -> i64 {
    24
}

pub async fn get_container_metrics(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<Vec<ContainerMetricRecord>> {
    let since = Utc::now() - Duration::hours(query.hours.clamp(1, 24 * 30));
    let metrics = state
        .database
        .list_metrics_since(container_id, since)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(metrics)))
}

// ============================================================================
// Backups
// ============================================================================

#[derive(Deserialize)]
pub struct BackupRequest {
    #[serde(default = "default_backup_type")]
    pub backup_type: String,
}

fn default_backup_type() -> String {
    "manual".to_string()
}

pub async fn create_backup(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
    Json(request): Json<BackupRequest>,
) -> ApiResult<Value> {
    let backup_type: BackupType = request
        .backup_type
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
    let container = state
        .database
        .get_container(container_id)
        .await
        .map_err(map_err)?;

    let backup_manager = state.backup_manager.clone();
    let operation_id = state
        .executor
        .execute_for_subscription(container.subscription_id, "backup", move || {
            let backup_manager = backup_manager.clone();
            async move {
                backup_manager
                    .backup_container(container_id, backup_type)
                    .await
                    .map(|_| ())
            }
        })
        .await
        .map_err(map_err)?;

    Ok(Json(ApiResponse::success(
        json!({"operation_id": operation_id}),
    )))
}

pub async fn list_backups(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
) -> ApiResult<Vec<BackupInfo>> {
    let backups = state
        .backup_manager
        .list_backups(container_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(backups)))
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub filename: String,
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<Value> {
    let container = state
        .database
        .get_container(container_id)
        .await
        .map_err(map_err)?;

    let backup_manager = state.backup_manager.clone();
    let filename = request.filename.clone();
    let operation_id = state
        .executor
        .execute_for_subscription(container.subscription_id, "restore", move || {
            let backup_manager = backup_manager.clone();
            let filename = filename.clone();
            async move { backup_manager.restore_container(container_id, &filename).await }
        })
        .await
        .map_err(map_err)?;

    Ok(Json(ApiResponse::success(
        json!({"operation_id": operation_id}),
    )))
}

pub async fn cleanup_backups(State(state): State<AppState>) -> ApiResult<CleanupReport> {
    let report = state
        .backup_manager
        .cleanup_old_backups()
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(report)))
}

// ============================================================================
// Custom images
// ============================================================================

pub async fn upload_image(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ApiResult<CustomImage> {
    let mut name: Option<String> = None;
    let mut requires_approval = false;
    let mut build_args: HashMap<String, String> = HashMap::new();

    for (key, value) in params {
        match key.as_str() {
            "name" => name = Some(value),
            "requires_approval" => requires_approval = value == "true" || value == "1",
            "build_arg" => {
                if let Some((arg_key, arg_value)) = value.split_once('=') {
                    build_args.insert(arg_key.to_string(), arg_value.to_string());
                } else {
                    return Err(api_error(
                        StatusCode::BAD_REQUEST,
                        format!("build_arg '{}' is not KEY=VALUE", value),
                    ));
                }
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "Query parameter 'name' is required".to_string(),
        )
    })?;

    let image = state
        .pipeline
        .upload(customer_id, &name, body.to_vec(), &build_args, requires_approval)
        .await
        .map_err(map_err)?;

    info!(
        "Accepted image upload '{}' for customer {} as image {}",
        name, customer_id, image.id
    );
    Ok(Json(ApiResponse::success(image)))
}

pub async fn list_customer_images(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> ApiResult<Vec<CustomImage>> {
    let images = state
        .database
        .list_customer_images(customer_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(images)))
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> ApiResult<CustomImage> {
    let image = state.database.get_image(image_id).await.map_err(map_err)?;
    Ok(Json(ApiResponse::success(image)))
}

pub async fn delete_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> ApiResult<Value> {
    state
        .database
        .get_image(image_id)
        .await
        .map_err(map_err)?;
    state
        .database
        .soft_delete_image(image_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(json!({"image_id": image_id}))))
}

pub async fn get_image_logs(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> ApiResult<Vec<ImageBuildLogLine>> {
    let logs = state
        .database
        .get_build_logs(image_id, crate::constants::limits::MAX_BUILD_LOG_LINES)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(logs)))
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub approved_by: String,
}

pub async fn approve_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<CustomImage> {
    let image = state
        .pipeline
        .approve(image_id, &request.approved_by)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(image)))
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn reject_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<CustomImage> {
    let image = state
        .pipeline
        .reject(image_id, &request.reason)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(image)))
}

pub async fn rebuild_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> ApiResult<CustomImage> {
    let image = state.pipeline.rebuild(image_id).await.map_err(map_err)?;
    Ok(Json(ApiResponse::success(image)))
}

// ============================================================================
// DNS
// ============================================================================

#[derive(Deserialize)]
pub struct CreateZoneRequest {
    pub zone_name: String,
    pub subscription_id: Option<i64>,
    pub nameservers: Option<Vec<String>>,
    pub soa_mname: Option<String>,
    pub soa_rname: Option<String>,
    pub default_ttl: Option<i64>,
}

pub async fn create_zone(
    State(state): State<AppState>,
    Json(request): Json<CreateZoneRequest>,
) -> ApiResult<DnsZone> {
    if request.zone_name.is_empty() || !request.zone_name.contains('.') {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("'{}' is not a usable zone name", request.zone_name),
        ));
    }
    if state
        .database
        .get_zone_by_name(&request.zone_name)
        .await
        .map_err(map_err)?
        .is_some()
    {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Zone '{}' already exists", request.zone_name),
        ));
    }

    let dns = &state.config.dns;
    let nameservers = request.nameservers.unwrap_or_else(|| dns.nameservers.clone());
    let soa_mname = request
        .soa_mname
        .or_else(|| nameservers.first().cloned())
        .unwrap_or_default();
    let soa_rname = request.soa_rname.unwrap_or_else(|| dns.soa_rname.clone());

    let zone = state
        .database
        .create_zone(
            &request.zone_name,
            request.subscription_id,
            &soa_mname,
            &soa_rname,
            crate::constants::dns::SOA_REFRESH as i64,
            crate::constants::dns::SOA_RETRY as i64,
            crate::constants::dns::SOA_EXPIRE as i64,
            crate::constants::dns::SOA_MINIMUM as i64,
            &nameservers,
            request.default_ttl.unwrap_or(dns.default_ttl as i64),
        )
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(zone)))
}

#[derive(Deserialize)]
pub struct IncludeDeletedQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

pub async fn list_zones(
    State(state): State<AppState>,
    Query(query): Query<IncludeDeletedQuery>,
) -> ApiResult<Vec<DnsZone>> {
    let zones = state
        .database
        .list_zones(query.include_deleted)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(zones)))
}

/// Soft-delete a zone and tombstone its files on the DNS server
pub async fn delete_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
) -> ApiResult<Value> {
    let zone = state.database.get_zone(zone_id).await.map_err(map_err)?;
    if zone.zone_name == state.config.base_domain {
        return Err(api_error(
            StatusCode::CONFLICT,
            "The platform base zone cannot be deleted".to_string(),
        ));
    }
    state
        .database
        .set_zone_status(zone_id, "DELETED")
        .await
        .map_err(map_err)?;
    state.dns_sync.sync_zone(zone_id).await.map_err(map_err)?;
    Ok(Json(ApiResponse::success(json!({"zone_id": zone_id}))))
}

pub async fn get_zone_file(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
) -> ApiResult<Value> {
    let zone = state.database.get_zone(zone_id).await.map_err(map_err)?;
    let records = state
        .database
        .list_zone_records(zone_id)
        .await
        .map_err(map_err)?;
    let rendered = crate::dns::generate_zone_file(&zone, &records);
    Ok(Json(ApiResponse::success(
        json!({"zone_name": zone.zone_name, "zone_file": rendered}),
    )))
}

#[derive(Deserialize)]
pub struct CreateRecordRequest {
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub ttl: Option<i64>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
    pub port: Option<i64>,
}

pub async fn create_dns_record(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
    Json(request): Json<CreateRecordRequest>,
) -> ApiResult<DnsRecord> {
    validate_record_input(
        &request.name,
        &request.record_type,
        &request.value,
        request.priority,
        request.weight,
        request.port,
    )
    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let record = state
        .database
        .create_dns_record(&NewDnsRecord {
            zone_id,
            name: request.name,
            record_type: request.record_type,
            value: request.value,
            ttl: request.ttl,
            priority: request.priority,
            weight: request.weight,
            port: request.port,
            is_system: false,
        })
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(record)))
}

pub async fn list_dns_records(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
) -> ApiResult<Vec<DnsRecord>> {
    state.database.get_zone(zone_id).await.map_err(map_err)?;
    let records = state
        .database
        .list_zone_records(zone_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(records)))
}

pub async fn delete_dns_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> ApiResult<Value> {
    let record = state
        .database
        .get_dns_record(record_id)
        .await
        .map_err(map_err)?;
    if record.is_system {
        return Err(api_error(
            StatusCode::CONFLICT,
            "System records are managed by provisioning".to_string(),
        ));
    }
    state
        .database
        .delete_dns_record(record_id)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(json!({"record_id": record_id}))))
}

pub async fn sync_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
) -> ApiResult<Value> {
    state.dns_sync.sync_zone(zone_id).await.map_err(map_err)?;
    Ok(Json(ApiResponse::success(json!({"zone_id": zone_id}))))
}

pub async fn list_sync_logs(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
) -> ApiResult<Vec<DnsSyncLog>> {
    let logs = state
        .database
        .list_sync_logs(zone_id, crate::constants::limits::MAX_OPERATION_RECORDS)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(logs)))
}

pub async fn regenerate_zones(State(state): State<AppState>) -> ApiResult<Value> {
    let summary = state
        .dns_sync
        .regenerate_all_zones()
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(json!({
        "zones_written": summary.zones_written,
        "zones_removed": summary.zones_removed,
    }))))
}

// ============================================================================
// Billing batches
// ============================================================================

pub async fn run_recurring_billing(State(state): State<AppState>) -> ApiResult<BatchReport> {
    let report = state
        .billing_service
        .run_recurring_billing(Utc::now().date_naive())
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(report)))
}

pub async fn run_overdue_checks(State(state): State<AppState>) -> ApiResult<BatchReport> {
    let report = state
        .billing_service
        .run_overdue_checks(Utc::now().date_naive())
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(report)))
}

// ============================================================================
// Operations
// ============================================================================

pub async fn get_active_operations(State(state): State<AppState>) -> ApiResult<OperationStatus> {
    let status = state.tracker.get_operation_status().await;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn get_operation_history(
    State(state): State<AppState>,
) -> ApiResult<Vec<OperationRecord>> {
    let operations = state
        .database
        .get_recent_operations(crate::constants::limits::MAX_OPERATION_RECORDS)
        .await
        .map_err(map_err)?;
    Ok(Json(ApiResponse::success(operations)))
}
