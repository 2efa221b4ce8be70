//! Database record types (entities).
//!
//! Monetary columns are stored as TEXT and parsed into `BigDecimal` at the
//! mapping layer so currency arithmetic never touches floating point.

use crate::state::{BillingCycle, ContainerState, ImageState, SubscriptionState};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Plans and subscriptions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub cpu_cores: i64,
    pub memory_mb: i64,
    pub storage_gb: i64,
    pub bandwidth_gb: i64,
    pub monthly_price: BigDecimal,
    pub setup_fee: BigDecimal,
    /// Runtime image subscriptions on this plan boot from by default
    pub base_image: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPlan {
    pub name: String,
    pub cpu_cores: i64,
    pub memory_mb: i64,
    pub storage_gb: i64,
    pub bandwidth_gb: i64,
    pub monthly_price: BigDecimal,
    pub setup_fee: BigDecimal,
    pub base_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub customer_id: i64,
    pub plan_id: i64,
    pub state: SubscriptionState,
    pub billing_cycle: BillingCycle,
    pub start_date: NaiveDate,
    pub current_period_start: Option<NaiveDate>,
    pub next_billing_date: Option<NaiveDate>,
    pub is_trial: bool,
    pub auto_renew: bool,
    pub total_invoiced: BigDecimal,
    pub total_paid: BigDecimal,
    /// Custom image backing this subscription instead of the plan base image
    pub custom_image_id: Option<i64>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSubscription {
    pub customer_id: i64,
    pub plan_id: i64,
    pub billing_cycle: BillingCycle,
    pub start_date: NaiveDate,
    pub is_trial: bool,
    pub auto_renew: bool,
    pub custom_image_id: Option<i64>,
}

// ============================================================================
// Containers and metrics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: i64,
    pub subscription_id: i64,
    pub state: ContainerState,
    /// Identifier assigned by the container runtime; set once creation succeeds
    pub runtime_id: Option<String>,
    pub ip_address: String,
    pub ssh_port: i64,
    pub hostname: String,
    pub volume_path: String,
    pub first_started_at: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
    pub uptime_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetricRecord {
    pub container_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub storage_mb: f64,
    pub net_rx_bytes: i64,
    pub net_tx_bytes: i64,
    pub block_read_bytes: i64,
    pub block_write_bytes: i64,
    pub process_count: i64,
}

// ============================================================================
// Custom images
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomImage {
    pub id: i64,
    pub customer_id: i64,
    pub name: String,
    pub version: i64,
    /// Parent in the immutable version chain; None for the first version
    pub previous_version_id: Option<i64>,
    pub state: ImageState,
    /// Object-storage key of the uploaded build archive
    pub archive_key: String,
    /// Runtime tag assigned when the build completes
    pub image_tag: Option<String>,
    pub build_args: Option<String>, // JSON object
    pub build_error: Option<String>,
    pub requires_approval: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBuildLogLine {
    pub image_id: i64,
    pub step: String,
    pub line: String,
    pub logged_at: DateTime<Utc>,
}

// ============================================================================
// DNS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsZone {
    pub id: i64,
    pub zone_name: String,
    /// Set for zones auto-managed on behalf of a subscription
    pub subscription_id: Option<i64>,
    pub soa_mname: String,
    pub soa_rname: String,
    pub refresh: i64,
    pub retry: i64,
    pub expire: i64,
    pub minimum: i64,
    pub nameservers: String, // JSON array
    pub default_ttl: i64,
    pub last_updated_serial: i64,
    pub status: String, // ACTIVE | DISABLED | DELETED
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DnsZone {
    pub fn nameserver_list(&self) -> Vec<String> {
        serde_json::from_str(&self.nameservers).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: i64,
    pub zone_id: i64,
    /// Record name relative to the zone origin, or "@" for the apex
    pub name: String,
    pub record_type: String,
    pub value: String,
    /// Overrides the zone default when set
    pub ttl: Option<i64>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
    pub port: Option<i64>,
    /// System records are managed by provisioning and exempt from the
    /// per-(name, type) uniqueness rule
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewDnsRecord {
    pub zone_id: i64,
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub ttl: Option<i64>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
    pub port: Option<i64>,
    pub is_system: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSyncLog {
    pub id: i64,
    pub zone_id: i64,
    pub status: String, // PENDING | SUCCESS | FAILED
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Operations and billing events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub operation_type: String,
    pub target: String,
    pub status: String, // started | completed | failed
    pub attempts: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: i64,
    pub subscription_id: i64,
    pub event_type: String, // RECURRING | PRORATION | SETUP_FEE | SETUP_FEE_REFUND | OVERDUE
    pub amount: BigDecimal,
    pub description: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}
