pub mod manager;
use serde::{Deserialize, Serialize};
pub use manager::ConfigManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Customer containers are exposed as <hostname>.<base_domain>
    pub base_domain: String,
    /// Operator notification webhook; alerts are disabled when empty
    #[serde(default)]
    pub operator_webhook_url: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub schedules: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory under which container data volumes are created
    pub volumes_dir: String,
    #[serde(default = "default_runtime_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_seconds: u64,
    #[serde(default = "default_provision_wait")]
    pub provision_wait_seconds: u64,
}

fn default_runtime_timeout() -> u64 {
    30
}

fn default_build_timeout() -> u64 {
    1800
}

fn default_provision_wait() -> u64 {
    crate::constants::provisioning::WAIT_RUNNING_SECONDS
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            volumes_dir: "data/volumes".to_string(),
            request_timeout_seconds: default_runtime_timeout(),
            build_timeout_seconds: default_build_timeout(),
            provision_wait_seconds: default_provision_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// First three octets of the container network, e.g. "10.66.0"
    pub ip_prefix: String,
    pub ip_host_min: u8,
    pub ip_host_max: u8,
    pub ssh_port_min: u16,
    pub ssh_port_max: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip_prefix: "10.66.0".to_string(),
            ip_host_min: 2,
            ip_host_max: 254,
            ssh_port_min: 2200,
            ssh_port_max: 2999,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Directory the DNS server reads zone files from
    pub zone_dir: String,
    /// Directory for per-zone server config snippets
    pub config_dir: String,
    /// HTTP reload endpoint of the DNS server
    pub reload_url: String,
    /// HTTP health endpoint of the DNS server
    pub health_url: String,
    #[serde(default = "default_dns_timeout")]
    pub reload_timeout_seconds: u64,
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
    /// Nameservers written as NS lines into every zone
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,
    /// SOA RNAME (zone contact), mailbox-as-domain form
    #[serde(default = "default_soa_rname")]
    pub soa_rname: String,
}

fn default_dns_timeout() -> u64 {
    15
}

fn default_ttl() -> u32 {
    crate::constants::dns::DEFAULT_TTL
}

fn default_nameservers() -> Vec<String> {
    vec!["ns1.example-host.net".to_string(), "ns2.example-host.net".to_string()]
}

fn default_soa_rname() -> String {
    "hostmaster.example-host.net".to_string()
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            zone_dir: "data/zones".to_string(),
            config_dir: "data/zones.d".to_string(),
            reload_url: "http://127.0.0.1:8053/reload".to_string(),
            health_url: "http://127.0.0.1:8053/health".to_string(),
            reload_timeout_seconds: default_dns_timeout(),
            default_ttl: default_ttl(),
            nameservers: default_nameservers(),
            soa_rname: default_soa_rname(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Directory the proxy reads one config file per domain from
    pub sites_dir: String,
    /// Proxy binary used for config test and reload
    #[serde(default = "default_proxy_command")]
    pub command: String,
    #[serde(default = "default_test_args")]
    pub test_args: Vec<String>,
    #[serde(default = "default_reload_args")]
    pub reload_args: Vec<String>,
    #[serde(default = "default_proxy_timeout")]
    pub command_timeout_seconds: u64,
}

fn default_proxy_command() -> String {
    "nginx".to_string()
}

fn default_test_args() -> Vec<String> {
    vec!["-t".to_string()]
}

fn default_reload_args() -> Vec<String> {
    vec!["-s".to_string(), "reload".to_string()]
}

fn default_proxy_timeout() -> u64 {
    20
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sites_dir: "data/sites-enabled".to_string(),
            command: default_proxy_command(),
            test_args: default_test_args(),
            reload_args: default_reload_args(),
            command_timeout_seconds: default_proxy_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Local staging directory for backup archives
    pub staging_dir: String,
    /// Root of the object-storage backend used for uploads
    pub storage_dir: String,
    #[serde(default)]
    pub upload_enabled: bool,
    /// Request server-side encryption for uploaded archives
    #[serde(default = "default_true")]
    pub encrypt_uploads: bool,
    #[serde(default = "default_daily_keep")]
    pub daily_keep: usize,
    #[serde(default = "default_weekly_keep")]
    pub weekly_keep: usize,
    #[serde(default = "default_monthly_keep")]
    pub monthly_keep: usize,
}

fn default_true() -> bool {
    true
}

fn default_daily_keep() -> usize {
    crate::constants::retention::DAILY_KEEP
}

fn default_weekly_keep() -> usize {
    crate::constants::retention::WEEKLY_KEEP
}

fn default_monthly_keep() -> usize {
    crate::constants::retention::MONTHLY_KEEP
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            staging_dir: "data/backups".to_string(),
            storage_dir: "data/object-store".to_string(),
            upload_enabled: false,
            encrypt_uploads: true,
            daily_keep: default_daily_keep(),
            weekly_keep: default_weekly_keep(),
            monthly_keep: default_monthly_keep(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Smallest amount an invoice line may carry, as a decimal string
    #[serde(default = "default_minimum_charge")]
    pub minimum_charge: String,
    #[serde(default = "default_grace_days")]
    pub setup_fee_grace_days: i64,
    #[serde(default = "default_overdue_days")]
    pub overdue_suspend_days: i64,
}

fn default_minimum_charge() -> String {
    crate::constants::billing::MINIMUM_CHARGE.to_string()
}

fn default_grace_days() -> i64 {
    crate::constants::billing::SETUP_FEE_GRACE_DAYS
}

fn default_overdue_days() -> i64 {
    crate::constants::billing::OVERDUE_SUSPEND_DAYS
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            minimum_charge: default_minimum_charge(),
            setup_fee_grace_days: default_grace_days(),
            overdue_suspend_days: default_overdue_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_max_archive")]
    pub max_archive_bytes: usize,
    /// Vulnerability scanner invoked with the image tag as last argument;
    /// scanning is skipped (and logged) when unset
    pub scanner_command: Option<String>,
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_seconds: u64,
    #[serde(default = "default_worker_poll")]
    pub worker_poll_seconds: u64,
}

fn default_max_archive() -> usize {
    crate::constants::images::MAX_ARCHIVE_BYTES
}

fn default_scan_timeout() -> u64 {
    600
}

fn default_worker_poll() -> u64 {
    crate::constants::images::WORKER_POLL_SECONDS
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: default_max_archive(),
            scanner_command: None,
            scan_timeout_seconds: default_scan_timeout(),
            worker_poll_seconds: default_worker_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
    #[serde(default = "default_metric_retention")]
    pub retention_days: i64,
}

fn default_sample_interval() -> u64 {
    crate::constants::metrics::SAMPLE_INTERVAL_SECONDS
}

fn default_metric_retention() -> i64 {
    crate::constants::metrics::RETENTION_DAYS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: default_sample_interval(),
            retention_days: default_metric_retention(),
        }
    }
}

/// Cron schedules (6-field: sec min hour day month dow); a job is disabled
/// when its schedule is unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub daily_backup: Option<String>,
    pub weekly_backup: Option<String>,
    pub monthly_backup: Option<String>,
    pub retention_cleanup: Option<String>,
    pub metrics_prune: Option<String>,
    pub recurring_billing: Option<String>,
    pub overdue_check: Option<String>,
}
