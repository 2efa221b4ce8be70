//! Central repository for timeouts, intervals, and limit constants
//!
//! Values here are the defaults; most of them can be overridden from the
//! TOML configuration where a matching field exists.

#![allow(dead_code)] // Some constants are defined for future use

use std::time::Duration;

/// External call timeout constants
pub mod external {
    use super::Duration;

    /// Default timeout for container runtime API calls
    pub const RUNTIME_CALL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Timeout for an image build through the runtime API
    pub const IMAGE_BUILD_TIMEOUT: Duration = Duration::from_secs(1800);

    /// Timeout for the DNS server reload endpoint
    pub const DNS_RELOAD_TIMEOUT: Duration = Duration::from_secs(15);

    /// Timeout for proxy config test / reload commands
    pub const PROXY_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

    /// Timeout for the vulnerability scanner command
    pub const SCANNER_TIMEOUT: Duration = Duration::from_secs(600);

    /// Webhook request timeout
    pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Provisioning constants
pub mod provisioning {
    /// Maximum seconds to wait for a freshly created container to report running
    pub const WAIT_RUNNING_SECONDS: u64 = 60;

    /// Poll interval while waiting for the running state
    pub const WAIT_POLL_SECONDS: u64 = 2;

    /// Seconds the runtime is given to stop a container before it is killed
    pub const STOP_GRACE_SECONDS: i64 = 30;
}

/// Retry policy for background operations
pub mod retries {
    /// Default attempts for operations against external processes
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Base backoff between attempts; multiplied by the attempt number
    pub const BACKOFF_BASE_SECONDS: u64 = 10;
}

/// Cleanup and maintenance constants
pub mod cleanup {
    /// Hours after which stuck operations are cleaned up
    pub const OPERATION_CLEANUP_HOURS: i64 = 24;

    /// Cleanup interval in seconds
    pub const CLEANUP_INTERVAL_SECONDS: u64 = 3600; // 1 hour
}

/// Billing defaults
pub mod billing {
    /// Smallest amount an invoice line may carry
    pub const MINIMUM_CHARGE: &str = "0.01";

    /// Days after the subscription start date within which a cancellation
    /// refunds the setup fee in full
    pub const SETUP_FEE_GRACE_DAYS: i64 = 14;

    /// Days past the billing date before an unpaid subscription is suspended
    pub const OVERDUE_SUSPEND_DAYS: i64 = 7;
}

/// Backup retention defaults (keep-count per bucket)
pub mod retention {
    pub const DAILY_KEEP: usize = 7;
    pub const WEEKLY_KEEP: usize = 4;
    pub const MONTHLY_KEEP: usize = 12;
}

/// DNS defaults
pub mod dns {
    /// Default TTL written at the top of every zone file
    pub const DEFAULT_TTL: u32 = 3600;

    pub const SOA_REFRESH: u32 = 7200;
    pub const SOA_RETRY: u32 = 1800;
    pub const SOA_EXPIRE: u32 = 1209600;
    pub const SOA_MINIMUM: u32 = 300;
}

/// Image pipeline defaults
pub mod images {
    /// Maximum accepted size for an uploaded build archive (100 MiB)
    pub const MAX_ARCHIVE_BYTES: usize = 100 * 1024 * 1024;

    /// Seconds between polls of the pending-image queue
    pub const WORKER_POLL_SECONDS: u64 = 15;
}

/// Metrics defaults
pub mod metrics {
    /// Seconds between stats samples of running containers
    pub const SAMPLE_INTERVAL_SECONDS: u64 = 60;

    /// Days of samples kept by the pruning job
    pub const RETENTION_DAYS: i64 = 30;
}

/// Limits and constraints
pub mod limits {
    /// Maximum number of operation records to query
    pub const MAX_OPERATION_RECORDS: i32 = 100;

    /// Maximum build log lines returned by the API
    pub const MAX_BUILD_LOG_LINES: i32 = 1000;
}
