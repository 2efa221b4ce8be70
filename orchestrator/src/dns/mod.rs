//! DNS zone management: serial policy, zone-file rendering, and the sync
//! service that delivers zones to the DNS server process.

pub mod sync;
pub mod zone;

pub use sync::{DnsControlPlane, DnsSyncService, HttpDnsControl};
pub use zone::{generate_zone_file, increment_soa_serial, render_zone_config_snippet};

use crate::errors::ValidationError;

/// Record types this core manages, in the fixed order they are rendered
pub const RECORD_TYPE_ORDER: [&str; 8] = ["A", "AAAA", "CNAME", "MX", "TXT", "NS", "SRV", "PTR"];

/// Validate user-supplied record fields before anything is written
pub fn validate_record_input(
    name: &str,
    record_type: &str,
    value: &str,
    priority: Option<i64>,
    weight: Option<i64>,
    port: Option<i64>,
) -> Result<(), ValidationError> {
    if !RECORD_TYPE_ORDER.contains(&record_type) {
        return Err(ValidationError::InvalidDnsInput {
            reason: format!("unsupported record type '{}'", record_type),
        });
    }
    if name.is_empty() {
        return Err(ValidationError::InvalidDnsInput {
            reason: "record name must not be empty (use '@' for the apex)".to_string(),
        });
    }
    if value.is_empty() {
        return Err(ValidationError::InvalidDnsInput {
            reason: "record value must not be empty".to_string(),
        });
    }
    if record_type == "MX" && priority.is_none() {
        return Err(ValidationError::InvalidDnsInput {
            reason: "MX records require a priority".to_string(),
        });
    }
    if record_type == "SRV" && (priority.is_none() || weight.is_none() || port.is_none()) {
        return Err(ValidationError::InvalidDnsInput {
            reason: "SRV records require priority, weight and port".to_string(),
        });
    }
    Ok(())
}
