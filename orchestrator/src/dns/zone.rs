//! SOA serial policy and zone-file rendering.
//!
//! Serials are `YYYYMMDDNN`: date-legible, strictly increasing, with the
//! two-digit tail counting same-day edits. Rendering is deterministic
//! (fixed type order, stable formatting) so consecutive outputs diff
//! cleanly and the DNS server's parser sees a consistent layout.

use chrono::NaiveDate;

use crate::database::{DnsRecord, DnsZone};

use super::RECORD_TYPE_ORDER;

/// Next serial for a zone edited on `today`.
///
/// If the stored serial already carries today's date the two-digit sequence
/// advances; otherwise the serial resets to `<today>01`. A stored serial
/// from the future (clock skew, >99 same-day edits) keeps incrementing
/// numerically; monotonicity wins over date legibility.
pub fn increment_soa_serial(current: i64, today: NaiveDate) -> i64 {
    let date_part: i64 = today
        .format("%Y%m%d")
        .to_string()
        .parse()
        .expect("date formats as digits");
    let today_base = date_part * 100;

    if current / 100 == date_part {
        current + 1
    } else if current >= today_base + 1 {
        current + 1
    } else {
        today_base + 1
    }
}

/// Append the trailing dot that marks a name fully qualified
pub fn normalize_fqdn(value: &str) -> String {
    if value.ends_with('.') {
        value.to_string()
    } else {
        format!("{}.", value)
    }
}

fn quote_txt(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\\\""))
    }
}

fn render_record(record: &DnsRecord) -> String {
    let ttl_field = record
        .ttl
        .map(|t| format!("{}\t", t))
        .unwrap_or_default();

    let rdata = match record.record_type.as_str() {
        "CNAME" | "NS" | "PTR" => normalize_fqdn(&record.value),
        "MX" => format!(
            "{}\t{}",
            record.priority.unwrap_or(10),
            normalize_fqdn(&record.value)
        ),
        "SRV" => format!(
            "{}\t{}\t{}\t{}",
            record.priority.unwrap_or(0),
            record.weight.unwrap_or(0),
            record.port.unwrap_or(0),
            normalize_fqdn(&record.value)
        ),
        "TXT" => quote_txt(&record.value),
        // A, AAAA carry their value verbatim
        _ => record.value.clone(),
    };

    format!(
        "{}\t{}IN\t{}\t{}",
        record.name, ttl_field, record.record_type, rdata
    )
}

/// Render a complete zone file: `$ORIGIN`/`$TTL`, one SOA block, the zone's
/// nameservers as NS lines, then records grouped by type in fixed order.
pub fn generate_zone_file(zone: &DnsZone, records: &[DnsRecord]) -> String {
    let origin = normalize_fqdn(&zone.zone_name);
    let mname = normalize_fqdn(&zone.soa_mname);
    let rname = normalize_fqdn(&zone.soa_rname);

    let mut out = String::new();
    out.push_str(&format!("$ORIGIN {}\n", origin));
    out.push_str(&format!("$TTL {}\n", zone.default_ttl));
    out.push_str(&format!("@\tIN\tSOA\t{} {} (\n", mname, rname));
    out.push_str(&format!("\t{} ; serial\n", zone.last_updated_serial));
    out.push_str(&format!("\t{} ; refresh\n", zone.refresh));
    out.push_str(&format!("\t{} ; retry\n", zone.retry));
    out.push_str(&format!("\t{} ; expire\n", zone.expire));
    out.push_str(&format!("\t{} ; minimum\n", zone.minimum));
    out.push_str(")\n");

    for ns in zone.nameserver_list() {
        out.push_str(&format!("@\tIN\tNS\t{}\n", normalize_fqdn(&ns)));
    }

    for record_type in RECORD_TYPE_ORDER {
        for record in records.iter().filter(|r| r.record_type == record_type) {
            out.push_str(&render_record(record));
            out.push('\n');
        }
    }

    out
}

/// Per-zone server config snippet dropped next to the zone file
pub fn render_zone_config_snippet(zone_name: &str, zone_dir: &str) -> String {
    format!(
        "zone \"{}\" {{\n    type master;\n    file \"{}/{}.zone\";\n}};\n",
        zone_name, zone_dir, zone_name
    )
}
