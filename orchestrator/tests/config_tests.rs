//! Configuration loading tests.

use orchestrator::config::ConfigManager;

async fn load(toml: &str) -> anyhow::Result<std::sync::Arc<orchestrator::config::Config>> {
    let tmp = tempfile::tempdir().unwrap();
    tokio::fs::write(tmp.path().join("main.toml"), toml)
        .await
        .unwrap();
    let manager = ConfigManager::new(tmp.path().to_string_lossy().to_string()).await?;
    Ok(manager.get_current_config())
}

#[tokio::test]
async fn test_minimal_config_gets_defaults() {
    let config = load(
        r#"
host = "127.0.0.1"
port = 8095
database_path = "data/orchestrator.db"
base_domain = "vps.example-host.net"
"#,
    )
    .await
    .unwrap();

    assert_eq!(config.port, 8095);
    assert_eq!(config.billing.setup_fee_grace_days, 14);
    assert_eq!(config.backup.daily_keep, 7);
    assert_eq!(config.backup.weekly_keep, 4);
    assert_eq!(config.backup.monthly_keep, 12);
    assert_eq!(config.dns.default_ttl, 3600);
    assert_eq!(config.proxy.command, "nginx");
    assert!(config.schedules.daily_backup.is_none());
}

#[tokio::test]
async fn test_sections_override_defaults() {
    let config = load(
        r#"
host = "0.0.0.0"
port = 9000
database_path = "data/orchestrator.db"
base_domain = "vps.example-host.net"
operator_webhook_url = "https://hooks.example/ops"

[billing]
minimum_charge = "0.50"
setup_fee_grace_days = 30

[backup]
staging_dir = "/var/backups/vps"
storage_dir = "/var/objects"
daily_keep = 3

[schedules]
daily_backup = "0 0 3 * * *"
"#,
    )
    .await
    .unwrap();

    assert_eq!(config.operator_webhook_url, "https://hooks.example/ops");
    assert_eq!(config.billing.minimum_charge, "0.50");
    assert_eq!(config.billing.setup_fee_grace_days, 30);
    assert_eq!(config.backup.daily_keep, 3);
    // Untouched fields keep their defaults
    assert_eq!(config.backup.weekly_keep, 4);
    assert_eq!(
        config.schedules.daily_backup.as_deref(),
        Some("0 0 3 * * *")
    );
}

#[tokio::test]
async fn test_invalid_configs_are_rejected() {
    // Missing required field
    assert!(load(
        r#"
host = "127.0.0.1"
port = 8095
database_path = "data/orchestrator.db"
"#,
    )
    .await
    .is_err());

    // Inverted port range
    assert!(load(
        r#"
host = "127.0.0.1"
port = 8095
database_path = "data/orchestrator.db"
base_domain = "vps.example-host.net"

[network]
ip_prefix = "10.66.0"
ip_host_min = 200
ip_host_max = 100
ssh_port_min = 2200
ssh_port_max = 2999
"#,
    )
    .await
    .is_err());
}
