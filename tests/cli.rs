use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::NamedTempFile;

const OFFLINE_CONFIG: &str = r#"
[quota.default_plan]
max_concurrent_requests = 10
monthly_request_limit = 86400
monthly_token_limit = 1000000

[health]
live_probes = false

[[directory.organizations]]
organization_id = "acme"
available_regions = ["eu-west-1", "eu-central-1"]

[[directory.users]]
organization_id = "acme"
user_id = "alice"
data_residency_region = "eu-west-1"

[[directory.users]]
organization_id = "acme"
user_id = "bob"
data_residency_region = "eu-west-1"
cross_border_consent_given = true
"#;

fn config_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    fs::write(file.path(), content).unwrap();
    file
}

fn regionguard(config: &NamedTempFile) -> Command {
    let mut cmd = Command::cargo_bin("regionguard").unwrap();
    cmd.arg("--config").arg(config.path());
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("regionguard").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("regionguard 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("regionguard").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Quota admission and regional failover for multi-region SaaS",
        ));
}

#[test]
fn test_cli_check_quota_missing_org() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .arg("check-quota")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required arguments were not provided"));
}

#[test]
fn test_cli_check_quota_throttles() {
    // 86 400 requests a month derive to two requests a minute
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args(["check-quota", "--org", "acme", "--repeat", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"decision\": \"allowed\""))
        .stdout(predicate::str::contains("\"decision\": \"throttled\""));
}

#[test]
fn test_cli_usage_report() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args(["usage", "--org", "acme", "--metric", "tokens", "--record", "1234"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1234"));
}

#[test]
fn test_cli_health_marks_region_down() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args(["health", "--region", "eu-west-1", "--down", "eu-west-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_healthy\": false"))
        .stdout(predicate::str::contains("\"health_score\": 30"));
}

#[test]
fn test_cli_nearest() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args([
            "nearest",
            "--from",
            "eu-west-1",
            "--candidates",
            "eu-central-1,ap-southeast-1",
            "--down",
            "eu-west-1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"nearest\": \"eu-central-1\""));
}

#[test]
fn test_cli_select_region_fails_over() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args([
            "select-region",
            "--org",
            "acme",
            "--user",
            "alice",
            "--primary",
            "eu-west-1",
            "--down",
            "eu-west-1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_failover\": true"))
        .stdout(predicate::str::contains("\"selected_region\": \"eu-central-1\""))
        .stdout(predicate::str::contains("\"needs_cross_border_consent\": true"));
}

#[test]
fn test_cli_failover_needs_consent() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args([
            "failover",
            "--org",
            "acme",
            "--user",
            "alice",
            "--from",
            "eu-west-1",
            "--to",
            "eu-central-1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"needs_consent\""))
        .stdout(predicate::str::contains("from=eu-west-1&to=eu-central-1"));
}

#[test]
fn test_cli_failover_succeeds_with_consent() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args([
            "failover",
            "--org",
            "acme",
            "--user",
            "bob",
            "--from",
            "eu-west-1",
            "--to",
            "eu-central-1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"succeeded\""));
}

#[test]
fn test_cli_failover_unknown_organization() {
    let config = config_file(OFFLINE_CONFIG);
    regionguard(&config)
        .args(["failover", "--org", "globex", "--from", "eu-west-1", "--to", "eu-central-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("globex"));
}

#[test]
fn test_cli_down_requires_offline_probes() {
    let config = config_file(
        r#"
[health]
live_probes = true
providers = []

[failover]
default_regions = ["north"]

[[topology.regions]]
name = "north"
latitude = 60.0
longitude = 10.0
database_endpoint = "127.0.0.1:1"
"#,
    );
    regionguard(&config)
        .args(["health", "--down", "north"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("live probes are disabled"));
}

#[test]
fn test_cli_live_health_checks_need_endpoints() {
    let config = config_file("[health]\nlive_probes = true\n");
    regionguard(&config)
        .arg("health")
        .assert()
        .failure()
        .stderr(predicate::str::contains("database_endpoint"));
}

#[test]
fn test_cli_default_config_routes_offline() {
    let config = config_file("");
    regionguard(&config)
        .args(["health", "--region", "us-east-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_healthy\": true"));
}

#[test]
fn test_cli_rejects_invalid_config() {
    let config = config_file("[health]\ndegraded_score = 95\n");
    regionguard(&config).arg("health").assert().failure();
}

#[test]
fn test_cli_missing_config_file() {
    let mut cmd = Command::cargo_bin("regionguard").unwrap();
    cmd.args(["--config", "/nonexistent/regionguard.toml", "health"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
