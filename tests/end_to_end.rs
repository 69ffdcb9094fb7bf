use authsim::config::{AUDIT_LOG, Bounds, CPU_USAGE_LOG, DISK_USAGE_LOG, MEMORY_USAGE_LOG};
use authsim::simulation::Stage;
use authsim::simulation::audit::ParsedAudit;
use authsim::{SimConfig, Simulator};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const HOST: &str = "solsyspingfed1";

const COMPLETE_TRACE: [Stage; 7] = [
    Stage::AuthnStart,
    Stage::AuthnSuccess,
    Stage::AuthzCodeIssued,
    Stage::TokenIssued,
    Stage::IntrospectionSuccess,
    Stage::ValidationSuccess,
    Stage::RefreshSuccess,
];

fn read(dir: &TempDir, file: &str) -> String {
    fs::read_to_string(dir.path().join(file)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_simulated_minutes_produce_complete_traces_and_metrics() {
    let dir = TempDir::new().unwrap();
    let mut config = SimConfig {
        log_dir: dir.path().to_path_buf(),
        hosts: vec![HOST.to_string()],
        // One simulated second per wall-clock millisecond.
        time_scale: 0.001,
        ..SimConfig::default()
    };
    config.usage.enabled = false;
    config.oauth.initial_workers = Bounds::new(15, 20);

    let simulator = Simulator::start(config).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    simulator.shutdown().await.unwrap();

    let audit = read(&dir, AUDIT_LOG);
    let records: Vec<ParsedAudit> = audit
        .split_terminator("\r\n")
        .map(|line| ParsedAudit::parse(line).unwrap_or_else(|| panic!("bad line: {line}")))
        .collect();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.host == HOST));

    let mut traces: HashMap<&str, Vec<Stage>> = HashMap::new();
    for record in &records {
        traces.entry(record.tid.as_str()).or_default().push(record.stage);
    }
    assert!(
        traces.values().any(|stages| stages.as_slice() == COMPLETE_TRACE),
        "no complete trace among {} transactions",
        traces.len()
    );
    // Every trace starts at authentication, whether or not it completed.
    assert!(traces.values().all(|stages| stages[0] == Stage::AuthnStart));

    for file in [CPU_USAGE_LOG, DISK_USAGE_LOG, MEMORY_USAGE_LOG] {
        let content = read(&dir, file);
        assert!(
            content
                .split_terminator("\r\n")
                .any(|line| line.split("\t\t").nth(1) == Some(HOST)),
            "{file} has no line for {HOST}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_leaves_no_partial_lines() {
    let dir = TempDir::new().unwrap();
    let mut config = SimConfig {
        log_dir: dir.path().to_path_buf(),
        hosts: vec!["idp-a".to_string(), "idp-b".to_string()],
        time_scale: 0.001,
        ..SimConfig::default()
    };
    config.usage.enabled = false;
    config.oauth.initial_workers = Bounds::new(5, 5);

    let simulator = Simulator::start(config).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    simulator.shutdown().await.unwrap();

    for file in [AUDIT_LOG, CPU_USAGE_LOG, DISK_USAGE_LOG, MEMORY_USAGE_LOG] {
        let content = read(&dir, file);
        assert!(content.is_empty() || content.ends_with("\r\n"), "{file}");
    }
    for line in read(&dir, AUDIT_LOG).split_terminator("\r\n") {
        assert!(ParsedAudit::parse(line).is_some(), "bad line: {line}");
    }
}
