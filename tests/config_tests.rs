use pubsub_archive::config::types::BackpressureStrategy;
use pubsub_archive::config::{generate::generate_starter_config, load_config, ConfigError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.stack.name, "PubSub-Sandbox");
    assert_eq!(config.stream.name, "s3-delivery-stream");
    assert_eq!(config.stream.buffer.max_buffer_bytes, 64 * 1024 * 1024);
    assert_eq!(
        config.stream.buffer.max_buffer_interval,
        Duration::from_secs(60)
    );
    assert_eq!(config.ingress.max_entries_per_request, 10);
    assert_eq!(config.ingress.pattern.accounts, vec!["111111111111"]);
}

#[test]
fn test_full_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
stack:
  name: pubsub-prod
  account: "222222222222"
  region: eu-central-1
ingress:
  listen: 0.0.0.0:9000
  bus_name: prod-events
  backpressure:
    strategy: reject
    queue_capacity: 500
  pattern:
    accounts: ["222222222222", "333333333333"]
stream:
  name: archive-stream
  buffer:
    max_buffer_bytes: 5MB
    max_buffer_interval: 5m
  processing:
    deaggregation: false
    delimiter: "\r\n"
  prefix: "{key:source}/date={yyyy}/{MM}/{dd}/"
writer:
  workers: 8
  retry_duration: 30s
storage:
  path: /var/lib/pubsub/bucket
  bucket_name: prod-archive
archive:
  path: /var/lib/pubsub/archive
  retention: 30days
parameters:
  path: /var/lib/pubsub/parameters.yml
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = load_config(&config_path).unwrap();

    assert_eq!(config.ingress.backpressure.strategy, BackpressureStrategy::Reject);
    assert_eq!(config.ingress.backpressure.queue_capacity, 500);
    assert_eq!(config.ingress.pattern.accounts.len(), 2);
    assert_eq!(config.stream.buffer.max_buffer_bytes, 5_000_000);
    assert_eq!(
        config.stream.buffer.max_buffer_interval,
        Duration::from_secs(300)
    );
    assert!(!config.stream.processing.deaggregation);
    assert_eq!(config.stream.processing.delimiter, "\r\n");
    assert_eq!(config.writer.workers, 8);
    assert_eq!(config.writer.retry_duration, Duration::from_secs(30));
    assert_eq!(config.storage.bucket_name, "prod-archive");

    let archive = config.archive.unwrap();
    assert_eq!(archive.retention, Duration::from_secs(30 * 24 * 3600));
    // The archive rule defaults to the stack account as well
    assert_eq!(archive.pattern.accounts, vec!["222222222222"]);
}

#[test]
fn test_validation_errors_are_collected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
stack:
  name: ""
  account: "111111111111"
stream:
  buffer:
    max_buffer_bytes: 0
  prefix: "{key:owner}/"
writer:
  workers: 0
storage:
  path: /tmp/pubsub
"#;
    fs::write(&config_path, config_yaml).unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert!(errors.iter().any(|e| e.contains("stack.name")));
            assert!(errors.iter().any(|e| e.contains("max_buffer_bytes")));
            assert!(errors.iter().any(|e| e.contains("'owner'")));
            assert!(errors.iter().any(|e| e.contains("writer.workers")));
        }
        other => panic!("expected validation errors, got {:?}", other),
    }
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = load_config(&temp_dir.path().join("missing.yml"));
    assert!(result.is_err());
}
