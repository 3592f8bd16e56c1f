use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use crate::transform::MetadataQuery;
use crate::writer::PrefixTemplate;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    load_config_from_str(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse, normalize and validate a config held in memory
pub fn load_config_from_str(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    apply_account_defaults(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded: Vec<String> = ENV_VAR_PATTERN
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);

    if let Some(archive) = config.archive.as_mut() {
        archive.path = expand_tilde(&archive.path);
    }

    if let Some(parameters) = config.parameters.as_mut() {
        parameters.path = expand_tilde(&parameters.path);
    }
}

/// Patterns without an account list only admit events from the stack's own account
fn apply_account_defaults(config: &mut Config) {
    let account = config.stack.account.clone();

    if config.ingress.pattern.accounts.is_empty() {
        config.ingress.pattern.accounts.push(account.clone());
    }

    if let Some(archive) = config.archive.as_mut() {
        if archive.pattern.accounts.is_empty() {
            archive.pattern.accounts.push(account);
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_stack(&config.stack, &mut errors);
    validate_ingress(&config.ingress, &mut errors);
    validate_stream(&config.stream, &mut errors);
    validate_writer(&config.writer, &mut errors);

    if config.storage.bucket_name.is_empty() {
        errors.push("storage.bucket_name cannot be empty".to_string());
    }
    if config.storage.notification_capacity == 0 {
        errors.push("storage.notification_capacity must be positive".to_string());
    }

    if let Some(archive) = &config.archive {
        if archive.retention.is_zero() {
            errors.push("archive.retention must be positive".to_string());
        }
        if archive.prune_interval.is_zero() {
            errors.push("archive.prune_interval must be positive".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_stack(stack: &StackConfig, errors: &mut Vec<String>) {
    if stack.name.trim().is_empty() {
        errors.push("stack.name cannot be empty".to_string());
    }
    if stack.account.trim().is_empty() {
        errors.push("stack.account cannot be empty".to_string());
    }
    if stack.region.trim().is_empty() {
        errors.push("stack.region cannot be empty".to_string());
    }
}

fn validate_ingress(ingress: &IngressConfig, errors: &mut Vec<String>) {
    if ingress.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "ingress.listen: invalid socket address '{}'",
            ingress.listen
        ));
    }
    if ingress.bus_name.is_empty() {
        errors.push("ingress.bus_name cannot be empty".to_string());
    }
    if ingress.backpressure.queue_capacity == 0 {
        errors.push("ingress.backpressure.queue_capacity must be positive".to_string());
    }
    if ingress.backpressure.strategy == BackpressureStrategy::Block
        && ingress.backpressure.max_wait.is_zero()
    {
        errors.push(
            "ingress.backpressure.max_wait must be positive with the 'block' strategy".to_string(),
        );
    }
    if ingress.max_entries_per_request == 0 {
        errors.push("ingress.max_entries_per_request must be positive".to_string());
    }
}

fn validate_stream(stream: &StreamConfig, errors: &mut Vec<String>) {
    if stream.name.is_empty() {
        errors.push("stream.name cannot be empty".to_string());
    }

    if stream.buffer.max_buffer_bytes == 0 {
        errors.push("stream.buffer.max_buffer_bytes must be positive".to_string());
    }
    if stream.buffer.max_buffer_interval.is_zero() {
        errors.push("stream.buffer.max_buffer_interval must be positive".to_string());
    }
    if stream.buffer.sealed_capacity == 0 {
        errors.push("stream.buffer.sealed_capacity must be positive".to_string());
    }

    if stream.processing.delimiter.is_empty() {
        errors.push("stream.processing.delimiter cannot be empty".to_string());
    }

    let query = match MetadataQuery::parse(&stream.processing.metadata_query) {
        Ok(query) => Some(query),
        Err(e) => {
            errors.push(format!("stream.processing.metadata_query: {}", e));
            None
        }
    };

    match PrefixTemplate::parse(&stream.prefix) {
        Ok(template) => {
            if template.has_error_type() {
                errors.push("stream.prefix cannot reference {error_type}".to_string());
            }
            if let Some(query) = &query {
                for key in template.key_names() {
                    if !query.field_names().any(|name| name == key) {
                        errors.push(format!(
                            "stream.prefix: key '{}' is not produced by the metadata query",
                            key
                        ));
                    }
                }
            }
        }
        Err(e) => errors.push(format!("stream.prefix: {}", e)),
    }

    match PrefixTemplate::parse(&stream.error_prefix) {
        Ok(template) => {
            if !template.has_error_type() {
                errors.push("stream.error_prefix must reference {error_type}".to_string());
            }
            if template.key_names().next().is_some() {
                errors.push("stream.error_prefix cannot reference partition keys".to_string());
            }
        }
        Err(e) => errors.push(format!("stream.error_prefix: {}", e)),
    }
}

fn validate_writer(writer: &WriterConfig, errors: &mut Vec<String>) {
    if writer.workers == 0 {
        errors.push("writer.workers must be positive".to_string());
    }
    if writer.transform_concurrency == 0 {
        errors.push("writer.transform_concurrency must be positive".to_string());
    }
    if writer.initial_backoff.is_zero() {
        errors.push("writer.initial_backoff must be positive".to_string());
    }
    if writer.max_backoff < writer.initial_backoff {
        errors.push("writer.max_backoff must not be smaller than writer.initial_backoff".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
stack:
  name: PubSub-Sandbox
  account: "111111111111"
storage:
  path: /tmp/pubsub-test
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();

        assert_eq!(config.stack.region, "us-east-1");
        assert_eq!(config.stream.buffer.max_buffer_bytes, 64 * 1024 * 1024);
        assert_eq!(
            config.stream.buffer.max_buffer_interval,
            std::time::Duration::from_secs(60)
        );
        assert_eq!(config.writer.retry_duration, std::time::Duration::from_secs(10));
        assert_eq!(config.ingress.pattern.accounts, vec!["111111111111".to_string()]);
        assert_eq!(config.stream.processing.metadata_query, DEFAULT_METADATA_QUERY);
        assert!(config.archive.is_none());
    }

    #[test]
    fn test_zero_thresholds_are_rejected() {
        let yaml = format!(
            "{}\nstream:\n  buffer:\n    max_buffer_bytes: 0\n    max_buffer_interval: 0s\n",
            MINIMAL
        );
        let err = load_config_from_str(&yaml).unwrap_err();

        match err {
            ConfigError::ValidationList(errors) => {
                assert!(errors.iter().any(|e| e.contains("max_buffer_bytes")));
                assert!(errors.iter().any(|e| e.contains("max_buffer_interval")));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_prefix_key_must_come_from_query() {
        let yaml = format!(
            "{}\nstream:\n  prefix: \"{{key:event_publisher}}/date={{yyyy}}/\"\n",
            MINIMAL
        );
        let err = load_config_from_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("event_publisher"));
    }

    #[test]
    fn test_superseded_envelope_variant_is_configurable() {
        let yaml = format!(
            r#"{}
stream:
  processing:
    metadata_query: "{{event_publisher:.event_publisher, event_name:.event_name}}"
  prefix: "{{key:event_publisher}}/{{key:event_name}}/date={{yyyy}}-{{MM}}-{{dd}}/"
"#,
            MINIMAL
        );
        let config = load_config_from_str(&yaml).unwrap();
        assert!(config.stream.prefix.starts_with("{key:event_publisher}"));
    }

    #[test]
    fn test_error_prefix_requires_error_type() {
        let yaml = format!("{}\nstream:\n  error_prefix: \"errors/\"\n", MINIMAL);
        let err = load_config_from_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("error_prefix"));
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = MINIMAL.replace("/tmp/pubsub-test", "$env{PUBSUB_SURELY_UNSET_VAR}/data");
        let err = load_config_from_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("PUBSUB_SURELY_UNSET_VAR"));
    }

    #[test]
    fn test_invalid_listen_address() {
        let yaml = format!("{}\ningress:\n  listen: not-an-address\n", MINIMAL);
        let err = load_config_from_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("ingress.listen"));
    }
}
