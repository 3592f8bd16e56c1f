use crate::config::types::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const EVENT_BUS_ARN: &str = "/pubsub/event-bus/arn";
pub const EVENT_BUS_NAME: &str = "/pubsub/event-bus/name";
pub const BUCKET_ARN: &str = "/pubsub/bucket/arn";
pub const DELIVERY_STREAM_ARN: &str = "/pubsub/s3-delivery-stream/arn";
pub const SUBSCRIPTION_ROLE_ARN: &str = "/pubsub/firehose-subscription-role/arn";

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("failed to write parameters: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode parameters: {0}")]
    Encode(#[from] serde_yaml::Error),
}

/// Resource identifiers published for other stacks to discover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub stack: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl ParameterSet {
    pub fn from_config(config: &Config) -> Self {
        let account = &config.stack.account;
        let region = &config.stack.region;
        let bus_name = &config.ingress.bus_name;

        let parameters = BTreeMap::from([
            (
                EVENT_BUS_ARN.to_string(),
                event_bus_arn(region, account, bus_name),
            ),
            (EVENT_BUS_NAME.to_string(), bus_name.clone()),
            (
                BUCKET_ARN.to_string(),
                format!("arn:aws:s3:::{}", config.storage.bucket_name),
            ),
            (
                DELIVERY_STREAM_ARN.to_string(),
                format!(
                    "arn:aws:firehose:{}:{}:deliverystream/{}",
                    region, account, config.stream.name
                ),
            ),
            (
                SUBSCRIPTION_ROLE_ARN.to_string(),
                format!(
                    "arn:aws:iam::{}:role/{}-FirehoseSubscriptionRole",
                    account, config.stack.name
                ),
            ),
        ]);

        Self {
            stack: config.stack.name.clone(),
            parameters,
            tags: resource_tags(config),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Write the set as YAML, replacing any previous export
    pub async fn export(&self, path: &Path) -> Result<(), ParameterError> {
        let yaml = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension("yml.tmp");
        tokio::fs::write(&temp_path, yaml).await?;
        tokio::fs::rename(&temp_path, path).await?;

        info!(
            path = %path.display(),
            parameters = self.parameters.len(),
            "Exported parameters"
        );
        Ok(())
    }
}

pub fn event_bus_arn(region: &str, account: &str, bus_name: &str) -> String {
    format!("arn:aws:events:{}:{}:event-bus/{}", region, account, bus_name)
}

/// Built-in tags with config tags merged over them
pub fn resource_tags(config: &Config) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::from([
        ("owner".to_string(), "Data".to_string()),
        ("repo".to_string(), "ch-pubsub".to_string()),
        ("stack".to_string(), config.stack.name.clone()),
    ]);
    tags.extend(config.tags.clone());
    tags
}
