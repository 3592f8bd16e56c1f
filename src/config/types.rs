use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_METADATA_QUERY: &str = r#"{source:.source,detail_type:."detail-type"}"#;
pub const DEFAULT_PREFIX: &str = "{key:source}/{key:detail_type}/date={yyyy}-{MM}-{dd}/";
pub const DEFAULT_ERROR_PREFIX: &str = "errors/{error_type}/date={yyyy}-{MM}-{dd}/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stack: StackConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,
    #[serde(default)]
    pub schemas: SchemaConfig,
    #[serde(default)]
    pub parameters: Option<ParametersConfig>,
    /// Extra resource tags, merged over the built-in ones
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub name: String,
    pub account: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub listen: String,
    pub bus_name: String,
    pub backpressure: BackpressureConfig,
    /// Events that do not match are rejected at the door.
    /// An empty account list is filled with the stack account at load time.
    pub pattern: PatternConfig,
    pub max_entries_per_request: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7200".to_string(),
            bus_name: "pubsub-events".to_string(),
            backpressure: BackpressureConfig::default(),
            pattern: PatternConfig::default(),
            max_entries_per_request: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub strategy: BackpressureStrategy,
    pub queue_capacity: usize,
    /// Only used by the `block` strategy
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::Block,
            queue_capacity: 10_000,
            max_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    Reject,
    Block,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub accounts: Vec<String>,
    pub sources: Vec<String>,
    pub detail_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub buffer: BufferConfig,
    pub processing: ProcessingConfig,
    pub prefix: String,
    pub error_prefix: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "s3-delivery-stream".to_string(),
            buffer: BufferConfig::default(),
            processing: ProcessingConfig::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            error_prefix: DEFAULT_ERROR_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    #[serde(with = "byte_size")]
    pub max_buffer_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub max_buffer_interval: Duration,
    /// Sealed batches waiting for the transform stage
    pub sealed_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 64 * 1024 * 1024,
            max_buffer_interval: Duration::from_secs(60),
            sealed_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub deaggregation: bool,
    pub delimiter: String,
    pub metadata_query: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            deaggregation: true,
            delimiter: "\n".to_string(),
            metadata_query: DEFAULT_METADATA_QUERY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub workers: usize,
    pub transform_concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub retry_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            transform_concurrency: 4,
            retry_duration: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_bucket_name() -> String {
    "pubsub-events".to_string()
}

fn default_notification_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub path: PathBuf,
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
    #[serde(default = "default_prune_interval", with = "humantime_serde")]
    pub prune_interval: Duration,
    #[serde(default)]
    pub pattern: PatternConfig,
}

fn default_retention() -> Duration {
    Duration::from_secs(90 * 24 * 3600)
}

fn default_prune_interval() -> Duration {
    Duration::from_secs(3600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub discovery: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { discovery: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersConfig {
    pub path: PathBuf,
}

// Byte sizes: plain integers or strings such as "64MiB", "128KB", "512B"
pub mod byte_size {
    use serde::{Deserialize, Deserializer, Serializer};

    const UNITS: &[(&str, u64)] = &[
        ("GiB", 1024 * 1024 * 1024),
        ("MiB", 1024 * 1024),
        ("KiB", 1024),
        ("GB", 1_000_000_000),
        ("MB", 1_000_000),
        ("KB", 1_000),
        ("B", 1),
    ];

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub fn serialize<S>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_byte_size(*bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(n),
            Raw::Str(s) => parse_byte_size(&s).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse_byte_size(s: &str) -> Result<u64, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty byte size".to_string());
        }

        for (suffix, multiplier) in UNITS {
            if let Some(value) = s.strip_suffix(suffix) {
                let value: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid numeric value in byte size: {}", s))?;
                return value
                    .checked_mul(*multiplier)
                    .ok_or_else(|| format!("byte size overflows: {}", s));
            }
        }

        s.parse()
            .map_err(|_| format!("invalid byte size format: {}", s))
    }

    pub fn format_byte_size(bytes: u64) -> String {
        for (suffix, multiplier) in UNITS {
            if *multiplier > 1 && bytes > 0 && bytes % multiplier == 0 && suffix.ends_with("iB") {
                return format!("{}{}", bytes / multiplier, suffix);
            }
        }
        format!("{}B", bytes)
    }

}
