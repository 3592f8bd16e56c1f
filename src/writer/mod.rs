pub mod layout;
pub mod partition;
pub mod pool;
pub mod retry;
pub mod template;

pub use layout::{encode_gzip, ObjectLayout};
pub use partition::{PartitionGroup, PartitionKey, Partitioner};
pub use pool::{DrainReport, WriterContext, WriterPool};
pub use retry::RetryPolicy;
pub use template::{PrefixTemplate, TemplateError};

use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("write of {key} gave up after {attempts} attempts in {elapsed:?}: {source}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: StorageError,
    },

    #[error("write of {key} failed: {source}")]
    Permanent {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("gzip encoding failed: {0}")]
    Encode(#[from] std::io::Error),
}
