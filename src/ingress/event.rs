use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Largest serialized envelope accepted on the bus
pub const MAX_EVENT_BYTES: usize = 256 * 1024;

/// An event as submitted by a producer
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub source: String,
    pub detail_type: String,
    pub detail: Value,
    pub resources: Vec<String>,
    /// Producer account, the stack account when unset
    pub account: Option<String>,
}

impl Event {
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>, detail: Value) -> Self {
        Self {
            source: source.into(),
            detail_type: detail_type.into(),
            detail,
            resources: Vec::new(),
            account: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }
}

/// Bus-native representation of an accepted event. This is the JSON
/// document that reaches the delivery stream and the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub version: String,
    pub id: Uuid,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub source: String,
    pub account: String,
    pub time: DateTime<Utc>,
    pub region: String,
    pub resources: Vec<String>,
    pub detail: Value,
}

impl BusEnvelope {
    /// Stamp an event with its id, receive time and origin
    pub fn stamp(
        event: Event,
        id: Uuid,
        received_at: DateTime<Utc>,
        default_account: &str,
        region: &str,
    ) -> Self {
        Self {
            version: "0".to_string(),
            id,
            detail_type: event.detail_type,
            source: event.source,
            account: event
                .account
                .unwrap_or_else(|| default_account.to_string()),
            time: received_at,
            region: region.to_string(),
            resources: event.resources,
            detail: event.detail,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
