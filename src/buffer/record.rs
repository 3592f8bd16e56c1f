use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Raw unit buffered by the delivery stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Uuid,

    /// Record bytes as received (usually one JSON document)
    pub data: Vec<u8>,

    pub received_at: DateTime<Utc>,

    /// Set by producers that pack several JSON sub-records into one record
    pub aggregated: bool,
}

impl Record {
    pub fn new(id: Uuid, data: Vec<u8>, received_at: DateTime<Utc>, aggregated: bool) -> Self {
        Self {
            id,
            data,
            received_at,
            aggregated,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}
