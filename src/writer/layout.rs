use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use uuid::Uuid;

/// Naming of output objects under a rendered prefix:
/// `{stream}-{sequence}-{yyyy}-{MM}-{dd}-{HH}-{mm}-{ss}-{uuid}.gz`
#[derive(Debug, Clone)]
pub struct ObjectLayout {
    stream_name: String,
}

impl ObjectLayout {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
        }
    }

    pub fn object_key(
        &self,
        prefix: &str,
        sequence: u64,
        created_at: DateTime<Utc>,
        id: Uuid,
    ) -> String {
        format!(
            "{}{}-{}-{}-{}.gz",
            prefix,
            self.stream_name,
            sequence,
            created_at.format("%Y-%m-%d-%H-%M-%S"),
            id
        )
    }
}

/// Gzip already-delimited records into one object body
pub fn encode_gzip(records: &[Vec<u8>]) -> std::io::Result<Vec<u8>> {
    let capacity = records.iter().map(Vec::len).sum::<usize>() / 4;
    let mut encoder = GzEncoder::new(Vec::with_capacity(capacity), Compression::default());
    for record in records {
        encoder.write_all(record)?;
    }
    encoder.finish()
}
