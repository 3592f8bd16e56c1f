use serde::de::IgnoredAny;

/// Split a record holding concatenated JSON documents into its sub-records.
///
/// Returns `None` unless the whole input parses as a sequence of at least one
/// JSON value, in which case the caller keeps the record intact.
pub fn split_json_sub_records(data: &[u8]) -> Option<Vec<&[u8]>> {
    let mut stream = serde_json::Deserializer::from_slice(data).into_iter::<IgnoredAny>();
    let mut parts = Vec::new();
    let mut start = 0;

    while let Some(item) = stream.next() {
        item.ok()?;
        let end = stream.byte_offset();
        let part = data[start..end].trim_ascii();
        if !part.is_empty() {
            parts.push(part);
        }
        start = end;
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}
