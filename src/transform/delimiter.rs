/// Trim trailing line endings from the record, then append `delimiter`
pub fn append_delimiter(record: &[u8], delimiter: &[u8]) -> Vec<u8> {
    let end = record
        .iter()
        .rposition(|&b| b != b'\n' && b != b'\r')
        .map_or(0, |i| i + 1);

    let mut out = Vec::with_capacity(end + delimiter.len());
    out.extend_from_slice(&record[..end]);
    out.extend_from_slice(delimiter);
    out
}
