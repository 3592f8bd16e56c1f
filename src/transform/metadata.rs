use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Metadata extraction query.
///
/// A query names the partition fields and where to find them in a JSON
/// record, in a jq-like object constructor syntax:
///
/// ```text
/// {source:.source, detail_type:."detail-type", tenant:.detail.tenant_id}
/// ```
///
/// Paths are chains of field accesses. Segments that are not plain
/// identifiers must be quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataQuery {
    fields: Vec<QueryField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryField {
    name: String,
    path: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("query must be an object constructor like {{name:.field}}")]
    NotAnObject,

    #[error("unexpected end of query")]
    UnexpectedEnd,

    #[error("unexpected character '{found}' at offset {offset}, expected {expected}")]
    Unexpected {
        found: char,
        offset: usize,
        expected: &'static str,
    },

    #[error("query must extract at least one field")]
    Empty,

    #[error("field '{0}' is extracted twice")]
    DuplicateField(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("record is not valid JSON: {0}")]
    NotJson(String),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("field '{0}' is missing")]
    MissingField(String),

    #[error("field '{field}' has unusable {kind} value")]
    InvalidValue { field: String, kind: &'static str },
}

impl MetadataQuery {
    pub fn parse(query: &str) -> Result<Self, QueryParseError> {
        Parser::new(query).parse()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Extract every field from a raw record, in query order
    pub fn extract(&self, data: &[u8]) -> Result<Vec<(String, String)>, ExtractionError> {
        let doc: Value =
            serde_json::from_slice(data).map_err(|e| ExtractionError::NotJson(e.to_string()))?;
        self.evaluate(&doc)
    }

    pub fn evaluate(&self, doc: &Value) -> Result<Vec<(String, String)>, ExtractionError> {
        if !doc.is_object() {
            return Err(ExtractionError::NotAnObject);
        }

        self.fields
            .iter()
            .map(|field| {
                let value = field
                    .path
                    .iter()
                    .try_fold(doc, |current, segment| current.get(segment))
                    .ok_or_else(|| ExtractionError::MissingField(field.display_path()))?;
                let rendered = render_scalar(value).map_err(|kind| {
                    ExtractionError::InvalidValue {
                        field: field.display_path(),
                        kind,
                    }
                })?;
                Ok((field.name.clone(), rendered))
            })
            .collect()
    }
}

impl FromStr for MetadataQuery {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MetadataQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", field.name, field.display_path())?;
        }
        write!(f, "}}")
    }
}

impl QueryField {
    fn display_path(&self) -> String {
        self.path
            .iter()
            .map(|segment| {
                if is_identifier(segment) {
                    format!(".{}", segment)
                } else {
                    format!(".{:?}", segment)
                }
            })
            .collect()
    }
}

fn render_scalar(value: &Value) -> Result<String, &'static str> {
    match value {
        Value::String(s) if s.trim().is_empty() => Err("empty string"),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err("null"),
        Value::Array(_) => Err("array"),
        Value::Object(_) => Err("object"),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse(mut self) -> Result<MetadataQuery, QueryParseError> {
        self.skip_ws();
        if self.peek() != Some('{') {
            return Err(QueryParseError::NotAnObject);
        }
        self.bump();

        let mut fields: Vec<QueryField> = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') && fields.is_empty() {
                return Err(QueryParseError::Empty);
            }

            let name = self.identifier()?;
            self.skip_ws();
            self.expect(':', "':'")?;
            self.skip_ws();
            let path = self.path()?;

            if fields.iter().any(|f| f.name == name) {
                return Err(QueryParseError::DuplicateField(name));
            }
            fields.push(QueryField { name, path });

            self.skip_ws();
            match self.peek() {
                Some(',') => self.bump(),
                Some('}') => {
                    self.bump();
                    break;
                }
                Some(found) => {
                    return Err(QueryParseError::Unexpected {
                        found,
                        offset: self.pos,
                        expected: "',' or '}'",
                    })
                }
                None => return Err(QueryParseError::UnexpectedEnd),
            }
        }

        self.skip_ws();
        if let Some(found) = self.peek() {
            return Err(QueryParseError::Unexpected {
                found,
                offset: self.pos,
                expected: "end of query",
            });
        }

        Ok(MetadataQuery { fields })
    }

    fn path(&mut self) -> Result<Vec<String>, QueryParseError> {
        let mut segments = Vec::new();
        self.expect('.', "'.'")?;
        segments.push(self.segment()?);

        while self.peek() == Some('.') {
            self.bump();
            segments.push(self.segment()?);
        }

        Ok(segments)
    }

    fn segment(&mut self) -> Result<String, QueryParseError> {
        if self.peek() == Some('"') {
            self.quoted()
        } else {
            self.identifier()
        }
    }

    fn identifier(&mut self) -> Result<String, QueryParseError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.bump(),
            Some(found) => {
                return Err(QueryParseError::Unexpected {
                    found,
                    offset: self.pos,
                    expected: "an identifier",
                })
            }
            None => return Err(QueryParseError::UnexpectedEnd),
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn quoted(&mut self) -> Result<String, QueryParseError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.bump();
                    return Ok(out);
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.bump();
                        }
                        None => return Err(QueryParseError::UnexpectedEnd),
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.bump();
                }
                None => return Err(QueryParseError::UnexpectedEnd),
            }
        }
    }

    fn expect(&mut self, want: char, expected: &'static str) -> Result<(), QueryParseError> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(found) => Err(QueryParseError::Unexpected {
                found,
                offset: self.pos,
                expected,
            }),
            None => Err(QueryParseError::UnexpectedEnd),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::DEFAULT_METADATA_QUERY;
    use serde_json::json;

    #[test]
    fn test_default_query_extracts_bus_envelope_fields() {
        let query = MetadataQuery::parse(DEFAULT_METADATA_QUERY).unwrap();
        let doc = json!({
            "version": "0",
            "source": "localTest",
            "detail-type": "eventTested",
            "detail": {"email": "a@example.com"}
        });

        let fields = query.evaluate(&doc).unwrap();
        assert_eq!(
            fields,
            vec![
                ("source".to_string(), "localTest".to_string()),
                ("detail_type".to_string(), "eventTested".to_string()),
            ]
        );
    }

    #[test]
    fn test_nested_paths_and_scalars() {
        let query = MetadataQuery::parse("{ tenant : .detail.tenant , shard:.detail.\"shard-no\" }")
            .unwrap();
        let doc = json!({"detail": {"tenant": "acme", "shard-no": 7}});
        let fields = query.evaluate(&doc).unwrap();
        assert_eq!(fields[0].1, "acme");
        assert_eq!(fields[1].1, "7");
    }

    #[test]
    fn test_missing_source_fails() {
        let query = MetadataQuery::parse(DEFAULT_METADATA_QUERY).unwrap();
        let err = query.extract(br#"{"event_type":"x"}"#).unwrap_err();
        assert_eq!(err, ExtractionError::MissingField(".source".to_string()));
    }

    #[test]
    fn test_missing_detail_type_fails() {
        let query = MetadataQuery::parse(DEFAULT_METADATA_QUERY).unwrap();
        let err = query.extract(br#"{"source":"app"}"#).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::MissingField(".\"detail-type\"".to_string())
        );
    }

    #[test]
    fn test_unusable_values_fail() {
        let query = MetadataQuery::parse("{source:.source}").unwrap();
        for (doc, kind) in [
            (json!({"source": null}), "null"),
            (json!({"source": ""}), "empty string"),
            (json!({"source": {"a": 1}}), "object"),
            (json!({"source": [1]}), "array"),
        ] {
            assert_eq!(
                query.evaluate(&doc).unwrap_err(),
                ExtractionError::InvalidValue {
                    field: ".source".to_string(),
                    kind
                }
            );
        }
    }

    #[test]
    fn test_non_object_records_fail() {
        let query = MetadataQuery::parse("{source:.source}").unwrap();
        assert!(matches!(
            query.extract(b"not json"),
            Err(ExtractionError::NotJson(_))
        ));
        assert_eq!(
            query.extract(b"[1,2]").unwrap_err(),
            ExtractionError::NotAnObject
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(MetadataQuery::parse(".source"), Err(QueryParseError::NotAnObject));
        assert_eq!(MetadataQuery::parse("{}"), Err(QueryParseError::Empty));
        assert_eq!(MetadataQuery::parse("{a:.a"), Err(QueryParseError::UnexpectedEnd));
        assert_eq!(
            MetadataQuery::parse("{a:.a,a:.b}"),
            Err(QueryParseError::DuplicateField("a".to_string()))
        );
        assert!(matches!(
            MetadataQuery::parse("{a:source}"),
            Err(QueryParseError::Unexpected { found: 's', .. })
        ));
        assert!(matches!(
            MetadataQuery::parse("{a:.a} extra"),
            Err(QueryParseError::Unexpected { found: 'e', .. })
        ));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let query = MetadataQuery::parse(DEFAULT_METADATA_QUERY).unwrap();
        assert_eq!(query.to_string(), DEFAULT_METADATA_QUERY);
        assert_eq!(MetadataQuery::parse(&query.to_string()).unwrap(), query);
    }
}
