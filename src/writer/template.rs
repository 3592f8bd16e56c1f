use crate::transform::ErrorType;
use chrono::{DateTime, Datelike, Timelike, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Longest rendered key value, leaving room under the 255-byte file name
/// limit for literal text around the placeholder
pub const MAX_VALUE_BYTES: usize = 200;

/// Hex digits of the sha256 suffix on shortened values
const DIGEST_SUFFIX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Key(String),
    ErrorType,
    Year,
    Month,
    Day,
    Hour,
}

/// Object prefix templates.
///
/// Supported placeholders: `{key:<field>}`, `{error_type}`, `{yyyy}`, `{MM}`,
/// `{dd}` and `{HH}`. Everything else is copied literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("unclosed '{{' at offset {0}")]
    Unclosed(usize),

    #[error("unmatched '}}' at offset {0}")]
    Unmatched(usize),

    #[error("'{{key:}}' needs a field name")]
    EmptyKey,

    #[error("prefix must be relative and must not contain empty path segments")]
    InvalidPath,

    #[error("no value for partition key '{0}'")]
    MissingKey(String),

    #[error("template needs an error type")]
    MissingErrorType,
}

impl PrefixTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(c) = rest.chars().next() {
            match c {
                '{' => {
                    let close = rest.find('}').ok_or(TemplateError::Unclosed(offset))?;
                    let inner = &rest[1..close];
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(placeholder(inner)?);
                    offset += close + 1;
                    rest = &rest[close + 1..];
                }
                '}' => return Err(TemplateError::Unmatched(offset)),
                _ => {
                    literal.push(c);
                    offset += c.len_utf8();
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if template.starts_with('/') || template.contains("//") {
            return Err(TemplateError::InvalidPath);
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Key(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_error_type(&self) -> bool {
        self.segments.contains(&Segment::ErrorType)
    }

    /// Render the prefix for one partition. Key values are sanitized so a
    /// value can never add path segments or climb out of the prefix.
    pub fn render(
        &self,
        fields: &[(String, String)],
        error_type: Option<ErrorType>,
        at: DateTime<Utc>,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len() + 32);

        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Key(name) => {
                    let value = fields
                        .iter()
                        .find(|(field, _)| field == name)
                        .map(|(_, value)| value)
                        .ok_or_else(|| TemplateError::MissingKey(name.clone()))?;
                    out.push_str(&sanitize(value));
                }
                Segment::ErrorType => {
                    let error_type = error_type.ok_or(TemplateError::MissingErrorType)?;
                    out.push_str(error_type.as_str());
                }
                Segment::Year => out.push_str(&format!("{:04}", at.year())),
                Segment::Month => out.push_str(&format!("{:02}", at.month())),
                Segment::Day => out.push_str(&format!("{:02}", at.day())),
                Segment::Hour => out.push_str(&format!("{:02}", at.hour())),
            }
        }

        Ok(out)
    }
}

fn placeholder(inner: &str) -> Result<Segment, TemplateError> {
    if let Some(name) = inner.strip_prefix("key:") {
        let name = name.trim();
        if name.is_empty() {
            return Err(TemplateError::EmptyKey);
        }
        return Ok(Segment::Key(name.to_string()));
    }

    match inner {
        "error_type" => Ok(Segment::ErrorType),
        "yyyy" => Ok(Segment::Year),
        "MM" => Ok(Segment::Month),
        "dd" => Ok(Segment::Day),
        "HH" => Ok(Segment::Hour),
        other => Err(TemplateError::UnknownPlaceholder(other.to_string())),
    }
}

/// Make a partition value safe to use as a single path segment
pub fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else if cleaned.len() > MAX_VALUE_BYTES {
        shorten(&cleaned, value)
    } else {
        cleaned
    }
}

// Distinct long values stay distinct: the suffix hashes the raw value.
fn shorten(cleaned: &str, value: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(value.as_bytes()));
    let mut end = MAX_VALUE_BYTES - DIGEST_SUFFIX_LEN - 1;
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}-{}", &cleaned[..end], &digest[..DIGEST_SUFFIX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DEFAULT_ERROR_PREFIX, DEFAULT_PREFIX};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 7, 30, 0).unwrap()
    }

    fn fields(source: &str, detail_type: &str) -> Vec<(String, String)> {
        vec![
            ("source".to_string(), source.to_string()),
            ("detail_type".to_string(), detail_type.to_string()),
        ]
    }

    #[test]
    fn test_default_prefix() {
        let template = PrefixTemplate::parse(DEFAULT_PREFIX).unwrap();
        assert_eq!(
            template.key_names().collect::<Vec<_>>(),
            vec!["source", "detail_type"]
        );
        assert!(!template.has_error_type());
        assert_eq!(
            template
                .render(&fields("orders", "OrderPlaced"), None, at())
                .unwrap(),
            "orders/OrderPlaced/date=2026-01-28/"
        );
    }

    #[test]
    fn test_default_error_prefix() {
        let template = PrefixTemplate::parse(DEFAULT_ERROR_PREFIX).unwrap();
        assert!(template.has_error_type());
        assert_eq!(
            template
                .render(&[], Some(ErrorType::MalformedRecord), at())
                .unwrap(),
            "errors/MalformedRecord/date=2026-01-28/"
        );
        assert_eq!(
            template.render(&[], None, at()),
            Err(TemplateError::MissingErrorType)
        );
    }

    #[test]
    fn test_hour_placeholder() {
        let template = PrefixTemplate::parse("{key:source}/{yyyy}/{MM}/{dd}/{HH}/").unwrap();
        assert_eq!(
            template.render(&fields("s", "t"), None, at()).unwrap(),
            "s/2026/01/28/07/"
        );
    }

    #[test]
    fn test_values_cannot_escape_prefix() {
        let template = PrefixTemplate::parse(DEFAULT_PREFIX).unwrap();
        assert_eq!(
            template.render(&fields("../..", "a/b"), None, at()).unwrap(),
            ".._../a_b/date=2026-01-28/"
        );
        assert_eq!(
            template.render(&fields("..", "x"), None, at()).unwrap(),
            "__/x/date=2026-01-28/"
        );
    }

    #[test]
    fn test_missing_key_value() {
        let template = PrefixTemplate::parse("{key:tenant}/").unwrap();
        assert_eq!(
            template.render(&fields("s", "t"), None, at()),
            Err(TemplateError::MissingKey("tenant".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            PrefixTemplate::parse("{bogus}/"),
            Err(TemplateError::UnknownPlaceholder("bogus".to_string()))
        );
        assert_eq!(PrefixTemplate::parse("a/{key:x"), Err(TemplateError::Unclosed(2)));
        assert_eq!(PrefixTemplate::parse("a}/"), Err(TemplateError::Unmatched(1)));
        assert_eq!(PrefixTemplate::parse("{key:}/"), Err(TemplateError::EmptyKey));
        assert_eq!(PrefixTemplate::parse("/abs/"), Err(TemplateError::InvalidPath));
        assert_eq!(PrefixTemplate::parse("a//b/"), Err(TemplateError::InvalidPath));
    }

    #[test]
    fn test_long_values_are_shortened() {
        let long = "s".repeat(300);
        let shortened = sanitize(&long);
        assert_eq!(shortened.len(), MAX_VALUE_BYTES);
        assert!(shortened.starts_with(&"s".repeat(183)));
        assert_eq!(sanitize(&long), shortened);

        let other = format!("{}t", "s".repeat(299));
        assert_ne!(sanitize(&other), shortened);

        let multibyte = "é".repeat(150);
        assert!(sanitize(&multibyte).len() <= MAX_VALUE_BYTES);

        let exact = "a".repeat(MAX_VALUE_BYTES);
        assert_eq!(sanitize(&exact), exact);
    }
}
