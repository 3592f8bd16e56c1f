use async_trait::async_trait;
use std::io::ErrorKind;

/// Flat key/value object storage, keyed by `/`-separated paths.
///
/// Objects are immutable: `put` on an existing key fails with
/// [`StorageError::AlreadyExists`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether a retry of the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(e) => is_transient_io(e.kind()),
            StorageError::Unavailable(_) => true,
            StorageError::AlreadyExists(_)
            | StorageError::NotFound(_)
            | StorageError::InvalidKey { .. } => false,
        }
    }
}

// Interrupted, timed out and dropped-connection kinds are retried. Anything
// else, such as a name that is too long or a path component that is not a
// directory, fails the same way on every attempt.
fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::Other
    )
}

/// Reject keys that could escape the store root or collide with directories
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason| StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') {
        return Err(invalid("absolute key"));
    }
    if key.ends_with('/') {
        return Err(invalid("key names a directory"));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(invalid("forbidden character"));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("empty or relative path segment"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("a/b/date=2026-01-01/x.gz").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/b/").is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Unavailable("down".into()).is_transient());
        assert!(StorageError::Io(std::io::Error::other("disk hiccup")).is_transient());
        assert!(StorageError::Io(ErrorKind::TimedOut.into()).is_transient());
        assert!(!StorageError::Io(ErrorKind::PermissionDenied.into()).is_transient());
        assert!(!StorageError::Io(ErrorKind::InvalidInput.into()).is_transient());
        // ENAMETOOLONG does the same thing on every attempt
        assert!(!StorageError::Io(std::io::Error::from_raw_os_error(36)).is_transient());
        assert!(!StorageError::AlreadyExists("k".into()).is_transient());
        assert!(!StorageError::InvalidKey {
            key: "k".into(),
            reason: "x"
        }
        .is_transient());
    }
}
