use thiserror::Error;

/// Coarse classification of a [`FeatureError`].
///
/// Callers that only care about the failure category (for example a tile
/// session deciding whether to skip a tile) match on the kind rather than on
/// individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    IllegalState,
    NotFound,
    Unsupported,
    OutOfMemory,
    Io,
}

/// Error types for the feature engine
#[derive(Error, Debug)]
pub enum FeatureError {
    /// Bad or stale handle, missing required field, malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation invoked outside of its required mode
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Direct lookup of an unknown feature or feature set
    #[error("Not found: {0}")]
    NotFound(String),

    /// Mutation requested against a read-only or query-only store
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Allocation failure
    #[error("Out of memory")]
    OutOfMemory,

    /// Malformed geometry blob or tile payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Lock acquisition failed (poisoned)
    #[error("Lock error: {0}")]
    Lock(String),

    /// I/O error from the persistence layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl FeatureError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeatureError::InvalidArgument(_) | FeatureError::Decode(_) => {
                ErrorKind::InvalidArgument
            }
            FeatureError::IllegalState(_) | FeatureError::Lock(_) => ErrorKind::IllegalState,
            FeatureError::NotFound(_) => ErrorKind::NotFound,
            FeatureError::Unsupported(_) => ErrorKind::Unsupported,
            FeatureError::OutOfMemory => ErrorKind::OutOfMemory,
            FeatureError::Io(_) | FeatureError::Sqlite(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FeatureError::InvalidArgument(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        FeatureError::IllegalState(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        FeatureError::NotFound(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        FeatureError::Unsupported(msg.into())
    }
}

/// Result type alias for feature engine operations
pub type Result<T> = std::result::Result<T, FeatureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            FeatureError::invalid("stale handle").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            FeatureError::Decode("truncated".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            FeatureError::Lock("poisoned".into()).kind(),
            ErrorKind::IllegalState
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(FeatureError::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_display() {
        let err = FeatureError::not_found("fid 7");
        assert_eq!(err.to_string(), "Not found: fid 7");
    }
}
