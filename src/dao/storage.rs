use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Backend description of the failure.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A record with the same key already exists.
    #[error("record `{key}` already exists")]
    Duplicate {
        /// Conflicting key.
        key: String,
    },
    /// A stored record could not be decoded.
    #[error("corrupt record `{key}`: {message}")]
    Corrupt {
        /// Key of the undecodable record.
        key: String,
        /// Decoder message.
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a decode error for the record stored under `key`.
    pub fn corrupt(key: impl Into<String>, message: impl ToString) -> Self {
        StorageError::Corrupt {
            key: key.into(),
            message: message.to_string(),
        }
    }
}
