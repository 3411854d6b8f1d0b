//! Crate-wide error taxonomy.
//!
//! Session store errors are typed and pass through the manager unchanged;
//! provider failures are wrapped in [`UploadError::Backend`] with the name of
//! the operation that failed.

use thiserror::Error;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("invalid path")]
    InvalidPath,

    #[error("file not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("provider not configured")]
    ProviderNotConfigured,

    #[error("provider validation failed: {0}")]
    ProviderValidation(String),

    #[error("feature not implemented by provider")]
    NotImplemented,

    #[error("chunk session not found")]
    SessionNotFound,

    #[error("chunk session already exists")]
    SessionExists,

    #[error("chunk session is no longer active")]
    SessionClosed,

    #[error("chunk part index is out of range")]
    PartOutOfRange,

    #[error("chunk part already uploaded")]
    PartDuplicate,

    #[error("upload callback failed: {0}")]
    CallbackFailed(String),

    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Wrap a provider error with the name of the failing operation.
    pub fn backend(
        op: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            op,
            source: Box::new(source),
        }
    }

    /// Backend failure with a message instead of an underlying error value.
    pub fn backend_msg(op: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            source: message.into().into(),
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Crate result alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_keeps_operation_context() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = UploadError::backend("complete multipart upload", inner);
        assert!(err.to_string().contains("complete multipart upload"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = UploadError::validation("total_size", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid total_size: must be greater than zero"
        );
    }
}
