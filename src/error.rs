use serde::Deserialize;
use thiserror::Error;

/// Machine-readable error codes shared with the server.
///
/// The server includes one of these in every error response body; the client
/// synthesizes `NetworkError` when no response was received at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    QuotaExceeded,
    FileTooLarge,
    InvalidFileType,
    DangerousExtension,
    RateLimitExceeded,
    InvalidFolder,
    InvalidChunk,
    ChunkMismatch,
    UploadNotFound,
    MaxFilesExceeded,
    NetworkError,
    Unauthorized,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::InvalidFileType => "INVALID_FILE_TYPE",
            ErrorCode::DangerousExtension => "DANGEROUS_EXTENSION",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidFolder => "INVALID_FOLDER",
            ErrorCode::InvalidChunk => "INVALID_CHUNK",
            ErrorCode::ChunkMismatch => "CHUNK_MISMATCH",
            ErrorCode::UploadNotFound => "UPLOAD_NOT_FOUND",
            ErrorCode::MaxFilesExceeded => "MAX_FILES_EXCEEDED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Whether an error with this code aborts the owning file immediately,
    /// with no retry. The quota will not free up mid-upload and a forbidden
    /// extension will not stop being forbidden, so retrying these only burns
    /// the retry budget.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::QuotaExceeded
                | ErrorCode::InvalidFileType
                | ErrorCode::DangerousExtension
                | ErrorCode::Unauthorized
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{code}: {message}")]
    Api { code: ErrorCode, message: String },

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{code}: {message}")]
    Validation { code: ErrorCode, message: String },

    #[error("upload cancelled")]
    Cancelled,
}

impl Error {
    /// The machine-readable code for this error, synthesizing `NetworkError`
    /// for transport-level failures that never produced a server response.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Api { code, .. } | Error::Validation { code, .. } => *code,
            Error::Http(_) | Error::File(_) => ErrorCode::NetworkError,
            Error::Json(_) | Error::Config(_) | Error::Cancelled => ErrorCode::Unknown,
        }
    }

    /// Fatal errors abort the owning file without consuming retry budget.
    /// Cancellation is not an error classification, but it must never be
    /// retried either.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Api { code, .. } | Error::Validation { code, .. } => code.is_fatal(),
            Error::Cancelled => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes() {
        assert!(ErrorCode::QuotaExceeded.is_fatal());
        assert!(ErrorCode::DangerousExtension.is_fatal());
        assert!(ErrorCode::InvalidFileType.is_fatal());
        assert!(ErrorCode::Unauthorized.is_fatal());
    }

    #[test]
    fn retryable_codes() {
        assert!(!ErrorCode::RateLimitExceeded.is_fatal());
        assert!(!ErrorCode::NetworkError.is_fatal());
        assert!(!ErrorCode::InvalidChunk.is_fatal());
        assert!(!ErrorCode::UploadNotFound.is_fatal());
    }

    #[test]
    fn unknown_code_deserializes_via_catch_all() {
        let code: ErrorCode = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(code, ErrorCode::Unknown);
        let code: ErrorCode = serde_json::from_str("\"QUOTA_EXCEEDED\"").unwrap();
        assert_eq!(code, ErrorCode::QuotaExceeded);
    }

    #[test]
    fn transport_errors_map_to_network_error() {
        let err = Error::File(std::io::Error::other("boom"));
        assert_eq!(err.code(), ErrorCode::NetworkError);
        assert!(!err.is_fatal());
    }
}
