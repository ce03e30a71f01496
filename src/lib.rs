//! Filedrop CLI library: client-driven chunked upload engine

pub mod config;
pub mod error;
pub mod file_config;

pub mod api;
pub mod chunk;
pub mod progress;
pub mod retry;
pub mod upload;
pub mod validate;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};

// Re-export commonly used types
pub use api::{ChunkTransport, Client, RemoteFile};
pub use progress::{ProgressSnapshot, UploadStatus};
pub use retry::RetryPolicy;
pub use upload::{UploadOptions, UploadOutcome, UploadTask, upload_files};
pub use validate::{QuotaInfo, validate_batch};
