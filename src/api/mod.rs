pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

pub use client::Client;

use crate::error::Result;

/// Cumulative byte-progress callback for a single transfer. The count passed
/// in is for that transfer only, never cumulative across chunks.
pub type ByteSink = Arc<dyn Fn(u64) + Send + Sync>;

/// Identifying metadata sent alongside every chunk of a file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: usize,
    pub folder_id: Option<String>,
}

/// Response to the session-initialization call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    /// Opaque; the engine owns no logic over its contents.
    pub upload_id: String,
    pub total_chunks: usize,
}

/// Finalized file metadata as the server reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// Per-chunk response. `completed` is true only on the call that makes the
/// server observe all chunks present; the server is the sole authority here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub completed: bool,
    #[serde(default)]
    pub file: Option<RemoteFile>,
}

/// The wire boundary the schedulers run against. Implemented over HTTP by
/// [`Client`]; tests substitute an in-process fake.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Must be called once per chunked file before any chunk call.
    async fn init_upload(&self, meta: &FileMeta) -> Result<InitUploadResponse>;

    /// Transmit one chunk. `on_bytes` receives cumulative bytes sent for this
    /// chunk as the body streams out.
    async fn send_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        data: Vec<u8>,
        meta: &FileMeta,
        on_bytes: ByteSink,
    ) -> Result<ChunkUploadResponse>;

    /// Single-shot path for files below the chunking threshold.
    async fn upload_direct(
        &self,
        data: Vec<u8>,
        meta: &FileMeta,
        on_bytes: ByteSink,
    ) -> Result<Vec<RemoteFile>>;
}
