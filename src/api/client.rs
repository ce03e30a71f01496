use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::api::{
    ByteSink, ChunkTransport, ChunkUploadResponse, FileMeta, InitUploadResponse, RemoteFile,
};
use crate::config::Config;
use crate::error::{Error, ErrorCode, Result};

/// HTTP client for the Filedrop upload endpoints.
pub struct Client {
    config: Config,
    http: HttpClient,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitUploadRequest<'a> {
    filename: &'a str,
    total_chunks: usize,
    total_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<&'a str>,
    mime_type: &'a str,
}

/// Error body shape shared by all endpoints.
#[derive(Deserialize)]
struct ErrorBody {
    code: ErrorCode,
    #[serde(default)]
    message: Option<String>,
}

const PROGRESS_FRAME_SIZE: usize = 64 * 1024;

fn progress_frames(
    data: Vec<u8>,
    on_bytes: ByteSink,
) -> impl futures::Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> {
    let frames: Vec<Vec<u8>> = data.chunks(PROGRESS_FRAME_SIZE).map(<[u8]>::to_vec).collect();
    let mut sent: u64 = 0;
    futures::stream::iter(frames).map(move |frame| {
        sent += frame.len() as u64;
        on_bytes(sent);
        Ok(frame)
    })
}

/// Wraps chunk bytes in a streamed body that reports cumulative bytes as the
/// HTTP stack pulls frames off it.
fn progress_body(data: Vec<u8>, on_bytes: ByteSink) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_frames(data, on_bytes))
}

/// Converts a non-success response into an [`Error::Api`] carrying the
/// server's machine-readable code. A 401 is always `Unauthorized` regardless
/// of what the body says.
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Api {
            code: ErrorCode::Unauthorized,
            message: format!("authentication failed: {body}"),
        });
    }

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => Err(Error::Api {
            code: parsed.code,
            message: parsed
                .message
                .unwrap_or_else(|| format!("server returned status {status}")),
        }),
        Err(_) => Err(Error::Api {
            code: ErrorCode::Unknown,
            message: format!("status {status}: {body}"),
        }),
    }
}

impl Client {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            http: HttpClient::new(),
            config,
        }
    }

    fn chunk_form(
        upload_id: &str,
        chunk_index: usize,
        data: Vec<u8>,
        meta: &FileMeta,
        on_bytes: ByteSink,
    ) -> Result<Form> {
        let len = data.len() as u64;
        let part = Part::stream_with_length(progress_body(data, on_bytes), len)
            .file_name(meta.filename.clone())
            .mime_str(&meta.mime_type)?;

        let mut form = Form::new()
            .text("uploadId", upload_id.to_string())
            .text("chunkIndex", chunk_index.to_string())
            .text("totalChunks", meta.total_chunks.to_string())
            .text("filename", meta.filename.clone())
            .text("mimeType", meta.mime_type.clone())
            .text("totalSize", meta.total_size.to_string());
        if let Some(folder_id) = &meta.folder_id {
            form = form.text("folderId", folder_id.clone());
        }
        Ok(form.part("chunk", part))
    }
}

#[async_trait]
impl ChunkTransport for Client {
    async fn init_upload(&self, meta: &FileMeta) -> Result<InitUploadResponse> {
        let url = format!("{}/files/upload/init", self.config.api_url);
        debug!(
            "Initializing upload session for {} ({} chunks) at: {url}",
            meta.filename, meta.total_chunks
        );

        let request = InitUploadRequest {
            filename: &meta.filename,
            total_chunks: meta.total_chunks,
            total_size: meta.total_size,
            folder_id: meta.folder_id.as_deref(),
            mime_type: &meta.mime_type,
        };

        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.config.token.clone())
            .json(&request)
            .send()
            .await?;
        let response = check_response(response).await?;

        let body = response.text().await?;
        debug!("Init response body: {body}");
        let init: InitUploadResponse = serde_json::from_str(&body).map_err(|e| Error::Api {
            code: ErrorCode::Unknown,
            message: format!("failed to parse init response: {e}. Body was: {body}"),
        })?;

        info!(
            "Upload session {} opened for {} ({} chunks)",
            init.upload_id, meta.filename, init.total_chunks
        );
        Ok(init)
    }

    async fn send_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        data: Vec<u8>,
        meta: &FileMeta,
        on_bytes: ByteSink,
    ) -> Result<ChunkUploadResponse> {
        let url = format!("{}/files/upload/chunk", self.config.api_url);
        debug!(
            "Sending chunk {chunk_index}/{} of {} ({} bytes)",
            meta.total_chunks,
            meta.filename,
            data.len()
        );

        let form = Self::chunk_form(upload_id, chunk_index, data, meta, on_bytes)?;
        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.config.token.clone())
            .multipart(form)
            .send()
            .await?;
        let response = check_response(response).await?;

        let chunk_response: ChunkUploadResponse = response.json().await?;
        if chunk_response.completed {
            info!("Server reports {} fully assembled", meta.filename);
        }
        Ok(chunk_response)
    }

    async fn upload_direct(
        &self,
        data: Vec<u8>,
        meta: &FileMeta,
        on_bytes: ByteSink,
    ) -> Result<Vec<RemoteFile>> {
        let url = format!("{}/files/upload", self.config.api_url);
        debug!("Direct upload of {} ({} bytes)", meta.filename, data.len());

        let len = data.len() as u64;
        let part = Part::stream_with_length(progress_body(data, on_bytes), len)
            .file_name(meta.filename.clone())
            .mime_str(&meta.mime_type)?;
        let mut form = Form::new().part("files", part);
        if let Some(folder_id) = &meta.folder_id {
            form = form.text("folderId", folder_id.clone());
        }

        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.config.token.clone())
            .multipart(form)
            .send()
            .await?;
        let response = check_response(response).await?;

        let files: Vec<RemoteFile> = response.json().await?;
        info!("Direct upload of {} finished", meta.filename);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn progress_frames_report_cumulative_bytes() {
        let data = vec![0u8; 2 * PROGRESS_FRAME_SIZE + 100];
        let total = data.len() as u64;
        let last = Arc::new(AtomicU64::new(0));
        let last_clone = Arc::clone(&last);
        let stream = progress_frames(
            data,
            Arc::new(move |sent| last_clone.store(sent, Ordering::SeqCst)),
        );

        let frames: Vec<_> = stream.collect().await;
        assert_eq!(frames.len(), 3);
        assert_eq!(last.load(Ordering::SeqCst), total);
        let drained: usize = frames.into_iter().map(|f| f.unwrap().len()).sum();
        assert_eq!(drained as u64, total);
    }

    #[test]
    fn error_body_parses_known_and_unknown_codes() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"code":"QUOTA_EXCEEDED","message":"full"}"#).unwrap();
        assert_eq!(body.code, ErrorCode::QuotaExceeded);

        let body: ErrorBody = serde_json::from_str(r#"{"code":"BRAND_NEW"}"#).unwrap();
        assert_eq!(body.code, ErrorCode::Unknown);
        assert!(body.message.is_none());
    }
}
