pub(crate) mod chunked;
pub(crate) mod direct;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ChunkTransport, FileMeta, RemoteFile};
use crate::chunk;
use crate::error::{Error, ErrorCode, Result};
use crate::progress::{ProgressEmitter, ProgressSender, UploadStatus};
use crate::retry::RetryPolicy;
use crate::validate::{self, QuotaInfo};

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Files strictly larger than this use the chunked path.
pub const CHUNKING_THRESHOLD: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 4;
pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 3;

/// Engine tuning for one `upload_files` run.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: u64,
    pub chunking_threshold: u64,
    /// Bounded in-flight chunks per file.
    pub max_concurrent_chunks: usize,
    /// Bounded in-flight files per run.
    pub max_concurrent_files: usize,
    pub retry: RetryPolicy,
    /// Destination folder applied to every task that has none of its own.
    pub folder_id: Option<String>,
    /// When set, the advisory pre-flight validation runs before any network
    /// activity.
    pub quota: Option<QuotaInfo>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunking_threshold: CHUNKING_THRESHOLD,
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            max_concurrent_files: DEFAULT_MAX_CONCURRENT_FILES,
            retry: RetryPolicy::default(),
            folder_id: None,
            quota: None,
        }
    }
}

/// One user-requested file transfer.
///
/// Mutated only by the scheduler that owns it; everything else sees read-only
/// progress snapshots. The engine never removes a finished task itself, it
/// hands the terminal state back to the caller.
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// Generated client-side, never reused.
    pub id: Uuid,
    pub path: PathBuf,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub folder_id: Option<String>,
    pub status: UploadStatus,
    pub bytes_transferred: u64,
    pub started_at: Option<Instant>,
    pub last_error: Option<(ErrorCode, String)>,
    /// Zero until the chunked path splits the file.
    pub total_chunks: usize,
    pub chunks_completed: usize,
}

impl UploadTask {
    /// Builds a task from a local path, reading size from file metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed or has no usable name.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("invalid filename: {}", path.display())))?
            .to_string();
        let mime_type = mime_type_for(&path).to_string();
        Ok(Self {
            id: Uuid::new_v4(),
            path,
            filename,
            mime_type,
            total_size: metadata.len(),
            folder_id: None,
            status: UploadStatus::Pending,
            bytes_transferred: 0,
            started_at: None,
            last_error: None,
            total_chunks: 0,
            chunks_completed: 0,
        })
    }

    fn meta(&self, total_chunks: usize, options: &UploadOptions) -> FileMeta {
        FileMeta {
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
            total_size: self.total_size,
            total_chunks,
            folder_id: self.folder_id.clone().or_else(|| options.folder_id.clone()),
        }
    }
}

/// Declared mime type for the upload metadata, from the file extension.
#[must_use]
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "7z" => "application/x-7z-compressed",
        _ => "application/octet-stream",
    }
}

/// Final report for one task: the task in its terminal state plus any
/// finalized server-side file metadata.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub task: UploadTask,
    pub files: Vec<RemoteFile>,
}

impl UploadOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.task.status == UploadStatus::Completed
    }
}

fn fail_without_network(
    mut task: UploadTask,
    code: ErrorCode,
    message: String,
    progress: Option<&ProgressSender>,
) -> UploadOutcome {
    task.status = UploadStatus::Error;
    task.last_error = Some((code, message));
    let mut emitter = ProgressEmitter::new(task.id, task.total_size, progress.cloned());
    emitter.emit(task.bytes_transferred, UploadStatus::Error);
    UploadOutcome { task, files: Vec::new() }
}

fn finish(
    mut task: UploadTask,
    emitter: &Arc<Mutex<ProgressEmitter>>,
    result: Result<Vec<RemoteFile>>,
    cancel: &CancellationToken,
) -> UploadOutcome {
    match result {
        Ok(files) => {
            task.status = UploadStatus::Completed;
            task.bytes_transferred = task.total_size;
            if let Ok(mut emitter) = emitter.lock() {
                emitter.emit(task.total_size, UploadStatus::Completed);
            }
            info!("{} completed", task.filename);
            UploadOutcome { task, files }
        }
        Err(err) => {
            // Cancellation outranks any error classification observed after
            // it was signaled.
            let cancelled = matches!(err, Error::Cancelled) || cancel.is_cancelled();
            task.status = if cancelled {
                UploadStatus::Cancelled
            } else {
                UploadStatus::Error
            };
            if !cancelled {
                task.last_error = Some((err.code(), err.to_string()));
                warn!("{} failed: {err}", task.filename);
            }
            // Progress freezes at its last known value, never rolls back.
            if let Ok(mut emitter) = emitter.lock() {
                task.bytes_transferred = emitter.uploaded_bytes();
                emitter.emit(task.bytes_transferred, task.status);
            }
            UploadOutcome { task, files: Vec::new() }
        }
    }
}

async fn run_one<T>(
    transport: &T,
    mut task: UploadTask,
    options: &UploadOptions,
    progress: Option<ProgressSender>,
    cancel: &CancellationToken,
) -> UploadOutcome
where
    T: ChunkTransport + ?Sized,
{
    let emitter = Arc::new(Mutex::new(ProgressEmitter::new(
        task.id,
        task.total_size,
        progress,
    )));

    // Dispatch checkpoint: a task that never started does no network work.
    if cancel.is_cancelled() {
        return finish(task, &emitter, Err(Error::Cancelled), cancel);
    }

    task.status = UploadStatus::Uploading;
    task.started_at = Some(Instant::now());
    if let Ok(mut emitter) = emitter.lock() {
        emitter.emit(0, UploadStatus::Uploading);
    }

    let result: Result<Vec<RemoteFile>> = if task.total_size > options.chunking_threshold {
        let chunks = chunk::split(task.total_size, options.chunk_size);
        task.total_chunks = chunks.len();
        let meta = task.meta(chunks.len(), options);
        info!(
            "{}: {} bytes in {} chunks",
            task.filename,
            task.total_size,
            chunks.len()
        );

        let mut init_retries = 0;
        let init = crate::retry::with_retry(&options.retry, cancel, &mut init_retries, || {
            transport.init_upload(&meta)
        })
        .await;

        match init {
            Ok(init) => {
                let (chunks, result) = chunked::run(
                    transport,
                    &task.path,
                    chunks,
                    &init.upload_id,
                    &meta,
                    options,
                    Arc::clone(&emitter),
                    cancel,
                )
                .await;
                task.chunks_completed = chunks.iter().filter(|c| c.uploaded).count();
                result.map(|(_, file)| file.into_iter().collect())
            }
            Err(err) => Err(err),
        }
    } else {
        task.total_chunks = 1;
        let meta = task.meta(1, options);
        let outcome = direct::run(transport, &task.path, &meta, Arc::clone(&emitter), cancel).await;
        if outcome.is_ok() {
            task.chunks_completed = 1;
        }
        outcome
    };

    finish(task, &emitter, result, cancel)
}

/// Uploads a batch of tasks with at most `options.max_concurrent_files` in
/// flight, routing each through the direct or chunked path by size.
///
/// Every submitted task comes back with exactly one terminal status; a
/// failure in one task never aborts its siblings. The advisory validator
/// runs first and fails invalid tasks before any network activity; the size
/// and quota checks additionally need `options.quota` figures.
pub async fn upload_files<T>(
    transport: &T,
    tasks: Vec<UploadTask>,
    options: &UploadOptions,
    progress: Option<ProgressSender>,
    cancel: &CancellationToken,
) -> Vec<UploadOutcome>
where
    T: ChunkTransport + ?Sized,
{
    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut runnable = Vec::with_capacity(tasks.len());

    let candidates: Vec<(String, u64)> = tasks
        .iter()
        .map(|t| (t.filename.clone(), t.total_size))
        .collect();
    let borrowed: Vec<(&str, u64)> = candidates
        .iter()
        .map(|(name, size)| (name.as_str(), *size))
        .collect();
    let verdict = validate::validate_batch(&borrowed, options.quota.as_ref());

    if let Some((code, message)) = verdict.batch_error {
        // The batch as a whole exceeds the remaining quota; nothing starts.
        // The pseudo-entry message is attached to every task.
        warn!("batch rejected: {message}");
        for mut task in tasks {
            task.status = UploadStatus::Validating;
            outcomes.push(fail_without_network(
                task,
                code,
                message.clone(),
                progress.as_ref(),
            ));
        }
        return outcomes;
    }

    for (mut task, verdict) in tasks.into_iter().zip(verdict.files) {
        task.status = UploadStatus::Validating;
        match verdict.error {
            Some((code, message)) => {
                outcomes.push(fail_without_network(task, code, message, progress.as_ref()));
            }
            None => runnable.push(task),
        }
    }

    let scheduled: Vec<UploadOutcome> = stream::iter(runnable)
        .map(|task| run_one(transport, task, options, progress.clone(), cancel))
        .buffer_unordered(options.max_concurrent_files.max(1))
        .collect()
        .await;

    outcomes.extend(scheduled);
    outcomes
}
