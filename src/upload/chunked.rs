use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::api::{ByteSink, ChunkTransport, FileMeta, RemoteFile};
use crate::chunk::ChunkDescriptor;
use crate::error::{Error, Result};
use crate::progress::{ProgressEmitter, UploadStatus};
use crate::retry::with_retry;
use crate::upload::UploadOptions;

/// Merges per-chunk byte reports into one monotonic file-level total.
///
/// `inflight[i]` holds the running byte count for a chunk still in transit;
/// the moment a chunk's `uploaded` flag flips, its entry snaps to the full
/// chunk size exactly once and later (stale) reports for it are ignored, so
/// completed chunks are never double-counted.
struct Aggregator {
    inflight: Vec<u64>,
    done: Vec<bool>,
    emitter: Arc<Mutex<ProgressEmitter>>,
}

impl Aggregator {
    fn new(total_chunks: usize, emitter: Arc<Mutex<ProgressEmitter>>) -> Self {
        Self {
            inflight: vec![0; total_chunks],
            done: vec![false; total_chunks],
            emitter,
        }
    }

    fn total(&self) -> u64 {
        self.inflight.iter().sum()
    }

    fn on_bytes(&mut self, index: usize, bytes: u64) {
        if self.done[index] {
            return;
        }
        self.inflight[index] = bytes;
        let total = self.total();
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.emit(total, UploadStatus::Uploading);
        }
    }

    fn mark_done(&mut self, index: usize, size: u64) {
        if self.done[index] {
            return;
        }
        self.done[index] = true;
        self.inflight[index] = size;
        let total = self.total();
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.emit(total, UploadStatus::Uploading);
        }
    }
}

enum ChunkOutcome {
    Done(Option<RemoteFile>),
    /// Not dispatched: cancellation or a sibling's fatal failure was observed
    /// before this chunk started.
    Skipped,
    Failed(Error),
}

async fn read_range(path: &Path, start: u64, size: u64) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; usize::try_from(size).unwrap_or(usize::MAX)];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Runs one file's chunks through the transport with at most
/// `options.max_concurrent_chunks` in flight.
///
/// Dispatch order follows chunk index but completion order does not; the
/// server validates completeness by count, not arrival order. A fatal chunk
/// failure stops further dispatch while already in-flight chunks finish
/// naturally; only cancellation (checked before each dispatch and each retry
/// wait) stops the file earlier.
///
/// Returns the server's completeness verdict and, when present, the finalized
/// file metadata. The descriptors come back with their `uploaded`/`retries`
/// state for the caller's bookkeeping.
pub(crate) async fn run<T>(
    transport: &T,
    path: &Path,
    chunks: Vec<ChunkDescriptor>,
    upload_id: &str,
    meta: &FileMeta,
    options: &UploadOptions,
    emitter: Arc<Mutex<ProgressEmitter>>,
    cancel: &CancellationToken,
) -> (Vec<ChunkDescriptor>, Result<(bool, Option<RemoteFile>)>)
where
    T: ChunkTransport + ?Sized,
{
    let aggregator = Arc::new(Mutex::new(Aggregator::new(chunks.len(), emitter)));
    let aborted = Arc::new(AtomicBool::new(false));

    let results: Vec<(ChunkDescriptor, ChunkOutcome)> = stream::iter(chunks)
        .map(|mut chunk| {
            let aggregator = Arc::clone(&aggregator);
            let aborted = Arc::clone(&aborted);
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (chunk, ChunkOutcome::Failed(Error::Cancelled));
                }
                if aborted.load(Ordering::SeqCst) {
                    return (chunk, ChunkOutcome::Skipped);
                }

                let data = match read_range(path, chunk.start, chunk.size).await {
                    Ok(data) => data,
                    Err(err) => {
                        aborted.store(true, Ordering::SeqCst);
                        return (chunk, ChunkOutcome::Failed(err));
                    }
                };

                let index = chunk.index;
                let sink: ByteSink = {
                    let aggregator = Arc::clone(&aggregator);
                    Arc::new(move |bytes| {
                        if let Ok(mut agg) = aggregator.lock() {
                            agg.on_bytes(index, bytes);
                        }
                    })
                };

                let mut retries = chunk.retries;
                let result = with_retry(&options.retry, &cancel, &mut retries, || {
                    transport.send_chunk(upload_id, index, data.clone(), meta, Arc::clone(&sink))
                })
                .await;
                chunk.retries = retries;

                match result {
                    Ok(response) => {
                        chunk.uploaded = true;
                        if let Ok(mut agg) = aggregator.lock() {
                            agg.mark_done(index, chunk.size);
                        }
                        debug!("chunk {index} of {} uploaded", meta.filename);
                        (chunk, ChunkOutcome::Done(response.file))
                    }
                    Err(err) => {
                        aborted.store(true, Ordering::SeqCst);
                        (chunk, ChunkOutcome::Failed(err))
                    }
                }
            }
        })
        .buffer_unordered(options.max_concurrent_chunks.max(1))
        .collect()
        .await;

    let mut chunks = Vec::with_capacity(results.len());
    let mut finalized = None;
    let mut completed = false;
    let mut first_error: Option<Error> = None;
    for (chunk, outcome) in results {
        chunks.push(chunk);
        match outcome {
            ChunkOutcome::Done(file) => {
                if let Some(file) = file {
                    completed = true;
                    finalized = Some(file);
                }
            }
            ChunkOutcome::Skipped => {}
            ChunkOutcome::Failed(err) => {
                // Cancellation outranks any error observed after it.
                let cancelled = matches!(err, Error::Cancelled);
                match &first_error {
                    Some(Error::Cancelled) => {}
                    Some(_) if cancelled => first_error = Some(err),
                    Some(_) => {}
                    None => first_error = Some(err),
                }
            }
        }
    }
    chunks.sort_by_key(|c: &ChunkDescriptor| c.index);

    let result = match first_error {
        Some(err) => Err(err),
        None => {
            if !completed {
                warn!(
                    "all {} chunks of {} uploaded but server never reported completion",
                    meta.total_chunks, meta.filename
                );
            }
            Ok((completed, finalized))
        }
    };
    (chunks, result)
}
