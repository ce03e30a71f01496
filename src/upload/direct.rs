use std::path::Path;
use std::sync::{Arc, Mutex};

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::api::{ByteSink, ChunkTransport, FileMeta, RemoteFile};
use crate::error::{Error, Result};
use crate::progress::{ProgressEmitter, UploadStatus};

/// Single-shot path for files at or below the chunking threshold: one
/// multipart request, no session, no retry loop.
pub(crate) async fn run<T>(
    transport: &T,
    path: &Path,
    meta: &FileMeta,
    emitter: Arc<Mutex<ProgressEmitter>>,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteFile>>
where
    T: ChunkTransport + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    debug!("direct upload of {} ({} bytes)", meta.filename, meta.total_size);
    let data = tokio::fs::read(path).await?;

    let sink: ByteSink = {
        let emitter = Arc::clone(&emitter);
        Arc::new(move |bytes| {
            if let Ok(mut emitter) = emitter.lock() {
                emitter.emit(bytes, UploadStatus::Uploading);
            }
        })
    };

    transport.upload_direct(data, meta, sink).await
}
