/// One fixed-size slice of a file being chunk-uploaded.
///
/// Descriptors only carry byte offsets into the source file; the bytes
/// themselves are read lazily at transmit time.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    /// Zero-based, contiguous across the file.
    pub index: usize,
    /// Byte offset of the first byte of this chunk.
    pub start: u64,
    /// Byte offset one past the last byte of this chunk.
    pub end: u64,
    pub size: u64,
    /// Flips true exactly once, on first successful transmission.
    pub uploaded: bool,
    pub retries: u32,
}

/// Splits `file_size` bytes into `ceil(file_size / chunk_size)` descriptors.
///
/// Every chunk is exactly `chunk_size` bytes except possibly the last; no
/// chunk has size zero. Pure: no I/O, no copying.
#[must_use]
pub fn split(file_size: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
    assert!(chunk_size > 0, "chunk size must be positive");
    if file_size == 0 {
        return Vec::new();
    }

    let total_chunks = usize::try_from(file_size.div_ceil(chunk_size)).unwrap_or(usize::MAX);
    let mut chunks = Vec::with_capacity(total_chunks);
    for index in 0..total_chunks {
        let start = index as u64 * chunk_size;
        let end = (start + chunk_size).min(file_size);
        chunks.push(ChunkDescriptor {
            index,
            start,
            end,
            size: end - start,
            uploaded: false,
            retries: 0,
        });
    }
    chunks
}
