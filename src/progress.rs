use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Lifecycle of one tracked upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Validating,
    Uploading,
    Completed,
    Error,
    Cancelled,
}

impl UploadStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Error | UploadStatus::Cancelled
        )
    }
}

/// A full, consistent point-in-time view of one task's progress.
///
/// Snapshots are derived values, recomputed on every emission; consumers never
/// see a partially updated one. `uploaded_bytes` is non-decreasing across the
/// snapshots of a task while it is uploading, and is frozen at its last value
/// when the task ends in `Error` or `Cancelled`.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub task_id: Uuid,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
    /// Bytes per second over the window since the previous snapshot.
    pub bytes_per_sec: f64,
    pub status: UploadStatus,
}

impl ProgressSnapshot {
    /// Read-only fold over per-task snapshots for a "N files, X% overall"
    /// view. Tasks appear at most once each (callers keep the latest snapshot
    /// per task id).
    #[must_use]
    pub fn aggregate<'a>(latest: impl IntoIterator<Item = &'a ProgressSnapshot>) -> (u64, u64) {
        latest
            .into_iter()
            .fold((0, 0), |(up, total), s| (up + s.uploaded_bytes, total + s.total_bytes))
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressSnapshot>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressSnapshot>;

#[must_use]
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Per-task emission state: enforces monotonic byte counts and computes the
/// instantaneous transfer speed. Owned by the scheduler that owns the task.
pub(crate) struct ProgressEmitter {
    task_id: Uuid,
    total_bytes: u64,
    tx: Option<ProgressSender>,
    last_bytes: u64,
    last_at: Instant,
    last_rate: f64,
}

impl ProgressEmitter {
    pub(crate) fn new(task_id: Uuid, total_bytes: u64, tx: Option<ProgressSender>) -> Self {
        Self {
            task_id,
            total_bytes,
            tx,
            last_bytes: 0,
            last_at: Instant::now(),
            last_rate: 0.0,
        }
    }

    pub(crate) fn uploaded_bytes(&self) -> u64 {
        self.last_bytes
    }

    /// Emit a snapshot for `uploaded_bytes`. Counts below the last emitted
    /// value are clamped so observers never see percent go backwards.
    pub(crate) fn emit(&mut self, uploaded_bytes: u64, status: UploadStatus) {
        let uploaded_bytes = uploaded_bytes.max(self.last_bytes);
        let now = Instant::now();
        let dt = now.duration_since(self.last_at).as_secs_f64();
        if dt > 0.0 && uploaded_bytes > self.last_bytes {
            self.last_rate = (uploaded_bytes - self.last_bytes) as f64 / dt;
            self.last_at = now;
        }
        self.last_bytes = uploaded_bytes;

        if let Some(tx) = &self.tx {
            let percent = if self.total_bytes == 0 {
                100.0
            } else {
                uploaded_bytes as f64 * 100.0 / self.total_bytes as f64
            };
            // Receiver dropping just means nobody is watching anymore.
            let _ = tx.send(ProgressSnapshot {
                task_id: self.task_id,
                uploaded_bytes,
                total_bytes: self.total_bytes,
                percent,
                bytes_per_sec: self.last_rate,
                status,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emissions_are_monotonic_and_clamped() {
        let (tx, mut rx) = channel();
        let id = Uuid::new_v4();
        let mut emitter = ProgressEmitter::new(id, 100, Some(tx));

        emitter.emit(40, UploadStatus::Uploading);
        emitter.emit(30, UploadStatus::Uploading); // stale observation
        emitter.emit(90, UploadStatus::Uploading);

        let mut seen = Vec::new();
        while let Ok(s) = rx.try_recv() {
            seen.push(s.uploaded_bytes);
        }
        assert_eq!(seen, vec![40, 40, 90]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn zero_byte_task_reports_full_percent() {
        let (tx, mut rx) = channel();
        let mut emitter = ProgressEmitter::new(Uuid::new_v4(), 0, Some(tx));
        emitter.emit(0, UploadStatus::Completed);
        let snap = rx.try_recv().unwrap();
        assert!((snap.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregate_sums_latest_snapshots() {
        let mk = |up, total| ProgressSnapshot {
            task_id: Uuid::new_v4(),
            uploaded_bytes: up,
            total_bytes: total,
            percent: 0.0,
            bytes_per_sec: 0.0,
            status: UploadStatus::Uploading,
        };
        let snaps = [mk(10, 100), mk(50, 50)];
        assert_eq!(ProgressSnapshot::aggregate(snaps.iter()), (60, 150));
    }

    #[test]
    fn terminal_statuses() {
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Error.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Pending.is_terminal());
    }
}
