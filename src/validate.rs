use crate::error::ErrorCode;

/// Extensions we refuse to upload client-side: executables, scripts and
/// server-side code. Matched case-insensitively on the final extension only
/// (`archive.tar.exe` is denied, `notes.exe.txt` is not).
const DENIED_EXTENSIONS: &[&str] = &[
    "exe", "com", "bat", "cmd", "msi", "scr", "pif", "dll", "vbs", "vbe", "js", "jse", "ws",
    "wsf", "ps1", "psm1", "sh", "bash", "php", "php3", "php4", "php5", "phtml", "asp", "aspx",
    "jsp", "jspx", "cgi", "pl", "py", "rb", "jar", "htaccess",
];

/// Quota figures the server reported for the current user.
#[derive(Debug, Clone, Copy)]
pub struct QuotaInfo {
    pub used: u64,
    pub quota: u64,
    pub max_file_size: u64,
}

impl QuotaInfo {
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.quota.saturating_sub(self.used)
    }
}

/// Per-file verdict. `error` is `None` exactly when `valid` is true.
#[derive(Debug, Clone)]
pub struct FileValidation {
    pub name: String,
    pub valid: bool,
    pub error: Option<(ErrorCode, String)>,
}

/// Result of validating a whole batch.
///
/// `batch_error` is set when the batch as a whole exceeds the remaining
/// quota; it names no specific file (a synthetic pseudo-entry) and is only
/// evaluated when every individual file passed on its own.
#[derive(Debug, Clone)]
pub struct BatchValidation {
    pub files: Vec<FileValidation>,
    pub batch_error: Option<(ErrorCode, String)>,
}

impl BatchValidation {
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.batch_error.is_none() && self.files.iter().all(|f| f.valid)
    }
}

fn final_extension(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn validate_one(name: &str, size: u64, quota: Option<&QuotaInfo>) -> FileValidation {
    if let Some(ext) = final_extension(name)
        && DENIED_EXTENSIONS.contains(&ext.as_str())
    {
        return FileValidation {
            name: name.to_string(),
            valid: false,
            error: Some((
                ErrorCode::DangerousExtension,
                format!("files with extension .{ext} are not allowed"),
            )),
        };
    }

    if let Some(quota) = quota
        && size > quota.max_file_size
    {
        return FileValidation {
            name: name.to_string(),
            valid: false,
            error: Some((
                ErrorCode::FileTooLarge,
                format!(
                    "{size} bytes exceeds the per-file limit of {} bytes",
                    quota.max_file_size
                ),
            )),
        };
    }

    FileValidation {
        name: name.to_string(),
        valid: true,
        error: None,
    }
}

/// Pre-flight check for a batch of `(name, size)` candidates. Runs before any
/// network activity. The extension denylist always applies; the size and
/// cumulative-quota checks need `quota` figures and are skipped without them.
/// Advisory only: the server re-validates authoritatively and a later
/// server-side rejection must still be accepted.
#[must_use]
pub fn validate_batch(candidates: &[(&str, u64)], quota: Option<&QuotaInfo>) -> BatchValidation {
    let files: Vec<FileValidation> = candidates
        .iter()
        .map(|(name, size)| validate_one(name, *size, quota))
        .collect();

    let batch_error = quota.and_then(|quota| {
        if !files.iter().all(|f| f.valid) {
            return None;
        }
        let batch_size: u64 = candidates.iter().map(|(_, size)| size).sum();
        (batch_size > quota.remaining()).then(|| {
            (
                ErrorCode::QuotaExceeded,
                format!(
                    "batch of {batch_size} bytes exceeds remaining quota of {} bytes",
                    quota.remaining()
                ),
            )
        })
    });

    BatchValidation { files, batch_error }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUOTA: QuotaInfo = QuotaInfo {
        used: 400,
        quota: 1000,
        max_file_size: 500,
    };

    #[test]
    fn denies_executable_extensions_case_insensitively() {
        let result = validate_batch(&[("setup.EXE", 10), ("script.Ps1", 10)], Some(&QUOTA));
        for file in &result.files {
            assert!(!file.valid);
            assert_eq!(file.error.as_ref().map(|e| e.0), Some(ErrorCode::DangerousExtension));
        }
    }

    #[test]
    fn only_final_extension_counts() {
        let result = validate_batch(&[("archive.tar.exe", 10), ("notes.exe.txt", 10)], Some(&QUOTA));
        assert!(!result.files[0].valid);
        assert!(result.files[1].valid);
    }

    #[test]
    fn oversize_file_reported_independently() {
        let result = validate_batch(&[("big.bin", 501), ("small.bin", 10)], Some(&QUOTA));
        assert_eq!(
            result.files[0].error.as_ref().map(|e| e.0),
            Some(ErrorCode::FileTooLarge)
        );
        assert!(result.files[1].valid);
        assert!(!result.all_valid());
    }

    #[test]
    fn extension_check_runs_before_size_check() {
        let result = validate_batch(&[("huge.exe", 9999)], Some(&QUOTA));
        assert_eq!(
            result.files[0].error.as_ref().map(|e| e.0),
            Some(ErrorCode::DangerousExtension)
        );
    }

    #[test]
    fn cumulative_quota_reported_against_batch_not_files() {
        // 400 + 400 fits per-file limit but exceeds remaining 600.
        let result = validate_batch(&[("a.bin", 400), ("b.bin", 400)], Some(&QUOTA));
        assert!(result.files.iter().all(|f| f.valid));
        assert_eq!(result.batch_error.as_ref().map(|e| e.0), Some(ErrorCode::QuotaExceeded));
        assert!(!result.all_valid());
    }

    #[test]
    fn cumulative_check_skipped_when_a_file_already_failed() {
        let result = validate_batch(&[("big.bin", 501), ("a.bin", 400), ("b.bin", 400)], Some(&QUOTA));
        assert!(result.batch_error.is_none());
    }

    #[test]
    fn clean_batch_passes() {
        let result = validate_batch(&[("photo.jpg", 100), ("doc.pdf", 200)], Some(&QUOTA));
        assert!(result.all_valid());
    }

    #[test]
    fn denylist_applies_without_quota_figures() {
        let result = validate_batch(&[("script.sh", 10), ("huge.bin", u64::MAX)], None);
        assert_eq!(
            result.files[0].error.as_ref().map(|e| e.0),
            Some(ErrorCode::DangerousExtension)
        );
        assert!(result.files[1].valid, "size checks need quota figures");
        assert!(result.batch_error.is_none());
    }
}
