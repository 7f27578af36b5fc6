//! Temp file naming and the atomic commit of finished downloads.
//!
//! A job writes to `<target><suffix>` (`.part` by default) and only renames it onto
//! the target once the transfer completed, so the final name never refers to a
//! half-written file.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument};

use super::constants::{DEFAULT_PART_SUFFIX, STDOUT_TARGET};
use super::error::DownloadError;

/// Returns true if `path` is the "write to standard output" sentinel.
#[must_use]
pub fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == STDOUT_TARGET
}

/// Maps targets to temp names and commits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempFileManager {
    suffix: String,
    enabled: bool,
}

impl Default for TempFileManager {
    fn default() -> Self {
        Self::new(DEFAULT_PART_SUFFIX, true)
    }
}

impl TempFileManager {
    /// Creates a manager appending `suffix`. With `enabled` false (`nopart`)
    /// downloads are written straight to the target.
    #[must_use]
    pub fn new(suffix: impl Into<String>, enabled: bool) -> Self {
        Self {
            suffix: suffix.into(),
            enabled,
        }
    }

    /// The suffix appended to temp files.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether temp files are used at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Working file for `target`.
    ///
    /// Returns `target` itself when temp files are disabled, when `target` is the
    /// stdout sentinel, or when `target` exists and is not a regular file.
    #[must_use]
    pub fn temp_name(&self, target: &Path) -> PathBuf {
        if !self.enabled || is_stdout(target) {
            return target.to_path_buf();
        }
        if std::fs::metadata(target).is_ok_and(|meta| !meta.is_file()) {
            return target.to_path_buf();
        }
        let mut name = target.as_os_str().to_owned();
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    /// Strips the suffix from `temp`, or returns it unchanged.
    #[must_use]
    pub fn undo_temp_name(&self, temp: &Path) -> PathBuf {
        if self.suffix.is_empty() {
            return temp.to_path_buf();
        }
        match temp.to_str().and_then(|s| s.strip_suffix(self.suffix.as_str())) {
            Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
            _ => temp.to_path_buf(),
        }
    }

    /// Atomically renames `temp` onto `target`.
    ///
    /// A no-op when both are the same path. On failure the temp file is left alone
    /// so the job can resume from it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Rename`] when the rename fails.
    #[instrument(skip(self), fields(temp = %temp.display(), target = %target.display()))]
    pub async fn commit(&self, temp: &Path, target: &Path) -> Result<(), DownloadError> {
        if temp == target {
            return Ok(());
        }
        tokio::fs::rename(temp, target)
            .await
            .map_err(|e| DownloadError::rename(temp, target, e))?;
        debug!("temp file committed");
        Ok(())
    }
}

/// Sets the modification time of `path` from an HTTP `Last-Modified` value.
///
/// Best effort: returns the applied time, or `None` when the header is missing,
/// unparsable, the epoch, or the file cannot be touched.
pub async fn try_utime(path: &Path, last_modified: Option<&str>) -> Option<SystemTime> {
    let raw = last_modified?;
    let modified = match httpdate::parse_http_date(raw) {
        Ok(time) if time > UNIX_EPOCH => time,
        Ok(_) => return None,
        Err(e) => {
            debug!(value = raw, error = %e, "ignoring unparsable Last-Modified");
            return None;
        }
    };

    let owned = path.to_path_buf();
    let applied = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options().write(true).open(&owned)?;
        file.set_modified(modified)
    })
    .await;

    match applied {
        Ok(Ok(())) => Some(modified),
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = %e, "could not set file mtime");
            None
        }
        Err(e) => {
            debug!(error = %e, "mtime task failed");
            None
        }
    }
}
