//! Scoped temporary files.
//!
//! Members opened in external viewers, and non-local archive containers, are
//! materialised as temporary files. Each is owned by a guard that deletes it
//! when dropped. A crash skips the guards, so the composition root sweeps
//! leftovers older than a cutoff on startup.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use tokio::fs;

/// Prefix of downloaded archive containers.
pub const ARCHIVE_TEMP_PREFIX: &str = "duopane-archive-";
/// Prefix of single extracted members.
pub const EXTRACT_TEMP_PREFIX: &str = "duopane-extract-";

/// A temporary file deleted when this handle is dropped.
#[derive(Debug)]
pub struct ExtractedFile {
    path: TempPath,
}
impl ExtractedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
impl Deref for ExtractedFile {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

/// Write `data` to a new temporary file in `dir`, keeping the extension of
/// `name` so external viewers can pick the right handler.
pub(crate) async fn write_temp(dir: &Path, name: &str, data: &[u8]) -> Result<ExtractedFile> {
    let suffix = match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => String::new(),
    };
    let file = tempfile::Builder::new()
        .prefix(EXTRACT_TEMP_PREFIX)
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|e| ErrorKind::from_io(e, dir.display()))?;
    let path = file.into_temp_path();
    fs::write(&path, data).await.map_err(|e| ErrorKind::from_io(e, path.display()))?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "extracted to temporary file");
    Ok(ExtractedFile { path })
}

/// Create an empty temporary file for a downloaded archive container.
pub(crate) fn archive_temp(dir: &Path, name: &str) -> Result<tempfile::NamedTempFile> {
    let suffix = crate::backend::archive::ArchiveFormat::extension_of(name).unwrap_or_default();
    tempfile::Builder::new()
        .prefix(ARCHIVE_TEMP_PREFIX)
        .suffix(suffix)
        .tempfile_in(dir)
        .or_raise(|| ErrorKind::BackendError(format!("cannot create temporary file in {}", dir.display())))
}

/// Remove leftover temporary files older than `max_age` from `dir`.
///
/// Only files carrying one of this crate's prefixes are touched. Failures on
/// individual files are logged and skipped. Returns the number removed.
pub async fn sweep_stale_temp_files(dir: &Path, max_age: Duration) -> Result<usize> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| ErrorKind::from_io(e, dir.display()))?;
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, dir.display()))? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(ARCHIVE_TEMP_PREFIX) && !name.starts_with(EXTRACT_TEMP_PREFIX) {
            continue;
        }
        let path: PathBuf = entry.path();
        let stale = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified <= cutoff,
            Err(_) => false,
        };
        if !stale {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to remove stale temporary file"),
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "swept stale temporary files");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extracted_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let extracted = write_temp(dir.path(), "notes.txt", b"hello").await.unwrap();
        let path = extracted.path().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(EXTRACT_TEMP_PREFIX));
        assert_eq!(path.extension().unwrap(), "txt");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        drop(extracted);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sweep_only_touches_own_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join(format!("{EXTRACT_TEMP_PREFIX}abc.txt"));
        let archive = dir.path().join(format!("{ARCHIVE_TEMP_PREFIX}abc.zip"));
        let foreign = dir.path().join("unrelated.txt");
        for path in [&ours, &archive, &foreign] {
            std::fs::write(path, b"x").unwrap();
        }
        assert_eq!(sweep_stale_temp_files(dir.path(), Duration::ZERO).await.unwrap(), 2);
        assert!(!ours.exists());
        assert!(!archive.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join(format!("{EXTRACT_TEMP_PREFIX}fresh"));
        std::fs::write(&ours, b"x").unwrap();
        assert_eq!(sweep_stale_temp_files(dir.path(), Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(ours.exists());
    }
}
