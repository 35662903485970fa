//! Local filesystem backend.
//!
//! Thin layer over `tokio::fs`. Symbolic links are reported as links
//! (`symlink_metadata`) but described by their target where it exists, so a
//! link to a directory still lists as a directory.

use super::{BoxReader, BoxWriter, EntryStream, ObjectWriter, PathImpl, expect_same_scheme};
use crate::error::{Batch, BatchReport, Error, ErrorKind, Result};
use crate::locator::Locator;
use crate::models::{Entry, StatResult};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Prefix of in-progress writes, renamed over the destination on commit.
const PARTIAL_PREFIX: &str = ".duopane-partial-";

enum WalkEntry {
    File(PathBuf),
    Descend(PathBuf),
}

pub struct LocalBackend {
    locator: Locator,
    path: PathBuf,
}

impl LocalBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { locator: Locator::Local(path.clone()), path }
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        ErrorKind::from_io(e, path.display())
    }

    /// Same data collection for both `stat` and listings.
    async fn describe(path: &Path) -> Result<StatResult> {
        let metadata = fs::symlink_metadata(path).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.file_type().is_symlink() {
            return Ok(Self::stat_from(&metadata, false));
        }
        // Dangling links fall back to describing the link itself.
        match fs::metadata(path).await {
            Ok(target) => Ok(Self::stat_from(&target, true)),
            Err(_) => Ok(Self::stat_from(&metadata, true)),
        }
    }

    fn stat_from(metadata: &Metadata, is_symlink: bool) -> StatResult {
        let modified_at = metadata.modified().map(OffsetDateTime::from).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        StatResult {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified_at,
            is_directory: metadata.is_dir(),
            is_symlink,
        }
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        Ok(())
    }

    async fn process_entry(path: PathBuf) -> Result<WalkEntry> {
        let metadata = fs::symlink_metadata(&path).await.map_err(|e| Self::map_io_error(e, &path))?;
        // Links are removed or copied as links, never followed.
        match metadata.is_dir() {
            true => Ok(WalkEntry::Descend(path)),
            false => Ok(WalkEntry::File(path)),
        }
    }

    /// Depth-first walk below `root`. Returns files, then directories in
    /// discovery order (parents before children).
    async fn walk(root: &Path, batch: &mut Batch) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut files = Vec::new();
        let mut dirs = vec![root.to_path_buf()];
        let mut stack = vec![root.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    batch.failed(current.display(), Error::from(Self::map_io_error(e, &current)));
                    continue;
                },
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        batch.failed(current.display(), Error::from(Self::map_io_error(e, &current)));
                        break;
                    },
                };
                match Self::process_entry(entry.path()).await {
                    Ok(WalkEntry::File(path)) => files.push(path),
                    Ok(WalkEntry::Descend(path)) => {
                        dirs.push(path.clone());
                        stack.push(path);
                    },
                    Err(e) => batch.failed(entry.path().display(), e),
                }
            }
        }
        (files, dirs)
    }

    fn copy_entry<'a>(source: &'a Path, target: &'a Path, overwrite: bool, batch: &'a mut Batch) -> BoxFuture<'a, ()> {
        async move {
            let metadata = match fs::symlink_metadata(source).await {
                Ok(metadata) => metadata,
                Err(e) => return batch.failed(source.display(), Error::from(Self::map_io_error(e, source))),
            };
            if !metadata.is_dir() {
                match Self::copy_file(source, target, &metadata, overwrite).await {
                    Ok(()) => batch.succeeded(target.display()),
                    Err(e) => batch.failed(source.display(), e),
                }
                return;
            }
            if let Err(e) = fs::create_dir_all(target).await {
                return batch.failed(target.display(), Error::from(Self::map_io_error(e, target)));
            }
            let mut entries = match fs::read_dir(source).await {
                Ok(entries) => entries,
                Err(e) => return batch.failed(source.display(), Error::from(Self::map_io_error(e, source))),
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let child_target = target.join(entry.file_name());
                        Self::copy_entry(&entry.path(), &child_target, overwrite, batch).await;
                    },
                    Ok(None) => break,
                    Err(e) => {
                        batch.failed(source.display(), Error::from(Self::map_io_error(e, source)));
                        break;
                    },
                }
            }
        }
        .boxed()
    }

    async fn copy_file(source: &Path, target: &Path, metadata: &Metadata, overwrite: bool) -> Result<()> {
        if fs::symlink_metadata(target).await.is_ok() {
            if !overwrite {
                exn::bail!(ErrorKind::AlreadyExists(target.display().to_string()));
            }
            if metadata.file_type().is_symlink() {
                fs::remove_file(target).await.map_err(|e| Self::map_io_error(e, target))?;
            }
        }
        if metadata.file_type().is_symlink() {
            let link = fs::read_link(source).await.map_err(|e| Self::map_io_error(e, source))?;
            return Self::create_symlink(&link, target).await;
        }
        fs::copy(source, target).await.map_err(|e| Self::map_io_error(e, target))?;
        Ok(())
    }

    #[cfg(unix)]
    async fn create_symlink(link: &Path, at: &Path) -> Result<()> {
        fs::symlink(link, at).await.map_err(|e| Self::map_io_error(e, at))?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn create_symlink(_link: &Path, at: &Path) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported(format!("cannot create symbolic link {}", at.display())))
    }
}

#[async_trait]
impl PathImpl for LocalBackend {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn supports_directory_rename(&self) -> bool {
        true
    }

    fn supports_file_editing(&self) -> bool {
        true
    }

    fn supports_symlinks(&self) -> bool {
        cfg!(unix)
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn exists(&self) -> Result<bool> {
        match fs::symlink_metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::from(Self::map_io_error(e, &self.path))),
        }
    }

    async fn is_dir(&self) -> Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::from(Self::map_io_error(e, &self.path))),
        }
    }

    async fn is_symlink(&self) -> Result<bool> {
        match fs::symlink_metadata(&self.path).await {
            Ok(metadata) => Ok(metadata.file_type().is_symlink()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::from(Self::map_io_error(e, &self.path))),
        }
    }

    async fn stat(&self) -> Result<StatResult> {
        Self::describe(&self.path).await
    }

    fn iterdir(&self) -> EntryStream<'_> {
        Box::pin(stream! {
            let mut entries = match fs::read_dir(&self.path).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(Error::from(Self::map_io_error(e, &self.path)));
                    return;
                },
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::from(Self::map_io_error(e, &self.path)));
                        break;
                    },
                };
                let path = entry.path();
                match Self::describe(&path).await {
                    Ok(stat) => yield Ok(Entry::new(Locator::Local(path), stat)),
                    // Vanished between listing and stat.
                    Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => continue,
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?)
    }

    async fn reader(&self) -> Result<BoxReader> {
        let file = fs::File::open(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?;
        Ok(Box::pin(file))
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        // Create parent directories if needed, to keep behaviour
        // consistent with object storage.
        Self::ensure_parent(&self.path).await?;
        Ok(fs::write(&self.path, data).await.map_err(|e| Self::map_io_error(e, &self.path))?)
    }

    /// An existing file keeps its contents and gets a fresh modification
    /// time.
    async fn touch(&self, exist_ok: bool) -> Result<()> {
        Self::ensure_parent(&self.path).await?;
        match fs::OpenOptions::new().write(true).create_new(true).open(&self.path).await {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && exist_ok => {},
            Err(e) => exn::bail!(Self::map_io_error(e, &self.path)),
        }
        let file = fs::File::open(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?;
        let file = file.into_std().await;
        file.set_modified(std::time::SystemTime::now()).map_err(|e| Self::map_io_error(e, &self.path))?;
        Ok(())
    }

    async fn writer(&self) -> Result<BoxWriter> {
        Self::ensure_parent(&self.path).await?;
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(&parent)
            .map_err(|e| Self::map_io_error(e, &parent))?;
        let (file, partial) = temp.into_parts();
        Ok(Box::new(LocalWriter { file: fs::File::from_std(file), partial, target: self.path.clone() }))
    }

    async fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<()> {
        if self.exists().await? {
            if exist_ok && self.is_dir().await? {
                return Ok(());
            }
            exn::bail!(ErrorKind::AlreadyExists(self.locator.to_string()));
        }
        let result = match parents {
            true => fs::create_dir_all(&self.path).await,
            false => fs::create_dir(&self.path).await,
        };
        Ok(result.map_err(|e| Self::map_io_error(e, &self.path))?)
    }

    async fn rmdir(&self) -> Result<()> {
        Ok(fs::remove_dir(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?)
    }

    async fn unlink(&self) -> Result<()> {
        Ok(fs::remove_file(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?)
    }

    async fn rmtree(&self) -> Result<BatchReport> {
        let metadata = fs::symlink_metadata(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?;
        let mut batch = Batch::new();
        if !metadata.is_dir() {
            self.unlink().await?;
            batch.succeeded(&self.locator);
            return batch.finish(ErrorKind::PartialFailure);
        }
        let (files, dirs) = Self::walk(&self.path, &mut batch).await;
        for file in files {
            match fs::remove_file(&file).await {
                Ok(()) => batch.succeeded(file.display()),
                Err(e) => batch.failed(file.display(), Error::from(Self::map_io_error(e, &file))),
            }
        }
        // Children were discovered after their parents.
        for dir in dirs.into_iter().rev() {
            match fs::remove_dir(&dir).await {
                Ok(()) => batch.succeeded(dir.display()),
                Err(e) => batch.failed(dir.display(), Error::from(Self::map_io_error(e, &dir))),
            }
        }
        tracing::debug!(path = %self.path.display(), removed = batch.report().succeeded.len(), failed = batch.report().failed.len(), "removed tree");
        batch.finish(ErrorKind::PartialFailure)
    }

    async fn rename(&self, target: &Locator) -> Result<()> {
        expect_same_scheme(&self.locator, target)?;
        let Locator::Local(to) = target else {
            exn::bail!(ErrorKind::InvalidLocator(target.to_string()));
        };
        Self::ensure_parent(to).await?;
        Ok(fs::rename(&self.path, to).await.map_err(|e| Self::map_io_error(e, to))?)
    }

    async fn copy_to(&self, target: &Locator, overwrite: bool) -> Result<()> {
        expect_same_scheme(&self.locator, target)?;
        let Locator::Local(to) = target else {
            exn::bail!(ErrorKind::InvalidLocator(target.to_string()));
        };
        let metadata = fs::symlink_metadata(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?;
        if !metadata.is_dir() {
            Self::ensure_parent(to).await?;
            return Self::copy_file(&self.path, to, &metadata, overwrite).await;
        }
        let mut batch = Batch::new();
        Self::copy_entry(&self.path, to, overwrite, &mut batch).await;
        batch.finish(ErrorKind::PartialFailure)?;
        Ok(())
    }

    async fn read_link(&self) -> Result<String> {
        let target = fs::read_link(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn symlink_to(&self, target: &str) -> Result<()> {
        Self::ensure_parent(&self.path).await?;
        Self::create_symlink(Path::new(target), &self.path).await
    }
}

/// Writes into a hidden sibling file that replaces the destination on commit.
struct LocalWriter {
    file: fs::File,
    partial: TempPath,
    target: PathBuf,
}

#[async_trait]
impl ObjectWriter for LocalWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        Ok(self.file.write_all(chunk).await.map_err(|e| LocalBackend::map_io_error(e, &self.target))?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { mut file, partial, target } = *self;
        file.flush().await.map_err(|e| LocalBackend::map_io_error(e, &target))?;
        drop(file);
        partial.persist(&target).or_raise(|| ErrorKind::BackendError(format!("cannot replace {}", target.display())))?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let Self { file, partial, target } = *self;
        drop(file);
        partial.close().map_err(|e| LocalBackend::map_io_error(e, &target))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn backend(dir: &Path, relative: &str) -> LocalBackend {
        LocalBackend::new(dir.join(relative))
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "test.txt");
        file.write_bytes(b"Hello, world!").await.unwrap();
        assert_eq!(file.read_bytes().await.unwrap(), b"Hello, world!");
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "a/b/c/file.txt");
        file.write_bytes(b"data").await.unwrap();
        assert!(file.exists().await.unwrap());
        assert!(backend(temp_dir.path(), "a/b").is_dir().await.unwrap());
    }

    #[tokio::test]
    async fn test_touch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "new/empty.txt");
        file.touch(false).await.unwrap();
        assert_eq!(file.read_bytes().await.unwrap(), b"");

        let err = file.touch(false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));

        file.write_bytes(b"kept").await.unwrap();
        let handle = std::fs::File::options().write(true).open(temp_dir.path().join("new/empty.txt")).unwrap();
        handle.set_modified(OffsetDateTime::UNIX_EPOCH.into()).unwrap();
        file.touch(true).await.unwrap();
        assert_eq!(file.read_bytes().await.unwrap(), b"kept");
        assert!(file.stat().await.unwrap().modified_at > OffsetDateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "exists.txt");
        assert!(!file.exists().await.unwrap());
        file.write_bytes(b"data").await.unwrap();
        assert!(file.exists().await.unwrap());
        assert!(file.is_file().await.unwrap());
    }

    #[tokio::test]
    async fn test_unlink() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "file.txt");
        file.write_bytes(b"data").await.unwrap();
        file.unlink().await.unwrap();
        assert!(!file.exists().await.unwrap());
        // Deleting nonexistent file returns error
        let err = file.unlink().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "file.txt");
        file.write_bytes(b"data").await.unwrap();
        let target = temp_dir.path().join("a/b/c/file.txt");
        file.rename(&Locator::Local(target.clone())).await.unwrap();
        assert!(!file.exists().await.unwrap());
        assert_eq!(std::fs::read(target).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_rejects_other_schemes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "file.txt");
        file.write_bytes(b"data").await.unwrap();
        let err = file.rename(&Locator::remote("bucket", "file.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "file.txt");
        file.write_bytes(b"Hello, world!").await.unwrap();
        let stat = file.stat().await.unwrap();
        assert_eq!(stat.size, 13);
        assert!(!stat.is_directory);
        assert!(!stat.is_symlink);
        assert!(stat.modified_at > OffsetDateTime::UNIX_EPOCH);
        let dir = LocalBackend::new(temp_dir.path());
        assert!(dir.stat().await.unwrap().is_directory);
    }

    #[tokio::test]
    async fn test_iterdir_lists_direct_children() {
        let temp_dir = tempfile::tempdir().unwrap();
        backend(temp_dir.path(), "a.txt").write_bytes(b"a").await.unwrap();
        backend(temp_dir.path(), "sub/b.txt").write_bytes(b"bb").await.unwrap();
        let root = LocalBackend::new(temp_dir.path());
        let mut entries: Vec<Entry> = root.iterdir().try_collect().await.unwrap();
        entries.sort_by(|a, b| a.locator.cmp(&b.locator));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].locator.name(), "a.txt");
        assert_eq!(entries[0].stat.size, 1);
        assert_eq!(entries[1].locator.name(), "sub");
        assert!(entries[1].stat.is_directory);
    }

    #[tokio::test]
    async fn test_iterdir_missing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = backend(temp_dir.path(), "missing");
        let err = missing.iterdir().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mkdir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested = backend(temp_dir.path(), "x/y/z");
        assert!(nested.mkdir(false, false).await.is_err());
        nested.mkdir(true, false).await.unwrap();
        nested.mkdir(true, true).await.unwrap();
        let err = nested.mkdir(true, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_rmdir_requires_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        backend(temp_dir.path(), "d/f.txt").write_bytes(b"f").await.unwrap();
        let dir = backend(temp_dir.path(), "d");
        assert!(dir.rmdir().await.is_err());
        backend(temp_dir.path(), "d/f.txt").unlink().await.unwrap();
        dir.rmdir().await.unwrap();
        assert!(!dir.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_rmtree() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["t/a.txt", "t/sub/b.txt", "t/sub/deeper/c.txt"] {
            backend(temp_dir.path(), name).write_bytes(b"x").await.unwrap();
        }
        let tree = backend(temp_dir.path(), "t");
        let report = tree.rmtree().await.unwrap();
        // Three files and three directories.
        assert_eq!(report.succeeded.len(), 6);
        assert!(!tree.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        backend(temp_dir.path(), "src/a.txt").write_bytes(b"a").await.unwrap();
        backend(temp_dir.path(), "src/sub/b.txt").write_bytes(b"bb").await.unwrap();
        let src = backend(temp_dir.path(), "src");
        src.copy_to(&Locator::Local(temp_dir.path().join("dst")), false).await.unwrap();
        assert_eq!(std::fs::read(temp_dir.path().join("dst/a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(temp_dir.path().join("dst/sub/b.txt")).unwrap(), b"bb");
    }

    #[tokio::test]
    async fn test_copy_file_conflict() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = backend(temp_dir.path(), "a.txt");
        src.write_bytes(b"new").await.unwrap();
        backend(temp_dir.path(), "b.txt").write_bytes(b"old").await.unwrap();
        let target = Locator::Local(temp_dir.path().join("b.txt"));
        let err = src.copy_to(&target, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        src.copy_to(&target, true).await.unwrap();
        assert_eq!(std::fs::read(temp_dir.path().join("b.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_writer_commit_and_abort() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = backend(temp_dir.path(), "out/file.bin");
        let mut writer = file.writer().await.unwrap();
        writer.write_chunk(b"half").await.unwrap();
        assert!(!file.exists().await.unwrap());
        writer.abort().await.unwrap();
        assert!(!file.exists().await.unwrap());
        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path().join("out")).unwrap().collect();
        assert!(leftovers.is_empty());

        let mut writer = file.writer().await.unwrap();
        writer.write_chunk(b"one ").await.unwrap();
        writer.write_chunk(b"two").await.unwrap();
        writer.commit().await.unwrap();
        assert_eq!(file.read_bytes().await.unwrap(), b"one two");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks() {
        let temp_dir = tempfile::tempdir().unwrap();
        backend(temp_dir.path(), "real.txt").write_bytes(b"real").await.unwrap();
        let link = backend(temp_dir.path(), "link.txt");
        link.symlink_to("real.txt").await.unwrap();
        assert!(link.is_symlink().await.unwrap());
        assert_eq!(link.read_link().await.unwrap(), "real.txt");
        assert!(link.stat().await.unwrap().is_symlink);
        assert_eq!(link.read_bytes().await.unwrap(), b"real");

        // Copies keep the link instead of its contents.
        link.copy_to(&Locator::Local(temp_dir.path().join("copy.txt")), false).await.unwrap();
        let copied = std::fs::read_link(temp_dir.path().join("copy.txt")).unwrap();
        assert_eq!(copied, Path::new("real.txt"));
    }
}
