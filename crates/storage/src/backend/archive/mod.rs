//! Read-only browsing of archive containers.
//!
//! An [`ArchiveSource`] is shared by every path pointing into the same
//! container. It resolves the container to a file on the local filesystem
//! (downloading it to a temporary file when it lives elsewhere) and parses the
//! member index at most once.

mod format;
mod index;

pub use self::format::ArchiveFormat;
pub use self::index::{ArchiveIndex, IndexEntry};
use super::{BackendHandle, BoxReader, BoxWriter, EntryStream, PathImpl};
use crate::error::{BatchReport, Error, ErrorKind, Result};
use crate::locator::{Locator, normalize_entry};
use crate::models::{Entry, StatResult};
use crate::temp;
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

const MAX_LINK_HOPS: usize = 8;

enum LocalCopy {
    InPlace(PathBuf),
    Downloaded(NamedTempFile),
}
impl LocalCopy {
    fn path(&self) -> &Path {
        match self {
            Self::InPlace(path) => path,
            Self::Downloaded(file) => file.path(),
        }
    }
}

/// One archive container and its lazily-built index.
pub struct ArchiveSource {
    container: Locator,
    format: ArchiveFormat,
    container_backend: BackendHandle,
    temp_dir: PathBuf,
    local: OnceCell<LocalCopy>,
    index: OnceCell<Arc<ArchiveIndex>>,
}

impl ArchiveSource {
    pub fn new(
        container: Locator,
        format: ArchiveFormat,
        container_backend: BackendHandle,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            container,
            format,
            container_backend,
            temp_dir: temp_dir.into(),
            local: OnceCell::new(),
            index: OnceCell::new(),
        }
    }

    pub fn container(&self) -> &Locator {
        &self.container
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Whether the member index has been parsed yet.
    pub fn is_indexed(&self) -> bool {
        self.index.initialized()
    }

    /// Parse the member index on first use; later calls return the same one.
    pub async fn index(&self) -> Result<Arc<ArchiveIndex>> {
        let index = self
            .index
            .get_or_try_init(|| async {
                let path = self.local_file().await?;
                let format = self.format;
                let index = tokio::task::spawn_blocking(move || ArchiveIndex::read(&path, format))
                    .await
                    .or_raise(|| ErrorKind::Archive(format!("indexing {} was interrupted", self.container)))??;
                tracing::debug!(container = %self.container, format = %self.format, entries = index.len(), "indexed archive");
                Ok::<_, Error>(Arc::new(index))
            })
            .await?;
        Ok(Arc::clone(index))
    }

    /// Read one member into memory.
    pub async fn extract(&self, member: &str) -> Result<Vec<u8>> {
        let path = self.local_file().await?;
        let format = self.format;
        let member_name = member.to_string();
        tokio::task::spawn_blocking(move || index::extract(&path, format, &member_name))
            .await
            .or_raise(|| ErrorKind::Archive(format!("extracting {}#{member} was interrupted", self.container)))?
    }

    async fn local_file(&self) -> Result<PathBuf> {
        let copy = self
            .local
            .get_or_try_init(|| async {
                match self.container_backend.local_path() {
                    Some(path) => Ok(LocalCopy::InPlace(path.to_path_buf())),
                    None => self.download().await,
                }
            })
            .await?;
        Ok(copy.path().to_path_buf())
    }

    async fn download(&self) -> Result<LocalCopy> {
        let file = temp::archive_temp(&self.temp_dir, &self.container.name())?;
        let mut reader = self.container_backend.reader().await?;
        let mut writer = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(file.path())
            .await
            .map_err(|e| ErrorKind::from_io(e, file.path().display()))?;
        let bytes = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| ErrorKind::from_io(e, &self.container))?;
        writer.flush().await.map_err(|e| ErrorKind::from_io(e, file.path().display()))?;
        tracing::info!(container = %self.container, bytes, path = %file.path().display(), "downloaded archive container");
        Ok(LocalCopy::Downloaded(file))
    }
}

/// A path inside an archive. Every mutation fails with
/// [`ReadOnly`](ErrorKind::ReadOnly).
pub struct ArchiveBackend {
    locator: Locator,
    entry: String,
    source: Arc<ArchiveSource>,
}

impl ArchiveBackend {
    pub fn new(entry: &str, source: Arc<ArchiveSource>) -> Self {
        let locator = Locator::archive(source.container().clone(), entry);
        let entry = match &locator {
            Locator::Archive { entry, .. } => entry.clone(),
            _ => String::new(),
        };
        Self { locator, entry, source }
    }

    fn read_only(&self, operation: &str) -> Error {
        Error::from(ErrorKind::ReadOnly(format!("cannot {operation} {}", self.locator)))
    }

    fn not_found(&self) -> Error {
        Error::from(ErrorKind::NotFound(self.locator.to_string()))
    }

    /// Follow symbolic link members to the member holding the content.
    fn resolve<'a>(&self, index: &'a ArchiveIndex) -> Result<&'a IndexEntry> {
        let mut current = index.get(&self.entry).ok_or_else(|| self.not_found())?;
        for _ in 0..MAX_LINK_HOPS {
            let Some(target) = &current.link_target else {
                return Ok(current);
            };
            let base = current.path.rfind('/').map(|idx| &current.path[..idx]).unwrap_or("");
            let resolved = match target.starts_with('/') {
                true => normalize_entry(target),
                false => normalize_entry(&format!("{base}/{target}")),
            };
            current = index.get(&resolved).ok_or_else(|| {
                Error::from(ErrorKind::NotFound(format!("{} (link target `{target}`)", self.locator)))
            })?;
        }
        exn::bail!(ErrorKind::Archive(format!("{}: too many levels of symbolic links", self.locator)))
    }
}

#[async_trait]
impl PathImpl for ArchiveBackend {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn supports_directory_rename(&self) -> bool {
        false
    }

    fn supports_file_editing(&self) -> bool {
        false
    }

    async fn exists(&self) -> Result<bool> {
        match self.source.index().await {
            Ok(index) => Ok(self.entry.is_empty() || index.get(&self.entry).is_some()),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn is_dir(&self) -> Result<bool> {
        Ok(self.source.index().await?.is_dir(&self.entry))
    }

    async fn is_symlink(&self) -> Result<bool> {
        let index = self.source.index().await?;
        Ok(index.get(&self.entry).is_some_and(|entry| entry.link_target.is_some()))
    }

    async fn stat(&self) -> Result<StatResult> {
        if self.entry.is_empty() {
            // Make sure the container is readable before reporting a root.
            self.source.index().await?;
            return Ok(StatResult::virtual_directory());
        }
        let index = self.source.index().await?;
        index.get(&self.entry).map(IndexEntry::stat).ok_or_else(|| self.not_found())
    }

    fn iterdir(&self) -> EntryStream<'_> {
        Box::pin(stream! {
            let index = match self.source.index().await {
                Ok(index) => index,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            if !index.is_dir(&self.entry) {
                yield Err(match index.get(&self.entry) {
                    Some(_) => Error::from(ErrorKind::NotADirectory(self.locator.to_string())),
                    None => self.not_found(),
                });
                return;
            }
            let children: Vec<Entry> = index
                .children(&self.entry)
                .map(|child| Entry::new(Locator::archive(self.source.container().clone(), &child.path), child.stat()))
                .collect();
            for child in children {
                yield Ok(child);
            }
        })
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        let index = self.source.index().await?;
        if index.is_dir(&self.entry) {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        let member = self.resolve(&index)?;
        if member.is_directory {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        self.source.extract(member.content_path()).await
    }

    async fn reader(&self) -> Result<BoxReader> {
        Ok(Box::pin(Cursor::new(self.read_bytes().await?)))
    }

    async fn write_bytes(&self, _data: &[u8]) -> Result<()> {
        Err(self.read_only("write"))
    }

    async fn writer(&self) -> Result<BoxWriter> {
        Err(self.read_only("write"))
    }

    async fn mkdir(&self, _parents: bool, _exist_ok: bool) -> Result<()> {
        Err(self.read_only("create directory"))
    }

    async fn rmdir(&self) -> Result<()> {
        Err(self.read_only("remove"))
    }

    async fn unlink(&self) -> Result<()> {
        Err(self.read_only("remove"))
    }

    async fn rmtree(&self) -> Result<BatchReport> {
        Err(self.read_only("remove"))
    }

    async fn rename(&self, _target: &Locator) -> Result<()> {
        Err(self.read_only("rename"))
    }

    async fn copy_to(&self, target: &Locator, _overwrite: bool) -> Result<()> {
        exn::bail!(ErrorKind::ReadOnly(format!("cannot copy into {target}")))
    }

    async fn read_link(&self) -> Result<String> {
        let index = self.source.index().await?;
        let entry = index.get(&self.entry).ok_or_else(|| self.not_found())?;
        entry
            .link_target
            .clone()
            .ok_or_else(|| Error::from(ErrorKind::InvalidLocator(format!("{} is not a symbolic link", self.locator))))
    }

    async fn symlink_to(&self, _target: &str) -> Result<()> {
        Err(self.read_only("create link"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use futures::TryStreamExt;

    fn source_for(path: &Path, format: ArchiveFormat) -> Arc<ArchiveSource> {
        let backend: BackendHandle = Arc::new(LocalBackend::new(path));
        Arc::new(ArchiveSource::new(Locator::Local(path.to_path_buf()), format, backend, std::env::temp_dir()))
    }

    #[tokio::test]
    async fn test_browse_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.zip");
        fixtures::write_zip(&path, &[("2024/img.jpg", b"jpeg"), ("readme.txt", b"hello")]);
        let source = source_for(&path, ArchiveFormat::Zip);

        let root = ArchiveBackend::new("", Arc::clone(&source));
        assert!(root.is_dir().await.unwrap());
        assert!(root.stat().await.unwrap().is_directory);
        let mut names: Vec<String> = root.iterdir().map_ok(|e| e.locator.name()).try_collect().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["2024", "readme.txt"]);

        let file = ArchiveBackend::new("2024/img.jpg", Arc::clone(&source));
        assert!(file.is_file().await.unwrap());
        assert_eq!(file.stat().await.unwrap().size, 4);
        assert_eq!(file.read_bytes().await.unwrap(), b"jpeg");
        assert_eq!(file.locator().parent(), Some(Locator::parse(&format!("{}#2024", path.display()))));
    }

    #[tokio::test]
    async fn test_index_is_parsed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tar");
        fixtures::write_tar(&path, ArchiveFormat::Tar, &[("a.txt", b"one")]);
        let source = source_for(&path, ArchiveFormat::Tar);
        assert!(!source.is_indexed());
        let first = source.index().await.unwrap();
        // Replacing the container on disk does not change the parsed index.
        fixtures::write_tar(&path, ArchiveFormat::Tar, &[("b.txt", b"two")]);
        let second = source.index().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.get("a.txt").is_some());
        assert!(second.get("b.txt").is_none());
    }

    #[tokio::test]
    async fn test_mutations_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        fixtures::write_zip(&path, &[("a.txt", b"one")]);
        let source = source_for(&path, ArchiveFormat::Zip);
        let file = ArchiveBackend::new("a.txt", source);
        assert!(file.is_read_only());
        let errors = [
            file.write_bytes(b"x").await.unwrap_err(),
            file.unlink().await.unwrap_err(),
            file.mkdir(true, true).await.unwrap_err(),
            file.rmtree().await.unwrap_err(),
            file.rename(&Locator::parse("/tmp/x")).await.unwrap_err(),
            file.writer().await.err().unwrap(),
        ];
        for err in errors {
            assert!(matches!(&*err, ErrorKind::ReadOnly(_)), "{err}");
        }
        assert_eq!(file.read_bytes().await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_missing_member_and_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        fixtures::write_zip(&path, &[("a.txt", b"one")]);
        let missing = ArchiveBackend::new("nope.txt", source_for(&path, ArchiveFormat::Zip));
        assert!(!missing.exists().await.unwrap());
        assert!(matches!(&*missing.stat().await.unwrap_err(), ErrorKind::NotFound(_)));

        let gone = ArchiveBackend::new("", source_for(&dir.path().join("gone.zip"), ArchiveFormat::Zip));
        assert!(!gone.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tar.gz");
        fixtures::write_tar(&path, ArchiveFormat::TarGzip, &[("a.txt", b"one")]);
        let file = ArchiveBackend::new("a.txt", source_for(&path, ArchiveFormat::TarGzip));
        let err = file.iterdir().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_symlink_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.tar");
        fixtures::write_tar_with_links(&path, &[("data/real.txt", b"content")], &[("data/alias.txt", "real.txt")]);
        let source = source_for(&path, ArchiveFormat::Tar);
        let link = ArchiveBackend::new("data/alias.txt", source);
        assert!(link.is_symlink().await.unwrap());
        assert!(link.stat().await.unwrap().is_symlink);
        assert_eq!(link.read_link().await.unwrap(), "real.txt");
        assert_eq!(link.read_bytes().await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_hard_link_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hard.tar");
        fixtures::write_tar_with_hard_links(&path, &[("orig.txt", b"hello")], &[("link.txt", "orig.txt")]);
        let source = source_for(&path, ArchiveFormat::Tar);
        let link = ArchiveBackend::new("link.txt", Arc::clone(&source));
        assert!(!link.is_symlink().await.unwrap());
        assert_eq!(link.stat().await.unwrap().size, 5);
        assert_eq!(link.read_bytes().await.unwrap(), b"hello");
        let orig = ArchiveBackend::new("orig.txt", source);
        assert_eq!(orig.read_bytes().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_extract_to_temp_keeps_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        fixtures::write_zip(&path, &[("docs/report.pdf", b"%PDF")]);
        let file = ArchiveBackend::new("docs/report.pdf", source_for(&path, ArchiveFormat::Zip));
        let extracted = file.extract_to_temp(dir.path()).await.unwrap();
        assert_eq!(extracted.extension().unwrap(), "pdf");
        assert_eq!(std::fs::read(extracted.path()).unwrap(), b"%PDF");
        let temp_path = extracted.path().to_path_buf();
        drop(extracted);
        assert!(!temp_path.exists());
    }
}
