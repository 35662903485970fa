//! The [`Path`] facade.
//!
//! Every part of the application talks to storage through `Path`. It pairs a
//! parsed [`Locator`] with the backend the locator dispatched to, so callers
//! never need to know whether they are looking at a local file, a remote
//! object or an archive member.
//!
//! Path algebra (`parent`, `join`, `name`...) is computed from the locator and
//! never touches a backend. Everything else delegates.

use crate::backend::{BackendHandle, BoxReader, BoxWriter};
use crate::error::{Batch, BatchReport, Error, ErrorKind, Result};
use crate::locator::{Locator, Scheme};
use crate::models::StatResult;
use crate::storage::Storage;
use crate::temp::ExtractedFile;
use futures::future::BoxFuture;
use exn::ResultExt;
use futures::{FutureExt, Stream, TryStreamExt};
use globset::{GlobBuilder, GlobMatcher};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// Chunk size for streaming copies between backends.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct Path {
    locator: Locator,
    backend: BackendHandle,
    storage: Storage,
}

impl Path {
    /// Resolve a locator string against `storage`.
    ///
    /// Never fails: a locator that cannot be served (a remote path without an
    /// object store, an archive of unknown format) fails on first use.
    pub fn new(locator: &str, storage: &Storage) -> Self {
        Self::from_locator(Locator::parse(locator), storage)
    }

    pub fn from_locator(locator: Locator, storage: &Storage) -> Self {
        let backend = storage.backend_for(&locator);
        Self { locator, backend, storage: storage.clone() }
    }

    fn sibling(&self, locator: Locator) -> Self {
        Self::from_locator(locator, &self.storage)
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn scheme(&self) -> Scheme {
        self.locator.scheme()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn name(&self) -> String {
        self.locator.name()
    }

    pub fn stem(&self) -> String {
        self.locator.stem()
    }

    pub fn suffix(&self) -> Option<String> {
        self.locator.suffix()
    }

    /// Computed parent; `None` at any root. The parent of an archive root is
    /// `None` too: leaving an archive goes through [`container()`](Self::container).
    pub fn parent(&self) -> Option<Path> {
        self.locator.parent().map(|parent| self.sibling(parent))
    }

    pub fn join(&self, segment: &str) -> Path {
        self.sibling(self.locator.join(segment))
    }

    pub fn with_name(&self, name: &str) -> Option<Path> {
        self.locator.with_name(name).map(|locator| self.sibling(locator))
    }

    pub fn with_suffix(&self, suffix: &str) -> Option<Path> {
        self.locator.with_suffix(suffix).map(|locator| self.sibling(locator))
    }

    pub fn with_stem(&self, stem: &str) -> Option<Path> {
        self.locator.with_stem(stem).map(|locator| self.sibling(locator))
    }

    /// `/`-separated path below `base`; fails when this path is not beneath it.
    pub fn relative_to(&self, base: &Path) -> Result<String> {
        self.locator.relative_to(&base.locator).ok_or_else(|| {
            Error::from(ErrorKind::InvalidLocator(format!("{} is not beneath {}", self.locator, base.locator)))
        })
    }

    /// Match against a glob. A relative pattern matches from the right, so
    /// `*.txt` matches any text file and `docs/*.txt` only those directly in
    /// a `docs` directory. An absolute pattern must match the whole path.
    pub fn matches(&self, pattern: &str) -> Result<bool> {
        let matcher = compile_glob(pattern)?;
        let path = self.locator.inner_path();
        let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
        if pattern.starts_with('/') {
            return Ok(matcher.is_match(format!("/{}", segments.join("/"))));
        }
        if pattern.contains("**") {
            return Ok(matcher.is_match(segments.join("/")));
        }
        let depth = pattern.trim_end_matches('/').split('/').count();
        Ok(segments.len() >= depth && matcher.is_match(segments[segments.len() - depth..].join("/")))
    }

    /// The physical archive file an archive path points into.
    pub fn container(&self) -> Option<Path> {
        self.locator.container().map(|container| self.sibling(container.clone()))
    }

    pub fn is_root(&self) -> bool {
        self.locator.is_root()
    }

    /// Whether this path is `base` or lies beneath it.
    pub fn is_relative_to(&self, base: &Path) -> bool {
        self.locator.starts_with(&base.locator)
    }

    pub fn is_remote(&self) -> bool {
        self.backend.is_remote()
    }

    pub fn is_read_only(&self) -> bool {
        self.backend.is_read_only()
    }

    pub fn supports_directory_rename(&self) -> bool {
        self.backend.supports_directory_rename()
    }

    pub fn supports_file_editing(&self) -> bool {
        self.backend.supports_file_editing()
    }

    pub fn supports_symlinks(&self) -> bool {
        self.backend.supports_symlinks()
    }

    pub fn local_path(&self) -> Option<&std::path::Path> {
        self.backend.local_path()
    }

    /// Whether both paths are served by the same backend instance, making a
    /// backend-native copy or rename possible.
    pub fn same_backend(&self, other: &Path) -> bool {
        match (&self.locator, &other.locator) {
            (Locator::Local(_), Locator::Local(_)) => true,
            (Locator::Remote { .. }, Locator::Remote { .. }) => {
                self.storage.ptr_eq(&other.storage) && self.storage.store().is_some()
            },
            (Locator::Archive { container, .. }, Locator::Archive { container: other_container, .. }) => {
                self.storage.ptr_eq(&other.storage) && container == other_container
            },
            _ => false,
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists().await
    }

    pub async fn is_dir(&self) -> Result<bool> {
        self.backend.is_dir().await
    }

    pub async fn is_file(&self) -> Result<bool> {
        self.backend.is_file().await
    }

    pub async fn is_symlink(&self) -> Result<bool> {
        self.backend.is_symlink().await
    }

    pub async fn stat(&self) -> Result<StatResult> {
        self.backend.stat().await
    }

    /// Lazily list direct children. Each call starts a fresh listing.
    pub fn iterdir(&self) -> impl Stream<Item = Result<Path>> + Send + '_ {
        self.backend.iterdir().map_ok(move |entry| self.sibling(entry.locator))
    }

    /// Like [`iterdir()`](Self::iterdir), with the metadata the listing
    /// already carried.
    pub fn scandir(&self) -> impl Stream<Item = Result<(Path, StatResult)>> + Send + '_ {
        self.backend.iterdir().map_ok(move |entry| (self.sibling(entry.locator), entry.stat))
    }

    /// Descendants whose path below this directory matches the relative
    /// `pattern`, sorted. `**` spans any number of directories; `*` and `?`
    /// stay within one. Directory links are not followed.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<Path>> {
        if pattern.is_empty() || pattern.starts_with('/') {
            exn::bail!(ErrorKind::InvalidLocator(format!("glob pattern `{pattern}` must be relative")));
        }
        let matcher = compile_glob(pattern.trim_end_matches('/'))?;
        let max_depth = match pattern.contains("**") {
            true => None,
            false => Some(pattern.trim_end_matches('/').split('/').count()),
        };
        let mut found = Vec::new();
        glob_walk(self, self, &matcher, max_depth, 1, &mut found).await?;
        found.sort();
        Ok(found)
    }

    /// [`glob()`](Self::glob) at any depth below this directory.
    pub async fn rglob(&self, pattern: &str) -> Result<Vec<Path>> {
        self.glob(&format!("**/{}", pattern.trim_start_matches('/'))).await
    }

    /// Collect the children, sorted by locator.
    pub async fn list_dir(&self) -> Result<Vec<Path>> {
        let mut children: Vec<Path> = self.iterdir().try_collect().await?;
        children.sort();
        Ok(children)
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        self.backend.read_bytes().await
    }

    pub async fn read_text(&self) -> Result<String> {
        let data = self.read_bytes().await?;
        String::from_utf8(data).map_err(|e| {
            let err = std::io::Error::new(IoErrorKind::InvalidData, e);
            Error::from(ErrorKind::from_io(err, &self.locator))
        })
    }

    pub async fn reader(&self) -> Result<BoxReader> {
        self.backend.reader().await
    }

    pub async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let result = self.backend.write_bytes(data).await;
        self.touched();
        result
    }

    pub async fn write_text(&self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes()).await
    }

    /// Open for chunked writes; see [`ObjectWriter`](crate::backend::ObjectWriter).
    pub async fn writer(&self) -> Result<BoxWriter> {
        self.backend.writer().await
    }

    /// Create an empty file; with `exist_ok` an existing one is kept (a local
    /// file gets a fresh modification time).
    pub async fn touch(&self, exist_ok: bool) -> Result<()> {
        if self.is_read_only() {
            exn::bail!(ErrorKind::ReadOnly(format!("cannot create {}", self.locator)));
        }
        let result = self.backend.touch(exist_ok).await;
        self.touched();
        result
    }

    /// Whether both paths name the same existing file or directory. Local
    /// paths are compared after resolving links; others by locator.
    pub async fn samefile(&self, other: &Path) -> Result<bool> {
        if let (Some(left), Some(right)) = (self.local_path(), other.local_path()) {
            let left = tokio::fs::canonicalize(left).await.map_err(|e| ErrorKind::from_io(e, &self.locator))?;
            let right = tokio::fs::canonicalize(right).await.map_err(|e| ErrorKind::from_io(e, &other.locator))?;
            return Ok(left == right);
        }
        self.stat().await?;
        other.stat().await?;
        Ok(self.scheme() == other.scheme() && self.locator.relative_to(&other.locator).is_some_and(|rest| rest.is_empty()))
    }

    pub async fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<()> {
        self.backend.mkdir(parents, exist_ok).await
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self) -> Result<()> {
        self.backend.rmdir().await
    }

    pub async fn unlink(&self) -> Result<()> {
        let result = self.backend.unlink().await;
        self.touched();
        result
    }

    pub async fn rmtree(&self) -> Result<BatchReport> {
        let result = self.backend.rmtree().await;
        self.touched();
        result
    }

    /// Rename within one backend. Moving between backends is a transfer.
    pub async fn rename(&self, target: &Path) -> Result<()> {
        if !self.same_backend(target) {
            exn::bail!(ErrorKind::Unsupported(format!(
                "cannot rename {} to {} across backends",
                self.locator, target.locator
            )));
        }
        let result = self.backend.rename(&target.locator).await;
        self.touched();
        target.touched();
        result
    }

    pub async fn read_link(&self) -> Result<String> {
        self.backend.read_link().await
    }

    pub async fn symlink_to(&self, target: &str) -> Result<()> {
        self.backend.symlink_to(target).await
    }

    /// Copy to the exact locator `dest` (not into it), recursively for
    /// directories.
    ///
    /// Paths on the same backend use the backend's native copy; anything else
    /// streams through [`reader()`](Self::reader) and [`writer()`](Self::writer).
    /// Per-file failures in a directory copy are collected into a
    /// [`PartialFailure`](ErrorKind::PartialFailure).
    pub async fn copy_to(&self, dest: &Path, overwrite: bool) -> Result<()> {
        if dest.is_relative_to(self) {
            exn::bail!(ErrorKind::InvalidLocator(format!("cannot copy {} into itself ({})", self.locator, dest.locator)));
        }
        if dest.is_read_only() {
            exn::bail!(ErrorKind::ReadOnly(format!("cannot copy into {}", dest.locator)));
        }
        if self.same_backend(dest) {
            let result = self.backend.copy_to(&dest.locator, overwrite).await;
            dest.touched();
            match result {
                // No server-side copy: stream it like a cross-backend copy.
                Err(err) if matches!(&*err, ErrorKind::Unsupported(_)) => {
                    tracing::debug!(source = %self.locator, %dest, error = %err, "native copy unavailable, streaming");
                },
                result => return result,
            }
        }
        let stat = self.stat().await?;
        if stat.is_directory && !stat.is_symlink {
            let mut batch = Batch::new();
            copy_tree(self, dest, overwrite, &mut batch).await;
            dest.touched();
            tracing::debug!(source = %self.locator, %dest, report = %batch.report(), "copied tree across backends");
            batch.finish(ErrorKind::PartialFailure)?;
            return Ok(());
        }
        let result = copy_file(self, dest, overwrite).await.map(|_| ());
        dest.touched();
        result
    }

    /// A local file with this path's contents, for handing to external
    /// programs. Local paths are used in place; anything else is extracted to
    /// a temporary file removed when the handle is dropped.
    pub async fn open_local(&self) -> Result<LocalFile> {
        if let Some(path) = self.local_path() {
            return Ok(LocalFile::InPlace(path.to_path_buf()));
        }
        let extracted = self.backend.extract_to_temp(self.storage.temp_dir()).await?;
        Ok(LocalFile::Temporary(extracted))
    }

    /// A mutated path may be an archive container that is already open.
    fn touched(&self) {
        if self.scheme() != Scheme::Archive {
            self.storage.forget_archive(&self.locator);
        }
    }
}

/// A file on the local filesystem, see [`Path::open_local()`].
#[derive(Debug)]
pub enum LocalFile {
    InPlace(PathBuf),
    Temporary(ExtractedFile),
}
impl LocalFile {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::InPlace(path) => path,
            Self::Temporary(file) => file.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// Stream one file (or re-create one link) across backends. Returns the
/// number of bytes written.
async fn copy_file(source: &Path, dest: &Path, overwrite: bool) -> Result<u64> {
    if !overwrite && dest.exists().await? {
        exn::bail!(ErrorKind::AlreadyExists(dest.to_string()));
    }
    if dest.supports_symlinks() && source.is_symlink().await? {
        let target = source.read_link().await?;
        if overwrite && dest.is_symlink().await? {
            dest.unlink().await?;
        }
        dest.symlink_to(&target).await?;
        return Ok(0);
    }
    let mut reader = source.reader().await?;
    let mut writer = dest.writer().await?;
    let mut buffer = vec![0; COPY_CHUNK_SIZE];
    let mut written = 0;
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                abort(writer, dest).await;
                exn::bail!(ErrorKind::from_io(e, source));
            },
        };
        if let Err(err) = writer.write_chunk(&buffer[..read]).await {
            abort(writer, dest).await;
            return Err(err);
        }
        written += read as u64;
    }
    writer.commit().await?;
    Ok(written)
}

async fn abort(writer: BoxWriter, dest: &Path) {
    if let Err(err) = writer.abort().await {
        tracing::warn!(%dest, error = %err, "could not discard partial write");
    }
}

/// Compile a glob in which `*` and `?` never match a `/`.
fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .or_raise(|| ErrorKind::InvalidLocator(format!("invalid glob pattern `{pattern}`")))?;
    Ok(glob.compile_matcher())
}

fn glob_walk<'a>(
    base: &'a Path,
    dir: &'a Path,
    matcher: &'a GlobMatcher,
    max_depth: Option<usize>,
    depth: usize,
    found: &'a mut Vec<Path>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let children: Vec<(Path, StatResult)> = dir.scandir().try_collect().await?;
        for (child, stat) in children {
            let Some(relative) = child.locator.relative_to(&base.locator) else {
                continue;
            };
            if matcher.is_match(&relative) {
                found.push(child.clone());
            }
            if stat.is_directory && !stat.is_symlink && max_depth.is_none_or(|max| depth < max) {
                glob_walk(base, &child, matcher, max_depth, depth + 1, found).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

fn copy_tree<'a>(source: &'a Path, dest: &'a Path, overwrite: bool, batch: &'a mut Batch) -> BoxFuture<'a, ()> {
    async move {
        let children: Vec<(Path, StatResult)> = match source.scandir().try_collect().await {
            Ok(children) => children,
            Err(err) => {
                batch.failed(source, err);
                return;
            },
        };
        if let Err(err) = dest.mkdir(true, true).await {
            batch.failed(dest, err);
            return;
        }
        for (child, stat) in children {
            let target = dest.join(&child.name());
            if stat.is_directory && !stat.is_symlink {
                copy_tree(&child, &target, overwrite, batch).await;
                continue;
            }
            match copy_file(&child, &target, overwrite).await {
                Ok(_) => batch.succeeded(&child),
                Err(err) => batch.failed(&child, err),
            }
        }
    }
    .boxed()
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator
    }
}
impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.locator.hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.locator.cmp(&other.locator)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.locator.fmt(f)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Path").field(&self.locator.to_string()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::archive::fixtures;
    use crate::store::MemoryStore;
    use rstest::rstest;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> (Storage, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new().with_bucket("bucket"));
        let storage = Storage::builder().object_store(store.clone()).temp_dir(dir.path()).build();
        (storage, store)
    }

    fn root(storage: &Storage, dir: &TempDir, kind: &str, name: &str) -> Path {
        match kind {
            "local" => storage.path(&format!("{}/{name}", dir.path().display())),
            _ => storage.path(&format!("remote://bucket/{name}")),
        }
    }

    async fn build_tree(root: &Path) {
        root.join("a.txt").write_bytes(&[b'a'; 10]).await.unwrap();
        root.join("sub").join("b.txt").write_bytes(&[b'b'; 20]).await.unwrap();
        root.join("sub").join("deeper").join("c.bin").write_bytes(&vec![7; COPY_CHUNK_SIZE + 3]).await.unwrap();
    }

    #[test]
    fn test_parent_is_computed() {
        let storage = Storage::local_only();
        let path = storage.path("remote://bucket/a/b/");
        assert_eq!(path.parent().unwrap().to_string(), "remote://bucket/a/");
        assert_eq!(storage.path("remote://bucket/a").parent().unwrap().to_string(), "remote://bucket/");
        assert!(storage.path("remote://bucket/").parent().is_none());
        assert!(storage.path("/tmp/x.zip#").parent().is_none());
        assert_eq!(storage.path("/tmp/x.zip#").container().unwrap().to_string(), "/tmp/x.zip");
    }

    #[tokio::test]
    async fn test_write_then_read_text() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        for locator in [format!("{}/note.txt", dir.path().display()), "remote://bucket/note.txt".to_string()] {
            let path = storage.path(&locator);
            path.write_text("héllo").await.unwrap();
            assert_eq!(path.read_text().await.unwrap(), "héllo");
        }
    }

    #[tokio::test]
    async fn test_read_text_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let path = storage.path("remote://bucket/blob.bin");
        path.write_bytes(&[0xff, 0xfe]).await.unwrap();
        let err = path.read_text().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(e) if e.kind() == IoErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn test_virtual_directory_exists() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        storage.path("remote://bucket/photos/2024/img.jpg").write_bytes(b"jpg").await.unwrap();
        let photos = storage.path("remote://bucket/photos/2024/");
        assert!(photos.exists().await.unwrap());
        assert!(photos.is_dir().await.unwrap());
        let children = photos.list_dir().await.unwrap();
        assert_eq!(children, vec![storage.path("remote://bucket/photos/2024/img.jpg")]);
    }

    #[rstest]
    #[case::local("local")]
    #[case::remote("remote")]
    #[tokio::test]
    async fn test_glob_and_rglob(#[case] kind: &str) {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let src = root(&storage, &dir, kind, "src");
        build_tree(&src).await;
        src.join("sub").join("notes.txt").write_text("n").await.unwrap();

        let relative = |paths: Vec<Path>| -> Vec<String> {
            paths.iter().map(|path| path.relative_to(&src).unwrap()).collect()
        };
        assert_eq!(relative(src.glob("*.txt").await.unwrap()), vec!["a.txt"]);
        assert_eq!(relative(src.glob("sub/*.txt").await.unwrap()), vec!["sub/b.txt", "sub/notes.txt"]);
        assert_eq!(relative(src.glob("*/*/*.bin").await.unwrap()), vec!["sub/deeper/c.bin"]);
        assert_eq!(relative(src.rglob("*.txt").await.unwrap()), vec!["a.txt", "sub/b.txt", "sub/notes.txt"]);
        assert_eq!(relative(src.rglob("deeper").await.unwrap()), vec!["sub/deeper"]);
        assert!(src.glob("*.pdf").await.unwrap().is_empty());
        assert!(matches!(&*src.glob("/abs").await.unwrap_err(), ErrorKind::InvalidLocator(_)));
    }

    #[rstest]
    #[case("remote://bucket/docs/a.txt", "*.txt", true)]
    #[case("remote://bucket/docs/a.txt", "docs/*.txt", true)]
    #[case("remote://bucket/docs/a.txt", "other/*.txt", false)]
    #[case("remote://bucket/docs/a.txt", "/docs/*.txt", true)]
    #[case("remote://bucket/x/docs/a.txt", "/docs/*.txt", false)]
    #[case("remote://bucket/x/docs/a.txt", "**/a.txt", true)]
    #[case("/tmp/photos/img.JPG", "*.jpg", false)]
    #[case("/tmp/photos/img.jpg", "/tmp/*/*.jpg", true)]
    #[case("/tmp/x.zip#docs/report.pdf", "docs/*.pdf", true)]
    #[case("/tmp/a.txt", "photos/*.txt", false)]
    fn test_matches(#[case] locator: &str, #[case] pattern: &str, #[case] expected: bool) {
        let storage = Storage::local_only();
        assert_eq!(storage.path(locator).matches(pattern).unwrap(), expected);
    }

    #[test]
    fn test_invalid_pattern() {
        let storage = Storage::local_only();
        let err = storage.path("/tmp/a.txt").matches("[unclosed").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidLocator(_)));
    }

    #[test]
    fn test_relative_to_and_renames() {
        let storage = Storage::local_only();
        let file = storage.path("remote://bucket/docs/2024/report.txt");
        assert_eq!(file.relative_to(&storage.path("remote://bucket/docs/")).unwrap(), "2024/report.txt");
        let err = file.relative_to(&storage.path("remote://bucket/photos")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidLocator(_)));
        assert_eq!(file.with_suffix(".md").unwrap().to_string(), "remote://bucket/docs/2024/report.md");
        assert_eq!(file.with_stem("summary").unwrap().to_string(), "remote://bucket/docs/2024/summary.txt");
    }

    #[rstest]
    #[case::local("local")]
    #[case::remote("remote")]
    #[tokio::test]
    async fn test_touch(#[case] kind: &str) {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let file = root(&storage, &dir, kind, "empty.txt");
        file.touch(false).await.unwrap();
        assert!(file.is_file().await.unwrap());
        assert_eq!(file.read_bytes().await.unwrap(), b"");
        assert!(matches!(&*file.touch(false).await.unwrap_err(), ErrorKind::AlreadyExists(_)));
        file.write_text("kept").await.unwrap();
        file.touch(true).await.unwrap();
        assert_eq!(file.read_text().await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_samefile() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let file = root(&storage, &dir, "local", "a.txt");
        file.write_text("a").await.unwrap();
        let dotted = storage.path(&format!("{}/./a.txt", dir.path().display()));
        assert!(file.samefile(&dotted).await.unwrap());
        let other = root(&storage, &dir, "local", "b.txt");
        other.write_text("a").await.unwrap();
        assert!(!file.samefile(&other).await.unwrap());

        let remote = root(&storage, &dir, "remote", "dir/a.txt");
        remote.write_text("a").await.unwrap();
        let remote_dir = root(&storage, &dir, "remote", "dir");
        assert!(remote_dir.samefile(&root(&storage, &dir, "remote", "dir/")).await.unwrap());
        assert!(!remote.samefile(&file).await.unwrap());
        let missing = root(&storage, &dir, "remote", "gone.txt");
        assert!(matches!(&*missing.samefile(&remote).await.unwrap_err(), ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_copy_local_tree_to_remote() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, store) = storage(&dir);
        let src = root(&storage, &dir, "local", "src");
        src.join("a.txt").write_bytes(&[b'a'; 10]).await.unwrap();
        src.join("sub").join("b.txt").write_bytes(&[b'b'; 20]).await.unwrap();

        let dst = storage.path("remote://bucket/dst/");
        src.copy_to(&dst, false).await.unwrap();

        let files: Vec<String> = store.keys("bucket").await.into_iter().filter(|key| !key.ends_with('/')).collect();
        assert_eq!(files, vec!["dst/a.txt", "dst/sub/b.txt"]);
        assert_eq!(dst.join("a.txt").read_bytes().await.unwrap(), vec![b'a'; 10]);
        assert_eq!(dst.join("sub/b.txt").read_bytes().await.unwrap(), vec![b'b'; 20]);
    }

    #[rstest]
    #[case::local_to_local("local", "local")]
    #[case::local_to_remote("local", "remote")]
    #[case::remote_to_local("remote", "local")]
    #[case::remote_to_remote("remote", "remote")]
    #[tokio::test]
    async fn test_copy_between_backends(#[case] from: &str, #[case] to: &str) {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let src = root(&storage, &dir, from, "src");
        let dst = root(&storage, &dir, to, "dst");
        build_tree(&src).await;

        src.copy_to(&dst, false).await.unwrap();

        for relative in ["a.txt", "sub/b.txt", "sub/deeper/c.bin"] {
            let copied = dst.join(relative);
            assert!(copied.exists().await.unwrap(), "{copied} missing");
            assert_eq!(copied.read_bytes().await.unwrap(), src.join(relative).read_bytes().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_copy_streams_without_server_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, store) = storage(&dir);
        let src = root(&storage, &dir, "remote", "src");
        build_tree(&src).await;
        store.disable_server_copy();
        let dst = root(&storage, &dir, "remote", "dst");

        src.copy_to(&dst, false).await.unwrap();

        assert_eq!(store.calls().copy, 1);
        for relative in ["a.txt", "sub/b.txt", "sub/deeper/c.bin"] {
            assert_eq!(dst.join(relative).read_bytes().await.unwrap(), src.join(relative).read_bytes().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_copy_conflict_reports_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let src = root(&storage, &dir, "local", "src");
        let dst = root(&storage, &dir, "remote", "dst");
        build_tree(&src).await;
        dst.join("a.txt").write_bytes(b"keep").await.unwrap();

        let err = src.copy_to(&dst, false).await.unwrap_err();
        let ErrorKind::PartialFailure(report) = &*err else {
            panic!("expected partial failure, got {err:?}");
        };
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(dst.join("a.txt").read_bytes().await.unwrap(), b"keep");

        src.copy_to(&dst, true).await.unwrap();
        assert_eq!(dst.join("a.txt").read_bytes().await.unwrap(), vec![b'a'; 10]);
    }

    #[tokio::test]
    async fn test_copy_into_itself_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let src = root(&storage, &dir, "local", "src");
        build_tree(&src).await;
        let inside = src.join("sub").join("copy");

        let err = src.copy_to(&inside, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidLocator(_)));
        assert!(!inside.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_archive_directory_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let archive = dir.path().join("bundle.zip");
        fixtures::write_zip(&archive, &[("docs/a.md", b"# a"), ("docs/img/logo.png", b"png"), ("top.txt", b"t")]);

        let docs = storage.path(&format!("{}#docs", archive.display()));
        let dst = root(&storage, &dir, "local", "out");
        docs.copy_to(&dst, false).await.unwrap();

        assert_eq!(dst.join("a.md").read_text().await.unwrap(), "# a");
        assert_eq!(dst.join("img/logo.png").read_bytes().await.unwrap(), b"png");
        assert!(!dst.join("top.txt").exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_into_archive_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let archive = dir.path().join("bundle.zip");
        fixtures::write_zip(&archive, &[("a.txt", b"a")]);
        let src = root(&storage, &dir, "local", "new.txt");
        src.write_text("new").await.unwrap();

        let err = src.copy_to(&storage.path(&format!("{}#new.txt", archive.display())), false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReadOnly(_)));
    }

    #[tokio::test]
    async fn test_rename_across_backends_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let src = root(&storage, &dir, "local", "a.txt");
        src.write_text("a").await.unwrap();
        let err = src.rename(&root(&storage, &dir, "remote", "a.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
        assert!(src.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_rewriting_container_drops_stale_index() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let archive = dir.path().join("bundle.zip");
        fixtures::write_zip(&archive, &[("old.txt", b"old")]);
        let old = storage.path(&format!("{}#old.txt", archive.display()));
        assert!(old.exists().await.unwrap());

        let scratch = dir.path().join("scratch.zip");
        fixtures::write_zip(&scratch, &[("new.txt", b"new")]);
        let rebuilt = std::fs::read(&scratch).unwrap();
        storage.path(&archive.display().to_string()).write_bytes(&rebuilt).await.unwrap();

        assert!(!storage.path(&format!("{}#old.txt", archive.display())).exists().await.unwrap());
        assert_eq!(storage.path(&format!("{}#new.txt", archive.display())).read_text().await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_open_local() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let local = root(&storage, &dir, "local", "plain.txt");
        local.write_text("plain").await.unwrap();
        let opened = local.open_local().await.unwrap();
        assert!(!opened.is_temporary());
        assert_eq!(opened.path(), local.local_path().unwrap());

        let remote = root(&storage, &dir, "remote", "report.pdf");
        remote.write_bytes(b"%PDF").await.unwrap();
        let opened = remote.open_local().await.unwrap();
        assert!(opened.is_temporary());
        assert_eq!(opened.path().extension().unwrap(), "pdf");
        let temp_path = opened.path().to_path_buf();
        assert_eq!(std::fs::read(&temp_path).unwrap(), b"%PDF");
        drop(opened);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_iterdir_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = storage(&dir);
        let src = root(&storage, &dir, "remote", "src");
        build_tree(&src).await;
        let first: Vec<Path> = src.iterdir().try_collect().await.unwrap();
        let second: Vec<Path> = src.iterdir().try_collect().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        let entries: Vec<(Path, StatResult)> = src.scandir().try_collect().await.unwrap();
        let (_, stat) = entries.iter().find(|(path, _)| path.name() == "sub").unwrap();
        assert!(stat.is_directory);
    }
}
