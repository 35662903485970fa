//! Locator parsing and pure path algebra.
//!
//! A [`Locator`] is the parsed, scheme-tagged form of a path string. Nothing in
//! this module touches a backend: parent computation, joining and the
//! "is this inside that" check are all string/component operations.

use crate::backend::archive::ArchiveFormat;
use derive_more::Display;
use std::fmt;
use std::path::{Component, PathBuf};

/// Prefix of remote object locators: `remote://<bucket>/<key>`.
pub const REMOTE_SCHEME: &str = "remote://";
/// Explicit archive prefix, allowing any container (including remote ones):
/// `archive://<container>#<entry>`.
pub const ARCHIVE_SCHEME: &str = "archive://";
/// Separates the archive container from the internal entry path.
pub const ENTRY_SEPARATOR: char = '#';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Scheme {
    #[display("local")]
    Local,
    #[display("remote")]
    Remote,
    #[display("archive")]
    Archive,
}

/// Scheme-specific location of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Locator {
    Local(PathBuf),
    /// An object key. A trailing `/` denotes a virtual directory; an empty key
    /// is the bucket root.
    Remote { bucket: String, key: String },
    /// A member of an archive. An empty entry is the archive root.
    Archive { container: Box<Locator>, entry: String },
}

impl Locator {
    /// Parse a locator string. Never fails: anything that is neither remote
    /// nor archive-internal is a local path.
    ///
    /// # Examples
    ///
    /// ```
    /// use duopane_storage::{Locator, Scheme};
    ///
    /// assert_eq!(Locator::parse("remote://photos/2024/").scheme(), Scheme::Remote);
    /// assert_eq!(Locator::parse("/tmp/backup.tar.gz#etc/hosts").scheme(), Scheme::Archive);
    /// assert_eq!(Locator::parse("/tmp/notes#draft.txt").scheme(), Scheme::Local);
    /// ```
    pub fn parse(input: &str) -> Self {
        if let Some(rest) = input.strip_prefix(REMOTE_SCHEME) {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            return Self::Remote { bucket: bucket.to_string(), key: key.to_string() };
        }
        if let Some(rest) = input.strip_prefix(ARCHIVE_SCHEME) {
            let (container, entry) = rest.rsplit_once(ENTRY_SEPARATOR).unwrap_or((rest, ""));
            return Self::archive(Self::parse(container), entry);
        }
        if let Some((container, entry)) = input.rsplit_once(ENTRY_SEPARATOR)
            && ArchiveFormat::from_name(container).is_some()
        {
            return Self::archive(Self::Local(PathBuf::from(container)), entry);
        }
        Self::Local(PathBuf::from(input))
    }

    pub fn remote(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Remote { bucket: bucket.into(), key: key.into() }
    }

    pub fn archive(container: Locator, entry: &str) -> Self {
        Self::Archive { container: Box::new(container), entry: normalize_entry(entry) }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Local(_) => Scheme::Local,
            Self::Remote { .. } => Scheme::Remote,
            Self::Archive { .. } => Scheme::Archive,
        }
    }

    /// The physical archive this locator points into, for "exit archive".
    pub fn container(&self) -> Option<&Locator> {
        match self {
            Self::Archive { container, .. } => Some(container),
            _ => None,
        }
    }

    /// Final path component, or the bucket/container name at a root.
    pub fn name(&self) -> String {
        match self {
            Self::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            Self::Remote { bucket, key } => match last_segment(key.trim_end_matches('/')) {
                "" => bucket.clone(),
                name => name.to_string(),
            },
            Self::Archive { container, entry } => match last_segment(entry) {
                "" => container.name(),
                name => name.to_string(),
            },
        }
    }

    /// Extension of the final component including the dot, e.g. `.txt`.
    pub fn suffix(&self) -> Option<String> {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => Some(name[idx..].to_string()),
            _ => None,
        }
    }

    pub fn stem(&self) -> String {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => name[..idx].to_string(),
            _ => name,
        }
    }

    /// Append a single child component.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        match self {
            Self::Local(path) => Self::Local(path.join(segment)),
            Self::Remote { bucket, key } => {
                let key = match key.is_empty() || key.ends_with('/') {
                    true => format!("{key}{segment}"),
                    false => format!("{key}/{segment}"),
                };
                Self::Remote { bucket: bucket.clone(), key }
            },
            Self::Archive { container, entry } => Self::archive((**container).clone(), &format!("{entry}/{segment}")),
        }
    }

    /// Sibling with a different final component.
    pub fn with_name(&self, name: &str) -> Option<Self> {
        match self {
            Self::Local(path) => path.file_name().map(|_| Self::Local(path.with_file_name(name))),
            _ => self.parent().map(|parent| parent.join(name)),
        }
    }

    /// Sibling with the extension replaced, or removed when `suffix` is
    /// empty. `None` at a root or when `suffix` is not of the form `.ext`.
    pub fn with_suffix(&self, suffix: &str) -> Option<Self> {
        if !suffix.is_empty() && (!suffix.starts_with('.') || suffix == "." || suffix.contains('/')) {
            return None;
        }
        self.with_name(&format!("{}{suffix}", self.stem()))
    }

    /// Sibling with the name before the extension replaced.
    pub fn with_stem(&self, stem: &str) -> Option<Self> {
        if stem.is_empty() {
            return None;
        }
        self.with_name(&format!("{stem}{}", self.suffix().unwrap_or_default()))
    }

    /// `/`-separated path of `self` below `base`, empty when they are the
    /// same path. `None` when `self` does not lie beneath `base`.
    pub fn relative_to(&self, base: &Locator) -> Option<String> {
        match (self, base) {
            (Self::Local(path), Self::Local(base)) => {
                let rest = path.strip_prefix(base).ok()?;
                let segments: Vec<_> = rest.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
                Some(segments.join("/"))
            },
            (Self::Remote { bucket, key }, Self::Remote { bucket: base_bucket, key: base_key }) => {
                (bucket == base_bucket).then(|| key_relative_to(key, base_key))?
            },
            (
                Self::Archive { container, entry },
                Self::Archive { container: base_container, entry: base_entry },
            ) => (container == base_container).then(|| key_relative_to(entry, base_entry))?,
            _ => None,
        }
    }

    /// The path within its own namespace (filesystem path, object key or
    /// archive member), used for pattern matching.
    pub(crate) fn inner_path(&self) -> String {
        match self {
            Self::Local(path) => path.to_string_lossy().into_owned(),
            Self::Remote { key, .. } => key.trim_end_matches('/').to_string(),
            Self::Archive { entry, .. } => entry.clone(),
        }
    }

    /// Computed parent. `None` at a local root, the bucket root, or the
    /// archive root.
    ///
    /// Directory-shaped remote keys are stripped of their trailing separator
    /// before splitting, so the parent of `a/b/` is `a/`.
    pub fn parent(&self) -> Option<Self> {
        match self {
            // A bare relative name sits in the current directory, which has
            // no parent of its own.
            Self::Local(path) => match path.parent() {
                _ if path.as_os_str() == "." => None,
                Some(parent) if parent.as_os_str().is_empty() => Some(Self::Local(PathBuf::from("."))),
                parent => parent.map(|parent| Self::Local(parent.to_path_buf())),
            },
            Self::Remote { bucket, key } => {
                let trimmed = key.trim_end_matches('/');
                if trimmed.is_empty() {
                    return None;
                }
                let parent = match trimmed.rfind('/') {
                    Some(idx) => trimmed[..=idx].to_string(),
                    None => String::new(),
                };
                Some(Self::Remote { bucket: bucket.clone(), key: parent })
            },
            Self::Archive { container, entry } => {
                if entry.is_empty() {
                    return None;
                }
                let parent = entry.rfind('/').map(|idx| &entry[..idx]).unwrap_or("");
                Some(Self::Archive { container: container.clone(), entry: parent.to_string() })
            },
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Component-wise containment: `true` when `self` is `other` or lies
    /// somewhere beneath it.
    pub fn starts_with(&self, other: &Locator) -> bool {
        match (self, other) {
            (Self::Local(path), Self::Local(base)) => path.starts_with(base),
            (Self::Remote { bucket, key }, Self::Remote { bucket: base_bucket, key: base_key }) => {
                bucket == base_bucket && key_starts_with(key, base_key)
            },
            (
                Self::Archive { container, entry },
                Self::Archive { container: base_container, entry: base_entry },
            ) => container == base_container && key_starts_with(entry, base_entry),
            _ => false,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { bucket, key } => write!(f, "{REMOTE_SCHEME}{bucket}/{key}"),
            Self::Archive { container, entry } => match container.as_ref() {
                Self::Local(path) if ArchiveFormat::from_name(&path.to_string_lossy()).is_some() => {
                    write!(f, "{}{ENTRY_SEPARATOR}{entry}", path.display())
                },
                other => write!(f, "{ARCHIVE_SCHEME}{other}{ENTRY_SEPARATOR}{entry}"),
            },
        }
    }
}

/// Normalise an archive-internal path: no leading or trailing separators,
/// no `.` components, and `..` never climbs above the archive root.
pub(crate) fn normalize_entry(entry: &str) -> String {
    let mut components = Vec::new();
    for component in std::path::Path::new(entry).components() {
        match component {
            Component::Normal(segment) => components.push(segment.to_string_lossy().into_owned()),
            Component::ParentDir => {
                components.pop();
            },
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {},
        }
    }
    components.join("/")
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

fn key_relative_to(key: &str, base: &str) -> Option<String> {
    let key = key.trim_end_matches('/');
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return Some(key.to_string());
    }
    if key == base {
        return Some(String::new());
    }
    key.strip_prefix(base)?.strip_prefix('/').map(str::to_string)
}

fn key_starts_with(key: &str, base: &str) -> bool {
    let key = key.trim_end_matches('/');
    let base = base.trim_end_matches('/');
    base.is_empty() || key == base || key.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
}
