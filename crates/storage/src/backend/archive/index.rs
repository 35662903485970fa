//! In-memory member listing of an archive container.
//!
//! Parsing is synchronous (the `zip` and `tar` crates are blocking) and is
//! expected to run inside [`spawn_blocking`](tokio::task::spawn_blocking).

use super::format::ArchiveFormat;
use crate::error::{ErrorKind, Result};
use crate::locator::normalize_entry;
use crate::models::StatResult;
use exn::ResultExt;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::ops::Bound;
use std::path::Path;
use tar::EntryType;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use zip::ZipArchive;

/// One member of an archive, keyed by its normalised internal path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub size: u64,
    pub modified_at: OffsetDateTime,
    pub is_directory: bool,
    /// Target of a symbolic link member.
    pub link_target: Option<String>,
    /// Earlier member whose data a hard link member shares.
    pub hard_link: Option<String>,
}
impl IndexEntry {
    pub fn file(path: impl Into<String>, size: u64, modified_at: OffsetDateTime) -> Self {
        Self { path: path.into(), size, modified_at, is_directory: false, link_target: None, hard_link: None }
    }

    pub fn directory(path: impl Into<String>, modified_at: OffsetDateTime) -> Self {
        Self { path: path.into(), size: 0, modified_at, is_directory: true, link_target: None, hard_link: None }
    }

    /// Member to extract for this entry's content.
    pub fn content_path(&self) -> &str {
        self.hard_link.as_deref().unwrap_or(&self.path)
    }

    pub fn stat(&self) -> StatResult {
        StatResult {
            size: self.size,
            modified_at: self.modified_at,
            is_directory: self.is_directory,
            is_symlink: self.link_target.is_some(),
        }
    }
}

/// Immutable listing of every member, including directories that only exist
/// implicitly as the parent of some member.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl ArchiveIndex {
    /// Parse the member list of the container at `path`.
    pub fn read(path: &Path, format: ArchiveFormat) -> Result<Self> {
        let file = File::open(path).map_err(|e| ErrorKind::from_io(e, path.display()))?;
        let origin = path.display().to_string();
        let entries = match format {
            ArchiveFormat::Zip => read_zip_entries(file, &origin)?,
            _ => read_tar_entries(format.decompressor(file), &origin)?,
        };
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut map: BTreeMap<String, IndexEntry> = BTreeMap::new();
        for entry in entries {
            if entry.path.is_empty() {
                continue;
            }
            let mut ancestor = parent_of(&entry.path);
            while let Some(dir) = ancestor.filter(|dir| !dir.is_empty()) {
                map.entry(dir.to_string())
                    .or_insert_with(|| IndexEntry::directory(dir, OffsetDateTime::UNIX_EPOCH));
                ancestor = parent_of(dir);
            }
            map.insert(entry.path.clone(), entry);
        }
        Self { entries: map }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    /// The empty path is the archive root and always a directory.
    pub fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.entries.get(path).is_some_and(|entry| entry.is_directory)
    }

    /// Direct children of `dir`, by prefix matching on the sorted keys.
    pub fn children<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        let prefix = match dir.is_empty() {
            true => String::new(),
            false => format!("{dir}/"),
        };
        self.entries
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .map(|(_, entry)| entry)
            .take_while({
                let prefix = prefix.clone();
                move |entry| entry.path.starts_with(&prefix)
            })
            .filter(move |entry| !entry.path[prefix.len()..].contains('/'))
    }
}

/// Read a single member into memory.
pub fn extract(path: &Path, format: ArchiveFormat, member: &str) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| ErrorKind::from_io(e, path.display()))?;
    let origin = path.display().to_string();
    let mut data = Vec::new();
    match format {
        ArchiveFormat::Zip => {
            let mut archive = ZipArchive::new(file).or_raise(|| archive_error(&origin, "cannot read zip directory"))?;
            for index in 0..archive.len() {
                let mut entry = archive.by_index(index).or_raise(|| archive_error(&origin, "cannot read zip member"))?;
                if entry.is_dir() || normalize_entry(entry.name()) != member {
                    continue;
                }
                entry.read_to_end(&mut data).map_err(|e| ErrorKind::from_io(e, &origin))?;
                return Ok(data);
            }
        },
        _ => {
            let mut archive = tar::Archive::new(format.decompressor(file));
            let entries = archive.entries().map_err(|e| ErrorKind::from_io(e, &origin))?;
            for entry in entries {
                let mut entry = entry.or_raise(|| archive_error(&origin, "corrupt tar header"))?;
                let name = entry.path().map(|p| normalize_entry(&p.to_string_lossy())).unwrap_or_default();
                if name != member {
                    continue;
                }
                let kind = entry.header().entry_type();
                if !kind.is_file() && kind != EntryType::Continuous {
                    exn::bail!(archive_error(&origin, &format!("member `{member}` is not a regular file")));
                }
                entry.read_to_end(&mut data).map_err(|e| ErrorKind::from_io(e, &origin))?;
                return Ok(data);
            }
        },
    }
    exn::bail!(ErrorKind::NotFound(format!("{origin}#{member}")))
}

fn read_zip_entries(file: File, origin: &str) -> Result<Vec<IndexEntry>> {
    let mut archive = ZipArchive::new(file).or_raise(|| archive_error(origin, "cannot read zip directory"))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index).or_raise(|| archive_error(origin, "cannot read zip member"))?;
        let path = normalize_entry(entry.name());
        let modified_at = zip_timestamp(entry.last_modified());
        entries.push(match entry.is_dir() {
            true => IndexEntry::directory(path, modified_at),
            false => IndexEntry::file(path, entry.size(), modified_at),
        });
    }
    Ok(entries)
}

fn read_tar_entries(reader: impl Read, origin: &str) -> Result<Vec<IndexEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(|e| ErrorKind::from_io(e, origin))? {
        let entry = entry.or_raise(|| archive_error(origin, "corrupt tar header"))?;
        let path = entry.path().map(|p| normalize_entry(&p.to_string_lossy())).unwrap_or_default();
        let header = entry.header();
        let kind = header.entry_type();
        let modified_at = header
            .mtime()
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(i64::try_from(secs).ok()?).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        if kind.is_dir() {
            entries.push(IndexEntry::directory(path, modified_at));
        } else if kind.is_symlink() {
            let target = entry.link_name().ok().flatten().map(|t| t.to_string_lossy().into_owned());
            entries.push(IndexEntry { link_target: target, ..IndexEntry::file(path, 0, modified_at) });
        } else if kind.is_hard_link() {
            // Hard links carry no data of their own and always name an earlier member.
            let target = entry.link_name().ok().flatten().map(|t| normalize_entry(&t.to_string_lossy()));
            let size = target
                .as_deref()
                .and_then(|target| entries.iter().rev().find(|e: &&IndexEntry| e.path == target))
                .map_or(0, |e| e.size);
            entries.push(IndexEntry { hard_link: target, ..IndexEntry::file(path, size, modified_at) });
        } else if kind.is_file() || kind == EntryType::Continuous {
            entries.push(IndexEntry::file(path, entry.size(), modified_at));
        }
        // Device nodes, FIFOs and the like have no meaningful content.
    }
    Ok(entries)
}

fn zip_timestamp(stamp: zip::DateTime) -> OffsetDateTime {
    let date = Month::try_from(stamp.month())
        .ok()
        .and_then(|month| Date::from_calendar_date(i32::from(stamp.year()), month, stamp.day()).ok());
    let time = Time::from_hms(stamp.hour(), stamp.minute(), stamp.second()).ok();
    match (date, time) {
        (Some(date), Some(time)) => PrimitiveDateTime::new(date, time).assume_utc(),
        _ => OffsetDateTime::UNIX_EPOCH,
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.is_empty() {
        true => None,
        false => Some(path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")),
    }
}

fn archive_error(origin: &str, reason: &str) -> ErrorKind {
    ErrorKind::Archive(format!("{origin}: {reason}"))
}
